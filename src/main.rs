use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use log::{info, LevelFilter};

use airway_segmentation_lib::output::write_reports;
use airway_segmentation_lib::volume_io::{read_volume, write_label_map};
use airway_segmentation_lib::{segment_airways, Config};

/// Command-line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about = "Airway segmentation from chest CT")]
struct Args {
    /// Input CT volume (.nii or .nii.gz)
    #[clap(short, long)]
    input: PathBuf,

    /// Seed point in physical coordinates (mm), e.g. "12.5,-140.0,-85.25"
    #[clap(short, long, value_parser = parse_seed, allow_hyphen_values = true)]
    seed: [f64; 3],

    /// Reconstruction kernel name from the DICOM header (e.g. B70f, LUNG, FC51)
    #[clap(short, long)]
    kernel: Option<String>,

    /// Output label map (.nii or .nii.gz)
    #[clap(short, long)]
    output: PathBuf,

    /// Path to configuration file (built-in defaults when omitted)
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Directory for trial CSV, summary JSON and preview PNG
    #[clap(short, long)]
    report_dir: Option<PathBuf>,

    /// Disable parallel region growing (overwrites config)
    #[clap(long)]
    no_parallel: bool,

    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,
}

fn parse_seed(value: &str) -> std::result::Result<[f64; 3], String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(format!("expected X,Y,Z but got '{}'", value));
    }
    let mut seed = [0.0; 3];
    for (slot, part) in seed.iter_mut().zip(&parts) {
        *slot = part
            .parse::<f64>()
            .map_err(|e| format!("invalid coordinate '{}': {}", part, e))?;
        if !slot.is_finite() {
            return Err(format!("coordinate '{}' is not finite", part));
        }
    }
    Ok(seed)
}

/// Output file name without `.nii` / `.nii.gz`
fn output_stem(path: &std::path::Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "airway".to_string());
    name.trim_end_matches(".gz")
        .trim_end_matches(".nii")
        .to_string()
}

/// Main function
fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // RUST_LOG takes precedence over the --debug level
    env_logger::Builder::new()
        .filter_level(if args.debug { LevelFilter::Debug } else { LevelFilter::Info })
        .parse_default_env()
        .init();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => Config::default(),
    };
    if args.no_parallel {
        config.use_parallel = false;
    }
    config.validate().context("invalid configuration")?;

    let start_time = Instant::now();

    info!("Reading volume: {}", args.input.display());
    let volume = read_volume(&args.input)
        .with_context(|| format!("reading CT volume {}", args.input.display()))?;
    let (nx, ny, nz) = volume.dims();
    info!("Volume {}x{}x{}, spacing {:?} mm", nx, ny, nz, volume.geometry().spacing);

    let run = segment_airways(&volume, args.seed, args.kernel.as_deref(), &config, None)
        .context("airway segmentation failed")?;

    let labels = run.result.label_map(config.label_value);
    write_label_map(&args.output, &labels)
        .with_context(|| format!("writing label map {}", args.output.display()))?;
    info!("Label map written to {}", args.output.display());

    if let Some(report_dir) = &args.report_dir {
        let written = write_reports(&volume, &run, &config, report_dir, &output_stem(&args.output))
            .with_context(|| format!("writing reports to {}", report_dir.display()))?;
        for path in written {
            info!("Report written: {}", path.display());
        }
    }

    let stats = run.result.statistics();
    println!(
        "Threshold {:.1} HU ({:?}), {} voxels, {:.2} mL",
        run.result.threshold, run.result.state, stats.voxel_count, stats.volume_ml
    );

    let elapsed = start_time.elapsed();
    info!("Processing completed in {:.2} seconds", elapsed.as_secs_f64());

    Ok(())
}
