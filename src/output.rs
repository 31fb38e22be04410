use std::fs;
use std::path::{Path, PathBuf};

use csv::Writer;
use image::{Rgb, RgbImage};
use serde::Serialize;

use crate::assembler::SegmentStatistics;
use crate::config::Config;
use crate::errors::{AirwayError, Result};
use crate::pipeline::SegmentationRun;
use crate::search::{SearchState, TrialRecord};
use crate::volume::{Volume, VoxelIndex};

/// Display window for the preview slice (HU)
const WINDOW_MIN: f32 = -1000.0;
const WINDOW_MAX: f32 = 200.0;

const OVERLAY_COLOR: [u8; 3] = [255, 64, 64];
const OVERLAY_ALPHA: f32 = 0.6;

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Write the threshold trials to CSV
pub fn write_trials_csv<P: AsRef<Path>>(trials: &[TrialRecord], path: P) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;

    let mut writer = Writer::from_path(path)?;
    writer.write_record(["Threshold", "Voxel_Count", "Growth_Ratio"])?;

    let mut previous: Option<usize> = None;
    for trial in trials {
        let ratio = match previous {
            Some(prev) if prev > 0 => format!("{:.6}", trial.voxel_count as f64 / prev as f64),
            _ => String::new(),
        };
        writer.write_record(&[
            format!("{:.1}", trial.threshold),
            trial.voxel_count.to_string(),
            ratio,
        ])?;
        previous = Some(trial.voxel_count);
    }

    writer.flush().map_err(|e| AirwayError::CsvOutput(csv::Error::from(e)))?;
    Ok(())
}

/// JSON summary of a run
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub kernel_name: Option<String>,
    pub kernel_category: String,
    pub start_threshold: f32,
    pub step_size: f32,
    pub explosion_factor: f32,
    pub seed: VoxelIndex,
    pub seed_intensity: f32,
    pub selected_threshold: f32,
    pub state: SearchState,
    pub low_confidence: bool,
    pub trial_count: usize,
    pub warnings: Vec<String>,
    pub statistics: SegmentStatistics,
    pub elapsed_seconds: f64,
}

impl RunSummary {
    pub fn from_run(run: &SegmentationRun) -> Self {
        let result = &run.result;
        Self {
            kernel_name: run.kernel_name.clone(),
            kernel_category: run.kernel.to_string(),
            start_threshold: run.profile.start_threshold,
            step_size: run.profile.step_size,
            explosion_factor: run.profile.explosion_factor,
            seed: run.seed,
            seed_intensity: run.seed_intensity,
            selected_threshold: result.threshold,
            state: result.state,
            low_confidence: result.is_low_confidence(),
            trial_count: result.trials.len(),
            warnings: result.warnings.iter().map(ToString::to_string).collect(),
            statistics: result.statistics(),
            elapsed_seconds: run.elapsed.as_secs_f64(),
        }
    }
}

pub fn write_summary_json<P: AsRef<Path>>(run: &SegmentationRun, path: P) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(&RunSummary::from_run(run))?;
    fs::write(path, json)?;
    Ok(())
}

/// Map an intensity into the preview window
fn window(intensity: f32) -> u8 {
    if !intensity.is_finite() {
        return 0;
    }
    let t = ((intensity - WINDOW_MIN) / (WINDOW_MAX - WINDOW_MIN)).clamp(0.0, 1.0);
    (t * 255.0).round() as u8
}

/// Axial slice through the seed with the mask blended on top
pub fn render_mask_preview(volume: &Volume, run: &SegmentationRun) -> Result<RgbImage> {
    let (nx, ny, nz) = volume.dims();
    let mask = &run.result.mask;
    if mask.dims() != (nx, ny, nz) {
        return Err(AirwayError::InvalidVolume(format!(
            "mask grid {:?} does not match volume grid {:?}",
            mask.dims(),
            (nx, ny, nz)
        )));
    }
    let k = run.seed.k.min(nz.saturating_sub(1));
    let width = u32::try_from(nx).map_err(|_| AirwayError::InvalidVolume("slice too wide".to_string()))?;
    let height = u32::try_from(ny).map_err(|_| AirwayError::InvalidVolume("slice too tall".to_string()))?;

    let sampler = volume.sampler();
    let mut img = RgbImage::new(width, height);
    for j in 0..ny {
        for i in 0..nx {
            let index = VoxelIndex::new(i, j, k);
            let gray = window(sampler.intensity_at(index)?);
            let pixel = if mask.contains(index) {
                let blend = |c: u8| {
                    (gray as f32 * (1.0 - OVERLAY_ALPHA) + c as f32 * OVERLAY_ALPHA).round() as u8
                };
                Rgb([blend(OVERLAY_COLOR[0]), blend(OVERLAY_COLOR[1]), blend(OVERLAY_COLOR[2])])
            } else {
                Rgb([gray, gray, gray])
            };
            img.put_pixel(i as u32, j as u32, pixel);
        }
    }
    Ok(img)
}

pub fn save_mask_preview<P: AsRef<Path>>(volume: &Volume, run: &SegmentationRun, path: P) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    render_mask_preview(volume, run)?.save(path)?;
    Ok(())
}

/// Write the diagnostics enabled in the config into `report_dir`; returns the files written
pub fn write_reports<P: AsRef<Path>>(
    volume: &Volume,
    run: &SegmentationRun,
    config: &Config,
    report_dir: P,
    stem: &str,
) -> Result<Vec<PathBuf>> {
    let report_dir = report_dir.as_ref();
    fs::create_dir_all(report_dir)?;

    let mut written = Vec::new();
    if config.write_trial_csv {
        let path = report_dir.join(format!("{}_trials.csv", stem));
        write_trials_csv(&run.result.trials, &path)?;
        written.push(path);
    }
    if config.write_summary_json {
        let path = report_dir.join(format!("{}_summary.json", stem));
        write_summary_json(run, &path)?;
        written.push(path);
    }
    if config.write_preview_png {
        let path = report_dir.join(format!("{}_preview.png", stem));
        save_mask_preview(volume, run, &path)?;
        written.push(path);
    }
    Ok(written)
}
