// src/pipeline.rs - Seed-to-label-map segmentation pipeline

use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::assembler::{SegmentationAssembler, SegmentationResult};
use crate::config::Config;
use crate::errors::{AirwayError, Result, SeedPosition, SegmentationWarning};
use crate::kernel::{KernelCategory, KernelProfile};
use crate::region_grow::{GrowStrategy, RegionGrower};
use crate::search::{CancelFlag, SearchParams, ThresholdSearch, TrialRecord};
use crate::volume::{Volume, VoxelIndex};

/// Everything produced by one segmentation request
#[derive(Debug, Clone)]
pub struct SegmentationRun {
    /// Kernel name as supplied by the caller
    pub kernel_name: Option<String>,
    pub kernel: KernelCategory,
    pub profile: KernelProfile,
    pub seed: VoxelIndex,
    pub seed_intensity: f32,
    pub result: SegmentationResult,
    pub elapsed: Duration,
}

/// Resolve the kernel category, recording a warning when it is not recognized
pub fn resolve_kernel(kernel_name: Option<&str>) -> (KernelCategory, Option<SegmentationWarning>) {
    let category = kernel_name
        .map(KernelCategory::from_kernel_name)
        .unwrap_or(KernelCategory::Unknown);

    if category == KernelCategory::Unknown {
        let warning = SegmentationWarning::UnknownKernel {
            name: kernel_name.map(str::to_string),
        };
        warn!("{}", warning);
        (category, Some(warning))
    } else {
        (category, None)
    }
}

/// Grow sequentially on small volumes; the frontier overhead only pays off on large ones
fn select_strategy(volume: &Volume, config: &Config) -> GrowStrategy {
    if config.use_parallel && volume.geometry().voxel_count() >= config.parallel_min_voxels {
        GrowStrategy::ParallelFrontier
    } else {
        GrowStrategy::Sequential
    }
}

/// Segment the airway tree from a seed given in physical coordinates (mm)
pub fn segment_airways(
    volume: &Volume,
    seed_physical: [f64; 3],
    kernel_name: Option<&str>,
    config: &Config,
    cancel: Option<CancelFlag>,
) -> Result<SegmentationRun> {
    let seed = volume
        .geometry()
        .physical_to_index(seed_physical)?
        .ok_or(AirwayError::OutOfBoundsSeed {
            seed: SeedPosition::Physical(seed_physical),
            dims: volume.dims(),
        })?;
    debug!(
        "Seed [{:.2}, {:.2}, {:.2}] mm -> voxel {}",
        seed_physical[0], seed_physical[1], seed_physical[2], seed
    );
    segment_airways_at_index(volume, seed, kernel_name, config, cancel, |_, _| {})
}

/// Segment from a seed voxel, reporting every threshold trial to `progress`
pub fn segment_airways_at_index<F>(
    volume: &Volume,
    seed: VoxelIndex,
    kernel_name: Option<&str>,
    config: &Config,
    cancel: Option<CancelFlag>,
    progress: F,
) -> Result<SegmentationRun>
where
    F: FnMut(usize, &TrialRecord),
{
    let start_time = Instant::now();
    config.validate()?;

    let sampler = volume.sampler();
    let seed_intensity = sampler.intensity_at(seed).map_err(|_| AirwayError::OutOfBoundsSeed {
        seed: seed.into(),
        dims: volume.dims(),
    })?;

    let (kernel, kernel_warning) = resolve_kernel(kernel_name);
    let profile = config.profile_for(kernel);
    let strategy = select_strategy(volume, config);
    info!(
        "Processing started: seed {} ({:.1} HU), kernel {}, start {:.1} step {:.1} factor {:.2}, {:?}",
        seed,
        seed_intensity,
        kernel,
        profile.start_threshold,
        profile.step_size,
        profile.explosion_factor,
        strategy
    );

    let params = SearchParams {
        profile,
        ceiling: config.intensity_ceiling,
    };
    let mut search = ThresholdSearch::new(sampler, params).with_strategy(strategy);
    if let Some(cancel) = cancel {
        search = search.with_cancel_flag(cancel);
    }
    let outcome = search.run_with_progress(seed, progress)?;

    let grower = RegionGrower::new(sampler).with_strategy(strategy);
    let mut result = SegmentationAssembler::new(grower, volume.geometry()).assemble(seed, outcome)?;
    if let Some(warning) = kernel_warning {
        result.warnings.insert(0, warning);
    }

    let elapsed = start_time.elapsed();
    info!(
        "Selected threshold {:.1} HU ({:?}, {} voxels, {} trials)",
        result.threshold,
        result.state,
        result.mask.voxel_count(),
        result.trials.len()
    );
    info!("Processing completed in {:.2} seconds", elapsed.as_secs_f64());

    Ok(SegmentationRun {
        kernel_name: kernel_name.map(str::to_string),
        kernel,
        profile,
        seed,
        seed_intensity,
        result,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchState;
    use crate::volume::Geometry;

    /// Straight dark tube along x surrounded by lung-like tissue
    fn tube_volume() -> Volume {
        let geometry = Geometry::new((16, 8, 8), [1.0; 3], [-8.0, -4.0, -4.0]);
        Volume::from_fn(geometry, |v| {
            if v.j == 4 && v.k == 4 { -1000.0 } else { -850.0 }
        })
        .unwrap()
    }

    #[test]
    fn test_resolve_kernel() {
        assert_eq!(resolve_kernel(Some("B70f")).0, KernelCategory::Hard);
        assert!(resolve_kernel(Some("B70f")).1.is_none());

        let (category, warning) = resolve_kernel(Some("XYZ-42"));
        assert_eq!(category, KernelCategory::Unknown);
        assert_eq!(
            warning,
            Some(SegmentationWarning::UnknownKernel { name: Some("XYZ-42".to_string()) })
        );
        assert!(resolve_kernel(None).1.is_some());
    }

    #[test]
    fn test_strategy_selection() {
        let volume = tube_volume();
        let mut config = Config::default();
        assert_eq!(select_strategy(&volume, &config), GrowStrategy::Sequential);
        config.parallel_min_voxels = 100;
        assert_eq!(select_strategy(&volume, &config), GrowStrategy::ParallelFrontier);
        config.use_parallel = false;
        assert_eq!(select_strategy(&volume, &config), GrowStrategy::Sequential);
    }

    #[test]
    fn test_tube_segmentation_from_physical_seed() {
        let volume = tube_volume();
        // Voxel (8, 4, 4)
        let run = segment_airways(&volume, [0.2, 0.0, -0.1], Some("STANDARD"), &Config::default(), None)
            .unwrap();
        assert_eq!(run.seed, VoxelIndex::new(8, 4, 4));
        assert_eq!(run.kernel, KernelCategory::Standard);
        assert_eq!(run.result.state, SearchState::ExplosionDetected);
        assert_eq!(run.result.mask.voxel_count(), 16);
        assert!(run.result.threshold < -850.0);
        assert!(run.result.warnings.is_empty());
    }

    #[test]
    fn test_unknown_kernel_warning_is_reported() {
        let volume = tube_volume();
        let run = segment_airways(&volume, [0.0, 0.0, 0.0], None, &Config::default(), None).unwrap();
        assert_eq!(run.kernel, KernelCategory::Unknown);
        assert_eq!(run.profile, KernelProfile::for_category(KernelCategory::Standard));
        assert!(matches!(
            run.result.warnings.first(),
            Some(SegmentationWarning::UnknownKernel { name: None })
        ));
    }

    #[test]
    fn test_seed_outside_volume() {
        let volume = tube_volume();
        let err = segment_airways(&volume, [100.0, 0.0, 0.0], None, &Config::default(), None)
            .unwrap_err();
        assert!(matches!(
            err,
            AirwayError::OutOfBoundsSeed { seed: SeedPosition::Physical(p), dims: (16, 8, 8) } if p == [100.0, 0.0, 0.0]
        ));
        assert!(err.to_string().contains("[100.00, 0.00, 0.00]"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let volume = tube_volume();
        let mut config = Config::default();
        config.label_value = 0;
        let err = segment_airways_at_index(&volume, VoxelIndex::new(8, 4, 4), None, &config, None, |_, _| {})
            .unwrap_err();
        assert!(matches!(err, AirwayError::Config(_)));
    }

    #[test]
    fn test_cancelled_before_first_trial() {
        let volume = tube_volume();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = segment_airways(&volume, [0.0, 0.0, 0.0], Some("B30f"), &Config::default(), Some(cancel))
            .unwrap_err();
        assert!(matches!(err, AirwayError::Cancelled { trials: 0 }));
    }
}
