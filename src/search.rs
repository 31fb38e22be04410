//! Automatic threshold selection by leak detection
//!
//! The region is regrown at increasing thresholds. While the threshold stays
//! inside the airway lumen range, each step adds a modest number of voxels.
//! Once the region breaks through the airway wall it floods the lung
//! parenchyma and the voxel count jumps by far more than `explosion_factor`.
//! The last threshold before that jump is selected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use serde::Serialize;

use crate::errors::{AirwayError, Result, SegmentationWarning};
use crate::kernel::KernelProfile;
use crate::mask::Mask;
use crate::region_grow::{GrowStrategy, RegionGrower};
use crate::volume::{VolumeSampler, VoxelIndex};

/// Seed-only trials in a row that count as degenerate growth
const EMPTY_GROWTH_MIN_TRIALS: usize = 2;

/// Shared flag the host sets to stop a running search between trials
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Search parameters: kernel profile plus the hard intensity ceiling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    pub profile: KernelProfile,
    /// Highest threshold ever tried (HU)
    pub ceiling: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SearchState {
    Searching,
    ExplosionDetected,
    Exhausted,
}

/// One region-growing trial
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrialRecord {
    pub threshold: f32,
    pub voxel_count: usize,
}

/// Result of a completed search
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub state: SearchState,
    pub selected_threshold: f32,
    /// Region grown at `selected_threshold`
    pub selected_mask: Mask,
    /// Every trial in the order it was run
    pub trials: Vec<TrialRecord>,
    pub warnings: Vec<SegmentationWarning>,
}

impl SearchOutcome {
    /// Exhausted searches select the ceiling without evidence of a leak
    pub fn is_low_confidence(&self) -> bool {
        self.state == SearchState::Exhausted
    }
}

/// Drives [`RegionGrower`] across thresholds until a leak or the ceiling
pub struct ThresholdSearch<'a> {
    sampler: VolumeSampler<'a>,
    grower: RegionGrower<'a>,
    params: SearchParams,
    cancel: Option<CancelFlag>,
}

impl<'a> ThresholdSearch<'a> {
    pub fn new(sampler: VolumeSampler<'a>, params: SearchParams) -> Self {
        Self {
            sampler,
            grower: RegionGrower::new(sampler),
            params,
            cancel: None,
        }
    }

    pub fn with_strategy(mut self, strategy: GrowStrategy) -> Self {
        self.grower = self.grower.with_strategy(strategy);
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn run(&self, seed: VoxelIndex) -> Result<SearchOutcome> {
        self.run_with_progress(seed, |_, _| {})
    }

    /// Run the search, calling `progress(trial_number, record)` after every trial
    pub fn run_with_progress<F>(&self, seed: VoxelIndex, mut progress: F) -> Result<SearchOutcome>
    where
        F: FnMut(usize, &TrialRecord),
    {
        let SearchParams { profile, ceiling } = self.params;
        if !(profile.step_size > 0.0) || !(profile.explosion_factor > 1.0) {
            return Err(AirwayError::Config(format!(
                "invalid search profile: step_size={} explosion_factor={}",
                profile.step_size, profile.explosion_factor
            )));
        }

        let seed_intensity = self.sampler.intensity_at(seed).map_err(|_| AirwayError::OutOfBoundsSeed {
            seed: seed.into(),
            dims: self.sampler.dims(),
        })?;
        if !(seed_intensity <= ceiling) {
            return Err(AirwayError::DegenerateSeed {
                intensity: seed_intensity,
                ceiling,
            });
        }

        let first_threshold = profile.start_threshold.min(ceiling);
        if seed_intensity > first_threshold {
            warn!(
                "Seed intensity {:.1} is above the start threshold {:.1}; early trials will be empty",
                seed_intensity, first_threshold
            );
        }

        let mut trials: Vec<TrialRecord> = Vec::new();
        let mut previous: Option<(TrialRecord, Mask)> = None;
        let mut seed_only_run = 0usize;
        let mut threshold = first_threshold;
        let mut step = 0u32;

        loop {
            if self.cancel.as_ref().map_or(false, CancelFlag::is_cancelled) {
                return Err(AirwayError::Cancelled { trials: trials.len() });
            }

            let mask = self.grower.grow(seed, threshold)?;
            if threshold >= seed_intensity && !mask.contains(seed) {
                return Err(AirwayError::SeedExcluded { seed, threshold });
            }

            let record = TrialRecord {
                threshold,
                voxel_count: mask.voxel_count(),
            };
            debug!("Trial {}: threshold {:.1} -> {} voxels", trials.len(), threshold, record.voxel_count);
            progress(trials.len(), &record);
            trials.push(record);

            seed_only_run = if record.voxel_count == 1 { seed_only_run + 1 } else { 0 };

            let exploded = previous.as_ref().map_or(false, |(prev_record, _)| {
                is_explosion(prev_record.voxel_count, record.voxel_count, profile.explosion_factor)
            });
            let state = if exploded {
                SearchState::ExplosionDetected
            } else if threshold >= ceiling {
                SearchState::Exhausted
            } else {
                SearchState::Searching
            };

            match (state, previous.take()) {
                (SearchState::ExplosionDetected, Some((safe_record, safe_mask))) => {
                    debug!(
                        "Leak at threshold {:.1}: {} -> {} voxels",
                        threshold, safe_record.voxel_count, record.voxel_count
                    );
                    return Ok(SearchOutcome {
                        state,
                        selected_threshold: safe_record.threshold,
                        selected_mask: safe_mask,
                        trials,
                        warnings: Vec::new(),
                    });
                }
                (SearchState::Exhausted, _) => {
                    let mut warnings = vec![SegmentationWarning::ExhaustedSearch {
                        ceiling,
                        last_threshold: threshold,
                    }];
                    if seed_only_run >= EMPTY_GROWTH_MIN_TRIALS {
                        warnings.push(SegmentationWarning::EmptyGrowth {
                            consecutive_trials: seed_only_run,
                        });
                    }
                    for warning in &warnings {
                        warn!("{}", warning);
                    }
                    return Ok(SearchOutcome {
                        state,
                        selected_threshold: threshold,
                        selected_mask: mask,
                        trials,
                        warnings,
                    });
                }
                _ => {}
            }

            previous = Some((record, mask));
            step += 1;
            // Computed from the start each time so the sequence does not drift
            threshold = (first_threshold + profile.step_size * step as f32).min(ceiling);
        }
    }
}

/// A leak is a disproportionate jump from a region that already held the seed
fn is_explosion(previous_count: usize, current_count: usize, factor: f32) -> bool {
    previous_count > 0 && current_count as f64 > previous_count as f64 * factor as f64
}
