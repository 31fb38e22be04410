//! Threshold search on synthetic airway phantoms

mod common;

use std::cell::RefCell;

use airway_segmentation_lib::{
    AirwayError, CancelFlag, GrowStrategy, RegionGrower, SearchState, SegmentationAssembler,
    SegmentationWarning, ThresholdSearch, VoxelIndex,
};
use common::*;

#[test]
fn tube_converges_to_last_step_before_background() {
    let volume = tube_volume(5.0, 50.0);
    let seed = VoxelIndex::new(4, 4, 0);
    let outcome = ThresholdSearch::new(volume.sampler(), params(0.0, 5.0, 3.0, 100.0))
        .run(seed)
        .unwrap();

    assert_eq!(outcome.state, SearchState::ExplosionDetected);
    assert_eq!(outcome.selected_threshold, 45.0);
    assert!(outcome.warnings.is_empty());

    // Threshold 0 sits below the tube, so the seed is not yet included
    assert_eq!(outcome.trials[0].voxel_count, 0);
    assert!(outcome.trials[1..outcome.trials.len() - 1].iter().all(|t| t.voxel_count == 6));
    assert_eq!(outcome.trials.last().map(|t| t.voxel_count), Some(1000));

    let grower = RegionGrower::new(volume.sampler());
    let result = SegmentationAssembler::new(grower, volume.geometry())
        .assemble(seed, outcome)
        .unwrap();
    let voxels: Vec<VoxelIndex> = result.mask.iter_indices().collect();
    assert_eq!(voxels, tube_voxels());
    assert_eq!(result.geometry, *volume.geometry());
}

#[test]
fn corridor_leak_selects_threshold_below_corridor() {
    let volume = two_blobs_with_corridor(30.0);
    let seed = VoxelIndex::new(2, 4, 4);
    let outcome = ThresholdSearch::new(volume.sampler(), params(0.0, 10.0, 2.0, 60.0))
        .run(seed)
        .unwrap();

    assert_eq!(outcome.state, SearchState::ExplosionDetected);
    assert_eq!(outcome.selected_threshold, 20.0);
    assert!(outcome.selected_threshold < 30.0);
    assert_eq!(outcome.selected_mask.voxel_count(), 64);
    assert!(!outcome.selected_mask.contains(VoxelIndex::new(10, 4, 4)));

    let thresholds: Vec<f32> = outcome.trials.iter().map(|t| t.threshold).collect();
    assert_eq!(thresholds, vec![0.0, 10.0, 20.0, 30.0]);
    assert_eq!(outcome.trials[3].voxel_count, 64 + 4 + 640);
}

#[test]
fn leak_straight_after_seed_only_trials_is_detected() {
    // Isolated dark seed voxel inside uniform parenchyma
    let seed = VoxelIndex::new(5, 5, 5);
    let volume = volume_from_fn((10, 10, 10), |v| if v == seed { -1000.0 } else { -900.0 });
    let outcome = ThresholdSearch::new(volume.sampler(), params(-1000.0, 50.0, 2.0, -400.0))
        .run(seed)
        .unwrap();

    let counts: Vec<usize> = outcome.trials.iter().map(|t| t.voxel_count).collect();
    assert_eq!(counts, vec![1, 1, 1000]);
    assert_eq!(outcome.state, SearchState::ExplosionDetected);
    assert_eq!(outcome.selected_threshold, -950.0);
    assert_eq!(outcome.selected_mask.voxel_count(), 1);
    assert!(outcome.selected_mask.contains(seed));
}

#[test]
fn growth_from_empty_trial_is_not_a_leak() {
    // Seed cube at 15 sits above the first two thresholds
    let volume = volume_from_fn((10, 10, 10), |v| {
        if v.i < 4 && v.j < 4 && v.k < 4 { 15.0 } else { 60.0 }
    });
    let seed = VoxelIndex::new(1, 1, 1);
    let outcome = ThresholdSearch::new(volume.sampler(), params(0.0, 10.0, 2.0, 100.0))
        .run(seed)
        .unwrap();

    let counts: Vec<usize> = outcome.trials.iter().map(|t| t.voxel_count).collect();
    assert_eq!(counts, vec![0, 0, 64, 64, 64, 64, 1000]);
    assert_eq!(outcome.state, SearchState::ExplosionDetected);
    assert_eq!(outcome.selected_threshold, 50.0);
    assert_eq!(outcome.selected_mask.voxel_count(), 64);
    assert!(outcome.selected_mask.contains(seed));
}

#[test]
fn smooth_ramp_exhausts_at_ceiling() {
    let volume = ramp_volume((20, 4, 4));
    let seed = VoxelIndex::new(0, 0, 0);
    let outcome = ThresholdSearch::new(volume.sampler(), params(0.0, 1.0, 2.0, 10.0))
        .run(seed)
        .unwrap();

    assert_eq!(outcome.state, SearchState::Exhausted);
    assert!(outcome.is_low_confidence());
    assert_eq!(outcome.selected_threshold, 10.0);
    assert_eq!(outcome.selected_mask.voxel_count(), 11 * 16);
    assert_eq!(outcome.trials.len(), 11);
    assert!(matches!(
        outcome.warnings.as_slice(),
        [SegmentationWarning::ExhaustedSearch { .. }]
    ));
}

#[test]
fn seed_on_every_corner_stays_in_bounds() {
    let volume = volume_from_fn((5, 6, 7), |v| if v.i == 0 || v.i == 4 { 0.0 } else { 10.0 });
    let grower = RegionGrower::new(volume.sampler());
    for &(i, j, k) in &[(0, 0, 0), (0, 5, 6), (4, 0, 6), (4, 5, 0)] {
        let seed = VoxelIndex::new(i, j, k);
        let mask = grower.grow(seed, 5.0).unwrap();
        assert_eq!(mask.voxel_count(), 6 * 7, "seed {}", seed);
        assert!(mask.contains(seed));
    }
}

#[test]
fn fatal_seed_conditions() {
    let volume = tube_volume(5.0, 50.0);
    let search = ThresholdSearch::new(volume.sampler(), params(0.0, 5.0, 3.0, 40.0));

    let err = search.run(VoxelIndex::new(10, 0, 0)).unwrap_err();
    assert!(matches!(err, AirwayError::OutOfBoundsSeed { .. }));

    // Background voxel brighter than the ceiling
    let err = search.run(VoxelIndex::new(0, 0, 0)).unwrap_err();
    assert!(matches!(err, AirwayError::DegenerateSeed { intensity, ceiling } if intensity == 50.0 && ceiling == 40.0));
}

#[test]
fn cancellation_between_trials() {
    let volume = ramp_volume((20, 4, 4));
    let cancel = CancelFlag::new();
    let search = ThresholdSearch::new(volume.sampler(), params(0.0, 1.0, 2.0, 10.0))
        .with_cancel_flag(cancel.clone());

    let seen = RefCell::new(Vec::new());
    let err = search
        .run_with_progress(VoxelIndex::new(0, 0, 0), |n, record| {
            seen.borrow_mut().push(record.threshold);
            if n == 1 {
                cancel.cancel();
            }
        })
        .unwrap_err();

    assert!(matches!(err, AirwayError::Cancelled { trials: 2 }));
    assert_eq!(*seen.borrow(), vec![0.0, 1.0]);
}

#[test]
fn parallel_search_matches_sequential() {
    let volume = two_blobs_with_corridor(30.0);
    let seed = VoxelIndex::new(2, 4, 4);
    let sequential = ThresholdSearch::new(volume.sampler(), params(0.0, 10.0, 2.0, 60.0))
        .run(seed)
        .unwrap();
    let parallel = ThresholdSearch::new(volume.sampler(), params(0.0, 10.0, 2.0, 60.0))
        .with_strategy(GrowStrategy::ParallelFrontier)
        .run(seed)
        .unwrap();

    assert_eq!(sequential.trials, parallel.trials);
    assert_eq!(sequential.selected_mask, parallel.selected_mask);
}
