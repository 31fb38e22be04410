//! Seeded connected-threshold region growing
//!
//! Collects the 6-connected component of voxels with intensity `<= threshold`
//! that contains the seed. Each call owns its visited state, so trials at
//! different thresholds are independent and reproducible.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;

use crate::errors::{AirwayError, Result};
use crate::mask::Mask;
use crate::volume::{VolumeSampler, VoxelIndex};

/// Traversal used by [`RegionGrower`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowStrategy {
    /// Single-threaded queue-based breadth-first fill
    Sequential,
    /// Level-synchronous breadth-first fill; each frontier is expanded with rayon
    ParallelFrontier,
}

/// Connected-threshold flood fill over a borrowed volume
#[derive(Debug, Clone, Copy)]
pub struct RegionGrower<'a> {
    sampler: VolumeSampler<'a>,
    strategy: GrowStrategy,
}

impl<'a> RegionGrower<'a> {
    pub fn new(sampler: VolumeSampler<'a>) -> Self {
        Self {
            sampler,
            strategy: GrowStrategy::Sequential,
        }
    }

    pub fn with_strategy(mut self, strategy: GrowStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> GrowStrategy {
        self.strategy
    }

    /// Grow the region containing `seed` at `threshold`.
    ///
    /// Returns an empty mask when the seed itself is brighter than the threshold.
    /// Fails only when the seed lies outside the grid.
    pub fn grow(&self, seed: VoxelIndex, threshold: f32) -> Result<Mask> {
        let dims = self.sampler.dims();
        let seed_linear = self
            .sampler
            .geometry()
            .linear_index(seed)
            .ok_or(AirwayError::OutOfBoundsSeed { seed: seed.into(), dims })?;

        if !within(self.sampler.intensity_at_linear(seed_linear), threshold) {
            return Ok(Mask::new(dims));
        }

        let mask = match self.strategy {
            GrowStrategy::Sequential => self.grow_sequential(seed_linear, threshold),
            GrowStrategy::ParallelFrontier => self.grow_parallel(seed_linear, threshold),
        };
        Ok(mask)
    }

    fn grow_sequential(&self, seed: usize, threshold: f32) -> Mask {
        let mut mask = Mask::new(self.sampler.dims());
        let mut queue = VecDeque::new();

        mask.insert_linear(seed);
        queue.push_back(seed);

        while let Some(current) = queue.pop_front() {
            for neighbor in self.sampler.neighbor_offsets(current) {
                if mask.contains_linear(neighbor) {
                    continue;
                }
                if !within(self.sampler.intensity_at_linear(neighbor), threshold) {
                    continue;
                }
                mask.insert_linear(neighbor);
                queue.push_back(neighbor);
            }
        }

        mask
    }

    fn grow_parallel(&self, seed: usize, threshold: f32) -> Mask {
        let dims = self.sampler.dims();
        let visited: Vec<AtomicBool> = (0..dims.0 * dims.1 * dims.2)
            .map(|_| AtomicBool::new(false))
            .collect();
        visited[seed].store(true, Ordering::Relaxed);

        let sampler = self.sampler;
        let mut frontier = vec![seed];
        while !frontier.is_empty() {
            frontier = frontier
                .par_iter()
                .flat_map_iter(|&current| {
                    let visited = &visited;
                    sampler.neighbor_offsets(current).filter(move |&neighbor| {
                        within(sampler.intensity_at_linear(neighbor), threshold)
                            // Claim the voxel so only one worker enqueues it
                            && visited[neighbor]
                                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                                .is_ok()
                    })
                })
                .collect();
        }

        let voxels = visited.into_iter().map(AtomicBool::into_inner).collect();
        Mask::from_raw(dims, voxels)
    }
}

/// Inclusion test; NaN intensities never join a region
#[inline]
fn within(intensity: f32, threshold: f32) -> bool {
    intensity <= threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{Geometry, Volume};

    fn unit_geometry(dims: (usize, usize, usize)) -> Geometry {
        Geometry::new(dims, [1.0; 3], [0.0; 3])
    }

    /// Two 3x3x3 dark cubes separated by a bright wall at i == 4
    fn two_cubes() -> Volume {
        Volume::from_fn(unit_geometry((9, 5, 5)), |v| {
            let inside_j = (1..=3).contains(&v.j) && (1..=3).contains(&v.k);
            if inside_j && ((1..=3).contains(&v.i) || (5..=7).contains(&v.i)) {
                -1000.0
            } else {
                0.0
            }
        })
        .unwrap()
    }

    #[test]
    fn test_grow_single_component() {
        let volume = two_cubes();
        let grower = RegionGrower::new(volume.sampler());
        let mask = grower.grow(VoxelIndex::new(2, 2, 2), -500.0).unwrap();
        assert_eq!(mask.voxel_count(), 27);
        assert!(mask.contains(VoxelIndex::new(1, 1, 1)));
        assert!(!mask.contains(VoxelIndex::new(5, 2, 2)));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let volume = two_cubes();
        let grower = RegionGrower::new(volume.sampler());
        let mask = grower.grow(VoxelIndex::new(2, 2, 2), -1000.0).unwrap();
        assert_eq!(mask.voxel_count(), 27);
    }

    #[test]
    fn test_seed_above_threshold_gives_empty_mask() {
        let volume = two_cubes();
        let grower = RegionGrower::new(volume.sampler());
        let mask = grower.grow(VoxelIndex::new(0, 0, 0), -500.0).unwrap();
        assert!(mask.is_empty());
    }

    #[test]
    fn test_seed_out_of_bounds() {
        let volume = two_cubes();
        let grower = RegionGrower::new(volume.sampler());
        let err = grower.grow(VoxelIndex::new(9, 0, 0), 0.0).unwrap_err();
        assert!(matches!(err, AirwayError::OutOfBoundsSeed { .. }));
    }

    #[test]
    fn test_diagonal_contact_does_not_connect() {
        // Two voxels touching only along an edge are not face neighbours
        let volume = Volume::from_fn(unit_geometry((3, 3, 1)), |v| {
            if (v.i, v.j) == (0, 0) || (v.i, v.j) == (1, 1) { 0.0 } else { 100.0 }
        })
        .unwrap();
        let mask = RegionGrower::new(volume.sampler())
            .grow(VoxelIndex::new(0, 0, 0), 50.0)
            .unwrap();
        assert_eq!(mask.voxel_count(), 1);
    }

    #[test]
    fn test_whole_volume_below_threshold() {
        let volume = two_cubes();
        let mask = RegionGrower::new(volume.sampler())
            .grow(VoxelIndex::new(0, 0, 0), 10.0)
            .unwrap();
        assert_eq!(mask.voxel_count(), 9 * 5 * 5);
    }

    #[test]
    fn test_seed_on_grid_edge() {
        let volume = Volume::from_fn(unit_geometry((4, 4, 4)), |_| -900.0).unwrap();
        let grower = RegionGrower::new(volume.sampler());
        for seed in [VoxelIndex::new(0, 0, 0), VoxelIndex::new(3, 3, 3), VoxelIndex::new(0, 3, 1)] {
            assert_eq!(grower.grow(seed, -800.0).unwrap().voxel_count(), 64);
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let volume = Volume::from_fn(unit_geometry((12, 10, 8)), |v| {
            ((v.i * 7 + v.j * 13 + v.k * 5) % 11) as f32 * 10.0
        })
        .unwrap();
        let sequential = RegionGrower::new(volume.sampler());
        let parallel = sequential.with_strategy(GrowStrategy::ParallelFrontier);
        let seed = VoxelIndex::new(0, 0, 0);
        for threshold in [0.0, 30.0, 60.0, 100.0] {
            let a = sequential.grow(seed, threshold).unwrap();
            let b = parallel.grow(seed, threshold).unwrap();
            assert_eq!(a, b, "threshold {}", threshold);
        }
    }
}
