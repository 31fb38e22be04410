//! Synthetic CT volumes shared by the integration tests

#![allow(dead_code)]

use airway_segmentation_lib::{Geometry, KernelProfile, SearchParams, Volume, VoxelIndex};

pub fn unit_geometry(dims: (usize, usize, usize)) -> Geometry {
    Geometry::new(dims, [1.0; 3], [0.0; 3])
}

pub fn volume_from_fn<F>(dims: (usize, usize, usize), f: F) -> Volume
where
    F: FnMut(VoxelIndex) -> f32,
{
    Volume::from_fn(unit_geometry(dims), f).expect("synthetic volume")
}

pub fn params(start: f32, step: f32, factor: f32, ceiling: f32) -> SearchParams {
    SearchParams {
        profile: KernelProfile {
            start_threshold: start,
            step_size: step,
            explosion_factor: factor,
        },
        ceiling,
    }
}

/// 10x10x10 grid with a tube at (4, 4, 0..=5) of value `tube` in a `background` fill
pub fn tube_volume(tube: f32, background: f32) -> Volume {
    volume_from_fn((10, 10, 10), |v| {
        if v.i == 4 && v.j == 4 && v.k <= 5 { tube } else { background }
    })
}

pub fn tube_voxels() -> Vec<VoxelIndex> {
    (0..=5).map(|k| VoxelIndex::new(4, 4, k)).collect()
}

/// Two dark blobs (64 and 640 voxels) joined by a 4-voxel corridor of value `corridor`
pub fn two_blobs_with_corridor(corridor: f32) -> Volume {
    volume_from_fn((20, 10, 10), |v| {
        let in_a = (1..=4).contains(&v.i) && (3..=6).contains(&v.j) && (3..=6).contains(&v.k);
        let in_b = (9..=18).contains(&v.i) && (1..=8).contains(&v.j) && (1..=8).contains(&v.k);
        let in_corridor = (5..=8).contains(&v.i) && v.j == 4 && v.k == 4;
        if in_a || in_b {
            0.0
        } else if in_corridor {
            corridor
        } else {
            100.0
        }
    })
}

/// Intensity rises by one per voxel along x
pub fn ramp_volume(dims: (usize, usize, usize)) -> Volume {
    volume_from_fn(dims, |v| v.i as f32)
}
