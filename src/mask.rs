//! Binary voxel masks produced by region growing

use crate::volume::{Geometry, VoxelIndex};

/// Boolean membership grid with the same dimensions as the source volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    dims: (usize, usize, usize),
    voxels: Vec<bool>,
    count: usize,
}

impl Mask {
    /// Create an empty mask
    pub fn new(dims: (usize, usize, usize)) -> Self {
        Self {
            dims,
            voxels: vec![false; dims.0 * dims.1 * dims.2],
            count: 0,
        }
    }

    pub(crate) fn from_raw(dims: (usize, usize, usize), voxels: Vec<bool>) -> Self {
        let count = voxels.iter().filter(|&&v| v).count();
        Self { dims, voxels, count }
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.dims
    }

    /// Number of voxels in the region
    pub fn voxel_count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    fn offset(&self, index: VoxelIndex) -> Option<usize> {
        index
            .is_within(self.dims)
            .then(|| index.i + index.j * self.dims.0 + index.k * self.dims.0 * self.dims.1)
    }

    pub fn contains(&self, index: VoxelIndex) -> bool {
        self.offset(index).map_or(false, |o| self.voxels[o])
    }

    #[inline]
    pub(crate) fn contains_linear(&self, linear: usize) -> bool {
        self.voxels[linear]
    }

    /// Mark a voxel; returns `true` when it was not already set
    pub fn insert(&mut self, index: VoxelIndex) -> bool {
        match self.offset(index) {
            Some(o) => self.insert_linear(o),
            None => false,
        }
    }

    #[inline]
    pub(crate) fn insert_linear(&mut self, linear: usize) -> bool {
        if self.voxels[linear] {
            return false;
        }
        self.voxels[linear] = true;
        self.count += 1;
        true
    }

    /// True when every voxel of `self` is also in `other`
    pub fn is_subset_of(&self, other: &Mask) -> bool {
        self.dims == other.dims
            && self
                .voxels
                .iter()
                .zip(other.voxels.iter())
                .all(|(&a, &b)| !a || b)
    }

    /// Member voxels in Fortran order
    pub fn iter_indices(&self) -> impl Iterator<Item = VoxelIndex> + '_ {
        let (nx, ny, _) = self.dims;
        self.voxels
            .iter()
            .enumerate()
            .filter(|(_, &v)| v)
            .map(move |(o, _)| VoxelIndex::new(o % nx, (o / nx) % ny, o / (nx * ny)))
    }

    /// Inclusive bounding box `(min, max)` of the region, `None` when empty
    pub fn bounding_box(&self) -> Option<(VoxelIndex, VoxelIndex)> {
        let mut indices = self.iter_indices();
        let first = indices.next()?;
        let (mut lo, mut hi) = (first, first);
        for v in indices {
            lo = VoxelIndex::new(lo.i.min(v.i), lo.j.min(v.j), lo.k.min(v.k));
            hi = VoxelIndex::new(hi.i.max(v.i), hi.j.max(v.j), hi.k.max(v.k));
        }
        Some((lo, hi))
    }

    /// Mean physical position (mm) of member voxels
    pub fn centroid(&self, geometry: &Geometry) -> Option<[f64; 3]> {
        if self.is_empty() {
            return None;
        }
        let mut sum = [0.0f64; 3];
        for index in self.iter_indices() {
            sum[0] += index.i as f64;
            sum[1] += index.j as f64;
            sum[2] += index.k as f64;
        }
        let n = self.count as f64;
        Some(geometry.continuous_index_to_physical([sum[0] / n, sum[1] / n, sum[2] / n]))
    }

    /// Label volume data: `label` inside the region, 0 elsewhere
    pub fn to_labels(&self, label: u8) -> Vec<u8> {
        self.voxels.iter().map(|&v| if v { label } else { 0 }).collect()
    }
}
