//! CT volume representation and read-only voxel access
//!
//! Intensities are stored in Fortran order (i varies fastest) to match the
//! NIfTI convention: `index = i + j*nx + k*nx*ny`.

use std::fmt;

use nalgebra::{Matrix3, Matrix4, Vector3};
use serde::Serialize;

use crate::errors::{AirwayError, Result};

/// Face-connected neighbourhood (6-connectivity)
const FACE_OFFSETS: [(isize, isize, isize); 6] = [
    (-1, 0, 0),
    (1, 0, 0),
    (0, -1, 0),
    (0, 1, 0),
    (0, 0, -1),
    (0, 0, 1),
];

/// Integer voxel coordinate in the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct VoxelIndex {
    pub i: usize,
    pub j: usize,
    pub k: usize,
}

impl VoxelIndex {
    pub const fn new(i: usize, j: usize, k: usize) -> Self {
        Self { i, j, k }
    }

    /// Shift by a signed offset, returning `None` when the result leaves the grid
    #[inline]
    pub fn offset(self, di: isize, dj: isize, dk: isize, dims: (usize, usize, usize)) -> Option<Self> {
        let i = self.i.checked_add_signed(di)?;
        let j = self.j.checked_add_signed(dj)?;
        let k = self.k.checked_add_signed(dk)?;
        let candidate = Self { i, j, k };
        candidate.is_within(dims).then_some(candidate)
    }

    #[inline]
    pub fn is_within(self, dims: (usize, usize, usize)) -> bool {
        self.i < dims.0 && self.j < dims.1 && self.k < dims.2
    }
}

impl fmt::Display for VoxelIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.i, self.j, self.k)
    }
}

/// Grid geometry: dimensions plus the index-to-physical mapping
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub dims: (usize, usize, usize),
    /// Voxel sizes in mm along i, j, k
    pub spacing: [f64; 3],
    /// Physical position of voxel (0, 0, 0) in mm
    pub origin: [f64; 3],
    /// Unit direction cosines, one column per grid axis
    pub direction: Matrix3<f64>,
}

impl Geometry {
    /// Axis-aligned geometry with identity direction
    pub fn new(dims: (usize, usize, usize), spacing: [f64; 3], origin: [f64; 3]) -> Self {
        Self {
            dims,
            spacing,
            origin,
            direction: Matrix3::identity(),
        }
    }

    /// Build geometry from a 4x4 row-major affine (NIfTI sform layout)
    pub fn from_affine(dims: (usize, usize, usize), affine: &[f64; 16]) -> Result<Self> {
        let linear = Matrix3::new(
            affine[0], affine[1], affine[2],
            affine[4], affine[5], affine[6],
            affine[8], affine[9], affine[10],
        );

        let mut spacing = [0.0; 3];
        let mut direction = Matrix3::zeros();
        for axis in 0..3 {
            let column = linear.column(axis);
            let norm = column.norm();
            if norm <= f64::EPSILON {
                return Err(AirwayError::InvalidVolume(format!(
                    "affine column {} has zero length",
                    axis
                )));
            }
            spacing[axis] = norm;
            direction.set_column(axis, &(column / norm));
        }

        Ok(Self {
            dims,
            spacing,
            origin: [affine[3], affine[7], affine[11]],
            direction,
        })
    }

    /// 4x4 row-major affine mapping (i, j, k, 1) to physical (x, y, z, 1)
    pub fn affine(&self) -> [f64; 16] {
        let m = self.index_to_physical_matrix();
        let mut affine = [0.0; 16];
        for row in 0..4 {
            for col in 0..4 {
                affine[row * 4 + col] = m[(row, col)];
            }
        }
        affine
    }

    fn linear_part(&self) -> Matrix3<f64> {
        self.direction * Matrix3::from_diagonal(&Vector3::from(self.spacing))
    }

    fn index_to_physical_matrix(&self) -> Matrix4<f64> {
        let mut m = self.linear_part().to_homogeneous();
        m[(0, 3)] = self.origin[0];
        m[(1, 3)] = self.origin[1];
        m[(2, 3)] = self.origin[2];
        m
    }

    pub fn voxel_count(&self) -> usize {
        self.dims.0 * self.dims.1 * self.dims.2
    }

    /// Volume of one voxel in mm^3
    pub fn voxel_volume_mm3(&self) -> f64 {
        self.spacing[0] * self.spacing[1] * self.spacing[2]
    }

    /// Physical position (mm) of a voxel centre
    pub fn index_to_physical(&self, index: VoxelIndex) -> [f64; 3] {
        self.continuous_index_to_physical([index.i as f64, index.j as f64, index.k as f64])
    }

    pub fn continuous_index_to_physical(&self, index: [f64; 3]) -> [f64; 3] {
        let p = self.linear_part() * Vector3::from(index) + Vector3::from(self.origin);
        [p.x, p.y, p.z]
    }

    /// Continuous (fractional) index of a physical point
    pub fn physical_to_continuous_index(&self, point: [f64; 3]) -> Result<[f64; 3]> {
        let inverse = self.linear_part().try_inverse().ok_or_else(|| {
            AirwayError::InvalidVolume("index-to-physical mapping is singular".to_string())
        })?;
        let c = inverse * (Vector3::from(point) - Vector3::from(self.origin));
        Ok([c.x, c.y, c.z])
    }

    /// Nearest voxel to a physical point, `None` when it falls outside the grid
    pub fn physical_to_index(&self, point: [f64; 3]) -> Result<Option<VoxelIndex>> {
        let c = self.physical_to_continuous_index(point)?;
        let rounded = c.map(f64::round);
        if rounded.iter().any(|&v| v < 0.0 || !v.is_finite()) {
            return Ok(None);
        }
        let index = VoxelIndex::new(rounded[0] as usize, rounded[1] as usize, rounded[2] as usize);
        Ok(index.is_within(self.dims).then_some(index))
    }

    /// Linear (Fortran order) offset of an in-bounds index
    #[inline]
    pub fn linear_index(&self, index: VoxelIndex) -> Option<usize> {
        index
            .is_within(self.dims)
            .then(|| index.i + index.j * self.dims.0 + index.k * self.dims.0 * self.dims.1)
    }

    /// Inverse of [`Geometry::linear_index`]
    #[inline]
    pub fn voxel_index(&self, linear: usize) -> VoxelIndex {
        let (nx, ny, _) = self.dims;
        VoxelIndex::new(linear % nx, (linear / nx) % ny, linear / (nx * ny))
    }
}

/// Immutable CT intensity grid (Hounsfield units)
#[derive(Debug, Clone)]
pub struct Volume {
    data: Vec<f32>,
    geometry: Geometry,
}

impl Volume {
    pub fn new(data: Vec<f32>, geometry: Geometry) -> Result<Self> {
        let (nx, ny, nz) = geometry.dims;
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(AirwayError::InvalidVolume(format!(
                "volume dimensions must be non-zero, got {:?}",
                geometry.dims
            )));
        }
        if data.len() != geometry.voxel_count() {
            return Err(AirwayError::InvalidVolume(format!(
                "expected {} voxels for dimensions {:?}, got {}",
                geometry.voxel_count(),
                geometry.dims,
                data.len()
            )));
        }
        Ok(Self { data, geometry })
    }

    /// Build a volume by evaluating `f` at every voxel
    pub fn from_fn<F>(geometry: Geometry, mut f: F) -> Result<Self>
    where
        F: FnMut(VoxelIndex) -> f32,
    {
        let (nx, ny, nz) = geometry.dims;
        let mut data = Vec::with_capacity(nx * ny * nz);
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    data.push(f(VoxelIndex::new(i, j, k)));
                }
            }
        }
        Self::new(data, geometry)
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.geometry.dims
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn sampler(&self) -> VolumeSampler<'_> {
        VolumeSampler { volume: self }
    }
}

/// Read-only voxel accessor borrowed for the duration of a segmentation run
#[derive(Debug, Clone, Copy)]
pub struct VolumeSampler<'a> {
    volume: &'a Volume,
}

impl<'a> VolumeSampler<'a> {
    pub fn new(volume: &'a Volume) -> Self {
        Self { volume }
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.volume.geometry.dims
    }

    pub fn geometry(&self) -> &'a Geometry {
        &self.volume.geometry
    }

    pub fn contains(&self, index: VoxelIndex) -> bool {
        index.is_within(self.dims())
    }

    pub fn intensity_at(&self, index: VoxelIndex) -> Result<f32> {
        self.volume
            .geometry
            .linear_index(index)
            .map(|linear| self.volume.data[linear])
            .ok_or(AirwayError::OutOfBounds {
                index,
                dims: self.dims(),
            })
    }

    /// Intensity at a linear offset already known to be in bounds
    #[inline]
    pub(crate) fn intensity_at_linear(&self, linear: usize) -> f32 {
        self.volume.data[linear]
    }

    /// Face-connected neighbours of `index`; indices outside the grid are never produced
    pub fn neighbors(&self, index: VoxelIndex) -> impl Iterator<Item = VoxelIndex> + 'a {
        let dims = self.dims();
        FACE_OFFSETS
            .iter()
            .filter_map(move |&(di, dj, dk)| index.offset(di, dj, dk, dims))
    }

    /// Linear offsets of the in-bounds face neighbours of a linear offset
    #[inline]
    pub(crate) fn neighbor_offsets(&self, linear: usize) -> impl Iterator<Item = usize> + 'a {
        let geometry = self.geometry();
        let index = geometry.voxel_index(linear);
        self.neighbors(index)
            .filter_map(move |neighbor| geometry.linear_index(neighbor))
    }
}
