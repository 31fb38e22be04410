//! Packaging of the final airway mask with the input grid geometry

use log::debug;
use serde::Serialize;

use crate::errors::{AirwayError, Result, SegmentationWarning};
use crate::mask::Mask;
use crate::region_grow::RegionGrower;
use crate::search::{SearchOutcome, SearchState, TrialRecord};
use crate::volume::{Geometry, VoxelIndex};

/// Final airway segmentation handed to the host
#[derive(Debug, Clone)]
pub struct SegmentationResult {
    pub threshold: f32,
    pub state: SearchState,
    pub mask: Mask,
    pub geometry: Geometry,
    pub trials: Vec<TrialRecord>,
    pub warnings: Vec<SegmentationWarning>,
}

/// Label volume ready to be written in the host's format
#[derive(Debug, Clone)]
pub struct LabelMap {
    pub data: Vec<u8>,
    pub geometry: Geometry,
    pub label_value: u8,
}

/// Size and position of the segmented region
#[derive(Debug, Clone, Serialize)]
pub struct SegmentStatistics {
    pub voxel_count: usize,
    pub volume_mm3: f64,
    pub volume_ml: f64,
    pub centroid_mm: Option<[f64; 3]>,
    pub bounding_box: Option<(VoxelIndex, VoxelIndex)>,
}

impl SegmentationResult {
    pub fn is_low_confidence(&self) -> bool {
        self.state == SearchState::Exhausted
    }

    pub fn label_map(&self, label_value: u8) -> LabelMap {
        LabelMap {
            data: self.mask.to_labels(label_value),
            geometry: self.geometry.clone(),
            label_value,
        }
    }

    pub fn statistics(&self) -> SegmentStatistics {
        let voxel_count = self.mask.voxel_count();
        let volume_mm3 = voxel_count as f64 * self.geometry.voxel_volume_mm3();
        SegmentStatistics {
            voxel_count,
            volume_mm3,
            volume_ml: volume_mm3 / 1000.0,
            centroid_mm: self.mask.centroid(&self.geometry),
            bounding_box: self.mask.bounding_box(),
        }
    }
}

/// Produces the final mask for a selected threshold
pub struct SegmentationAssembler<'a> {
    grower: RegionGrower<'a>,
    geometry: &'a Geometry,
}

impl<'a> SegmentationAssembler<'a> {
    pub fn new(grower: RegionGrower<'a>, geometry: &'a Geometry) -> Self {
        Self { grower, geometry }
    }

    /// Package a search outcome, reusing the winning trial's mask when it is usable
    pub fn assemble(&self, seed: VoxelIndex, outcome: SearchOutcome) -> Result<SegmentationResult> {
        let SearchOutcome {
            state,
            selected_threshold,
            selected_mask,
            trials,
            warnings,
        } = outcome;

        let mask = if selected_mask.dims() == self.geometry.dims && selected_mask.contains(seed) {
            selected_mask
        } else {
            debug!("Regrowing final mask at threshold {:.1}", selected_threshold);
            self.final_mask(seed, selected_threshold)?
        };

        Ok(SegmentationResult {
            threshold: selected_threshold,
            state,
            mask,
            geometry: self.geometry.clone(),
            trials,
            warnings,
        })
    }

    fn final_mask(&self, seed: VoxelIndex, threshold: f32) -> Result<Mask> {
        let mask = self.grower.grow(seed, threshold)?;
        if !mask.contains(seed) {
            return Err(AirwayError::SeedExcluded { seed, threshold });
        }
        Ok(mask)
    }
}
