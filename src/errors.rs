use thiserror::Error;
use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::volume::VoxelIndex;

/// Custom error types for airway segmentation
#[derive(Error, Debug)]
pub enum AirwayError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("NIfTI error: {0}")]
    Nifti(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load configuration from {path}: {source}")]
    ConfigLoad {
        source: toml::de::Error,
        path: PathBuf,
    },

    #[error("CSV output error: {0}")]
    CsvOutput(#[from] csv::Error),

    #[error("JSON output error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid volume: {0}")]
    InvalidVolume(String),

    #[error("Voxel {index} lies outside the volume grid {dims:?}")]
    OutOfBounds {
        index: VoxelIndex,
        dims: (usize, usize, usize),
    },

    #[error("Seed {seed} lies outside the volume grid {dims:?}")]
    OutOfBoundsSeed {
        seed: SeedPosition,
        dims: (usize, usize, usize),
    },

    #[error("Seed intensity {intensity:.1} exceeds the intensity ceiling {ceiling:.1}; no threshold trial is possible")]
    DegenerateSeed {
        intensity: f32,
        ceiling: f32,
    },

    #[error("Region grown at threshold {threshold:.1} does not contain its seed {seed}")]
    SeedExcluded {
        seed: VoxelIndex,
        threshold: f32,
    },

    #[error("Segmentation cancelled after {trials} threshold trials")]
    Cancelled {
        trials: usize,
    },
}

/// Seed as the caller supplied it: a voxel index or a physical point (mm)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeedPosition {
    Voxel(VoxelIndex),
    Physical([f64; 3]),
}

impl From<VoxelIndex> for SeedPosition {
    fn from(index: VoxelIndex) -> Self {
        SeedPosition::Voxel(index)
    }
}

impl fmt::Display for SeedPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedPosition::Voxel(index) => write!(f, "voxel {}", index),
            SeedPosition::Physical([x, y, z]) => {
                write!(f, "point [{:.2}, {:.2}, {:.2}] mm", x, y, z)
            }
        }
    }
}

/// Type alias for Result with our custom error type
pub type Result<T> = std::result::Result<T, AirwayError>;

/// Non-fatal conditions attached to a successful segmentation
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentationWarning {
    /// No explosion was found below the ceiling; the mask may be over-inclusive
    ExhaustedSearch { ceiling: f32, last_threshold: f32 },
    /// The region never grew past the seed voxel
    EmptyGrowth { consecutive_trials: usize },
    /// The kernel name was missing or unrecognized and the default profile was used
    UnknownKernel { name: Option<String> },
}

impl fmt::Display for SegmentationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentationWarning::ExhaustedSearch { ceiling, last_threshold } => write!(
                f,
                "no leak detected up to the intensity ceiling {:.1}; using last threshold {:.1} (low confidence)",
                ceiling, last_threshold
            ),
            SegmentationWarning::EmptyGrowth { consecutive_trials } => write!(
                f,
                "region stayed at the seed voxel for {} consecutive trials; the seed may be misplaced",
                consecutive_trials
            ),
            SegmentationWarning::UnknownKernel { name: Some(name) } => write!(
                f,
                "convolution kernel '{}' is not recognized, STANDARD will be used",
                name
            ),
            SegmentationWarning::UnknownKernel { name: None } => {
                write!(f, "convolution kernel is unknown, STANDARD will be used")
            }
        }
    }
}
