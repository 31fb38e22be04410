// src/lib.rs - Library interface for airway segmentation

pub mod assembler;
pub mod config;
pub mod errors;
pub mod kernel;
pub mod mask;
pub mod output;
pub mod pipeline;
pub mod region_grow;
pub mod search;
pub mod volume;
pub mod volume_io;

// Re-export commonly used types and functions
pub use errors::{AirwayError, Result, SeedPosition, SegmentationWarning};
pub use config::Config;
pub use pipeline::{resolve_kernel, segment_airways, segment_airways_at_index, SegmentationRun};
pub use volume_io::{read_volume, write_label_map, write_volume};

pub use assembler::{LabelMap, SegmentStatistics, SegmentationAssembler, SegmentationResult};
pub use kernel::{KernelCategory, KernelProfile};
pub use mask::Mask;
pub use region_grow::{GrowStrategy, RegionGrower};
pub use search::{CancelFlag, SearchOutcome, SearchParams, SearchState, ThresholdSearch, TrialRecord};
pub use volume::{Geometry, Volume, VolumeSampler, VoxelIndex};

// Report writers
pub use output::{
    render_mask_preview,
    save_mask_preview,
    write_reports,
    write_summary_json,
    write_trials_csv,
    RunSummary,
};
