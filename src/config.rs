use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::errors::{AirwayError, Result};
use crate::kernel::{KernelCategory, KernelProfile};

/// Configuration for airway segmentation
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Highest threshold the search may try (HU). Air-filled lumen never exceeds this.
    #[serde(default = "default_intensity_ceiling")]
    pub intensity_ceiling: f32,

    /// Label written into the output label map ("trachea" in the generic anatomy colour table)
    #[serde(default = "default_label_value")]
    pub label_value: u8,

    /// Expand each region-growing frontier in parallel
    #[serde(default = "default_parallel")]
    pub use_parallel: bool,

    /// Volumes smaller than this are always grown sequentially
    #[serde(default = "default_parallel_min_voxels")]
    pub parallel_min_voxels: usize,

    // Diagnostics written next to the output when a report directory is given
    #[serde(default = "default_true")]
    pub write_trial_csv: bool,

    #[serde(default = "default_true")]
    pub write_summary_json: bool,

    #[serde(default)]
    pub write_preview_png: bool,

    /// Per-category overrides of the built-in kernel profiles
    #[serde(default)]
    pub profiles: ProfileOverrides,
}

/// Optional `[profiles.<category>]` tables
#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProfileOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard: Option<KernelProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft: Option<KernelProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard: Option<KernelProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unknown: Option<KernelProfile>,
}

impl ProfileOverrides {
    pub fn get(&self, category: KernelCategory) -> Option<&KernelProfile> {
        match category {
            KernelCategory::Standard => self.standard.as_ref(),
            KernelCategory::Soft => self.soft.as_ref(),
            KernelCategory::Hard => self.hard.as_ref(),
            KernelCategory::Unknown => self.unknown.as_ref(),
        }
    }

    pub fn set(&mut self, category: KernelCategory, profile: KernelProfile) {
        let slot = match category {
            KernelCategory::Standard => &mut self.standard,
            KernelCategory::Soft => &mut self.soft,
            KernelCategory::Hard => &mut self.hard,
            KernelCategory::Unknown => &mut self.unknown,
        };
        *slot = Some(profile);
    }

    pub fn is_empty(&self) -> bool {
        KernelCategory::ALL.iter().all(|&c| self.get(c).is_none())
    }
}

fn default_intensity_ceiling() -> f32 {
    -400.0
}

fn default_label_value() -> u8 {
    170
}

fn default_parallel() -> bool {
    true
}

fn default_parallel_min_voxels() -> usize {
    4_000_000 // roughly a 160^3 volume
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            intensity_ceiling: default_intensity_ceiling(),
            label_value: default_label_value(),
            use_parallel: default_parallel(),
            parallel_min_voxels: default_parallel_min_voxels(),
            write_trial_csv: true,
            write_summary_json: true,
            write_preview_png: false,
            profiles: ProfileOverrides::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            AirwayError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| AirwayError::ConfigLoad {
            source: e,
            path: path.to_path_buf(),
        })?;

        Ok(config)
    }

    /// Profile for a kernel category, honouring overrides. `Unknown` falls back to the
    /// Standard entry unless it has an override of its own.
    pub fn profile_for(&self, category: KernelCategory) -> KernelProfile {
        if let Some(profile) = self.profiles.get(category) {
            return *profile;
        }
        if category == KernelCategory::Unknown {
            return self.profile_for(KernelCategory::Standard);
        }
        KernelProfile::for_category(category)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.intensity_ceiling.is_finite() {
            return Err(AirwayError::Config(
                "intensity_ceiling must be a finite value".to_string(),
            ));
        }

        if self.label_value == 0 {
            return Err(AirwayError::Config(
                "label_value must be > 0 (0 is background)".to_string(),
            ));
        }

        if self.parallel_min_voxels == 0 {
            return Err(AirwayError::Config(
                "parallel_min_voxels must be > 0".to_string(),
            ));
        }

        for category in KernelCategory::ALL {
            let profile = self.profile_for(category);

            if !(profile.step_size > 0.0) {
                return Err(AirwayError::Config(format!(
                    "step_size for {} kernels must be > 0.0",
                    category
                )));
            }

            if !(profile.explosion_factor > 1.0) {
                return Err(AirwayError::Config(format!(
                    "explosion_factor for {} kernels must be > 1.0",
                    category
                )));
            }

            if !(profile.start_threshold <= self.intensity_ceiling) {
                return Err(AirwayError::Config(format!(
                    "start_threshold for {} kernels ({}) must not exceed intensity_ceiling ({})",
                    category, profile.start_threshold, self.intensity_ceiling
                )));
            }
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            AirwayError::Config(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, content)?;

        Ok(())
    }
}
