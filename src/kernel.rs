//! Reconstruction kernel categories and their threshold search profiles
//!
//! The CT reconstruction kernel controls image noise and sharpness, which
//! shifts the intensity range where the airway lumen meets the wall. Each
//! category maps to a fixed profile used to drive the threshold search.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Reconstruction kernel family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelCategory {
    Standard,
    Soft,
    Hard,
    /// Missing or unrecognized kernel metadata; resolves to the Standard profile
    Unknown,
}

/// Threshold search configuration for one kernel category
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct KernelProfile {
    /// First threshold tried (HU)
    pub start_threshold: f32,
    /// Threshold increment between trials (HU)
    pub step_size: f32,
    /// Voxel-count growth ratio between consecutive trials that counts as a leak
    pub explosion_factor: f32,
}

const STANDARD_PROFILE: KernelProfile = KernelProfile {
    start_threshold: -950.0,
    step_size: 10.0,
    explosion_factor: 2.0,
};

const SOFT_PROFILE: KernelProfile = KernelProfile {
    start_threshold: -930.0,
    step_size: 10.0,
    explosion_factor: 2.0,
};

const HARD_PROFILE: KernelProfile = KernelProfile {
    start_threshold: -980.0,
    step_size: 10.0,
    explosion_factor: 1.8,
};

impl KernelProfile {
    /// Built-in profile for a category. `Unknown` uses the Standard row.
    pub const fn for_category(category: KernelCategory) -> KernelProfile {
        match category {
            KernelCategory::Standard | KernelCategory::Unknown => STANDARD_PROFILE,
            KernelCategory::Soft => SOFT_PROFILE,
            KernelCategory::Hard => HARD_PROFILE,
        }
    }
}

impl KernelCategory {
    pub const ALL: [KernelCategory; 4] = [
        KernelCategory::Standard,
        KernelCategory::Soft,
        KernelCategory::Hard,
        KernelCategory::Unknown,
    ];

    /// Classify a vendor convolution kernel name (DICOM 0018,1210).
    ///
    /// Recognizes GE names (SOFT, STANDARD, LUNG, BONE, ...), Siemens `Bnn`/`Inn`/`Jnn`
    /// codes, Toshiba/Canon `FCnn` codes and Philips single-letter kernels. Anything
    /// else is `Unknown`.
    pub fn from_kernel_name(name: &str) -> KernelCategory {
        let normalized = name.trim().to_ascii_uppercase();
        if normalized.is_empty() {
            return KernelCategory::Unknown;
        }

        match normalized.as_str() {
            "STANDARD" | "STD" | "DETAIL" | "CHEST" => return KernelCategory::Standard,
            "SOFT" | "SMOOTH" => return KernelCategory::Soft,
            "LUNG" | "BONE" | "BONEPLUS" | "EDGE" | "SHARP" | "HARD" => return KernelCategory::Hard,
            // Philips
            "A" | "B" => return KernelCategory::Soft,
            "C" | "D" => return KernelCategory::Standard,
            "L" | "E" => return KernelCategory::Hard,
            _ => {}
        }

        if normalized.starts_with('Y') && normalized.len() <= 3 {
            return KernelCategory::Hard;
        }

        if let Some(sharpness) = vendor_sharpness(&normalized) {
            return match sharpness {
                0..=29 => KernelCategory::Soft,
                30..=49 => KernelCategory::Standard,
                _ => KernelCategory::Hard,
            };
        }

        KernelCategory::Unknown
    }

    /// Built-in profile for this category
    pub fn profile(self) -> KernelProfile {
        KernelProfile::for_category(self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KernelCategory::Standard => "standard",
            KernelCategory::Soft => "soft",
            KernelCategory::Hard => "hard",
            KernelCategory::Unknown => "unknown",
        }
    }
}

/// Numeric sharpness of Siemens (`B31f`, `I70f`, `Br40d`) and Canon (`FC52`) kernel codes
fn vendor_sharpness(name: &str) -> Option<u32> {
    let digits_start = if let Some(rest) = name.strip_prefix("FC") {
        name.len() - rest.len()
    } else {
        let mut chars = name.char_indices();
        let (_, first) = chars.next()?;
        if !matches!(first, 'B' | 'I' | 'J' | 'H' | 'Q') {
            return None;
        }
        // Optional second letter for the newer Siemens names (Br, Bl, Hr, Qr ...)
        match chars.next() {
            Some((idx, c)) if c.is_ascii_digit() => idx,
            Some((_, c)) if c.is_ascii_alphabetic() => match chars.next() {
                Some((idx, d)) if d.is_ascii_digit() => idx,
                _ => return None,
            },
            _ => return None,
        }
    };

    let digits: String = name[digits_start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.len() < 2 {
        return None;
    }
    digits.parse().ok()
}

impl FromStr for KernelCategory {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Ok(match lowered.as_str() {
            "standard" => KernelCategory::Standard,
            "soft" => KernelCategory::Soft,
            "hard" => KernelCategory::Hard,
            "unknown" => KernelCategory::Unknown,
            _ => KernelCategory::from_kernel_name(s),
        })
    }
}

impl fmt::Display for KernelCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}
