//! Device tiers.

use serde::{Deserialize, Serialize};

/// Coarse device class derived from a performance score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceTier {
    LowEnd,
    MidRange,
    HighEnd,
    Ultimate,
}

impl DeviceTier {
    /// Classify a performance score (0-100).
    pub fn from_score(score: u8) -> Self {
        match score {
            80.. => DeviceTier::Ultimate,
            60..=79 => DeviceTier::HighEnd,
            40..=59 => DeviceTier::MidRange,
            _ => DeviceTier::LowEnd,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceTier::LowEnd => "low_end",
            DeviceTier::MidRange => "mid_range",
            DeviceTier::HighEnd => "high_end",
            DeviceTier::Ultimate => "ultimate",
        }
    }
}

impl std::fmt::Display for DeviceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
