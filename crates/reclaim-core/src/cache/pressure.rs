//! Memory pressure classification.

use crate::config::PressureThresholds;
use serde::{Deserialize, Serialize};

/// Memory pressure level, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureLevel {
    /// Less than 60% of memory in use
    Normal,
    /// 60-75% in use
    Warning,
    /// 75-85% in use
    Critical,
    /// 85% or more in use
    Emergency,
}

impl PressureLevel {
    /// Classify a memory usage percentage (0-100).
    pub fn from_usage_percent(usage_percent: f64) -> Self {
        if usage_percent >= PressureThresholds::EMERGENCY_PERCENT {
            PressureLevel::Emergency
        } else if usage_percent >= PressureThresholds::CRITICAL_PERCENT {
            PressureLevel::Critical
        } else if usage_percent >= PressureThresholds::WARNING_PERCENT {
            PressureLevel::Warning
        } else {
            PressureLevel::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PressureLevel::Normal => "normal",
            PressureLevel::Warning => "warning",
            PressureLevel::Critical => "critical",
            PressureLevel::Emergency => "emergency",
        }
    }

    /// Caching strategy appropriate for this level.
    pub fn strategy(&self) -> CacheStrategy {
        match self {
            PressureLevel::Normal => CacheStrategy::Aggressive,
            PressureLevel::Warning => CacheStrategy::Balanced,
            PressureLevel::Critical | PressureLevel::Emergency => CacheStrategy::Conservative,
        }
    }
}

impl Default for PressureLevel {
    fn default() -> Self {
        PressureLevel::Normal
    }
}

impl std::fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How eagerly the cache holds on to entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    Aggressive,
    Balanced,
    Conservative,
}

impl CacheStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStrategy::Aggressive => "aggressive",
            CacheStrategy::Balanced => "balanced",
            CacheStrategy::Conservative => "conservative",
        }
    }
}

impl Default for CacheStrategy {
    fn default() -> Self {
        CacheStrategy::Aggressive
    }
}

impl std::fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of feeding one device snapshot to the cache's classifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureObservation {
    pub level: PressureLevel,
    pub previous: PressureLevel,
    pub usage_percent: f64,
    /// The level differs from the previous observation.
    pub changed: bool,
    /// A transition happened while usage is above the auto-reclaim threshold.
    pub auto_reclaim: bool,
    /// The cache is above its eviction threshold.
    pub over_threshold: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pressure_levels() {
        assert_eq!(PressureLevel::from_usage_percent(40.0), PressureLevel::Normal);
        assert_eq!(PressureLevel::from_usage_percent(65.0), PressureLevel::Warning);
        assert_eq!(PressureLevel::from_usage_percent(80.0), PressureLevel::Critical);
        assert_eq!(PressureLevel::from_usage_percent(92.0), PressureLevel::Emergency);
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        assert_eq!(PressureLevel::from_usage_percent(59.99), PressureLevel::Normal);
        assert_eq!(PressureLevel::from_usage_percent(60.0), PressureLevel::Warning);
        assert_eq!(PressureLevel::from_usage_percent(75.0), PressureLevel::Critical);
        assert_eq!(PressureLevel::from_usage_percent(85.0), PressureLevel::Emergency);
    }

    #[test]
    fn test_levels_are_ordered() {
        assert!(PressureLevel::Normal < PressureLevel::Warning);
        assert!(PressureLevel::Warning < PressureLevel::Critical);
        assert!(PressureLevel::Critical < PressureLevel::Emergency);
    }

    #[test]
    fn test_strategy_mapping() {
        assert_eq!(PressureLevel::Normal.strategy(), CacheStrategy::Aggressive);
        assert_eq!(PressureLevel::Warning.strategy(), CacheStrategy::Balanced);
        assert_eq!(PressureLevel::Critical.strategy(), CacheStrategy::Conservative);
        assert_eq!(PressureLevel::Emergency.strategy(), CacheStrategy::Conservative);
    }
}
