//! Device-tier cache profiles and the adjuster that rescales them under
//! memory pressure.
//!
//! Tier, base profile and scaling are pure functions; [`ProfileAdjuster`]
//! adds the hysteresis gate, consumer registry and periodic timer.

mod adjuster;
mod scaling;
mod tier;

pub use adjuster::{
    adjustment_reason, AdjusterStats, AdjustmentBasis, AdjustmentReason, ProfileAdjuster,
};
pub use scaling::{scale_profile, CacheProfile, ScalingFactors};
pub use tier::DeviceTier;
