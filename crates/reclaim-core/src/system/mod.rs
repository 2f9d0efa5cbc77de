//! Host collaborators.
//!
//! Provides the narrow interfaces the subsystem consumes from its host:
//! - Device and memory snapshots ([`DeviceProbe`], backed by `sysinfo`)
//! - Best-effort reclaim hints to the allocator ([`ReclaimHint`])
//! - Ephemeral file listing and deletion ([`EphemeralStore`])
//!
//! # Example
//!
//! ```rust,no_run
//! use reclaim_core::system::{DeviceProbe, SysinfoProbe};
//!
//! let probe = SysinfoProbe::new();
//! let snapshot = probe.snapshot()?;
//! println!("Memory in use: {:.1}%", snapshot.usage_percent());
//! # Ok::<(), reclaim_core::ReclaimError>(())
//! ```

mod probe;
mod reclaim_hint;
mod storage;

pub use probe::{performance_score, DeviceProbe, DeviceSnapshot, StaticProbe, SysinfoProbe};
#[cfg(all(target_os = "linux", target_env = "gnu"))]
pub use reclaim_hint::MallocTrimHint;
pub use reclaim_hint::{default_reclaim_hint, NoopReclaimHint, ReclaimHint};
pub use storage::{EphemeralEntry, EphemeralListing, EphemeralStore, FsEphemeralStore};
