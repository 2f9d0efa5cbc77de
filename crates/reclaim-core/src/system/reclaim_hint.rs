//! Best-effort hints to the host memory reclaimer.
//!
//! Rust has no garbage collector to nudge, so the closest equivalent is
//! asking the allocator to return freed pages to the OS. Hosts without such
//! a facility get [`NoopReclaimHint`]; its absence is normal, not an error.

use crate::error::Result;
use std::sync::Arc;
use tracing::debug;

/// Capability to ask the host to release unused memory.
pub trait ReclaimHint: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether the hint does anything on this host.
    fn is_supported(&self) -> bool;

    /// Fire-and-forget reclaim request.
    fn request_reclaim(&self) -> Result<()>;
}

/// Hint that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReclaimHint;

impl ReclaimHint for NoopReclaimHint {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn is_supported(&self) -> bool {
        false
    }

    fn request_reclaim(&self) -> Result<()> {
        Ok(())
    }
}

/// Returns freed heap pages to the OS through glibc's `malloc_trim`.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
#[derive(Debug, Clone, Copy, Default)]
pub struct MallocTrimHint;

#[cfg(all(target_os = "linux", target_env = "gnu"))]
impl ReclaimHint for MallocTrimHint {
    fn name(&self) -> &'static str {
        "malloc_trim"
    }

    fn is_supported(&self) -> bool {
        true
    }

    #[allow(unsafe_code)]
    fn request_reclaim(&self) -> Result<()> {
        // SAFETY: malloc_trim takes no pointers and only walks glibc's own
        // arenas under their internal locks. A pad of 0 is always valid.
        let released = unsafe { libc::malloc_trim(0) };
        debug!("malloc_trim released memory: {}", released != 0);
        Ok(())
    }
}

/// Pick the best hint available on this host.
pub fn default_reclaim_hint() -> Arc<dyn ReclaimHint> {
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    {
        Arc::new(MallocTrimHint)
    }
    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    {
        debug!("No host reclaim hint on this platform - using no-op");
        Arc::new(NoopReclaimHint)
    }
}
