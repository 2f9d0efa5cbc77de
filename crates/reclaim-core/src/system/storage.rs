//! Ephemeral storage access for the file purge.

use crate::error::{ReclaimError, Result};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// A file or directory found in the ephemeral storage directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemeralEntry {
    pub path: PathBuf,
    /// `None` when the metadata or mtime could not be read.
    pub modified_at: Option<SystemTime>,
    /// Size on disk; zero for directories.
    pub size_bytes: u64,
}

/// Result of listing the ephemeral directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EphemeralListing {
    pub entries: Vec<EphemeralEntry>,
    /// Directory entries that could not be read at all.
    pub unreadable: u64,
}

/// Listing and deletion of ephemeral files.
pub trait EphemeralStore: Send + Sync {
    /// List the direct children of `dir`. A missing directory is empty.
    fn list_entries(&self, dir: &Path) -> Result<EphemeralListing>;

    /// Delete an entry. Returns false when deletion failed.
    fn delete(&self, path: &Path) -> bool;
}

/// [`EphemeralStore`] over the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsEphemeralStore;

impl EphemeralStore for FsEphemeralStore {
    fn list_entries(&self, dir: &Path) -> Result<EphemeralListing> {
        let read_dir = match std::fs::read_dir(dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(EphemeralListing::default())
            }
            Err(e) => return Err(ReclaimError::io_with_path(e, dir)),
        };

        let mut listing = EphemeralListing::default();
        for entry in read_dir {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Unreadable entry in {}: {}", dir.display(), e);
                    listing.unreadable += 1;
                    continue;
                }
            };
            let path = entry.path();
            let (modified_at, size_bytes) = match entry.metadata() {
                Ok(metadata) => {
                    let size = if metadata.is_file() { metadata.len() } else { 0 };
                    (metadata.modified().ok(), size)
                }
                Err(e) => {
                    debug!("No metadata for {}: {}", path.display(), e);
                    (None, 0)
                }
            };
            listing.entries.push(EphemeralEntry {
                path,
                modified_at,
                size_bytes,
            });
        }

        Ok(listing)
    }

    fn delete(&self, path: &Path) -> bool {
        let result = if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                debug!("Failed to delete {}: {}", path.display(), e);
                false
            }
        }
    }
}
