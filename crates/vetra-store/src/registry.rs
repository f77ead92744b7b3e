//! Persisted hash -> reference registry backing deduplication.
//!
//! The registry is a cache over filesystem state, not a source of truth: it
//! can be rebuilt at any time by scanning the base directories. It is read,
//! mutated in memory, and rewritten wholesale; the read-modify-write cycle
//! is guarded by an exclusive flock and the write uses the atomic
//! write-rename pattern so concurrent access can never leave truncated JSON.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MediaError, Result};
use crate::fsio::write_atomic;
use crate::refs::MediaKind;

/// Registry file name under the media root
pub const REGISTRY_FILE_NAME: &str = "media_registry.json";

const LOCK_FILE_NAME: &str = ".registry.lock";
const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 10;

/// Content hash -> canonical reference, per media kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRegistry {
    #[serde(default)]
    pub images: BTreeMap<String, String>,
    #[serde(default)]
    pub videos: BTreeMap<String, String>,
}

impl MediaRegistry {
    pub fn section(&self, kind: MediaKind) -> &BTreeMap<String, String> {
        match kind {
            MediaKind::Image => &self.images,
            MediaKind::Video => &self.videos,
        }
    }

    pub fn section_mut(&mut self, kind: MediaKind) -> &mut BTreeMap<String, String> {
        match kind {
            MediaKind::Image => &mut self.images,
            MediaKind::Video => &mut self.videos,
        }
    }

    pub fn lookup(&self, kind: MediaKind, hash: &str) -> Option<&str> {
        self.section(kind).get(hash).map(String::as_str)
    }

    /// Drop every entry pointing at the given (separator-normalized)
    /// reference. Returns the number of entries removed.
    pub fn remove_reference(&mut self, normalized_ref: &str) -> usize {
        let mut removed = 0;
        for section in [&mut self.images, &mut self.videos] {
            let stale: Vec<String> = section
                .iter()
                .filter(|(_, r)| r.replace('\\', "/") == normalized_ref)
                .map(|(h, _)| h.clone())
                .collect();
            removed += stale.len();
            for h in stale {
                section.remove(&h);
            }
        }
        removed
    }
}

/// Handle to the on-disk registry document and its lock file
#[derive(Debug, Clone)]
pub(crate) struct RegistryFile {
    path: PathBuf,
    lock_path: PathBuf,
}

/// Exclusive registry lock, released on drop
pub(crate) struct RegistryLock {
    _file: File,
}

impl RegistryFile {
    pub fn new(media_root: &Path) -> Self {
        Self {
            path: media_root.join(REGISTRY_FILE_NAME),
            lock_path: media_root.join(LOCK_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the exclusive flock guarding the read-modify-write cycle.
    pub fn lock(&self) -> Result<RegistryLock> {
        let file =
            File::create(&self.lock_path).map_err(|e| MediaError::storage(&self.lock_path, e))?;

        let timeout_secs: u64 = std::env::var("VETRA_LOCK_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_LOCK_TIMEOUT_SECS);
        let timeout = Duration::from_secs(timeout_secs);
        let start = Instant::now();

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(RegistryLock { _file: file }),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        return Err(MediaError::LockTimeout(timeout));
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => return Err(MediaError::storage(&self.lock_path, e)),
            }
        }
    }

    /// Load the registry, tolerating a missing or corrupt document.
    ///
    /// A corrupt registry is recoverable via self-heal, so parse failures
    /// degrade to an empty registry instead of failing the operation.
    pub fn load(&self) -> MediaRegistry {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(_) => return MediaRegistry::default(),
        };
        match serde_json::from_slice(&data) {
            Ok(registry) => registry,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "registry unreadable, starting empty");
                MediaRegistry::default()
            }
        }
    }

    pub fn save(&self, registry: &MediaRegistry) -> Result<()> {
        let json = serde_json::to_vec_pretty(registry)?;
        write_atomic(&self.path, &json)
    }
}
