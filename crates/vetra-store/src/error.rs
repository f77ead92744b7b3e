//! Error taxonomy for store operations.
//!
//! "Reference does not resolve" is deliberately not an error: lookups return
//! `Option` and callers treat a missing file as a broken reference, not a
//! failure.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::refs::MediaKind;

/// Errors that can occur during media store operations
#[derive(Debug, Error)]
pub enum MediaError {
    /// Uploaded bytes cannot be interpreted as the declared media kind.
    /// Raised before any disk write, so no partial state exists.
    #[error("cannot decode {kind} content: {reason}")]
    Decode { kind: MediaKind, reason: String },

    /// In-memory re-encode of a decoded bitmap failed.
    #[error("image encode failed: {reason}")]
    Encode { reason: String },

    /// Filesystem write/delete failure. The registry is never updated past
    /// a failed write.
    #[error("storage operation failed at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("registry JSON error: {0}")]
    Registry(#[from] serde_json::Error),

    /// A renumbering rename could not find a free target name.
    #[error("rename collision: {source_name} -> {target_name}")]
    RenameCollision {
        source_name: String,
        target_name: String,
    },

    #[error("timeout waiting for registry lock after {0:?}")]
    LockTimeout(Duration),
}

impl MediaError {
    pub(crate) fn decode(kind: MediaKind, err: impl std::fmt::Display) -> Self {
        MediaError::Decode {
            kind,
            reason: err.to_string(),
        }
    }

    pub(crate) fn encode(err: impl std::fmt::Display) -> Self {
        MediaError::Encode {
            reason: err.to_string(),
        }
    }

    pub(crate) fn storage(path: &Path, source: io::Error) -> Self {
        MediaError::Storage {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, MediaError>;
