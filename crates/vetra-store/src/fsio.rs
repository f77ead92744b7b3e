//! Atomic file writes.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::error::{MediaError, Result};

/// Write bytes via a temp file in the same directory plus an atomic rename,
/// so a crashed or failed write never leaves a partial file at `path`.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| MediaError::storage(parent, e))?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "media".to_string());
    let tmp = path.with_file_name(format!("{file_name}.{}.tmp", std::process::id()));

    let write = (|| {
        let mut f = File::create(&tmp)?;
        f.write_all(data)?;
        f.sync_all()
    })();
    if let Err(e) = write {
        let _ = fs::remove_file(&tmp);
        return Err(MediaError::storage(&tmp, e));
    }

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(MediaError::storage(path, e));
    }
    Ok(())
}
