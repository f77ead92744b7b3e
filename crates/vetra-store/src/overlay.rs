//! Overlay lifecycle: save, load, clear, and bulk renumbering.
//!
//! Overlays are position-addressed, not content-addressed: one (project,
//! audit, record, role, slot) position maps to at most one current file,
//! and re-saving replaces the file at its deterministic path. They are the
//! only artifacts renamed when records are renumbered.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use image::RgbaImage;
use tracing::debug;
use uuid::Uuid;

use crate::codec::{decode_image_file, encode_png_rgba};
use crate::error::{MediaError, Result};
use crate::fsio::write_atomic;
use crate::names::{overlay_coord_prefix, overlay_file_name, OverlayCoords, OverlayRole};
use crate::refs::{MediaRef, RefKind};
use crate::MediaStore;

/// One record's coordinate change within a renumbering batch
#[derive(Debug, Clone)]
pub struct RenumberMove {
    pub from: OverlayCoords,
    pub to: OverlayCoords,
}

/// A successfully renamed overlay, old and new reference
#[derive(Debug, Clone)]
pub struct RenamedOverlay {
    pub from: MediaRef,
    pub to: MediaRef,
}

/// A failed rename within a renumbering batch
#[derive(Debug)]
pub struct RenameFailure {
    pub file_name: String,
    pub error: MediaError,
}

/// Collected result of a renumbering batch.
///
/// Failures are collected, not raised: already-renamed files stay renamed
/// and the caller decides whether to abort the overall renumbering.
#[derive(Debug, Default)]
pub struct RenumberOutcome {
    pub renamed: Vec<RenamedOverlay>,
    pub failures: Vec<RenameFailure>,
}

impl RenumberOutcome {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Fully transparent RGBA bitmap matching a base image's dimensions
pub fn empty_overlay(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, image::Rgba([0, 0, 0, 0]))
}

impl MediaStore {
    /// Save an annotation overlay for one position, replacing whatever was
    /// there.
    ///
    /// If the caller links a previous overlay reference (which may carry an
    /// older coordinate spelling), its file is deleted first so re-annotating
    /// never accumulates orphans. The write itself is atomic and lossless
    /// (PNG).
    pub fn save_overlay(
        &self,
        coords: &OverlayCoords,
        role: OverlayRole,
        slot: Option<u32>,
        bitmap: &RgbaImage,
        previous: Option<&MediaRef>,
    ) -> Result<MediaRef> {
        if let Some(prev) = previous {
            self.clear_overlay(prev)?;
        }

        let name = overlay_file_name(coords, role, slot);
        let path = self.overlays_dir().join(&name);
        let png = encode_png_rgba(bitmap)?;
        write_atomic(&path, &png)?;
        debug!(file = %name, "saved overlay");
        Ok(self.to_reference(&path, RefKind::Overlay))
    }

    /// Load a stored overlay back to an RGBA bitmap; `None` if the
    /// reference does not resolve.
    pub fn load_overlay(&self, reference: &MediaRef) -> Result<Option<RgbaImage>> {
        if reference.kind() != RefKind::Overlay {
            return Ok(None);
        }
        let path = match self.resolve(reference) {
            Some(path) => path,
            None => return Ok(None),
        };
        Ok(Some(decode_image_file(&path)?.to_rgba8()))
    }

    /// Delete an overlay file. Non-overlay references are rejected as a
    /// no-op: base media are shared by design and must never be deleted
    /// through this path. Returns whether a file was deleted.
    pub fn clear_overlay(&self, reference: &MediaRef) -> Result<bool> {
        if reference.kind() != RefKind::Overlay {
            return Ok(false);
        }
        match self.resolve(reference) {
            Some(path) => {
                fs::remove_file(&path).map_err(|e| MediaError::storage(&path, e))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Rename every overlay belonging to the moved records, across all
    /// roles and slots.
    ///
    /// Renumbering routinely assigns a record the number another record just
    /// held, so a direct rename could clobber an unrelated current file. The
    /// batch therefore runs in two phases: every matched file first moves
    /// aside to a unique temporary name, then each is assigned its final
    /// name, appending a numeric suffix while the target is taken by a file
    /// outside the batch.
    pub fn rename_overlays_for_renumber(&self, moves: &[RenumberMove]) -> RenumberOutcome {
        let dir = self.overlays_dir();
        let mut outcome = RenumberOutcome::default();

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                outcome.failures.push(RenameFailure {
                    file_name: dir.to_string_lossy().into_owned(),
                    error: MediaError::storage(&dir, e),
                });
                return outcome;
            }
        };

        // Pair every matching overlay file with its target name: the new
        // coordinate prefix plus the untouched role/slot remainder.
        let mut pending: Vec<(String, String)> = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            for mv in moves {
                let old_prefix = overlay_coord_prefix(&mv.from);
                if let Some(rest) = name.strip_prefix(old_prefix.as_str()) {
                    pending.push((name.clone(), format!("{}{rest}", overlay_coord_prefix(&mv.to))));
                    break;
                }
            }
        }
        pending.sort();

        // Phase 1: move sources aside so no final name can collide with a
        // file that is itself being renamed.
        let mut staged: Vec<(PathBuf, String, String)> = Vec::new();
        for (source, target) in pending {
            let tmp = dir.join(format!(
                "{source}.renum-{}.tmp",
                &Uuid::new_v4().simple().to_string()[..8]
            ));
            match fs::rename(dir.join(&source), &tmp) {
                Ok(()) => staged.push((tmp, source, target)),
                Err(e) => outcome.failures.push(RenameFailure {
                    file_name: source,
                    error: MediaError::storage(&tmp, e),
                }),
            }
        }

        // Phase 2: assign final names.
        let mut taken: HashSet<String> = HashSet::new();
        for (tmp, source, target) in staged {
            let final_name = match free_target_name(self, &target, &taken, &source) {
                Ok(name) => name,
                Err(error) => {
                    let _ = fs::rename(&tmp, dir.join(&source));
                    outcome.failures.push(RenameFailure {
                        file_name: source,
                        error,
                    });
                    continue;
                }
            };

            match fs::rename(&tmp, dir.join(&final_name)) {
                Ok(()) => {
                    taken.insert(final_name.clone());
                    debug!(from = %source, to = %final_name, "renumbered overlay");
                    outcome.renamed.push(RenamedOverlay {
                        from: self.to_reference(&dir.join(&source), RefKind::Overlay),
                        to: self.to_reference(&dir.join(&final_name), RefKind::Overlay),
                    });
                }
                Err(e) => {
                    let _ = fs::rename(&tmp, dir.join(&source));
                    outcome.failures.push(RenameFailure {
                        file_name: source,
                        error: MediaError::storage(&dir.join(&final_name), e),
                    });
                }
            }
        }

        outcome
    }
}

/// First free variant of `target`: the name itself, else with a numeric
/// suffix before the extension.
fn free_target_name(
    store: &MediaStore,
    target: &str,
    taken: &HashSet<String>,
    source: &str,
) -> Result<String> {
    let dir = store.overlays_dir();
    let (stem, ext) = match target.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), format!(".{ext}")),
        None => (target.to_string(), String::new()),
    };

    for n in 0..1000u32 {
        let candidate = if n == 0 {
            target.to_string()
        } else {
            format!("{stem}_{n}{ext}")
        };
        if !taken.contains(&candidate) && !dir.join(&candidate).exists() {
            return Ok(candidate);
        }
    }

    Err(MediaError::RenameCollision {
        source_name: source.to_string(),
        target_name: target.to_string(),
    })
}
