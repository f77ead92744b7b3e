//! Filename generation for base media and overlays.
//!
//! Base media names are random (UUIDv4-derived, 64 bits of entropy) because
//! the files are immutable and content-addressed through the registry.
//! Overlay names are deterministic functions of their position (project,
//! audit, record number, role, slot) so that one position maps to at most
//! one current file and re-saving overwrites instead of accumulating.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::refs::{MediaKind, BASE_IMAGE_PREFIX, BASE_VIDEO_PREFIX, OVERLAY_PREFIX};

/// Role of an overlay within its record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayRole {
    /// Main defect photo annotation
    Defect,
    /// Context photo annotation
    Context,
    /// Rework photo annotation
    Rework,
    /// Additional-defect list entry annotation
    AdditionalDefect,
    /// Additional-rework list entry annotation
    AdditionalRework,
}

impl OverlayRole {
    /// Tag embedded in the overlay filename
    pub fn tag(self) -> &'static str {
        match self {
            OverlayRole::Defect => "DEFECT",
            OverlayRole::Context => "CONTEXT",
            OverlayRole::Rework => "REWORK",
            OverlayRole::AdditionalDefect => "ADD_DEFECT",
            OverlayRole::AdditionalRework => "ADD_REWORK",
        }
    }
}

/// Position an overlay belongs to, used only to derive its filename
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OverlayCoords {
    pub project: String,
    pub audit: String,
    pub record_nr: String,
}

impl OverlayCoords {
    pub fn new(
        project: impl Into<String>,
        audit: impl Into<String>,
        record_nr: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            audit: audit.into(),
            record_nr: record_nr.into(),
        }
    }
}

/// Sanitize a string for use as a filename component.
///
/// Filesystem-unsafe characters become underscores, runs of underscores
/// collapse to one, and leading/trailing underscores are stripped. The
/// collapse guarantees components never contain the `__` separator used
/// between filename fields.
pub fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.trim().chars() {
        if matches!(ch, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || ch.is_control() {
            out.push('_');
        } else {
            out.push(ch);
        }
    }
    while out.contains("__") {
        out = out.replace("__", "_");
    }
    out.trim_matches('_').to_string()
}

fn sanitize_or(s: &str, fallback: &str) -> String {
    let clean = sanitize(s);
    if clean.is_empty() {
        fallback.to_string()
    } else {
        clean
    }
}

/// Normalize an extension to lowercase with a leading dot
pub(crate) fn normalize_extension(ext: &str, fallback: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.is_empty() {
        fallback.to_string()
    } else if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

/// Generate a collision-free filename for a new base medium.
///
/// 16 hex chars of UUIDv4 randomness keep the collision probability
/// negligible well past 10^6 stored files.
pub fn base_media_file_name(kind: MediaKind, extension: &str) -> String {
    let id = &Uuid::new_v4().simple().to_string()[..16];
    let (prefix, fallback) = match kind {
        MediaKind::Image => (BASE_IMAGE_PREFIX, ".png"),
        MediaKind::Video => (BASE_VIDEO_PREFIX, ".mp4"),
    };
    format!("{prefix}{id}{}", normalize_extension(extension, fallback))
}

/// Deterministic overlay filename for a (coords, role, slot) position
pub fn overlay_file_name(coords: &OverlayCoords, role: OverlayRole, slot: Option<u32>) -> String {
    let prefix = overlay_coord_prefix(coords);
    match slot {
        Some(i) => format!("{prefix}{}_{i}.png", role.tag()),
        None => format!("{prefix}{}.png", role.tag()),
    }
}

/// Filename prefix shared by every overlay belonging to one record.
/// Renumbering matches files on this prefix and transplants the remainder.
pub(crate) fn overlay_coord_prefix(coords: &OverlayCoords) -> String {
    format!(
        "{OVERLAY_PREFIX}PRJ_{}__AUD_{}__NR_{}__TYPE_",
        sanitize_or(&coords.project, "PROJ"),
        sanitize_or(&coords.audit, "AUDIT"),
        sanitize_or(&coords.record_nr, "000"),
    )
}
