//! Reference classification and the `MediaRef` value type.
//!
//! A reference is a short portable string (`base_images/<name>`,
//! `base_videos/<name>`, `overlays/<name>`, a bare prefixed filename, or a
//! legacy absolute path) that identifies a stored file without pinning the
//! on-disk root. Classification is pure string inspection and happens once,
//! at `MediaRef` construction; the kind then travels with the value instead
//! of being re-parsed at every call site.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Filename prefix for immutable base images
pub const BASE_IMAGE_PREFIX: &str = "MEDIA_IMG__";
/// Filename prefix for immutable base videos
pub const BASE_VIDEO_PREFIX: &str = "MEDIA_VID__";
/// Filename prefix for mutable canvas overlays
pub const OVERLAY_PREFIX: &str = "CANVAS__";

/// Subdirectory of the media root holding base images
pub const BASE_IMAGES_DIR: &str = "base_images";
/// Subdirectory of the media root holding base videos
pub const BASE_VIDEOS_DIR: &str = "base_videos";
/// Subdirectory of the media root holding canvas overlays
pub const OVERLAYS_DIR: &str = "overlays";

/// The two kinds of base media the store manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Canonical subdirectory under the media root
    pub fn subdir(self) -> &'static str {
        match self {
            MediaKind::Image => BASE_IMAGES_DIR,
            MediaKind::Video => BASE_VIDEOS_DIR,
        }
    }

    /// File extensions recognized by directory scans and listings
    pub fn known_extensions(self) -> &'static [&'static str] {
        match self {
            MediaKind::Image => &["jpg", "jpeg", "png"],
            MediaKind::Video => &["mp4", "mov", "avi", "mkv", "webm"],
        }
    }

    pub(crate) fn matches_extension(self, file_name: &str) -> bool {
        let lower = file_name.to_ascii_lowercase();
        self.known_extensions()
            .iter()
            .any(|ext| lower.ends_with(&format!(".{ext}")))
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Classification of a reference's textual form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    BaseImage,
    BaseVideo,
    Overlay,
    Unknown,
}

impl RefKind {
    /// Canonical subdirectory for this kind, if it has one
    pub fn subdir(self) -> Option<&'static str> {
        match self {
            RefKind::BaseImage => Some(BASE_IMAGES_DIR),
            RefKind::BaseVideo => Some(BASE_VIDEOS_DIR),
            RefKind::Overlay => Some(OVERLAYS_DIR),
            RefKind::Unknown => None,
        }
    }
}

/// Classify a reference from its textual form alone.
///
/// Recognizes the fixed filename prefix per kind or the fixed parent
/// directory name, case- and separator-insensitively.
pub fn classify(reference: &str) -> RefKind {
    let norm = reference.replace('\\', "/").to_ascii_lowercase();
    if norm.is_empty() {
        return RefKind::Unknown;
    }
    let name = norm.rsplit('/').next().unwrap_or(norm.as_str());

    if name.starts_with("media_img__") || in_dir(&norm, BASE_IMAGES_DIR) {
        RefKind::BaseImage
    } else if name.starts_with("media_vid__") || in_dir(&norm, BASE_VIDEOS_DIR) {
        RefKind::BaseVideo
    } else if name.starts_with("canvas__") || in_dir(&norm, OVERLAYS_DIR) {
        RefKind::Overlay
    } else {
        RefKind::Unknown
    }
}

fn in_dir(normalized_lower: &str, dir: &str) -> bool {
    normalized_lower.starts_with(&format!("{dir}/"))
        || normalized_lower.contains(&format!("/{dir}/"))
}

/// A storage reference with its kind computed once at construction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct MediaRef {
    raw: String,
    kind: RefKind,
}

impl MediaRef {
    pub fn new(reference: impl Into<String>) -> Self {
        let raw = reference.into();
        let kind = classify(&raw);
        Self { raw, kind }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> RefKind {
        self.kind
    }

    /// The reference with separators normalized to forward slashes
    pub fn normalized(&self) -> String {
        self.raw.replace('\\', "/")
    }

    /// Final path segment of the reference
    pub fn file_name(&self) -> &str {
        self.raw
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(self.raw.as_str())
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<String> for MediaRef {
    fn from(raw: String) -> Self {
        MediaRef::new(raw)
    }
}

impl From<&str> for MediaRef {
    fn from(raw: &str) -> Self {
        MediaRef::new(raw)
    }
}

impl From<MediaRef> for String {
    fn from(r: MediaRef) -> Self {
        r.raw
    }
}
