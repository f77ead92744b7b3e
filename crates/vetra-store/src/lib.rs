//! # vetra-store
//!
//! Content-addressed, deduplicating media store for audit projects.
//!
//! The store separates two classes of artifacts under one media root:
//!
//! - **Base media** (photos/videos): immutable, randomly named, stored at
//!   most once per content hash via a persisted registry.
//! - **Overlays** (annotation layers): mutable transparent PNGs named
//!   deterministically by their position, and the only files ever renamed
//!   when records are renumbered.
//!
//! ## Directory layout
//!
//! ```text
//! <media-root>/
//! ├── base_images/          MEDIA_IMG__<16hex>.<ext>
//! ├── base_videos/          MEDIA_VID__<16hex>.<ext>
//! ├── overlays/             CANVAS__PRJ_<p>__AUD_<a>__NR_<n>__TYPE_<t>[_<slot>].png
//! └── media_registry.json   { "images": {hash: ref}, "videos": {hash: ref} }
//! ```
//!
//! Callers hold references (`base_images/<name>`, ...) instead of absolute
//! paths, so the root can move between environments without invalidating
//! persisted index data.

mod codec;
mod composite;
mod error;
mod fsio;
mod names;
mod overlay;
mod refs;
mod registry;
mod shared;

pub use error::{MediaError, Result};
pub use names::{base_media_file_name, overlay_file_name, sanitize, OverlayCoords, OverlayRole};
pub use overlay::{empty_overlay, RenameFailure, RenamedOverlay, RenumberMove, RenumberOutcome};
pub use refs::{
    classify, MediaKind, MediaRef, RefKind, BASE_IMAGES_DIR, BASE_IMAGE_PREFIX, BASE_VIDEOS_DIR,
    BASE_VIDEO_PREFIX, OVERLAYS_DIR, OVERLAY_PREFIX,
};
pub use registry::{MediaRegistry, REGISTRY_FILE_NAME};
pub use shared::{is_shared, MediaRecord, ProjectIndex, SlotMedia};

use std::fs;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use tracing::{debug, info};

use crate::codec::{decode_image_bytes, decode_image_file, normalize_image, sha256_hex};
use crate::fsio::write_atomic;
use crate::registry::RegistryFile;

/// Default cap on stored image width, in pixels
pub const DEFAULT_MAX_IMAGE_WIDTH: u32 = 1800;

/// Content handed to [`MediaStore::attach`]
pub enum AttachSource<'a> {
    /// Raw bytes of an uploaded image (any decodable container format)
    ImageBytes(&'a [u8]),
    /// An already-decoded bitmap
    ImageBitmap(&'a DynamicImage),
    /// Raw bytes of an uploaded video; the original file name supplies the
    /// stored extension
    VideoBytes {
        data: &'a [u8],
        file_name: &'a str,
    },
}

/// A stored base medium as returned by listings
#[derive(Debug, Clone)]
pub struct MediaEntry {
    pub reference: MediaRef,
    pub file_name: String,
    pub path: PathBuf,
}

/// Per-file failure collected during a scan or rebuild
#[derive(Debug)]
pub struct ScanFailure {
    pub path: PathBuf,
    pub error: MediaError,
}

/// Result of a full registry rebuild
#[derive(Debug, Default)]
pub struct RebuildReport {
    pub images: usize,
    pub videos: usize,
    pub failures: Vec<ScanFailure>,
}

/// File counts and total size under the media root
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub base_images: u64,
    pub base_videos: u64,
    pub overlays: u64,
    pub total_bytes: u64,
}

/// Filesystem-backed media store rooted at one directory.
///
/// All state lives on disk; the struct only owns the root paths and image
/// normalization settings, so it is cheap to clone and free of hidden
/// global state.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    legacy_root: Option<PathBuf>,
    max_image_width: u32,
    registry: RegistryFile,
}

impl MediaStore {
    /// Open a store at the given media root, creating the directory
    /// structure if needed.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [BASE_IMAGES_DIR, BASE_VIDEOS_DIR, OVERLAYS_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(|e| MediaError::storage(&path, e))?;
        }
        let registry = RegistryFile::new(&root);
        Ok(Self {
            root,
            legacy_root: None,
            max_image_width: DEFAULT_MAX_IMAGE_WIDTH,
            registry,
        })
    }

    /// Set a legacy per-project root tried as the last resolution fallback.
    pub fn with_legacy_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        self.legacy_root = Some(root.as_ref().to_path_buf());
        self
    }

    /// Override the width cap applied during image normalization
    /// (0 disables downscaling).
    pub fn with_max_image_width(mut self, width: u32) -> Self {
        self.max_image_width = width;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn base_dir(&self, kind: MediaKind) -> PathBuf {
        self.root.join(kind.subdir())
    }

    pub fn overlays_dir(&self) -> PathBuf {
        self.root.join(OVERLAYS_DIR)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.registry.path().to_path_buf()
    }

    pub(crate) fn registry_file(&self) -> &RegistryFile {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Reference resolution
    // ------------------------------------------------------------------

    /// Resolve a reference to an absolute path of an existing file.
    ///
    /// Tries, in order: the reference as an absolute path, the classified
    /// kind's canonical subdirectory, a generic join under the media root,
    /// and finally the legacy root if one is configured. `None` means
    /// "broken reference", a normal recoverable condition.
    pub fn resolve(&self, reference: &MediaRef) -> Option<PathBuf> {
        let raw = reference.as_str();
        if raw.is_empty() {
            return None;
        }

        let as_path = Path::new(raw);
        if as_path.is_absolute() {
            return as_path.exists().then(|| as_path.to_path_buf());
        }

        let normalized = reference.normalized();
        if let Some(subdir) = reference.kind().subdir() {
            let candidate = self.root.join(subdir).join(reference.file_name());
            if candidate.exists() {
                return Some(candidate);
            }
        }

        let candidate = self.root.join(&normalized);
        if candidate.exists() {
            return Some(candidate);
        }

        if let Some(legacy) = &self.legacy_root {
            let candidate = legacy.join(&normalized);
            if candidate.exists() {
                return Some(candidate);
            }
        }

        None
    }

    /// Canonical `<subdir>/<basename>` reference for a path known to live
    /// under the media root.
    pub fn to_reference(&self, path: &Path, kind: RefKind) -> MediaRef {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match kind.subdir() {
            Some(subdir) => MediaRef::new(format!("{subdir}/{name}")),
            None => MediaRef::new(name),
        }
    }

    // ------------------------------------------------------------------
    // Attach pipeline
    // ------------------------------------------------------------------

    /// Attach new media content, deduplicating by content hash.
    ///
    /// Byte-identical (for videos) or pixel-identical (for images) content
    /// is stored at most once: repeated calls with the same content return
    /// the same reference without writing.
    pub fn attach(&self, source: AttachSource<'_>) -> Result<MediaRef> {
        match source {
            AttachSource::ImageBytes(data) => {
                let img = decode_image_bytes(data)?;
                self.attach_image_bitmap(&img)
            }
            AttachSource::ImageBitmap(img) => self.attach_image_bitmap(img),
            AttachSource::VideoBytes { data, file_name } => {
                self.attach_video_bytes(data, file_name)
            }
        }
    }

    fn attach_image_bitmap(&self, img: &DynamicImage) -> Result<MediaRef> {
        let (_, normalized) = normalize_image(img.clone(), self.max_image_width)?;
        let hash = sha256_hex(&normalized);

        let _lock = self.registry.lock()?;
        let mut reg = self.registry.load();
        if let Some(existing) = self.dedup_lookup(&mut reg, MediaKind::Image, &hash)? {
            debug!(%existing, "image dedup hit");
            return Ok(existing);
        }

        let name = base_media_file_name(MediaKind::Image, ".png");
        let path = self.base_dir(MediaKind::Image).join(&name);
        write_atomic(&path, &normalized)?;

        let reference = self.to_reference(&path, RefKind::BaseImage);
        reg.section_mut(MediaKind::Image)
            .insert(hash, reference.as_str().to_string());
        self.registry.save(&reg)?;
        debug!(%reference, "stored new base image");
        Ok(reference)
    }

    fn attach_video_bytes(&self, data: &[u8], file_name: &str) -> Result<MediaRef> {
        let hash = sha256_hex(data);

        let _lock = self.registry.lock()?;
        let mut reg = self.registry.load();
        if let Some(existing) = self.dedup_lookup(&mut reg, MediaKind::Video, &hash)? {
            debug!(%existing, "video dedup hit");
            return Ok(existing);
        }

        let ext = Path::new(file_name)
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = base_media_file_name(MediaKind::Video, &ext);
        let path = self.base_dir(MediaKind::Video).join(&name);
        write_atomic(&path, data)?;

        let reference = self.to_reference(&path, RefKind::BaseVideo);
        reg.section_mut(MediaKind::Video)
            .insert(hash, reference.as_str().to_string());
        self.registry.save(&reg)?;
        debug!(%reference, "stored new base video");
        Ok(reference)
    }

    /// Re-register an existing stored file under its canonical reference.
    ///
    /// Used when the caller already holds a reference (possibly in a legacy
    /// spelling) and wants the canonical form plus a healed registry entry.
    /// Returns `None` if the reference does not resolve.
    pub fn adopt_existing(&self, reference: &MediaRef, kind: MediaKind) -> Result<Option<MediaRef>> {
        let path = match self.resolve(reference) {
            Some(path) => path,
            None => return Ok(None),
        };

        let canonical = match reference.kind() {
            RefKind::BaseImage | RefKind::BaseVideo => MediaRef::new(reference.normalized()),
            _ => self.to_reference(
                &path,
                match kind {
                    MediaKind::Image => RefKind::BaseImage,
                    MediaKind::Video => RefKind::BaseVideo,
                },
            ),
        };

        let hash = self.content_hash(&path, kind)?;
        let _lock = self.registry.lock()?;
        let mut reg = self.registry.load();
        reg.section_mut(kind)
            .insert(hash, canonical.as_str().to_string());
        self.registry.save(&reg)?;
        Ok(Some(canonical))
    }

    /// Registry lookup with self-heal.
    ///
    /// The registry is a cache over filesystem state, so any miss (no
    /// entry, stale entry pointing at a deleted file, never-populated
    /// section) triggers a rescan of the base directory before the hash
    /// is treated as new: a file on disk whose registry entry was lost
    /// still dedups. Caller must hold the registry lock.
    fn dedup_lookup(
        &self,
        reg: &mut MediaRegistry,
        kind: MediaKind,
        hash: &str,
    ) -> Result<Option<MediaRef>> {
        if let Some(existing) = self.live_entry(reg, kind, hash) {
            return Ok(Some(existing));
        }

        // A stale entry would shadow the healed one below.
        reg.section_mut(kind).remove(hash);
        self.heal_section(reg, kind);
        self.registry.save(reg)?;
        Ok(self.live_entry(reg, kind, hash))
    }

    fn live_entry(&self, reg: &MediaRegistry, kind: MediaKind, hash: &str) -> Option<MediaRef> {
        let reference = MediaRef::new(reg.lookup(kind, hash)?);
        self.resolve(&reference).map(|_| reference)
    }

    fn heal_section(&self, reg: &mut MediaRegistry, kind: MediaKind) {
        for (path, outcome) in self.scan_base_dir(kind) {
            match outcome {
                Ok(hash) => {
                    let reference = self.to_reference(
                        &path,
                        match kind {
                            MediaKind::Image => RefKind::BaseImage,
                            MediaKind::Video => RefKind::BaseVideo,
                        },
                    );
                    reg.section_mut(kind)
                        .entry(hash)
                        .or_insert_with(|| reference.as_str().to_string());
                }
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "skipping unreadable file during registry heal");
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Hashing and scans
    // ------------------------------------------------------------------

    /// Content hash of a stored file: for images the hash of its normalized
    /// encoding, for videos the hash of the raw bytes.
    pub fn content_hash(&self, path: &Path, kind: MediaKind) -> Result<String> {
        match kind {
            MediaKind::Image => {
                let img = decode_image_file(path)?;
                let (_, normalized) = normalize_image(img, self.max_image_width)?;
                Ok(sha256_hex(&normalized))
            }
            MediaKind::Video => {
                let data = fs::read(path).map_err(|e| MediaError::storage(path, e))?;
                Ok(sha256_hex(&data))
            }
        }
    }

    /// Hash every recognized file in a base directory.
    ///
    /// Failures are collected per file, not swallowed, so stale or corrupt
    /// entries stay visible to callers and logs.
    pub fn scan_base_dir(&self, kind: MediaKind) -> Vec<(PathBuf, Result<String>)> {
        let dir = self.base_dir(kind);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => return vec![(dir.clone(), Err(MediaError::storage(&dir, e)))],
        };

        let mut results = Vec::new();
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.file_name()
                        .map(|n| kind.matches_extension(&n.to_string_lossy()))
                        .unwrap_or(false)
            })
            .collect();
        paths.sort();

        for path in paths {
            let outcome = self.content_hash(&path, kind);
            results.push((path, outcome));
        }
        results
    }

    /// Rebuild the registry from scratch by scanning both base directories.
    pub fn rebuild_registry(&self) -> Result<RebuildReport> {
        let _lock = self.registry.lock()?;
        let mut reg = MediaRegistry::default();
        let mut report = RebuildReport::default();

        for kind in [MediaKind::Image, MediaKind::Video] {
            for (path, outcome) in self.scan_base_dir(kind) {
                match outcome {
                    Ok(hash) => {
                        let reference = self.to_reference(
                            &path,
                            match kind {
                                MediaKind::Image => RefKind::BaseImage,
                                MediaKind::Video => RefKind::BaseVideo,
                            },
                        );
                        if reg
                            .section_mut(kind)
                            .insert(hash, reference.as_str().to_string())
                            .is_none()
                        {
                            match kind {
                                MediaKind::Image => report.images += 1,
                                MediaKind::Video => report.videos += 1,
                            }
                        }
                    }
                    Err(error) => report.failures.push(ScanFailure { path, error }),
                }
            }
        }

        self.registry.save(&reg)?;
        info!(
            images = report.images,
            videos = report.videos,
            failures = report.failures.len(),
            "registry rebuilt"
        );
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Listings and stats
    // ------------------------------------------------------------------

    /// Sorted listing of stored base media of one kind.
    pub fn list_base_media(&self, kind: MediaKind) -> Result<Vec<MediaEntry>> {
        let dir = self.base_dir(kind);
        let entries = fs::read_dir(&dir).map_err(|e| MediaError::storage(&dir, e))?;

        let mut out = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if path.is_file() && kind.matches_extension(&name) {
                out.push(MediaEntry {
                    reference: MediaRef::new(format!("{}/{name}", kind.subdir())),
                    file_name: name,
                    path,
                });
            }
        }
        out.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(out)
    }

    /// File counts and cumulative size across the three subdirectories.
    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        for (dir, counter) in [
            (self.base_dir(MediaKind::Image), 0usize),
            (self.base_dir(MediaKind::Video), 1),
            (self.overlays_dir(), 2),
        ] {
            let entries = fs::read_dir(&dir).map_err(|e| MediaError::storage(&dir, e))?;
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                if path.extension().is_some_and(|ext| ext == "tmp") {
                    continue;
                }
                match counter {
                    0 => stats.base_images += 1,
                    1 => stats.base_videos += 1,
                    _ => stats.overlays += 1,
                }
                if let Ok(meta) = entry.metadata() {
                    stats.total_bytes += meta.len();
                }
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_layout() {
        let temp = TempDir::new().unwrap();
        let store = MediaStore::open(temp.path()).unwrap();
        assert!(store.base_dir(MediaKind::Image).is_dir());
        assert!(store.base_dir(MediaKind::Video).is_dir());
        assert!(store.overlays_dir().is_dir());
    }

    #[test]
    fn test_resolve_absolute_and_relative() {
        let temp = TempDir::new().unwrap();
        let store = MediaStore::open(temp.path()).unwrap();

        let path = store.base_dir(MediaKind::Image).join("MEDIA_IMG__abc.png");
        fs::write(&path, b"x").unwrap();

        let abs = MediaRef::new(path.to_string_lossy().into_owned());
        assert_eq!(store.resolve(&abs), Some(path.clone()));

        let rel = MediaRef::new("base_images/MEDIA_IMG__abc.png");
        assert_eq!(store.resolve(&rel), Some(path.clone()));

        // Bare prefixed filename resolves through the kind subdirectory
        let bare = MediaRef::new("MEDIA_IMG__abc.png");
        assert_eq!(store.resolve(&bare), Some(path.clone()));

        // Backslash spelling still resolves
        let back = MediaRef::new("base_images\\MEDIA_IMG__abc.png");
        assert_eq!(store.resolve(&back), Some(path));
    }

    #[test]
    fn test_resolve_legacy_fallback() {
        let temp = TempDir::new().unwrap();
        let legacy = TempDir::new().unwrap();
        let store = MediaStore::open(temp.path())
            .unwrap()
            .with_legacy_root(legacy.path());

        fs::create_dir_all(legacy.path().join("photos")).unwrap();
        fs::write(legacy.path().join("photos/old.jpg"), b"x").unwrap();

        let r = MediaRef::new("photos/old.jpg");
        assert_eq!(store.resolve(&r), Some(legacy.path().join("photos/old.jpg")));
    }

    #[test]
    fn test_resolve_broken_is_none() {
        let temp = TempDir::new().unwrap();
        let store = MediaStore::open(temp.path()).unwrap();
        assert_eq!(store.resolve(&MediaRef::new("base_images/missing.png")), None);
        assert_eq!(store.resolve(&MediaRef::new("")), None);
    }

    #[test]
    fn test_to_reference() {
        let temp = TempDir::new().unwrap();
        let store = MediaStore::open(temp.path()).unwrap();
        let path = store.base_dir(MediaKind::Video).join("MEDIA_VID__a.mp4");
        let r = store.to_reference(&path, RefKind::BaseVideo);
        assert_eq!(r.as_str(), "base_videos/MEDIA_VID__a.mp4");
        assert_eq!(r.kind(), RefKind::BaseVideo);
    }
}
