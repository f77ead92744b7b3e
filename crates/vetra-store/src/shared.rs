//! Shared-reference safety: base media are shared by design, so deletion
//! must first prove no other record still points at the file.
//!
//! The index/record layer owns its own schema; this module only needs a
//! serde view of the media-reference fields, so unrelated index fields
//! pass through deserialization untouched.

use std::fs;

use serde::{Deserialize, Serialize};

use crate::error::{MediaError, Result};
use crate::refs::{MediaRef, RefKind};
use crate::MediaStore;

/// One slot in a record's context/additional lists
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotMedia {
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub overlay: Option<String>,
}

/// Media-reference fields of one audit record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaRecord {
    /// Main defect photo
    #[serde(default)]
    pub main: Option<String>,
    /// Rework photo
    #[serde(default)]
    pub rework: Option<String>,
    #[serde(default)]
    pub context: Vec<SlotMedia>,
    #[serde(default)]
    pub additional_defects: Vec<SlotMedia>,
    #[serde(default)]
    pub additional_rework: Vec<SlotMedia>,
    #[serde(default)]
    pub videos: Vec<String>,
}

impl MediaRecord {
    fn base_media_refs(&self) -> impl Iterator<Item = &str> {
        self.main
            .iter()
            .chain(self.rework.iter())
            .chain(self.context.iter().filter_map(|s| s.base.as_ref()))
            .chain(self.additional_defects.iter().filter_map(|s| s.base.as_ref()))
            .chain(self.additional_rework.iter().filter_map(|s| s.base.as_ref()))
            .chain(self.videos.iter())
            .map(String::as_str)
    }
}

/// Media view of a whole project index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectIndex {
    #[serde(default)]
    pub records: Vec<MediaRecord>,
}

/// Whether a reference is still used outside the excluded record.
///
/// Overlays are never shared by construction and always report `false`.
/// With an excluded record, any use elsewhere counts; without one, a
/// reference counts as shared once it is used more than once anywhere.
pub fn is_shared(index: &ProjectIndex, reference: &MediaRef, exclude: Option<usize>) -> bool {
    if reference.kind() == RefKind::Overlay {
        return false;
    }

    let wanted = reference.normalized();
    let mut uses = 0usize;
    for (i, record) in index.records.iter().enumerate() {
        if Some(i) == exclude {
            continue;
        }
        for field in record.base_media_refs() {
            if field.replace('\\', "/") == wanted {
                uses += 1;
                if exclude.is_some() || uses > 1 {
                    return true;
                }
            }
        }
    }
    false
}

impl MediaStore {
    /// Delete a media file only if it is safe to do so.
    ///
    /// Overlays are unique per record and always deletable. Base media are
    /// deleted only when [`is_shared`] proves no other record references
    /// them; their registry entries are dropped in the same operation so
    /// the registry never points at a file deleted here. Returns whether a
    /// file was deleted.
    pub fn safe_delete(
        &self,
        index: &ProjectIndex,
        reference: &MediaRef,
        exclude: Option<usize>,
    ) -> Result<bool> {
        if reference.kind() == RefKind::Overlay {
            return self.clear_overlay(reference);
        }

        if is_shared(index, reference, exclude) {
            return Ok(false);
        }

        let path = match self.resolve(reference) {
            Some(path) => path,
            None => return Ok(false),
        };
        fs::remove_file(&path).map_err(|e| MediaError::storage(&path, e))?;

        let registry = self.registry_file();
        let _lock = registry.lock()?;
        let mut reg = registry.load();
        if reg.remove_reference(&reference.normalized()) > 0 {
            registry.save(&reg)?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_main(reference: &str) -> MediaRecord {
        MediaRecord {
            main: Some(reference.to_string()),
            ..MediaRecord::default()
        }
    }

    #[test]
    fn test_is_shared_two_records() {
        let index = ProjectIndex {
            records: vec![
                record_with_main("base_images/a.png"),
                record_with_main("base_images/a.png"),
            ],
        };
        let r = MediaRef::new("base_images/a.png");
        assert!(is_shared(&index, &r, Some(0)));
        assert!(is_shared(&index, &r, Some(1)));
        assert!(is_shared(&index, &r, None));
    }

    #[test]
    fn test_is_shared_single_use() {
        let index = ProjectIndex {
            records: vec![record_with_main("base_images/a.png")],
        };
        let r = MediaRef::new("base_images/a.png");
        assert!(!is_shared(&index, &r, Some(0)));
        assert!(!is_shared(&index, &r, None));
        // Used once, but by a record other than the excluded one
        assert!(is_shared(&index, &r, Some(5)));
    }

    #[test]
    fn test_is_shared_separator_insensitive() {
        let index = ProjectIndex {
            records: vec![
                record_with_main("base_images\\a.png"),
                record_with_main("base_images/a.png"),
            ],
        };
        assert!(is_shared(&index, &MediaRef::new("base_images/a.png"), Some(0)));
    }

    #[test]
    fn test_overlays_never_shared() {
        let overlay = "overlays/CANVAS__PRJ_p__AUD_a__NR_1__TYPE_DEFECT.png";
        let index = ProjectIndex {
            records: vec![record_with_main(overlay), record_with_main(overlay)],
        };
        assert!(!is_shared(&index, &MediaRef::new(overlay), None));
    }

    #[test]
    fn test_is_shared_scans_lists() {
        let mut rec = MediaRecord::default();
        rec.videos.push("base_videos/v.mp4".to_string());
        let mut rec2 = MediaRecord::default();
        rec2.additional_defects.push(SlotMedia {
            base: Some("base_videos/v.mp4".to_string()),
            overlay: None,
        });
        let index = ProjectIndex {
            records: vec![rec, rec2],
        };
        assert!(is_shared(&index, &MediaRef::new("base_videos/v.mp4"), Some(0)));
    }
}
