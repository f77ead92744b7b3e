//! Overlay lifecycle: replacement, deletion safety, and renumbering.

use std::fs;
use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use tempfile::TempDir;
use vetra_store::{
    AttachSource, MediaRef, MediaStore, OverlayCoords, OverlayRole, RenumberMove,
};

fn overlay_bitmap(color: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(8, 8, Rgba(color))
}

fn coords(nr: &str) -> OverlayCoords {
    OverlayCoords::new("P7", "A1", nr)
}

fn overlay_files(store: &MediaStore) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(store.overlays_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_save_overlay_replaces_not_accumulates() {
    let temp = TempDir::new().unwrap();
    let store = MediaStore::open(temp.path()).unwrap();

    let c = coords("001");
    let first = store
        .save_overlay(&c, OverlayRole::Defect, None, &overlay_bitmap([255, 0, 0, 255]), None)
        .unwrap();
    let second = store
        .save_overlay(
            &c,
            OverlayRole::Defect,
            None,
            &overlay_bitmap([0, 255, 0, 255]),
            Some(&first),
        )
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(overlay_files(&store).len(), 1);

    let loaded = store.load_overlay(&second).unwrap().unwrap();
    assert_eq!(loaded.get_pixel(0, 0), &Rgba([0, 255, 0, 255]));
}

#[test]
fn test_save_overlay_deletes_previous_at_other_position() {
    let temp = TempDir::new().unwrap();
    let store = MediaStore::open(temp.path()).unwrap();

    // Previous overlay carries an old coordinate spelling.
    let old = store
        .save_overlay(&coords("001"), OverlayRole::Defect, None, &overlay_bitmap([1, 1, 1, 255]), None)
        .unwrap();
    let new = store
        .save_overlay(
            &coords("002"),
            OverlayRole::Defect,
            None,
            &overlay_bitmap([2, 2, 2, 255]),
            Some(&old),
        )
        .unwrap();

    assert_ne!(old, new);
    assert!(store.resolve(&old).is_none());
    assert!(store.resolve(&new).is_some());
    assert_eq!(overlay_files(&store).len(), 1);
}

#[test]
fn test_clear_overlay_refuses_base_media() {
    let temp = TempDir::new().unwrap();
    let store = MediaStore::open(temp.path()).unwrap();

    let mut png = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(5, 5, Rgb([7, 7, 7])))
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .unwrap();
    let base = store.attach(AttachSource::ImageBytes(&png)).unwrap();

    assert!(!store.clear_overlay(&base).unwrap());
    assert!(store.resolve(&base).is_some(), "base medium must survive");

    assert!(!store.clear_overlay(&MediaRef::new("overlays/missing.png")).unwrap());
}

#[test]
fn test_clear_overlay_deletes_overlay() {
    let temp = TempDir::new().unwrap();
    let store = MediaStore::open(temp.path()).unwrap();

    let r = store
        .save_overlay(&coords("003"), OverlayRole::Rework, Some(1), &overlay_bitmap([0, 0, 0, 0]), None)
        .unwrap();
    assert!(store.clear_overlay(&r).unwrap());
    assert!(store.resolve(&r).is_none());
}

#[test]
fn test_renumber_permutation_is_collision_safe() {
    let temp = TempDir::new().unwrap();
    let store = MediaStore::open(temp.path()).unwrap();

    // Record N gets an overlay whose pixel value encodes N, plus a slotted
    // additional-defect overlay.
    for n in 1..=3u8 {
        let c = coords(&format!("00{n}"));
        store
            .save_overlay(&c, OverlayRole::Defect, None, &overlay_bitmap([n, 0, 0, 255]), None)
            .unwrap();
        store
            .save_overlay(
                &c,
                OverlayRole::AdditionalDefect,
                Some(0),
                &overlay_bitmap([n, 0, 0, 255]),
                None,
            )
            .unwrap();
    }

    // Cyclic permutation: every new number is another record's old number.
    let moves = vec![
        RenumberMove { from: coords("001"), to: coords("002") },
        RenumberMove { from: coords("002"), to: coords("003") },
        RenumberMove { from: coords("003"), to: coords("001") },
    ];
    let outcome = store.rename_overlays_for_renumber(&moves);
    assert!(outcome.is_clean(), "failures: {:?}", outcome.failures);
    assert_eq!(outcome.renamed.len(), 6);

    let names = overlay_files(&store);
    assert_eq!(names.len(), 6, "every final filename must be unique");

    // Every renamed reference resolves, and content followed the record:
    // the overlay now filed under NR_002 is record 1's bitmap.
    for renamed in &outcome.renamed {
        assert!(store.resolve(&renamed.to).is_some());
    }
    let moved = store
        .load_overlay(&MediaRef::new(
            "overlays/CANVAS__PRJ_P7__AUD_A1__NR_002__TYPE_DEFECT.png",
        ))
        .unwrap()
        .unwrap();
    assert_eq!(moved.get_pixel(0, 0), &Rgba([1, 0, 0, 255]));
}

#[test]
fn test_renumber_suffixes_on_unrelated_collision() {
    let temp = TempDir::new().unwrap();
    let store = MediaStore::open(temp.path()).unwrap();

    store
        .save_overlay(&coords("001"), OverlayRole::Defect, None, &overlay_bitmap([5, 5, 5, 255]), None)
        .unwrap();

    // A stray file (not part of the batch) already sits at the target name.
    let stray = store
        .overlays_dir()
        .join("CANVAS__PRJ_P7__AUD_A1__NR_009__TYPE_DEFECT.png");
    fs::write(&stray, b"stray").unwrap();

    let outcome = store.rename_overlays_for_renumber(&[RenumberMove {
        from: coords("001"),
        to: coords("009"),
    }]);
    assert!(outcome.is_clean(), "failures: {:?}", outcome.failures);
    assert_eq!(outcome.renamed.len(), 1);

    let target = &outcome.renamed[0].to;
    assert_eq!(
        target.as_str(),
        "overlays/CANVAS__PRJ_P7__AUD_A1__NR_009__TYPE_DEFECT_1.png"
    );
    assert!(store.resolve(target).is_some());
    assert!(stray.exists(), "unrelated file must not be clobbered");
}

#[test]
fn test_renumber_ignores_unrelated_records() {
    let temp = TempDir::new().unwrap();
    let store = MediaStore::open(temp.path()).unwrap();

    let kept = store
        .save_overlay(&coords("042"), OverlayRole::Context, None, &overlay_bitmap([9, 9, 9, 255]), None)
        .unwrap();
    store
        .save_overlay(&coords("001"), OverlayRole::Context, None, &overlay_bitmap([8, 8, 8, 255]), None)
        .unwrap();

    let outcome = store.rename_overlays_for_renumber(&[RenumberMove {
        from: coords("001"),
        to: coords("002"),
    }]);
    assert_eq!(outcome.renamed.len(), 1);
    assert!(store.resolve(&kept).is_some());
}
