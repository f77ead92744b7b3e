//! Registry consistency checks for `vetra doctor`.

use std::collections::HashSet;
use std::fs;

use anyhow::{bail, Context, Result};
use tracing::debug;
use walkdir::WalkDir;

use vetra_store::{MediaKind, MediaRef, MediaRegistry, MediaStore};

#[derive(Default)]
struct Report {
    corrupt_registry: bool,
    stale_entries: Vec<String>,
    hash_mismatches: Vec<String>,
    unregistered: Vec<String>,
    temp_files: Vec<String>,
}

impl Report {
    fn problem_count(&self) -> usize {
        usize::from(self.corrupt_registry)
            + self.stale_entries.len()
            + self.hash_mismatches.len()
            + self.unregistered.len()
            + self.temp_files.len()
    }
}

/// Check every registry entry against disk and every stored file against
/// the registry. With `fix`, rebuild the registry and drop leftover temp
/// files afterwards.
pub fn run(store: &MediaStore, fix: bool) -> Result<()> {
    let mut report = Report::default();
    let registry = load_registry(store, &mut report)?;

    for kind in [MediaKind::Image, MediaKind::Video] {
        check_section(store, &registry, kind, &mut report)?;
    }
    find_temp_files(store, &mut report);

    print_report(&report);

    if report.problem_count() == 0 {
        println!("Store is healthy.");
        return Ok(());
    }

    if fix {
        for temp in &report.temp_files {
            if let Err(err) = fs::remove_file(temp) {
                eprintln!("  cannot remove {temp}: {err}");
            }
        }
        let rebuilt = store.rebuild_registry()?;
        println!(
            "Registry rebuilt: {} image(s), {} video(s)",
            rebuilt.images, rebuilt.videos
        );
        for failure in &rebuilt.failures {
            eprintln!("  skipped {}: {}", failure.path.display(), failure.error);
        }
        Ok(())
    } else {
        bail!(
            "{} problem(s) found, run with --fix to repair",
            report.problem_count()
        );
    }
}

/// Load the registry document, flagging an unparseable one as a finding
/// instead of failing: a corrupt registry is exactly what a rebuild
/// repairs, so the checks proceed against an empty one.
fn load_registry(store: &MediaStore, report: &mut Report) -> Result<MediaRegistry> {
    let path = store.registry_path();
    if !path.exists() {
        return Ok(MediaRegistry::default());
    }
    let data = fs::read(&path).with_context(|| format!("cannot read {path:?}"))?;
    match serde_json::from_slice(&data) {
        Ok(registry) => Ok(registry),
        Err(err) => {
            debug!(%err, "registry document unreadable");
            report.corrupt_registry = true;
            Ok(MediaRegistry::default())
        }
    }
}

fn check_section(
    store: &MediaStore,
    registry: &MediaRegistry,
    kind: MediaKind,
    report: &mut Report,
) -> Result<()> {
    let section = registry.section(kind);
    let mut registered: HashSet<String> = HashSet::new();

    for (hash, reference) in section {
        let media_ref = MediaRef::new(reference.as_str());
        registered.insert(media_ref.normalized());

        let path = match store.resolve(&media_ref) {
            Some(path) => path,
            None => {
                report.stale_entries.push(reference.clone());
                continue;
            }
        };

        debug!(%reference, "verifying content hash");
        match store.content_hash(&path, kind) {
            Ok(actual) if actual == *hash => {}
            Ok(_) => report.hash_mismatches.push(reference.clone()),
            Err(err) => {
                eprintln!("  cannot hash {}: {}", path.display(), err);
                report.hash_mismatches.push(reference.clone());
            }
        }
    }

    for entry in store.list_base_media(kind)? {
        if !registered.contains(&entry.reference.normalized()) {
            report.unregistered.push(entry.reference.to_string());
        }
    }

    Ok(())
}

fn find_temp_files(store: &MediaStore, report: &mut Report) {
    for entry in WalkDir::new(store.root())
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let name = entry.file_name().to_string_lossy();
        if name.ends_with(".tmp") {
            report.temp_files.push(entry.path().display().to_string());
        }
    }
}

fn print_report(report: &Report) {
    if report.corrupt_registry {
        println!("registry document is corrupt");
    }
    for reference in &report.stale_entries {
        println!("stale entry (file missing): {reference}");
    }
    for reference in &report.hash_mismatches {
        println!("hash mismatch: {reference}");
    }
    for reference in &report.unregistered {
        println!("unregistered file: {reference}");
    }
    for path in &report.temp_files {
        println!("leftover temp file: {path}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vetra_store::AttachSource;

    #[test]
    fn test_fix_recovers_from_corrupt_registry() {
        let temp = TempDir::new().unwrap();
        let store = MediaStore::open(temp.path()).unwrap();
        let reference = store
            .attach(AttachSource::VideoBytes {
                data: b"clip bytes",
                file_name: "c.mp4",
            })
            .unwrap();

        fs::write(store.registry_path(), b"{ not json").unwrap();

        // Without --fix the corruption is reported as a failure.
        assert!(run(&store, false).is_err());

        // With --fix the registry is rebuilt from disk.
        run(&store, true).unwrap();
        let rebuilt: MediaRegistry =
            serde_json::from_slice(&fs::read(store.registry_path()).unwrap()).unwrap();
        assert_eq!(
            rebuilt.videos.values().next().map(String::as_str),
            Some(reference.as_str())
        );
    }

    #[test]
    fn test_healthy_store_passes() {
        let temp = TempDir::new().unwrap();
        let store = MediaStore::open(temp.path()).unwrap();
        store
            .attach(AttachSource::VideoBytes {
                data: b"payload",
                file_name: "v.mkv",
            })
            .unwrap();
        run(&store, false).unwrap();
    }
}
