//! # vetra CLI
//!
//! Operator commands for the Vetra media store: attach and resolve media,
//! inspect and repair the deduplication registry, and flatten images for
//! export.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use vetra_config::logging::{init_logging, LogLevel};
use vetra_store::{AttachSource, MediaKind, MediaRef, MediaStore};

mod doctor;

/// Vetra - content-addressed media store for quality audits
#[derive(Parser)]
#[command(name = "vetra")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Media root directory (overrides config)
    #[arg(long)]
    media_root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Image,
    Video,
}

impl From<KindArg> for MediaKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Image => MediaKind::Image,
            KindArg::Video => MediaKind::Video,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Attach a media file, deduplicating by content hash
    Attach {
        /// File to attach
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Media kind (inferred from the extension when omitted)
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },

    /// Resolve a storage reference to an absolute path
    Resolve {
        #[arg(value_name = "REF")]
        reference: String,
    },

    /// List stored base media
    List {
        #[arg(long, value_enum, default_value = "image")]
        kind: KindArg,
    },

    /// Rebuild the deduplication registry from files on disk
    Rebuild,

    /// Display store statistics
    Status,

    /// Check registry consistency against disk
    Doctor {
        /// Rebuild the registry if problems are found
        #[arg(long)]
        fix: bool,
    },

    /// Flatten a base image with its overlay into an RGB file
    Composite {
        #[arg(value_name = "BASE_REF")]
        base: String,

        #[arg(long, value_name = "REF")]
        overlay: Option<String>,

        /// Output file (format from extension)
        #[arg(short, long, value_name = "OUT")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Warn
    });

    let store = open_store(cli.media_root.as_deref())?;

    match cli.command {
        Commands::Attach { file, kind } => attach(&store, &file, kind),
        Commands::Resolve { reference } => resolve(&store, &reference),
        Commands::List { kind } => list(&store, kind.into()),
        Commands::Rebuild => rebuild(&store),
        Commands::Status => status(&store),
        Commands::Doctor { fix } => doctor::run(&store, fix),
        Commands::Composite {
            base,
            overlay,
            output,
        } => composite(&store, &base, overlay.as_deref(), &output),
    }
}

fn open_store(media_root: Option<&Path>) -> Result<MediaStore> {
    let config = vetra_config::config().clone();
    let root = media_root
        .map(Path::to_path_buf)
        .unwrap_or(config.storage.media_root);

    let mut store =
        MediaStore::open(&root).with_context(|| format!("cannot open media store at {root:?}"))?;
    store = store.with_max_image_width(config.images.max_width);
    if let Some(legacy) = config.storage.legacy_root {
        store = store.with_legacy_root(legacy);
    }
    Ok(store)
}

fn infer_kind(path: &Path) -> Option<MediaKind> {
    let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
    for kind in [MediaKind::Image, MediaKind::Video] {
        if kind.known_extensions().contains(&ext.as_str()) {
            return Some(kind);
        }
    }
    None
}

fn attach(store: &MediaStore, file: &Path, kind: Option<KindArg>) -> Result<()> {
    let kind: MediaKind = match kind {
        Some(kind) => kind.into(),
        None => infer_kind(file)
            .with_context(|| format!("cannot infer media kind of {file:?}, pass --kind"))?,
    };

    let data = fs::read(file).with_context(|| format!("cannot read {file:?}"))?;
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let reference = match kind {
        MediaKind::Image => store.attach(AttachSource::ImageBytes(&data))?,
        MediaKind::Video => store.attach(AttachSource::VideoBytes {
            data: &data,
            file_name: &file_name,
        })?,
    };
    println!("{reference}");
    Ok(())
}

fn resolve(store: &MediaStore, reference: &str) -> Result<()> {
    match store.resolve(&MediaRef::new(reference)) {
        Some(path) => {
            println!("{}", path.display());
            Ok(())
        }
        None => bail!("broken reference: {reference}"),
    }
}

fn list(store: &MediaStore, kind: MediaKind) -> Result<()> {
    let entries = store.list_base_media(kind)?;
    for entry in &entries {
        println!("{}", entry.reference);
    }
    eprintln!("{} {} file(s)", entries.len(), kind);
    Ok(())
}

fn rebuild(store: &MediaStore) -> Result<()> {
    let report = store.rebuild_registry()?;
    println!(
        "Registry rebuilt: {} image(s), {} video(s)",
        report.images, report.videos
    );
    for failure in &report.failures {
        eprintln!("  skipped {}: {}", failure.path.display(), failure.error);
    }
    if !report.failures.is_empty() {
        bail!("{} file(s) could not be hashed", report.failures.len());
    }
    Ok(())
}

fn status(store: &MediaStore) -> Result<()> {
    let stats = store.stats()?;
    println!("Media root:   {}", store.root().display());
    println!("Base images:  {}", stats.base_images);
    println!("Base videos:  {}", stats.base_videos);
    println!("Overlays:     {}", stats.overlays);
    println!("Total size:   {} bytes", stats.total_bytes);
    Ok(())
}

fn composite(
    store: &MediaStore,
    base: &str,
    overlay: Option<&str>,
    output: &Path,
) -> Result<()> {
    let overlay_ref = overlay.map(MediaRef::new);
    let flattened = store
        .composite(&MediaRef::new(base), overlay_ref.as_ref())?
        .with_context(|| format!("broken base reference: {base}"))?;
    flattened
        .save(output)
        .with_context(|| format!("cannot write {output:?}"))?;
    println!("{}", output.display());
    Ok(())
}
