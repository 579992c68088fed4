use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facelook_core::types::FaceReport;
use facelook_core::{LoadSource, Recognizer, ReferenceDatabase, ScrfdDetector, SCRFD_MODEL_FILE};
use facelook_hw::Camera;
use std::path::{Path, PathBuf};

mod annotate;
mod live;
#[cfg(feature = "window")]
mod window;

#[derive(Parser)]
#[command(name = "facelook", about = "Recognize faces against a folder of labeled reference photos")]
struct Cli {
    /// Directory of reference images named after the person (e.g. alice.jpg)
    #[arg(long, global = true, env = "FACELOOK_DATABASE_DIR", default_value = "face_database")]
    database: PathBuf,

    /// Directory containing the SCRFD detection model
    #[arg(long, global = true, env = "FACELOOK_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the reference database, or load it from the cache
    Build {
        /// Discard the existing cache and rebuild from the images
        #[arg(long)]
        rebuild: bool,
    },
    /// List the labels stored in the cached reference database
    List,
    /// Recognize every face in one image and print JSON
    Recognize {
        /// Image file to analyze
        image: PathBuf,
    },
    /// Run recognition on a live webcam feed
    Live {
        /// V4L2 device index (/dev/videoN)
        #[arg(short, long, default_value_t = 0)]
        device_index: u32,

        /// Write the latest annotated frame to this image file
        #[arg(long)]
        preview: Option<PathBuf>,

        /// Do not open a window; print labels and write the preview file only
        #[arg(long)]
        no_window: bool,
    },
    /// List V4L2 capture devices
    Devices,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let model_dir = cli
        .model_dir
        .clone()
        .unwrap_or_else(facelook_core::default_model_dir);

    match cli.command {
        Commands::Build { rebuild } => cmd_build(&cli.database, &model_dir, rebuild),
        Commands::List => cmd_list(&cli.database),
        Commands::Recognize { ref image } => cmd_recognize(&cli.database, &model_dir, image),
        Commands::Live {
            device_index,
            ref preview,
            no_window,
        } => {
            let recognizer = load_recognizer(&cli.database, &model_dir)?;
            let options = live::LiveOptions {
                device_index,
                preview: preview.clone(),
                window: cfg!(feature = "window") && !no_window,
            };
            live::run(recognizer, options)
        }
        Commands::Devices => cmd_devices(),
    }
}

fn load_detector(model_dir: &Path) -> Result<ScrfdDetector> {
    let path = model_dir.join(SCRFD_MODEL_FILE);
    ScrfdDetector::load(&path).with_context(|| format!("failed to load {}", path.display()))
}

fn load_recognizer(database_dir: &Path, model_dir: &Path) -> Result<Recognizer<ScrfdDetector>> {
    let mut detector = load_detector(model_dir)?;
    let (database, _) = ReferenceDatabase::load_or_build(database_dir, &mut detector)
        .with_context(|| format!("failed to load reference database {}", database_dir.display()))?;
    Ok(Recognizer::new(detector, database))
}

fn cmd_build(database_dir: &Path, model_dir: &Path, rebuild: bool) -> Result<()> {
    let cache = ReferenceDatabase::cache_path(database_dir);
    if rebuild && cache.exists() {
        std::fs::remove_file(&cache)
            .with_context(|| format!("failed to remove {}", cache.display()))?;
        tracing::info!(path = %cache.display(), "removed stale cache");
    }

    let mut detector = load_detector(model_dir)?;
    let (database, source) = ReferenceDatabase::load_or_build(database_dir, &mut detector)
        .with_context(|| format!("failed to build reference database {}", database_dir.display()))?;

    match source {
        LoadSource::Cache => {
            println!(
                "Loaded {} reference faces from {} (use --rebuild to rescan)",
                database.len(),
                cache.display()
            );
        }
        LoadSource::Built(report) => {
            println!("Built {} reference faces into {}", report.added, cache.display());
            for path in &report.no_face {
                println!("  skipped {} (no face found)", path.display());
            }
            for (path, reason) in &report.unreadable {
                println!("  skipped {} ({reason})", path.display());
            }
        }
    }
    Ok(())
}

fn cmd_list(database_dir: &Path) -> Result<()> {
    let labels = cached_labels(database_dir)?;
    if labels.is_empty() {
        println!("No reference faces");
        return Ok(());
    }
    for (i, label) in labels.iter().enumerate() {
        println!("{i:>4}  {label}");
    }
    Ok(())
}

/// Labels from the cache file, without loading the detector.
fn cached_labels(database_dir: &Path) -> Result<Vec<String>> {
    let cache = ReferenceDatabase::cache_path(database_dir);
    if !cache.exists() {
        bail!(
            "no cache at {}; run `facelook build` first",
            cache.display()
        );
    }
    let database = ReferenceDatabase::load_cache(&cache)?;
    Ok(database.labels().map(str::to_owned).collect())
}

fn cmd_recognize(database_dir: &Path, model_dir: &Path, image_path: &Path) -> Result<()> {
    let mut recognizer = load_recognizer(database_dir, model_dir)?;
    let image = image::open(image_path)
        .with_context(|| format!("could not decode {}", image_path.display()))?
        .to_rgb8();

    let results = recognizer.recognize(&image)?;
    let reports: Vec<FaceReport> = results.iter().map(|r| r.to_report()).collect();
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

fn cmd_devices() -> Result<()> {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return Ok(());
    }
    for dev in devices {
        println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }
    Ok(())
}
