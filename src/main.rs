//! model-setup CLI: fetch, export and place detection models for the app.
//!
//! Commands:
//! - `list`: show the known model recipes
//! - `setup`: download a recipe's weights, export them and place the result
//! - `export`: export local weights and place the result
//! - `place`: locate an existing export and copy it into place

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing::metadata::LevelFilter;

use model_setup::core::{
    prompt_api_key, resolve_api_key, Settings, SetupOptions, SetupPipeline, SetupReport,
    ENV_API_KEY,
};
use model_setup::{ArtifactLocator, CandidateSet, Destination, PlacedArtifact};

#[derive(Parser)]
#[command(
    name = "model-setup",
    about = "Download, export and place object-detection models for the Android app"
)]
struct Cli {
    /// JSON settings file. Defaults to config.json in the user config dir.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the known model recipes.
    List,
    /// Download a recipe's weights, export them and place the result.
    Setup {
        /// Recipe name (see `list`).
        recipe: String,

        /// Download again even if the weights are already present.
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Roboflow private API key. Falls back to ROBOFLOW_API_KEY.
        #[arg(long)]
        api_key: Option<String>,

        /// Working directory for weights and export output.
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Export image size.
        #[arg(long)]
        imgsz: Option<u32>,
    },
    /// Export local weights and place the result.
    Export {
        /// Weights file, e.g. best.pt.
        #[arg(long, default_value = "best.pt")]
        weights: PathBuf,

        /// Extra base names the export output may carry.
        #[arg(long = "alias")]
        aliases: Vec<String>,

        /// Destination directory.
        #[arg(long, default_value = "app/src/main/ml")]
        dest_dir: PathBuf,

        /// Destination file name.
        #[arg(long, default_value = "food_yolov8_roboflow.tflite")]
        dest_name: String,

        /// Working directory the exporter runs in.
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Export image size.
        #[arg(long)]
        imgsz: Option<u32>,
    },
    /// Locate an existing export and copy it to the destination.
    Place {
        /// Base name of the exported model, usually the weights file stem.
        #[arg(long)]
        base: String,

        /// Artifact extension.
        #[arg(long, default_value = "tflite")]
        ext: String,

        /// Extra base names to probe after the primary one.
        #[arg(long = "alias")]
        aliases: Vec<String>,

        /// Destination directory, relative to the search root unless absolute.
        #[arg(long)]
        dest_dir: PathBuf,

        /// Destination file name.
        #[arg(long)]
        dest_name: String,

        /// Search root. Defaults to the current directory.
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

fn setup_logging() {
    let filter = std::env::var("MODEL_SETUP_LOG")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(LevelFilter::INFO);

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .compact()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() -> Result<()> {
    setup_logging();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::List => run_list(&settings),
        Commands::Setup {
            recipe,
            force,
            api_key,
            work_dir,
            imgsz,
        } => run_setup(&settings, &recipe, force, api_key, work_dir, imgsz),
        Commands::Export {
            weights,
            aliases,
            dest_dir,
            dest_name,
            work_dir,
            imgsz,
        } => run_export(&settings, weights, aliases, dest_dir, dest_name, work_dir, imgsz),
        Commands::Place {
            base,
            ext,
            aliases,
            dest_dir,
            dest_name,
            root,
        } => run_place(base, ext, aliases, dest_dir, dest_name, root),
    }
}

fn run_list(settings: &Settings) -> Result<()> {
    for recipe in settings.catalog().recipes() {
        println!(
            "{:<16} {} -> {}",
            recipe.name,
            recipe.description,
            recipe.destination.path().display()
        );
    }
    Ok(())
}

fn options_from(
    settings: &Settings,
    work_dir: Option<PathBuf>,
    imgsz: Option<u32>,
) -> SetupOptions {
    SetupOptions {
        work_dir: work_dir.unwrap_or_else(|| settings.work_dir.clone()),
        format: settings.format.clone(),
        image_size: imgsz.unwrap_or(settings.image_size),
        force_download: false,
        api_key: None,
        roboflow_api_base: settings.roboflow.api_base.clone(),
    }
}

fn run_setup(
    settings: &Settings,
    name: &str,
    force: bool,
    api_key: Option<String>,
    work_dir: Option<PathBuf>,
    imgsz: Option<u32>,
) -> Result<()> {
    let catalog = settings.catalog();
    let recipe = catalog.find(name).ok_or_else(|| {
        anyhow!(
            "unknown recipe {name:?}; known recipes: {}",
            catalog.names().join(", ")
        )
    })?;

    let mut options = options_from(settings, work_dir, imgsz);
    options.force_download = force;
    if recipe.needs_api_key() {
        let env_key = std::env::var(ENV_API_KEY).ok();
        options.api_key = match resolve_api_key(
            api_key.as_deref(),
            env_key.as_deref(),
            settings.roboflow.api_key.as_deref(),
        ) {
            Some(key) => Some(key),
            None => prompt_api_key()?,
        };
    }

    let pipeline = SetupPipeline::new(settings.exporter.build(), options);
    let report = pipeline.run(recipe)?;
    print_report(&report);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_export(
    settings: &Settings,
    weights: PathBuf,
    aliases: Vec<String>,
    dest_dir: PathBuf,
    dest_name: String,
    work_dir: Option<PathBuf>,
    imgsz: Option<u32>,
) -> Result<()> {
    let options = options_from(settings, work_dir, imgsz);
    let pipeline = SetupPipeline::new(settings.exporter.build(), options);
    let report = pipeline.export_local(&weights, &aliases, &Destination::new(dest_dir, dest_name))?;
    print_report(&report);
    Ok(())
}

fn run_place(
    base: String,
    ext: String,
    aliases: Vec<String>,
    dest_dir: PathBuf,
    dest_name: String,
    root: Option<PathBuf>,
) -> Result<()> {
    let locator = match root {
        Some(root) => ArtifactLocator::new(root),
        None => ArtifactLocator::current_dir()?,
    };
    let candidates = CandidateSet::new(base, ext).with_aliases(aliases);
    let placed = locator.resolve_and_place(&candidates, &Destination::new(dest_dir, dest_name))?;
    print_placed(&placed);
    Ok(())
}

fn print_report(report: &SetupReport) {
    println!("Weights:  {}", report.weights.display());
    if report.found_by_scan {
        println!("Exported: {} (found by directory scan)", report.exported.display());
    } else {
        println!("Exported: {}", report.exported.display());
    }
    print_placed(&report.placed);
    println!("Rebuild the Android project to pick up the new model.");
}

fn print_placed(placed: &PlacedArtifact) {
    println!(
        "Placed:   {} ({} bytes, sha256 {})",
        placed.destination.display(),
        placed.bytes,
        placed.checksum
    );
}
