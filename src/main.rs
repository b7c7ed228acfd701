use anyhow::{Context, Result};
use chrono::DateTime;
use clap::{Args, Parser, Subcommand};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use simscan::{EngineConfig, FillProgress, MatchEngine, RefreshSummary};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(
    name = "simscan",
    version,
    about = "Find visually similar images, remembering past work"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct CatalogArgs {
    /// Directory tree to track
    #[arg(short, long, value_name = "DIR")]
    path: PathBuf,
    /// Catalog file (default: one file per directory in the user cache dir)
    #[arg(long, value_name = "FILE")]
    savefile: Option<PathBuf>,
    /// Histogram bins per feature group
    #[arg(long, default_value_t = simscan::config::DEFAULT_BINS)]
    bins: usize,
    /// Shrink images to an N×N square before extracting features
    #[arg(long, value_name = "N")]
    resize: Option<u32>,
    /// Only track images directly inside DIR
    #[arg(long)]
    top_level_only: bool,
    /// Write the catalog after every N extracted files
    #[arg(long, value_name = "N", default_value_t = 0)]
    checkpoint: usize,
}

impl CatalogArgs {
    fn to_config(&self) -> EngineConfig {
        let mut config = EngineConfig::new(&self.path)
            .with_bins(self.bins)
            .with_resize(self.resize);
        config.save_file = self.savefile.clone();
        config.include_subfolders = !self.top_level_only;
        config.checkpoint_interval = self.checkpoint;
        config
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync the catalog with DIR and compute missing features
    Scan {
        #[command(flatten)]
        catalog: CatalogArgs,
    },

    /// List similar pairs across the collection
    Matches {
        #[command(flatten)]
        catalog: CatalogArgs,
        /// Minimum similarity (0.0 - 1.0)
        #[arg(short, long, default_value_t = 0.9)]
        threshold: f64,
        /// Compare every pair again instead of only new images
        #[arg(long)]
        all: bool,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Find images similar to one file
    Query {
        #[command(flatten)]
        catalog: CatalogArgs,
        /// Image to look up
        #[arg(short, long, value_name = "FILE")]
        image: PathBuf,
        /// Minimum similarity (0.0 - 1.0)
        #[arg(short, long, default_value_t = 0.9)]
        threshold: f64,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show catalog size and lifetime counters
    Stats {
        #[command(flatten)]
        catalog: CatalogArgs,
    },

    /// Forget which images were compared so the next run compares everything
    Reset {
        #[command(flatten)]
        catalog: CatalogArgs,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { catalog } => {
            println!("▶ Scanning {}", catalog.path.display());
            let (engine, summary) = open_and_refresh(&catalog)?;
            print_refresh(&summary);
            println!(
                "✅ {} image(s) tracked in {}",
                engine.loaded_file_count(),
                engine.catalog().save_path().display()
            );
        }

        Commands::Matches {
            catalog,
            threshold,
            all,
            json,
        } => {
            let (mut engine, summary) = open_and_refresh(&catalog)?;
            if !json {
                print_refresh(&summary);
            }

            let outcome = benchmark("comparing images", || engine.compare_all(threshold, !all))
                .context("Comparison failed")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else if outcome.matches.is_empty() {
                println!(
                    "No matches at {} ({} comparison(s)).",
                    threshold, outcome.attempted
                );
            } else {
                println!(
                    "Found {} match(es) in {} comparison(s):",
                    outcome.matches.len(),
                    outcome.attempted
                );
                for pair in &outcome.matches {
                    println!("   {:.4}  {}  ↔  {}", pair.score, pair.path_a, pair.path_b);
                }
            }
        }

        Commands::Query {
            catalog,
            image,
            threshold,
            json,
        } => {
            let (engine, _) = open_and_refresh(&catalog)?;
            let outcome = engine
                .compare_one(&image, threshold)
                .with_context(|| format!("Failed to compare {}", image.display()))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else if outcome.matches.is_empty() {
                println!("No images similar to {} at {}.", image.display(), threshold);
            } else {
                println!("▶ Images similar to {}:", image.display());
                for found in &outcome.matches {
                    println!("   {:.4}  {}", found.score, found.path);
                }
            }
        }

        Commands::Stats { catalog } => {
            let engine = MatchEngine::open(&catalog.to_config())
                .with_context(|| format!("Failed to open catalog for {}", catalog.path.display()))?;
            let stats = engine.lifetime_stats();
            let created = DateTime::from_timestamp(stats.created, 0)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| "Unknown".to_string());

            println!("🗂️  Catalog {}", engine.catalog().save_path().display());
            println!("     root:        {}", engine.catalog().metadata().root);
            println!("     created:     {}", created);
            println!("     images:      {}", engine.loaded_file_count());
            println!("     matches:     {}", stats.matches);
            println!("     comparisons: {}", stats.comparisons);
        }

        Commands::Reset { catalog, yes } => {
            let mut engine = MatchEngine::open(&catalog.to_config())
                .with_context(|| format!("Failed to open catalog for {}", catalog.path.display()))?;

            let confirmed = yes
                || Confirm::new()
                    .with_prompt(format!(
                        "Mark all {} image(s) as not compared?",
                        engine.loaded_file_count()
                    ))
                    .default(false)
                    .interact()?;
            if !confirmed {
                println!("Nothing changed.");
                return Ok(());
            }

            let changed = engine.reset_compared().context("Failed to update catalog")?;
            println!("🧹 Reset {} image(s); the next run compares everything.", changed);
        }
    }

    Ok(())
}

/// Open the catalog and sync it with the directory, showing extraction progress.
fn open_and_refresh(args: &CatalogArgs) -> Result<(MatchEngine, RefreshSummary)> {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    bar.set_message("Scanning for images…");
    bar.enable_steady_tick(Duration::from_millis(100));

    let progress_bar = bar.clone();
    let mut engine = MatchEngine::open(&args.to_config())
        .with_context(|| format!("Failed to open catalog for {}", args.path.display()))?
        .with_progress(Box::new(move |progress: FillProgress| {
            progress_bar.set_length(progress.total as u64);
            progress_bar.set_position(progress.done as u64);
            progress_bar.set_message(file_label(&progress.current));
        }));

    let summary = benchmark("refreshing catalog", || engine.refresh())
        .with_context(|| format!("Failed to refresh catalog for {}", args.path.display()))?;
    bar.finish_and_clear();

    Ok((engine, summary))
}

fn print_refresh(summary: &RefreshSummary) {
    println!(
        "▶ {} added, {} removed, {} feature set(s) computed",
        summary.added, summary.removed, summary.extracted
    );
    if !summary.skipped.is_empty() {
        println!("⚠️  Skipped {} file(s):", summary.skipped.len());
        for skipped in &summary.skipped {
            println!("   {}: {}", skipped.path, skipped.reason);
        }
    }
}

fn file_label(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Run `f()`, log how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    log::info!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
