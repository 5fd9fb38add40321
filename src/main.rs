use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use soundgroups::config::AppConfig;
use soundgroups::fingerprint::{FIELD_NAMES, FingerprintCollection};
use soundgroups::model::{ClusterModel, KmeansOptions, ModelError, Normalizer};
use soundgroups::scanner::ScanError;
use soundgroups::table::TableError;
use std::path::{Path, PathBuf};

/// Rows shown after extraction.
const PREVIEW_ROWS: usize = 5;

#[derive(Parser)]
#[command(name = "soundgroups", version, about = "Group audio recordings by how they sound")]
struct Cli {
    /// Path to the normalizer artifact
    #[arg(long, global = true)]
    normalizer: Option<PathBuf>,

    /// Path to the cluster model artifact
    #[arg(long, global = true)]
    model: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fingerprint every audio file under a directory into a CSV table
    Extract {
        /// Directory to scan (defaults to config file music_dir)
        dir: Option<PathBuf>,

        /// Output table path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Fit the normalizer and k-means model on a fingerprint table
    Fit {
        /// Input table path
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Number of clusters
        #[arg(short)]
        k: Option<usize>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Number of k-means initializations
        #[arg(long)]
        n_init: Option<usize>,

        /// Also write a filename,cluster CSV here
        #[arg(long)]
        assignments: Option<PathBuf>,
    },

    /// Assign one recording to its nearest cluster
    Predict {
        /// Audio file to classify
        file: PathBuf,
    },

    /// Summarize the saved cluster model
    Show,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = AppConfig::load();

    // Resolve artifact paths: CLI > config > XDG default
    let normalizer_path = cli.normalizer.unwrap_or_else(|| config.normalizer_path());
    let model_path = cli.model.unwrap_or_else(|| config.model_path());
    log::info!("Normalizer: {}", normalizer_path.display());
    log::info!("Model: {}", model_path.display());

    match cli.command {
        Commands::Extract { dir, output, jobs } => {
            let Some(dir) = dir.or(config.music_dir.clone()) else {
                println!(
                    "No directory to scan. Pass one as an argument or set music_dir in config."
                );
                return Ok(());
            };
            let table_path = output.unwrap_or_else(|| config.table_path());
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };

            run_extract(&dir, &table_path, workers)?;
        }

        Commands::Fit { input, k, seed, n_init, assignments } => {
            let table_path = input.unwrap_or_else(|| config.table_path());
            let collection = match soundgroups::table::read_table(&table_path) {
                Ok(c) => c,
                Err(TableError::Missing(path)) => {
                    println!(
                        "No fingerprint table at {}. Run `soundgroups extract` first.",
                        path.display()
                    );
                    return Ok(());
                }
                Err(e) => return Err(e).context("Failed to read fingerprint table"),
            };

            let options = KmeansOptions {
                k: k.unwrap_or(config.clustering.k),
                seed: seed.unwrap_or(config.clustering.seed),
                n_init: n_init.unwrap_or(config.clustering.n_init),
                ..config.clustering.clone()
            };

            let (normalizer, model) = soundgroups::model::fit_patterns(&collection, &options)
                .context("Fit failed")?;
            normalizer.save(&normalizer_path).context("Failed to save normalizer")?;
            model.save(&model_path).context("Failed to save model")?;

            println!(
                "Fit complete: {} recordings in {} clusters (inertia {:.3})",
                collection.len(),
                model.k,
                model.inertia
            );
            println!();
            print_membership(&collection, &model);

            if let Some(path) = assignments {
                soundgroups::table::write_assignments(&path, &collection, &model.labels)
                    .context("Failed to write assignments")?;
                println!();
                println!("Assignments written to {}", path.display());
            }
        }

        Commands::Predict { file } => {
            let Some((normalizer, model)) = load_artifacts(&normalizer_path, &model_path)? else {
                return Ok(());
            };
            let fingerprint = soundgroups::analyzer::extract(&file).context("Extraction failed")?;
            let prediction = soundgroups::model::predict_detailed(&fingerprint, &normalizer, &model)
                .context("Prediction failed")?;

            println!("{}: cluster {}", file.display(), prediction.cluster);
            if cli.verbose > 0 {
                for (c, d) in prediction.distances.iter().enumerate() {
                    let marker = if c == prediction.cluster { "*" } else { " " };
                    println!("  {} cluster {:<3} distance {:.4}", marker, c, d);
                }
            }
        }

        Commands::Show => {
            let model = match ClusterModel::load(&model_path) {
                Ok(m) => m,
                Err(e @ ModelError::InputMissing { .. }) => {
                    println!("{}", e);
                    return Ok(());
                }
                Err(e) => return Err(e).context("Failed to load model"),
            };

            println!("Cluster model: {}", model_path.display());
            println!("==================");
            println!("Clusters:      {}", model.k);
            println!("Recordings:    {}", model.labels.len());
            println!("Inertia:       {:.4}", model.inertia);
            println!("Iterations:    {}", model.n_iter);
            println!("Seed / n_init: {} / {}", model.seed, model.n_init);
            println!("Fitted at:     {}", model.fitted_at.format("%Y-%m-%d %H:%M:%S UTC"));
            println!();
            println!("Sizes:");
            for (c, size) in model.cluster_sizes().iter().enumerate() {
                println!("  cluster {:<3} {}", c, size);
            }
        }
    }

    Ok(())
}

/// Fingerprint every audio file under `dir` into the table at `table_path`.
///
/// A missing directory, or a run where no recording could be read, is
/// reported and leaves any existing table untouched.
fn run_extract(dir: &Path, table_path: &Path, workers: usize) -> Result<()> {
    let files = match soundgroups::scanner::find_audio_files(dir) {
        Ok(files) => files,
        Err(e @ (ScanError::MissingDir(_) | ScanError::NotADir(_))) => {
            println!("{}. Check the path, or set music_dir in config.", e);
            return Ok(());
        }
    };
    if files.is_empty() {
        println!("No audio files found under {}.", dir.display());
        return Ok(());
    }

    let result = soundgroups::analyzer::extract_files(&files, workers);
    for failure in &result.failures {
        println!("Skipped {}", failure);
    }

    if result.fingerprints.is_empty() {
        println!(
            "Nothing extracted from {} ({} skipped). Check the path and files; {} was not written.",
            dir.display(),
            result.failures.len(),
            table_path.display()
        );
        return Ok(());
    }

    soundgroups::table::write_table(table_path, &result.fingerprints)
        .context("Failed to write fingerprint table")?;
    println!(
        "Extraction complete: {} fingerprinted, {} skipped -> {}",
        result.fingerprints.len(),
        result.failures.len(),
        table_path.display()
    );
    println!();
    print_preview(&result.fingerprints);
    Ok(())
}

/// Load both artifacts, or print guidance and return `None` when either is
/// missing.
fn load_artifacts(
    normalizer_path: &Path,
    model_path: &Path,
) -> Result<Option<(Normalizer, ClusterModel)>> {
    let loaded = Normalizer::load(normalizer_path)
        .and_then(|n| ClusterModel::load(model_path).map(|m| (n, m)));
    match loaded {
        Ok(pair) => Ok(Some(pair)),
        Err(e @ ModelError::InputMissing { .. }) => {
            println!("{}", e);
            Ok(None)
        }
        Err(e) => Err(e).context("Failed to load artifacts"),
    }
}

/// Print the first rows of a fingerprint table.
fn print_preview(collection: &FingerprintCollection) {
    print!("{:<30}", "filename");
    for name in FIELD_NAMES {
        print!(" {:>12}", truncate(name, 12));
    }
    println!();
    println!("{}", "-".repeat(30 + 13 * FIELD_NAMES.len()));

    for record in collection.iter().take(PREVIEW_ROWS) {
        print!("{:<30}", truncate(&record.filename, 30));
        for v in record.fingerprint.to_array() {
            print!(" {:>12.4}", v);
        }
        println!();
    }
    if collection.len() > PREVIEW_ROWS {
        println!("... {} more", collection.len() - PREVIEW_ROWS);
    }
}

/// Print training recordings grouped by cluster.
fn print_membership(collection: &FingerprintCollection, model: &ClusterModel) {
    let groups = model.members(collection.iter().map(|r| r.filename.as_str()));
    for (c, members) in groups.iter().enumerate() {
        println!("--- Cluster {} ({} recordings) ---", c, members.len());
        for name in members {
            println!("  {}", name);
        }
    }
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let head: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}
