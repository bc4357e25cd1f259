use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use locdedup::config::{AppConfig, DetectionConfig};
use locdedup::core::duplicate::{DuplicateDetector, DuplicatePair};
use locdedup::core::hash::fingerprint;
use locdedup::core::record::LocationRecord;
use locdedup::database::establish_connection;
use locdedup::database::repositories::{AuditEntry, AuditRepository, LocationRepository};
use locdedup::pipeline::{self, ScanMode};
use locdedup::sink::{AUDIT_FILE_NAME, AuditSink, read_audit_log};
use locdedup::source::{CsvSource, RecordSource, SourceBatch, SqliteSource};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(
    name = "locdedup",
    version,
    about = "Find and merge duplicate geotagged locations"
)]
struct Cli {
    /// JSON config file (default: user config dir, if present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Minimum name similarity (0-100) for a duplicate
    #[arg(long, global = true, value_name = "SCORE")]
    name_threshold: Option<u8>,

    /// Maximum distance in meters for a duplicate
    #[arg(long, global = true, value_name = "METERS")]
    distance_threshold: Option<f64>,

    /// Log every detected pair
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Duplicate workflows
    Duplicates {
        #[command(subcommand)]
        command: Dups,
    },

    /// Work with the resolution audit trail
    History {
        #[command(subcommand)]
        command: HistoryCmd,
    },

    /// Print the identity fingerprint of a location
    Fingerprint {
        name: String,
        #[arg(allow_hyphen_values = true)]
        latitude: f64,
        #[arg(allow_hyphen_values = true)]
        longitude: f64,
    },
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// CSV file with id,name,latitude,longitude columns
    #[arg(short, long, value_name = "CSV", conflicts_with = "database")]
    input: Option<PathBuf>,

    /// SQLite database to read locations from (default: configured store)
    #[arg(long, value_name = "DB")]
    database: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Dups {
    /// Find and list duplicate pairs
    Scan {
        #[command(flatten)]
        source: SourceArgs,
        /// Use the latitude-banded parallel scan
        #[arg(long)]
        bucketed: bool,
    },

    /// Remove duplicates and persist the cleaned locations
    Clean {
        #[command(flatten)]
        source: SourceArgs,
        /// Database that receives the cleaned locations (default: configured store)
        #[arg(long, value_name = "DB")]
        target: Option<PathBuf>,
        /// Directory for the CSV/JSONL fallback
        #[arg(long, value_name = "DIR")]
        fallback_dir: Option<PathBuf>,
        /// Only show what would be removed
        #[arg(long)]
        dry_run: bool,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
        /// Use the latitude-banded parallel scan
        #[arg(long)]
        bucketed: bool,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryCmd {
    /// List audit entries from the database and the fallback log
    List {
        /// Database holding the audit log (default: configured store)
        #[arg(long, value_name = "DB")]
        database: Option<PathBuf>,
        /// Directory holding the fallback audit log
        #[arg(long, value_name = "DIR")]
        fallback_dir: Option<PathBuf>,
        /// Only entries whose duplicates were merged into this location
        #[arg(long, value_name = "ID")]
        survivor: Option<i64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    config.detection = DetectionConfig::new(
        cli.name_threshold.unwrap_or(config.detection.name_threshold),
        cli.distance_threshold
            .unwrap_or(config.detection.distance_threshold_meters),
    )
    .context("Invalid detection thresholds")?;

    match cli.command {
        Commands::Duplicates { command } => match command {
            Dups::Scan { source, bucketed } => {
                let batch = load_records(&source, &config)?;
                let detector = detector(&config, batch.records.len());
                let pairs = benchmark("duplicate scan", || {
                    if bucketed {
                        detector.detect_bucketed(&batch.records)
                    } else {
                        detector.detect(&batch.records)
                    }
                })?;

                if pairs.is_empty() {
                    println!("✅ No duplicates found.");
                } else {
                    println!("🎯 Found {} potential duplicate(s):", pairs.len());
                    print_pairs(&batch.records, &pairs);
                }
            }

            Dups::Clean {
                source,
                target,
                fallback_dir,
                dry_run,
                yes,
                bucketed,
            } => {
                let batch = load_records(&source, &config)?;
                let detector = detector(&config, batch.records.len());
                let mode = if bucketed {
                    ScanMode::Bucketed
                } else {
                    ScanMode::Reference
                };
                let cleanup = benchmark("duplicate scan", || {
                    pipeline::detect_and_resolve(&detector, &batch.records, mode)
                })?;

                if cleanup.pairs.is_empty() {
                    println!("✅ No duplicates found.");
                    return Ok(());
                }

                println!("🎯 Found {} potential duplicate(s):", cleanup.pairs.len());
                print_pairs(&batch.records, &cleanup.pairs);

                let names: HashMap<i64, &str> = batch
                    .records
                    .iter()
                    .map(|r| (r.id, r.name.as_str()))
                    .collect();
                println!("🧹 Cleaning {} duplicate(s)...", cleanup.resolution.decisions.len());
                for decision in &cleanup.resolution.decisions {
                    println!(
                        "   ❌ {} → kept {}",
                        label(&names, decision.removed_id),
                        label(&names, decision.survivor_id)
                    );
                }
                println!(
                    "✅ Cleaned data: {} → {} locations ({} kept location(s) absorbed duplicates)",
                    batch.records.len(),
                    cleanup.resolution.cleaned.len(),
                    cleanup.resolution.survivors().len()
                );

                if dry_run {
                    println!("\n⚠️  Dry-run only; nothing was persisted.");
                    return Ok(());
                }

                if !yes
                    && !Confirm::new()
                        .with_prompt("Replace the stored locations with the cleaned set?")
                        .default(false)
                        .interact()?
                {
                    println!("Aborted; nothing was persisted.");
                    return Ok(());
                }

                let mut sink_config = config.sink.clone();
                if let Some(target) = target {
                    sink_config.database_path = target;
                }
                if let Some(dir) = fallback_dir {
                    sink_config.fallback_dir = dir;
                }

                let mut sink = AuditSink::open(&sink_config);
                let summary = pipeline::persist(&mut sink, &cleanup.resolution)?;
                if summary.is_degraded() {
                    println!(
                        "⚠️  Database unavailable; saved to {} instead",
                        sink.fallback().records_path().display()
                    );
                } else if let Some(primary) = sink.primary() {
                    let stored = LocationRepository::new(primary.connection()).count()?;
                    println!(
                        "💾 {} now holds {} locations ({} audit entries added)",
                        sink_config.database_path.display(),
                        stored,
                        summary.audit_entries
                    );
                }
            }
        },

        Commands::History { command } => match command {
            HistoryCmd::List {
                database,
                fallback_dir,
                survivor,
            } => {
                let db_path = database.unwrap_or_else(|| config.sink.database_path.clone());
                let fallback_dir = fallback_dir.unwrap_or_else(|| config.sink.fallback_dir.clone());

                let mut entries: Vec<(&str, AuditEntry)> = Vec::new();
                if db_path.exists() {
                    let conn = establish_connection(&db_path, config.sink.busy_timeout())
                        .with_context(|| format!("Could not open database {:?}", db_path))?;
                    let repo = AuditRepository::new(&conn);
                    let stored = match survivor {
                        Some(id) => repo.find_by_survivor(id)?,
                        None => repo.find_all()?,
                    };
                    entries.extend(stored.into_iter().map(|e| ("database", e)));
                }
                let audit_file = fallback_dir.join(AUDIT_FILE_NAME);
                let fallback = read_audit_log(&audit_file)
                    .with_context(|| format!("Could not read audit log {:?}", audit_file))?;
                entries.extend(
                    fallback
                        .into_iter()
                        .filter(|e| survivor.is_none_or(|id| e.survivor_id == id))
                        .map(|e| ("fallback", e)),
                );

                if entries.is_empty() {
                    println!("No audit entries found.");
                    return Ok(());
                }

                println!("🗂️  Resolution History:");
                for (i, (origin, entry)) in entries.iter().enumerate() {
                    println!(
                        "[{}] {} ({})\n     removed: {}\n     kept: {} (matched {})\n     similarity: {}%  distance: {:.2}m\n     action: {}\n",
                        i,
                        entry.recorded_at,
                        origin,
                        entry.removed_id,
                        entry.survivor_id,
                        entry.matched_id,
                        entry.similarity_score,
                        entry.distance_meters,
                        entry.action
                    );
                }
            }
        },

        Commands::Fingerprint {
            name,
            latitude,
            longitude,
        } => {
            let record = LocationRecord::new(0, name.as_str(), latitude, longitude);
            record.validate()?;
            println!("{}", fingerprint(&name, latitude, longitude));
        }
    }

    Ok(())
}

fn load_records(args: &SourceArgs, config: &AppConfig) -> Result<SourceBatch> {
    let batch = match (&args.input, &args.database) {
        (Some(input), _) => {
            println!("▶ Loading locations from: {}", input.display());
            CsvSource::new(input)
                .load()
                .with_context(|| format!("Failed to load {:?}", input))?
        }
        (None, database) => {
            let path = database.clone().unwrap_or_else(|| config.sink.database_path.clone());
            println!("▶ Loading locations from: {}", path.display());
            SqliteSource::new(&path, config.sink.busy_timeout())
                .load()
                .with_context(|| format!("Failed to load {:?}", path))?
        }
    };

    println!("📊 Loaded {} locations", batch.records.len());
    if !batch.rejected.is_empty() {
        println!("⚠️  Skipped {} invalid record(s):", batch.rejected.len());
        for error in &batch.rejected {
            println!("   {}", error);
        }
    }
    Ok(batch)
}

fn detector(config: &AppConfig, total: usize) -> DuplicateDetector {
    let bar = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} [{bar:40}] {pos}/{len} {msg}") {
        bar.set_style(style);
    }
    println!(
        "🔍 Checking {} combinations...",
        total * total.saturating_sub(1) / 2
    );
    DuplicateDetector::new(config.detection).with_progress(bar)
}

fn print_pairs(records: &[LocationRecord], pairs: &[DuplicatePair]) {
    let names: HashMap<i64, &str> = records.iter().map(|r| (r.id, r.name.as_str())).collect();
    for pair in pairs {
        println!("🚨 DUPLICATE FOUND:");
        println!(
            "   {} vs {}",
            label(&names, pair.id_a),
            label(&names, pair.id_b)
        );
        println!("   Similarity: {}%", pair.similarity_score);
        println!("   Distance: {:.1}m", pair.distance_meters);
        println!();
    }
}

fn label(names: &HashMap<i64, &str>, id: i64) -> String {
    match names.get(&id) {
        Some(name) => format!("#{} {}", id, name),
        None => format!("#{}", id),
    }
}

/// Run `f()`, print how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    println!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
