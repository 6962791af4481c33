//! Filesystem crawler CLI
//!
//! Crawls roots into a SQLite inventory, advances stored paths through the
//! processing stages and lists duplicate files.

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use fs_crawler::{
    AttributesProcessor, CrawlConfig, CrawlConfigBuilder, Crawler, FilterSpec, HashProcessor,
    LoggingObserver, MetricsCollector, PathKind, PathRepository, ProgressReporter, Result,
    SqliteRepository, Stage, StageAdvancer, StagePipeline,
};

const ABOUT: &str = r#"
fs_crawler - filesystem inventory crawler

Examples:
  fs_crawler crawl -r /data                       crawl one root
  fs_crawler crawl -r /photos -r /videos -d inv.db crawl two roots into inv.db
  fs_crawler crawl -c crawl.toml --progress       crawl with a config file, JSON progress on stderr
  fs_crawler advance --kind file --stage CRAWLED  hash stored files that were only crawled
  fs_crawler duplicates --json                    list duplicate files
"#;

const DEFAULT_DB: &str = "fs_crawler.db";

/// Filesystem inventory crawler
#[derive(Parser)]
#[command(name = "fs_crawler")]
#[command(author, version, about = ABOUT, long_about = None)]
#[command(help_template = "\
{before-help}{name} {version}
{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl roots and persist every crawled path
    Crawl {
        /// Root directory to crawl (repeatable)
        #[arg(short = 'r', long = "root")]
        roots: Vec<PathBuf>,

        /// TOML config file; command line flags override it
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,

        /// SQLite database file
        #[arg(short = 'd', long)]
        db: Option<PathBuf>,

        /// Reprocess paths even when the stored record is unchanged
        #[arg(long)]
        force: bool,

        /// Worker threads (0 = CPU cores x 2)
        #[arg(short = 'w', long)]
        workers: Option<usize>,

        /// Skip files with this extension (repeatable)
        #[arg(long = "exclude-ext")]
        exclude_ext: Vec<String>,

        /// Skip entries with this exact name (repeatable)
        #[arg(long = "exclude-name")]
        exclude_name: Vec<String>,

        /// Log collected metrics when the crawl ends
        #[arg(long)]
        metrics: bool,

        /// Stream JSON progress lines on stderr
        #[arg(long)]
        progress: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Advance stored paths at a stage through the processors
    Advance {
        /// FILE or DIRECTORY
        #[arg(long, default_value = "FILE")]
        kind: PathKind,

        /// Stage to advance from
        #[arg(long, default_value = "CRAWLED")]
        stage: Stage,

        /// SQLite database file
        #[arg(short = 'd', long)]
        db: Option<PathBuf>,

        /// Reprocess terminal stages too
        #[arg(long)]
        force: bool,

        /// Entries fetched per batch
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// List files sharing size and content hash
    Duplicates {
        /// SQLite database file
        #[arg(short = 'd', long)]
        db: Option<PathBuf>,

        /// Print groups as JSON
        #[arg(long)]
        json: bool,
    },
}

fn open_repository(db: Option<PathBuf>) -> Result<Arc<SqliteRepository>> {
    let path = db.unwrap_or_else(|| PathBuf::from(DEFAULT_DB));
    info!("Database: {:?}", path);
    Ok(Arc::new(SqliteRepository::open(&path)?))
}

#[allow(clippy::too_many_arguments)]
fn crawl_config(
    config: Option<&Path>,
    roots: Vec<PathBuf>,
    db: Option<PathBuf>,
    force: bool,
    workers: Option<usize>,
    exclude_ext: Vec<String>,
    exclude_name: Vec<String>,
) -> Result<CrawlConfig> {
    let base = match config {
        Some(path) => CrawlConfig::from_toml_file(path)?,
        None => CrawlConfig::default(),
    };
    let mut builder = CrawlConfigBuilder::from_config(base);
    for root in roots {
        builder = builder.add_root(root);
    }
    if let Some(db) = db {
        builder = builder.db_path(db);
    }
    if force {
        builder = builder.force_refresh(true);
    }
    if let Some(workers) = workers {
        builder = builder.max_workers(workers);
    }
    if !exclude_ext.is_empty() {
        builder = builder.skip_filter(FilterSpec::Extension {
            authorized: Vec::new(),
            excluded: exclude_ext,
        });
    }
    if !exclude_name.is_empty() {
        builder = builder.skip_filter(FilterSpec::Name {
            authorized: Vec::new(),
            excluded: exclude_name,
        });
    }
    Ok(builder.build())
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Crawl {
            roots,
            config,
            db,
            force,
            workers,
            exclude_ext,
            exclude_name,
            metrics,
            progress,
            json,
        } => {
            let config = crawl_config(
                config.as_deref(),
                roots,
                db,
                force,
                workers,
                exclude_ext,
                exclude_name,
            )?;
            info!("Roots: {:?}", config.roots.iter().map(|r| &r.base_dir).collect::<Vec<_>>());
            info!(
                "Workers: {}, queue capacity: {}",
                config.effective_workers(),
                config.queue_capacity
            );

            let repository = open_repository(config.db_path.clone())?;
            let reporter = Arc::new(ProgressReporter::new(progress, 500));
            let collector = Arc::new(MetricsCollector::new());
            let mut crawler = Crawler::new(config)?
                .with_repository(repository)
                .with_default_processors();
            crawler.add_observer(Arc::new(LoggingObserver::default()));
            crawler.add_observer(reporter.clone());
            if metrics {
                crawler.add_observer(collector.clone());
            }

            let report = crawler.run()?;
            reporter.report_done(&report.summary);

            if json {
                match serde_json::to_string_pretty(&report) {
                    Ok(out) => println!("{}", out),
                    Err(e) => error!("Unable to serialize report: {}", e),
                }
            } else {
                let summary = &report.summary;
                println!(
                    "Crawl {}:",
                    if summary.stopped { "stopped" } else { "completed" }
                );
                println!("  Paths found: {}", summary.walk.paths_found);
                println!("  Paths skipped: {}", summary.walk.paths_skipped);
                println!("  Files crawled: {}", summary.walk.files_crawled);
                println!("  Directories crawled: {}", summary.walk.directories_crawled);
                println!("  Bytes processed: {}", summary.walk.bytes_processed);
                println!("  Persisted: {}", summary.paths_persisted);
                println!("  Unchanged: {}", summary.paths_unchanged);
                println!("  Empty directories: {}", summary.empty_directories);
                println!("  Errors: {}", summary.error_count());
                println!("  Duration: {}ms", summary.walk.duration_ms().unwrap_or(0));
            }
            Ok(())
        }
        Commands::Advance {
            kind,
            stage,
            db,
            force,
            batch_size,
        } => {
            let defaults = CrawlConfig::default();
            let repository = open_repository(db)?;
            let mut pipeline = StagePipeline::from_config(&defaults)
                .with_repository(repository)
                .with_force_refresh(force);
            pipeline.add_processor(Arc::new(AttributesProcessor::new()));
            pipeline.add_processor(Arc::new(HashProcessor::new(
                defaults.hash_algorithms.clone(),
                defaults.hash_chunk_size,
            )));
            let report = StageAdvancer::new(Arc::new(pipeline))
                .with_batch_size(batch_size.unwrap_or(defaults.stage_batch_size))
                .advance(kind, stage)?;
            println!(
                "Examined {}, advanced {}, deleted {}, unchanged {}, errors {}",
                report.examined,
                report.advanced,
                report.deleted,
                report.unchanged,
                report.processor_errors + report.persistence_errors
            );
            Ok(())
        }
        Commands::Duplicates { db, json } => {
            let repository = open_repository(db)?;
            let groups = repository.find_duplicates()?;
            if json {
                match serde_json::to_string_pretty(&groups) {
                    Ok(out) => println!("{}", out),
                    Err(e) => error!("Unable to serialize duplicates: {}", e),
                }
                return Ok(());
            }
            let wasted: u64 = groups.iter().map(|g| g.wasted_bytes()).sum();
            for group in &groups {
                println!("{} x {} bytes ({})", group.count(), group.size, group.hash);
                for member in &group.members {
                    println!("  {}", member.path);
                }
            }
            println!("{} duplicate groups, {} bytes reclaimable", groups.len(), wasted);
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("{}", ABOUT);
        println!("Use 'fs_crawler <command> --help' for details on a command");
        return ExitCode::SUCCESS;
    };

    match run(command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
