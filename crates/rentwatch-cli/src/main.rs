mod crawl;
mod images;
mod ingest;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rentwatch_core::AppConfig;
use rentwatch_db::CompactionSpec;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rentwatch-cli")]
#[command(about = "Rental listing crawler and listing-history store")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Crawl search pages and listing documents through the proxy pool
    Crawl,
    /// Append extracted listing snapshots, register their images, then compact
    Ingest {
        /// JSON-lines file with one listing snapshot per line
        #[arg(long)]
        snapshots: PathBuf,
        /// JSON-lines file with extra image references
        #[arg(long)]
        images: Option<PathBuf>,
        /// Leave the history uncompacted after appending
        #[arg(long)]
        no_compact: bool,
    },
    /// Remove snapshots that repeat their predecessor
    Compact {
        /// Count redundant snapshots without deleting them
        #[arg(long)]
        dry_run: bool,
    },
    /// Download pending listing images and record the outcome
    Images,
    /// Upload downloaded images to the archive and mark them archived
    Archive,
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Check that the store is reachable
    Ping,
    /// Apply pending migrations
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = rentwatch_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Some(Commands::Crawl) => crawl::run_crawl(&config).await,
        Some(Commands::Ingest {
            snapshots,
            images,
            no_compact,
        }) => ingest::run_ingest(&config, &snapshots, images.as_deref(), !no_compact).await,
        Some(Commands::Compact { dry_run }) => run_compact(&config, dry_run).await,
        Some(Commands::Images) => images::run_images(&config).await,
        Some(Commands::Archive) => images::run_archive(&config).await,
        Some(Commands::Db {
            command: DbCommands::Ping,
        }) => run_db_ping(&config).await,
        Some(Commands::Db {
            command: DbCommands::Migrate,
        }) => run_db_migrate(&config).await,
        None => {
            println!("no command given; run with --help for usage");
            Ok(())
        }
    }
}

async fn run_compact(config: &AppConfig, dry_run: bool) -> anyhow::Result<()> {
    let spec = CompactionSpec::listings();
    rentwatch_db::with_store(config, |pool| async move {
        if dry_run {
            let report = rentwatch_db::count_redundant(&pool, &spec).await?;
            println!(
                "dry-run: {} redundant snapshots in {} ({} columns compared)",
                report.redundant,
                spec.table,
                report.columns.len()
            );
        } else {
            let report = rentwatch_db::compact(&pool, &spec).await?;
            println!(
                "compaction complete: {} redundant snapshots deleted from {} ({} columns compared)",
                report.redundant,
                spec.table,
                report.columns.len()
            );
        }
        Ok::<_, anyhow::Error>(())
    })
    .await
}

async fn run_db_ping(config: &AppConfig) -> anyhow::Result<()> {
    rentwatch_db::with_store(config, |pool| async move {
        rentwatch_db::health_check(&pool).await?;
        println!("database ok");
        Ok::<_, anyhow::Error>(())
    })
    .await
}

async fn run_db_migrate(config: &AppConfig) -> anyhow::Result<()> {
    rentwatch_db::with_store(config, |pool| async move {
        let applied = rentwatch_db::run_migrations(&pool).await?;
        println!("migrations complete: {applied} applied");
        Ok::<_, anyhow::Error>(())
    })
    .await
}
