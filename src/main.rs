use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use music_ingest::catalog::{search_listing, CatalogManager, CatalogStore};
use music_ingest::cloud_storage::CloudStorageManager;
use music_ingest::config::{Config, StorageConfig};
use music_ingest::db::{Database, DbCatalogEntry};
use chrono::{DateTime, Utc};
use music_ingest::import::{
    CompensationPolicy, FolderScanner, IngestProgress, IngestReport, IngestService,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path = PathBuf::from(s);
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(path))
}

#[derive(Parser, Debug)]
#[command(version, about = "Ingest a music folder into the track catalog")]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scans a folder and uploads every new track it finds.
    Ingest {
        /// Root of the source tree, laid out as <album>/<singer> - <title>.<ext>
        #[clap(value_parser = parse_path)]
        root: PathBuf,

        /// Performer the whole tree belongs to.
        #[clap(long)]
        singer: String,

        /// Number of concurrent uploads, overrides MUSIC_INGEST_MAX_UPLOAD_WORKERS.
        #[clap(long)]
        workers: Option<usize>,
    },

    /// Searches committed tracks by title, singer or album.
    Search {
        keyword: String,

        /// Print the listing as JSON.
        #[clap(long)]
        json: bool,
    },

    /// Shows a single catalog entry.
    Show { id: i64 },

    /// Downloads the uploaded content of a committed entry.
    Fetch {
        id: i64,

        #[clap(value_parser = parse_path)]
        output: PathBuf,
    },

    /// Deletes a catalog entry. Uploaded content is left in storage.
    Delete { id: i64 },

    /// Lists entries that never got their content attached.
    Orphans {
        /// Only list entries created at least this many hours ago.
        #[clap(long, default_value_t = 1)]
        older_than_hours: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init()?;

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Command::Ingest {
        workers: Some(workers),
        ..
    } = &cli_args.command
    {
        config.max_upload_workers = *workers;
    }

    let cloud_storage = match &config.storage {
        StorageConfig::Local { path } => CloudStorageManager::local(path.clone()).await,
        StorageConfig::S3(s3_config) => CloudStorageManager::new(s3_config.clone()).await,
    }
    .context("Failed to initialize cloud storage")?;

    if let Some(parent) = config.database_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let database_path = config
        .database_path
        .to_str()
        .context("Database path is not valid UTF-8")?;
    let database = Database::new(database_path)
        .await
        .context("Failed to open catalog database")?;

    let catalog = Arc::new(CatalogManager::new(database, cloud_storage.clone()));

    match cli_args.command {
        Command::Ingest { root, singer, .. } => {
            ingest(&config, catalog, cloud_storage, root, singer).await
        }
        Command::Search { keyword, json } => {
            let listing = search_listing(&*catalog, &keyword, &config.play_base_url).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else if listing.is_empty() {
                println!("No tracks match {:?}", keyword);
            } else {
                for result in listing {
                    println!(
                        "{:>6}  {} - {} [{}]  {}",
                        result.id, result.artist, result.title, result.album, result.url
                    );
                }
            }
            Ok(())
        }
        Command::Show { id } => {
            let entry = catalog.get_by_id(id).await?;
            print_entry(&entry);
            Ok(())
        }
        Command::Fetch { id, output } => {
            let mut reader = catalog.open_stream(id).await?;
            let mut file = tokio::fs::File::create(&output)
                .await
                .with_context(|| format!("Failed to create {}", output.display()))?;
            let bytes = tokio::io::copy(&mut reader, &mut file).await?;
            println!("Wrote {} bytes to {}", bytes, output.display());
            Ok(())
        }
        Command::Delete { id } => {
            catalog.delete(id).await?;
            println!("Deleted entry {}", id);
            Ok(())
        }
        Command::Orphans { older_than_hours } => {
            let Some(cutoff) = orphan_cutoff(Utc::now(), older_than_hours) else {
                bail!("--older-than-hours {} is out of range", older_than_hours);
            };
            let entries = catalog.find_unfinished(cutoff).await?;
            if entries.is_empty() {
                println!("No unfinished entries older than {}h", older_than_hours);
            }
            for entry in &entries {
                print_entry(entry);
            }
            Ok(())
        }
    }
}

async fn ingest(
    config: &Config,
    catalog: Arc<CatalogManager>,
    cloud_storage: CloudStorageManager,
    root: PathBuf,
    singer: String,
) -> Result<()> {
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }

    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    let service = IngestService::new(catalog, cloud_storage, config.ingest_config())
        .with_progress(progress_tx);
    let printer = tokio::spawn(print_progress(progress_rx));

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing in-flight uploads");
                cancel.cancel();
            }
        })
    };

    let scanner = FolderScanner::new(root, singer);
    info!("Scanning {}", scanner.root().display());
    let report = service.run(scanner.candidates(), cancel).await;

    ctrl_c.abort();
    // Closes the progress channel once the last task clone is gone
    drop(service);
    printer.await?;

    print_report(&report, config.compensation);

    let failed = report.failures.len() - report.duplicates();
    if failed > 0 {
        bail!("{} tracks failed to ingest", failed);
    }
    Ok(())
}

async fn print_progress(mut progress_rx: mpsc::UnboundedReceiver<IngestProgress>) {
    while let Some(progress) = progress_rx.recv().await {
        match progress {
            IngestProgress::Started { .. } => {}
            IngestProgress::Committed { path, id, .. } => {
                println!("  + {} -> {}", path.display(), id);
            }
            IngestProgress::Failed {
                path, stage, error, ..
            } => {
                println!("  ! {} [{}] {}", path.display(), stage, error);
            }
        }
    }
}

fn print_report(report: &IngestReport, compensation: CompensationPolicy) {
    println!();
    println!("Run {}", report.run_id);
    println!("  committed:   {}", report.succeeded);
    println!("  duplicates:  {}", report.duplicates());
    println!(
        "  failed:      {}",
        report.failures.len() - report.duplicates()
    );
    println!("  unreadable:  {}", report.scan_errors.len());
    if report.cancelled {
        println!("  cancelled, {} tracks not started", report.skipped);
    }

    let reserved = report.reserved_ids();
    if !reserved.is_empty() {
        println!("  {}: {:?}", uncommitted_label(compensation), reserved);
    }
    for failure in report.failures.iter().filter(|f| !f.error.is_duplicate()) {
        println!("  {}", failure);
    }
    for scan_error in &report.scan_errors {
        println!("  {}", scan_error);
    }
}

/// Creation time an entry must predate to count as unfinished
fn orphan_cutoff(now: DateTime<Utc>, older_than_hours: i64) -> Option<DateTime<Utc>> {
    chrono::Duration::try_hours(older_than_hours).and_then(|age| now.checked_sub_signed(age))
}

fn uncommitted_label(compensation: CompensationPolicy) -> &'static str {
    match compensation {
        CompensationPolicy::MarkOrphaned => "left without content",
        CompensationPolicy::Delete => "reserved then deleted",
    }
}

fn print_entry(entry: &DbCatalogEntry) {
    println!("{}", entry.id);
    println!("  title:    {}", entry.name);
    println!("  singer:   {}", entry.singer);
    println!("  album:    {}", entry.album);
    println!("  status:   {}", entry.status.as_str());
    if !entry.location.is_empty() {
        println!("  location: {}", entry.location);
    }
    if let Some(cover) = &entry.cover {
        println!("  cover:    {}", cover);
    }
    println!("  created:  {}", entry.created_at.to_rfc3339());
}
