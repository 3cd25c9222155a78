use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use driftsync::store::{ContentStore, Namespace, OperationLog};
use driftsync::{Config, Engine, HttpFetcher};

#[derive(Parser, Debug)]
#[command(name = "driftsync")]
#[command(about = "Offline cache-and-sync engine operations")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/driftsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Cli,
}

#[derive(Subcommand, Debug)]
enum Cli {
  /// Install a new generation from the shell manifest
  Install,
  /// Activate the pending generation and delete prior generations
  Activate,
  /// Deliver a sync trigger (e.g. sync-data, sync-watchlist)
  Sync { trigger: String },
  /// Delete every content entry across all namespaces
  Purge,
  /// Fetch the given paths into the data namespace
  Precache { urls: Vec<String> },
  /// Queue a mutation for deferred delivery
  Enqueue { tag: String, payload: String },
  /// Show generations, entry counts, and pending operations
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing()?;

  let config = Config::load(args.config.as_deref())?;
  let store_dir = config.resolve_store_dir()?;
  let store = Arc::new(ContentStore::open(store_dir.join("content.db"))?);
  let log = Arc::new(OperationLog::open(store_dir.join("oplog.db"))?);
  let fetcher = Arc::new(HttpFetcher::new()?);

  let engine = Engine::new(&config, fetcher, Arc::clone(&store), Arc::clone(&log))?;

  match args.command {
    Cli::Install => {
      let generation = engine.install().await?;
      println!("installed generation {} (pending activation)", generation);
    }
    Cli::Activate => {
      let pending = store
        .pending_generation()?
        .ok_or_else(|| eyre!("No pending generation; run install first"))?;
      engine.activate(pending)?;
      println!("generation {} is now active", pending);
    }
    Cli::Sync { trigger } => {
      engine.deliver_trigger(&trigger).await?;
      println!("trigger {} completed", trigger);
    }
    Cli::Purge => {
      engine.purge_all()?;
      println!("all content stores purged");
    }
    Cli::Precache { urls } => {
      engine.precache(&urls).await?;
      println!("precached {} paths", urls.len());
    }
    Cli::Enqueue { tag, payload } => {
      let payload: serde_json::Value = serde_json::from_str(&payload)
        .map_err(|e| eyre!("Payload is not valid JSON: {}", e))?;
      let id = engine.enqueue(&tag, payload)?;
      println!("queued operation {}", id);
    }
    Cli::Status => {
      print_status(&store, &log)?;
    }
  }

  Ok(())
}

fn print_status(store: &ContentStore, log: &OperationLog) -> Result<()> {
  match store.active_generation()? {
    Some(generation) => println!("active generation:  {}", generation),
    None => println!("active generation:  none"),
  }
  match store.pending_generation()? {
    Some(generation) => println!("pending generation: {}", generation),
    None => println!("pending generation: none"),
  }

  for namespace in [Namespace::Shell, Namespace::Data, Namespace::Media] {
    println!(
      "{:<8} entries:    {}",
      namespace.as_str(),
      store.entry_count(namespace)?
    );
  }

  let counts = log.counts_by_partition()?;
  if counts.is_empty() {
    println!("pending operations: none");
  } else {
    for (partition, count) in counts {
      println!("pending {:<11} {}", partition, count);
    }
  }

  Ok(())
}

/// Log to a rolling file under the data directory; the terminal stays
/// clean for command output.
fn init_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("driftsync")
    .join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let appender = tracing_appender::rolling::daily(log_dir, "driftsync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false),
    )
    .init();

  Ok(guard)
}
