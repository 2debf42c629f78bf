mod commands;

use chrono::{TimeZone, Utc};
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{Command, SnapshotAction};
use japi::cache::SnapshotStorage;
use japi::client::ApiClient;
use japi::config::Config;

#[derive(Parser, Debug)]
#[command(name = "japi")]
#[command(about = "A caching command line client for JSON:API servers")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/japi/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.log_file.as_deref())?;

  let config = Config::load(args.config.as_deref())?;
  let storage = config.snapshot_storage()?;

  if let Command::Snapshot { action } = &args.command {
    return run_snapshot(storage.as_ref(), action);
  }

  let client = config.client_builder()?.build()?;
  restore(&client, storage.as_ref())?;
  client.mount();

  let result = commands::execute(&client, args.command).await?;

  let snapshot = client.extract();
  debug!(entries = snapshot.len(), "saving snapshot");
  storage.save(&snapshot, Utc::now())?;

  println!("{}", serde_json::to_string_pretty(&result)?);

  if japi::has_errors(&result) {
    return Err(eyre!("Request failed"));
  }
  Ok(())
}

/// Hydrate the client from the persisted snapshot, keeping its original age.
fn restore(client: &ApiClient, storage: &dyn SnapshotStorage) -> Result<()> {
  let snapshot = storage.load()?;
  if snapshot.is_empty() {
    return Ok(());
  }

  let saved_at = snapshot.saved_at.unwrap_or_else(Utc::now);
  info!(entries = snapshot.entries.len(), %saved_at, "restoring snapshot");
  client.hydrate_at(snapshot.entries, saved_at.timestamp_millis());
  Ok(())
}

fn run_snapshot(storage: &dyn SnapshotStorage, action: &SnapshotAction) -> Result<()> {
  match action {
    SnapshotAction::List => {
      let snapshot = storage.load()?;
      if let Some(saved_at) = snapshot.saved_at {
        let local = chrono::Local.from_utc_datetime(&saved_at.naive_utc());
        println!("saved {}", local.format("%Y-%m-%d %H:%M:%S"));
      }
      for (key, _) in &snapshot.entries {
        println!("{}", serde_json::to_string(key)?);
      }
    }
    SnapshotAction::Clear => {
      storage.clear()?;
      println!("snapshot cleared");
    }
  }
  Ok(())
}

fn init_logging(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,japi=info"));

  let Some(path) = log_file else {
    tracing_subscriber::registry()
      .with(filter)
      .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
      .init();
    return Ok(None);
  };

  let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
  let name = path
    .file_name()
    .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
  std::fs::create_dir_all(dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
  tracing_subscriber::registry()
    .with(filter)
    .with(
      fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_line_number(true),
    )
    .init();

  Ok(Some(guard))
}
