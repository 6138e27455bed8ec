// ABOUTME: CLI entry point for container-stream
// ABOUTME: Tails a local directory as JSON lines, checkpointing positions to a file

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use container_stream::blob_store::LocalDirStore;
use container_stream::config::{
    self, CONFIG_KEY_CONTAINER, CONFIG_KEY_MAX_RESULTS, CONFIG_KEY_POLLING_PERIOD,
};
use container_stream::{Phase, Record, Source};
use tokio::fs;

/// First pause after an empty read; doubles up to the polling period.
const MIN_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "container-stream")]
#[command(about = "Stream a directory as a snapshot followed by change events", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory to stream (overrides `container` from the config file)
    #[arg(long)]
    dir: Option<PathBuf>,
    /// Flat TOML file with container, pollingPeriod and maxResults
    #[arg(long)]
    config: Option<PathBuf>,
    /// How often to poll for changes, e.g. 500ms, 1s, 2m
    #[arg(long = "polling-period")]
    polling_period: Option<String>,
    /// Listing page size (1-5000)
    #[arg(long = "max-results")]
    max_results: Option<String>,
    /// File holding the last delivered position; read on start, rewritten after every record
    #[arg(long = "position-file")]
    position_file: Option<PathBuf>,
    /// Log filter (error, warn, info, debug, trace or a full EnvFilter directive)
    #[arg(long = "log-level", env = "CONTAINER_STREAM_LOG", default_value = "info")]
    log_level: String,
    /// Exit once the snapshot has been delivered instead of tailing changes
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("Invalid log filter '{}'", cli.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let mut source = Source::new();
    source
        .configure(&raw_settings(&cli)?)
        .context("Invalid configuration")?;

    let result = stream(&mut source, &cli).await;
    source.teardown().await;
    result
}

/// Merges the config file (if any) with command-line overrides.
fn raw_settings(cli: &Cli) -> anyhow::Result<HashMap<String, String>> {
    let mut raw = match &cli.config {
        Some(path) => config::load_raw(path)
            .with_context(|| format!("Failed to load config file {:?}", path))?,
        None => HashMap::new(),
    };

    if let Some(dir) = &cli.dir {
        raw.insert(
            CONFIG_KEY_CONTAINER.to_string(),
            dir.to_string_lossy().into_owned(),
        );
    }
    if let Some(period) = &cli.polling_period {
        raw.insert(CONFIG_KEY_POLLING_PERIOD.to_string(), period.clone());
    }
    if let Some(max) = &cli.max_results {
        raw.insert(CONFIG_KEY_MAX_RESULTS.to_string(), max.clone());
    }

    if !raw.contains_key(CONFIG_KEY_CONTAINER) {
        bail!("No directory to stream: pass --dir or set `container` in the config file");
    }
    Ok(raw)
}

async fn stream(source: &mut Source, cli: &Cli) -> anyhow::Result<()> {
    let Some(config) = source.config().cloned() else {
        bail!("Source is not configured");
    };

    let position = match &cli.position_file {
        Some(path) => load_position(path).await?,
        None => None,
    };

    let store = Arc::new(LocalDirStore::new(&config.container));
    source
        .open(store, position.as_deref())
        .await
        .with_context(|| format!("Failed to open {:?}", config.container))?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut stdout = std::io::stdout();
    let mut backoff = MIN_BACKOFF;
    let mut delivered: u64 = 0;

    loop {
        let read = tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Received shutdown signal");
                break;
            }
            read = source.read() => read,
        };

        match read.context("Failed to read from source")? {
            Some(record) => {
                emit(&mut stdout, &record)?;
                let encoded = record.position.encode()?;
                if let Some(path) = &cli.position_file {
                    save_position(path, &encoded).await?;
                }
                source.ack(&encoded)?;
                delivered += 1;
                backoff = MIN_BACKOFF;
            }
            None => {
                if cli.once && source.phase() == Some(Phase::Change) {
                    tracing::info!(records = delivered, "Snapshot delivered, exiting");
                    break;
                }
                tokio::select! {
                    _ = &mut shutdown => {
                        tracing::info!("Received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(config.polling_period.max(MIN_BACKOFF));
            }
        }
    }

    Ok(())
}

fn emit(out: &mut impl Write, record: &Record) -> anyhow::Result<()> {
    let wire = record.to_wire()?;
    let line = serde_json::to_string(&wire).context("Failed to serialize record")?;
    writeln!(out, "{}", line).context("Failed to write record")?;
    out.flush().context("Failed to flush stdout")?;
    Ok(())
}

/// Reads a saved position; a missing or empty file means "start fresh".
async fn load_position(path: &Path) -> anyhow::Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Ok(None),
        Ok(bytes) => {
            tracing::info!("Resuming from position in {:?}", path);
            Ok(Some(bytes))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("Failed to read position from {:?}", path)),
    }
}

async fn save_position(path: &Path, encoded: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }
    fs::write(path, encoded)
        .await
        .with_context(|| format!("Failed to write position to {:?}", path))?;
    Ok(())
}
