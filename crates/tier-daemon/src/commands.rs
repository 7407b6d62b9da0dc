//! Command implementations for the tier daemon.
//!
//! Handles:
//! - archive: Follow the hot tier, open cold and lease stores, run partition workers
//! - get: Resolve a record hot-then-cold and print it as JSON
//! - put: Write records into the hot tier (stand-in for the application)
//! - stats / checkpoints / trim-feed / config: inspection and housekeeping

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tier_archiver::{
    run_partitions, trim_feed, Archiver, PartitionWorker, RetryConfig, StreamCheckpoint,
    WorkerConfig, WorkerStats,
};
use tier_resolver::{ResolveError, Resolution, Resolver};
use tier_storage::{LeaseStore, TierOptions, TierStore};
use tier_types::{Record, Settings};

/// Load configuration and apply CLI overrides.
///
/// Order: defaults -> config file -> --config file -> env -> CLI flags.
pub fn load_settings(
    config_path: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;

    // Apply CLI overrides (highest precedence)
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }

    Ok(settings)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `log_level`.
///
/// Logs go to stderr so that command output on stdout stays parseable.
pub fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }
    Ok(())
}

fn hot_options(settings: &Settings) -> TierOptions {
    TierOptions::hot(&settings.hot.name, settings.partitions)
}

fn cold_options(settings: &Settings) -> TierOptions {
    TierOptions::cold(&settings.cold.name)
}

fn open_tier(path: &Path, options: TierOptions) -> Result<TierStore> {
    ensure_parent(path)?;
    let name = options.name.clone();
    TierStore::open(path, options).with_context(|| format!("Failed to open {} tier", name))
}

/// Open for reading without contending with a running archiver.
///
/// A store that does not exist yet is created empty.
fn open_tier_for_reading(path: &Path, options: TierOptions) -> Result<TierStore> {
    if !path.exists() {
        return open_tier(path, options);
    }
    let name = options.name.clone();
    TierStore::open_read_only(path, options)
        .with_context(|| format!("Failed to open {} tier", name))
}

/// Follow the hot tier without taking its write lock, so the writer
/// (`put` or the application) keeps running next to the archiver.
fn open_hot_follower(settings: &Settings) -> Result<TierStore> {
    let path = settings.hot.expanded_path();
    if !path.exists() {
        // a secondary needs an existing primary to attach to
        drop(open_tier(&path, hot_options(settings))?);
    }

    let follower_path = follower_path(&path);
    fs::create_dir_all(&follower_path)
        .with_context(|| format!("Failed to create directory {:?}", follower_path))?;

    TierStore::open_secondary(&path, &follower_path, hot_options(settings))
        .with_context(|| format!("Failed to follow {} tier", settings.hot.name))
}

/// Sibling directory holding the follower's own RocksDB files.
fn follower_path(hot_path: &Path) -> PathBuf {
    let mut name = hot_path.as_os_str().to_os_string();
    name.push(".follower");
    PathBuf::from(name)
}

fn open_leases(settings: &Settings) -> Result<LeaseStore> {
    let path = settings.expanded_lease_path();
    ensure_parent(&path)?;
    LeaseStore::open(&path).context("Failed to open lease store (is another archiver running?)")
}

fn all_partitions(settings: &Settings, requested: &[u32]) -> Vec<u32> {
    if requested.is_empty() {
        (0..settings.partitions).collect()
    } else {
        requested.to_vec()
    }
}

/// Run partition workers until SIGINT/SIGTERM, or drain once with `once`.
pub async fn run_archiver(
    settings: &Settings,
    partitions: &[u32],
    once: bool,
) -> Result<Vec<WorkerStats>> {
    let cancel = CancellationToken::new();
    if !once {
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }
    run_archiver_until(settings, partitions, once, cancel).await
}

/// [`run_archiver`] stopped by `cancel` instead of a signal.
pub async fn run_archiver_until(
    settings: &Settings,
    partitions: &[u32],
    once: bool,
    cancel: CancellationToken,
) -> Result<Vec<WorkerStats>> {
    let partitions = all_partitions(settings, partitions);

    info!("Archiver starting...");
    info!("Configuration:");
    info!("  Hot tier: {} ({})", settings.hot.name, settings.hot.path);
    info!("  Cold tier: {} ({})", settings.cold.name, settings.cold.path);
    info!("  Retention: {}", settings.retention);
    info!("  Partitions: {:?}", partitions);

    let hot = Arc::new(open_hot_follower(settings)?);
    let cold = Arc::new(open_tier(&settings.cold.expanded_path(), cold_options(settings))?);
    let leases = Arc::new(open_leases(settings)?);

    let archiver = Arc::new(
        Archiver::new(cold, settings.retention).with_retry(RetryConfig::from(&settings.retry)),
    );
    let config = WorkerConfig::from(&settings.archiver);

    if once {
        return drain_partitions(&partitions, hot, archiver, leases, config).await;
    }

    let stats = run_partitions(&partitions, hot, archiver, leases, config, cancel)
        .await
        .context("Archiver failed")?;

    info!(
        migrated = stats.iter().map(|s| s.migrated).sum::<u64>(),
        "Archiver stopped"
    );
    Ok(stats)
}

/// One pass over each partition: process batches until caught up.
async fn drain_partitions(
    partitions: &[u32],
    hot: Arc<TierStore>,
    archiver: Arc<Archiver>,
    leases: Arc<LeaseStore>,
    config: WorkerConfig,
) -> Result<Vec<WorkerStats>> {
    let mut all_stats = Vec::with_capacity(partitions.len());

    for &partition in partitions {
        let mut worker = PartitionWorker::new(
            partition,
            hot.clone(),
            archiver.clone(),
            leases.clone(),
            config.clone(),
        );
        if !worker.try_acquire()? {
            warn!(partition = partition, "Partition leased by another archiver, skipping");
            continue;
        }

        let result = loop {
            match worker.poll_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        worker.release()?;
        result.with_context(|| format!("Partition {} failed", partition))?;

        all_stats.push(worker.stats().clone());
    }

    Ok(all_stats)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Build a resolver over read-only handles of both tiers.
pub fn open_resolver(settings: &Settings) -> Result<Resolver> {
    let hot = open_tier_for_reading(&settings.hot.expanded_path(), hot_options(settings))?;
    let cold = open_tier_for_reading(&settings.cold.expanded_path(), cold_options(settings))?;
    Ok(Resolver::new(Arc::new(hot), Arc::new(cold)))
}

/// Resolve by id or by JSON request body.
pub async fn lookup(
    settings: &Settings,
    id: Option<&str>,
    request: Option<&str>,
) -> Result<Result<Resolution, ResolveError>> {
    let resolver = open_resolver(settings)?;
    let result = match (id, request) {
        (Some(id), _) => resolver.resolve(id).await,
        (None, Some(body)) => resolver.resolve_request(body.as_bytes()).await,
        (None, None) => bail!("Either an id or --request is required"),
    };
    Ok(result)
}

/// `get`: print the record, or report why not.
///
/// Exit status 2 when neither tier holds the record, 1 on any other failure.
pub async fn handle_get(
    settings: &Settings,
    id: Option<&str>,
    request: Option<&str>,
) -> Result<ExitCode> {
    match lookup(settings, id, request).await? {
        Ok(resolution) => {
            info!(id = %resolution.record.id, source = %resolution.source, "Record resolved");
            let json = serde_json::to_string_pretty(&resolution.record)
                .context("Failed to serialize record")?;
            println!("{}", json);
            Ok(ExitCode::SUCCESS)
        }
        Err(e @ ResolveError::NotFound { .. }) => {
            eprintln!("{}", e);
            Ok(ExitCode::from(2))
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// `put`: upsert JSON records into the hot tier.
///
/// Returns (id, change sequence) per record, in argument order.
pub fn put_records(
    settings: &Settings,
    records: &[String],
) -> Result<Vec<(String, Option<u64>)>> {
    let parsed = records
        .iter()
        .map(|raw| {
            serde_json::from_str::<Record>(raw)
                .with_context(|| format!("Invalid record JSON: {}", raw))
        })
        .collect::<Result<Vec<_>>>()?;

    let hot = open_tier(&settings.hot.expanded_path(), hot_options(settings))?;

    let mut written = Vec::with_capacity(parsed.len());
    for record in parsed {
        let sequence = hot
            .put_record(&record)
            .with_context(|| format!("Failed to write record {}", record.id))?;
        written.push((record.id, sequence));
    }
    hot.flush().context("Failed to flush hot tier")?;

    Ok(written)
}

pub fn handle_put(settings: &Settings, records: &[String]) -> Result<()> {
    for (id, sequence) in put_records(settings, records)? {
        match sequence {
            Some(sequence) => println!("{} (sequence {})", id, sequence),
            None => println!("{}", id),
        }
    }
    Ok(())
}

/// `stats`: record and change feed counts for both tiers.
pub fn show_stats(settings: &Settings) -> Result<()> {
    for (label, path, options) in [
        ("Hot", settings.hot.expanded_path(), hot_options(settings)),
        ("Cold", settings.cold.expanded_path(), cold_options(settings)),
    ] {
        let store = open_tier_for_reading(&path, options)?;
        let stats = store
            .get_stats()
            .with_context(|| format!("Failed to read {} tier stats", store.name()))?;

        println!("{} tier '{}' at {:?}", label, store.name(), path);
        println!("  Records:         {}", stats.record_count);
        if store.kind() == tier_types::TierKind::Hot {
            println!("  Partitions:      {}", stats.partitions);
            println!("  Pending changes: {}", stats.pending_changes);
            println!("  Next sequence:   {}", stats.next_sequence);
        }
        println!("  Disk usage:      {} bytes", stats.disk_usage_bytes);
    }
    Ok(())
}

/// `checkpoints`: committed position and lease holder of each partition.
pub fn show_checkpoints(settings: &Settings) -> Result<()> {
    let path = settings.expanded_lease_path();
    if !path.exists() {
        println!("No checkpoints (lease store not created yet)");
        return Ok(());
    }
    let leases = LeaseStore::open_read_only(&path).context("Failed to open lease store")?;

    let checkpoints = StreamCheckpoint::list(&leases).context("Failed to read checkpoints")?;
    if checkpoints.is_empty() {
        println!("No checkpoints");
    }
    for checkpoint in &checkpoints {
        let sequence = checkpoint
            .last_sequence
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "partition {}: last_sequence={} processed={} migrated={} committed_at={}",
            checkpoint.partition,
            sequence,
            checkpoint.processed_count,
            checkpoint.migrated_count,
            checkpoint.last_committed_at.to_rfc3339()
        );
    }

    for partition in 0..settings.partitions {
        if let Some(lease) = leases.get_lease(partition)? {
            println!(
                "partition {}: leased by {} until {}",
                partition,
                lease.owner,
                lease.expires_at.to_rfc3339()
            );
        }
    }
    Ok(())
}

/// `trim-feed`: drop committed change events.
///
/// Opens the hot tier for writing and the lease store, so it cannot run
/// while an archiver or writer holds either.
pub fn trim_feeds(settings: &Settings, partitions: &[u32]) -> Result<usize> {
    let hot = open_tier(&settings.hot.expanded_path(), hot_options(settings))?;
    let leases = open_leases(settings)?;

    let mut total = 0;
    for partition in all_partitions(settings, partitions) {
        let deleted = trim_feed(&hot, &leases, partition)
            .with_context(|| format!("Failed to trim partition {}", partition))?;
        println!("partition {}: trimmed {} change events", partition, deleted);
        total += deleted;
    }
    Ok(total)
}

/// `config`: effective settings as TOML.
pub fn render_config(settings: &Settings) -> Result<String> {
    toml::to_string_pretty(settings).context("Failed to render configuration")
}
