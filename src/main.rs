mod config;
mod dedup;
mod discovery;
mod error;
mod executor;
mod file_ops;
mod model;
mod orchestrator;
mod proxy;
mod queue;
mod ssh_pool;
mod stats;
mod sync;
mod watcher;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use config::{Config, ExecutorMode};
use dedup::DedupCache;
use discovery::NextcloudUserDetector;
use error::HomedError;
use executor::RemoteExecutor;
use model::{FolderKind, MonitoredFolder};
use orchestrator::Orchestrator;
use proxy::ProxyDiscovery;
use queue::IngestQueue;
use ssh_pool::SshPool;
use stats::Stats;
use sync::SyncEngine;

const CONFIG_PATH: &str = "/opt/homed/config.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    info!("homed starting up");

    let config = Config::load(CONFIG_PATH).map_err(HomedError::from)?;
    let folders = Arc::new(resolve_folders(&config).await?);
    info!(count = folders.len(), "resolved monitored folders");

    // A/B/E: file ops is stateless, dedup cache and queue are
    // constructed up front and seeded from the existing import dir.
    let dedup = Arc::new(DedupCache::new());
    let seeded = dedup.load_from_directory(&config.dest.import_dir).await.unwrap_or(0);
    info!(seeded, "seeded dedup cache from import directory");

    let queue = Arc::new(IngestQueue::new(config.queue.capacity));
    if let Some(snapshot_path) = &config.queue.snapshot_path {
        match queue.load_snapshot(snapshot_path, &folders).await {
            Ok(restored) => info!(restored, "restored queue snapshot"),
            Err(e) => warn!(error = %e, "failed to restore queue snapshot"),
        }
    }

    // H/G: SSH pool and proxy discovery only matter in cluster mode,
    // but are cheap to construct either way so the executor can
    // auto-detect.
    let (ssh_pool, proxy_discovery) = if matches!(config.executor.mode, ExecutorMode::Local) {
        (None, None)
    } else {
        let ssh_pool = Arc::new(SshPool::new(
            config.cluster.private_key_path.clone(),
            config.cluster.max_connections,
            Duration::from_secs(config.cluster.idle_timeout_secs),
            Duration::from_millis(config.cluster.connect_timeout_ms),
            config.cluster.max_pool_wait_retries,
        ));
        let proxy_discovery = Arc::new(ProxyDiscovery::new(
            Duration::from_secs(config.cluster.cache_ttl_secs),
            config.cluster.max_errors,
            Duration::from_millis(config.cluster.health_timeout_ms),
            config.cluster.proxy_port,
        ));
        (Some(ssh_pool), Some(proxy_discovery))
    };

    // F: executor wraps G+H.
    let executor = Arc::new(RemoteExecutor::new(
        config.executor.clone(),
        config.cluster.clone(),
        proxy_discovery.clone(),
        ssh_pool.clone(),
    ));

    // I: sync engine wraps A+B+F (F is invoked by the orchestrator's
    // downstream chain, not by the sync engine itself).
    let stats = Arc::new(Stats::new());
    let sync_engine = Arc::new(SyncEngine::new(config.dest.import_dir.clone(), dedup, stats.clone()));

    // J: orchestrator owns the queue, the watchers, and the sync engine.
    let orchestrator = Arc::new(Orchestrator::new(
        queue.clone(),
        sync_engine,
        executor,
        config.dest.albums_path.clone(),
        config.batch.batch_size,
        Duration::from_millis(config.batch.batch_timeout_ms),
    ));

    let (shutdown_tx, _) = broadcast::channel(1);
    let (detected_tx, detected_rx) = mpsc::channel(256);

    let watcher_handle = tokio::spawn({
        let folders = (*folders).clone();
        let debounce_ms = config.watch.debounce_ms;
        let shutdown_rx = shutdown_tx.subscribe();
        async move {
            if let Err(e) = watcher::run_watcher(folders, debounce_ms, detected_tx, shutdown_rx).await {
                error!(error = %e, "watcher failed");
            }
        }
    });

    let intake_handle = tokio::spawn({
        let orchestrator = orchestrator.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        async move {
            orchestrator.run_intake(detected_rx, shutdown_rx).await;
        }
    });

    let processor_handle = tokio::spawn({
        let orchestrator = orchestrator.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        async move {
            orchestrator.run_processor(shutdown_rx).await;
        }
    });

    let reaper_handle = ssh_pool.clone().map(|pool| {
        let idle_timeout = Duration::from_secs(config.cluster.idle_timeout_secs);
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval((idle_timeout / 4).max(Duration::from_secs(1)));
            loop {
                tokio::select! {
                    _ = interval.tick() => pool.reap_idle().await,
                    _ = shutdown_rx.recv() => return,
                }
            }
        })
    });

    info!("pipelines running");
    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal, draining pipelines");
    shutdown_tx.send(()).ok();

    let shutdown_timeout = Duration::from_secs(30);
    let drain = async {
        let _ = watcher_handle.await;
        let _ = intake_handle.await;
        let _ = processor_handle.await;
        if let Some(handle) = reaper_handle {
            let _ = handle.await;
        }
    };

    if tokio::time::timeout(shutdown_timeout, drain).await.is_err() {
        warn!("shutdown timed out after 30s, forcing exit");
    }

    if let Some(snapshot_path) = &config.queue.snapshot_path {
        if let Err(e) = queue.save_snapshot(snapshot_path).await {
            warn!(error = %e, "failed to save queue snapshot on shutdown");
        }
    }

    if let Some(pool) = ssh_pool {
        pool.close_all().await;
    }

    info!(stats = ?stats.snapshot(), "shutdown complete");
    Ok(())
}

/// Builds the full set of monitored folders: per-user Nextcloud photo
/// paths (if `nextcloud_data_root` is set) plus configured custom
/// folders.
async fn resolve_folders(config: &Config) -> anyhow::Result<Vec<Arc<MonitoredFolder>>> {
    let mut folders = Vec::new();

    if let Some(data_root) = &config.watch.nextcloud_data_root {
        let detector = NextcloudUserDetector::new(
            data_root.clone(),
            config.watch.user_include.clone(),
            config.watch.user_exclude.clone(),
        );
        for (user, path) in detector.all_user_photos_paths().await? {
            folders.push(Arc::new(MonitoredFolder {
                path,
                kind: FolderKind::UserRoot { user },
                enabled: true,
                cron: None,
                archive_on_move: false,
                archive_root: None,
                allowed_extensions: config.watch.allowed_extensions.clone(),
            }));
        }
    }

    for custom in &config.watch.custom_folders {
        folders.push(Arc::new(MonitoredFolder {
            path: custom.path.clone(),
            kind: FolderKind::Custom,
            enabled: custom.enabled,
            cron: custom.cron.clone(),
            archive_on_move: custom.archive_on_move,
            archive_root: custom.archive_root.clone(),
            allowed_extensions: custom
                .allowed_extensions
                .clone()
                .unwrap_or_else(|| config.watch.allowed_extensions.clone()),
        }));
    }

    Ok(folders)
}
