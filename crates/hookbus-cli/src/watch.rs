use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use hookbus_manager::HookManager;

/// Keep hooks loaded, reload on file changes and run the health monitor
/// until Ctrl-C.
pub async fn run_watch(manager: Arc<HookManager>) -> anyhow::Result<()> {
    let summary = manager.initialize().await;
    tracing::info!(
        loaded = summary.loaded,
        registered = summary.registered,
        "Hooks ready"
    );

    let cancel = CancellationToken::new();
    let watcher = manager.watch_hook_dirs(cancel.clone()).await;
    let monitor = manager.spawn_health_monitor(cancel.clone());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    cancel.cancel();
    if let Some(watcher) = watcher {
        let _ = watcher.await;
    }
    let _ = monitor.await;
    manager.shutdown().await;
    Ok(())
}
