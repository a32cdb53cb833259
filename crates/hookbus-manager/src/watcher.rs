//! Hook directory watcher for hot reload.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_mini::new_debouncer;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::manager::HookManager;

const DEBOUNCE: Duration = Duration::from_secs(1);
const POLL: Duration = Duration::from_millis(250);

impl HookManager {
    /// Watch every existing source directory and reload hooks when
    /// anything under them changes. Returns `None` when there is nothing
    /// to watch.
    pub async fn watch_hook_dirs(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let dirs: Vec<PathBuf> = self
            .source_dirs()
            .await
            .into_iter()
            .map(|s| s.dir)
            .filter(|d| d.is_dir())
            .collect();

        if dirs.is_empty() {
            info!("No hook directories exist yet, skipping watcher");
            return None;
        }

        let manager = self.clone();
        let runtime = Handle::current();
        Some(tokio::task::spawn_blocking(move || {
            run_watcher(dirs, manager, runtime, cancel);
        }))
    }
}

fn run_watcher(
    dirs: Vec<PathBuf>,
    manager: Arc<HookManager>,
    runtime: Handle,
    cancel: CancellationToken,
) {
    let (tx, rx) = std::sync::mpsc::channel();

    let mut debouncer = match new_debouncer(DEBOUNCE, tx) {
        Ok(d) => d,
        Err(e) => {
            warn!("Failed to create hook watcher: {e}");
            return;
        }
    };

    for dir in &dirs {
        if let Err(e) = debouncer
            .watcher()
            .watch(dir, notify::RecursiveMode::Recursive)
        {
            warn!(dir = %dir.display(), "Failed to watch hook directory: {e}");
        }
    }

    info!(dirs = dirs.len(), "Hook watcher started");

    while !cancel.is_cancelled() {
        match rx.recv_timeout(POLL) {
            Ok(Ok(events)) if !events.is_empty() => {
                info!(changes = events.len(), "Hook files changed, reloading...");
                let manager = manager.clone();
                runtime.spawn(async move {
                    let summary = manager.reload_hooks().await;
                    info!(loaded = summary.loaded, "Hooks reloaded");
                });
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!("Hook watcher error: {e:?}");
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                info!("Hook watcher channel closed, stopping");
                break;
            }
        }
    }
    info!("Hook watcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::tests::{store_for, write_hook};
    use hookbus_loader::HookLoader;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_watcher_reloads_on_new_hook() {
        let root = tempfile::tempdir().unwrap();
        let hooks = root.path().join("hooks");
        write_hook(&hooks, "first", r#"{"events": ["command"]}"#);

        let manager = Arc::new(
            HookManager::new(store_for(root.path(), &hooks), crate::manager::default_resolver())
                .with_loader(HookLoader::new().with_env_lookup(|_| None)),
        );
        assert_eq!(manager.initialize().await.loaded, 1);

        let cancel = CancellationToken::new();
        let handle = manager.watch_hook_dirs(cancel.clone()).await.unwrap();
        // Give the OS watcher a moment to arm.
        tokio::time::sleep(Duration::from_millis(300)).await;
        write_hook(&hooks, "second", r#"{"events": ["session"]}"#);

        let mut loaded = 0;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(250)).await;
            loaded = manager.list_hooks().await.len();
            if loaded == 2 {
                break;
            }
        }
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(loaded, 2);
    }

    #[tokio::test]
    async fn test_nothing_to_watch() {
        let root = tempfile::tempdir().unwrap();
        let manager = Arc::new(HookManager::new(
            store_for(root.path(), &root.path().join("missing")),
            crate::manager::default_resolver(),
        ));
        assert!(manager.watch_hook_dirs(CancellationToken::new()).await.is_none());
    }
}
