//! Filesystem watcher with per-path debouncing.
//!
//! Notifications are platform-dependent and lossy; events for the same path
//! are coalesced within a short window and the file is re-read afterwards.
//! A full rescan remains the recovery path for anything missed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::task::JoinHandle;

use crate::error::{LeibnizError, Result};

const DEBOUNCE_WINDOW: Duration = Duration::from_millis(200);

/// What happened to a watched file, after coalescing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    Upsert,
    Remove,
}

/// Callback invoked once per settled path.
pub type ChangeHandler = Arc<dyn Fn(PathBuf, FileChange) + Send + Sync>;

/// Keeps the watcher and its debounce task alive.
pub struct WatcherHandle {
    _watcher: notify::RecommendedWatcher,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}

fn is_definition_file(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("toml")
}

/// Watch a directory of definition files.
pub fn spawn(dir: &Path, on_change: ChangeHandler) -> Result<WatcherHandle> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Event>();

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        match result {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(e) => tracing::warn!(error = %e, "file watcher error"),
        }
    })
    .map_err(|e| LeibnizError::Internal(format!("file watcher: {e}")))?;

    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|e| LeibnizError::Internal(format!("watch {}: {e}", dir.display())))?;

    let task = tokio::spawn(async move {
        let mut pending: HashMap<PathBuf, FileChange> = HashMap::new();
        loop {
            let received = if pending.is_empty() {
                rx.recv().await.map(Some)
            } else {
                tokio::select! {
                    event = rx.recv() => event.map(Some),
                    _ = tokio::time::sleep(DEBOUNCE_WINDOW) => Some(None),
                }
            };

            match received {
                // Channel closed: watcher dropped, stop draining.
                None => break,
                Some(Some(event)) => {
                    let change = match event.kind {
                        EventKind::Remove(_) => FileChange::Remove,
                        EventKind::Create(_) | EventKind::Modify(_) => FileChange::Upsert,
                        _ => continue,
                    };
                    for path in event.paths {
                        if is_definition_file(&path) {
                            pending.insert(path, change);
                        }
                    }
                }
                Some(None) => {
                    for (path, change) in pending.drain() {
                        on_change(path, change);
                    }
                }
            }
        }
    });

    Ok(WatcherHandle {
        _watcher: watcher,
        task,
    })
}
