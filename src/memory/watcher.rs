//! Keeps the index fresh by rebuilding when watched files change.
//!
//! `notify-debouncer-full` collapses bursts of raw events into one batch per
//! quiet period; the callback only filters and enqueues that batch. A single
//! worker task owns all rebuilds, so at most one runs at a time.

use crate::config::WatcherConfig;
use crate::error::Result;
use crate::memory::index::IndexBuilder;
use crate::memory::loader::{contains_indexable, has_allowed_extension};
use crate::memory::models::{BuildOutcome, ChangeEvent, ChangeKind, dotted_extension};

use notify_debouncer_full::notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify_debouncer_full::notify::{Event, EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// The debouncer polls at a quarter of its timeout; zero would spin.
const MIN_DEBOUNCE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Rebuilding,
    Stopped,
}

pub struct FileWatcher;

impl FileWatcher {
    /// Begin watching the builder's data directory recursively.
    ///
    /// The directory is created if missing so files added later are seen.
    /// Must be called from within a Tokio runtime.
    pub fn start(builder: Arc<IndexBuilder>, config: &WatcherConfig) -> Result<WatcherHandle> {
        let data_dir = builder.loader().data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;
        let root = data_dir.canonicalize()?;
        let extensions = builder.loader().extensions().to_vec();
        let debounce = config.debounce().max(MIN_DEBOUNCE);

        let (batch_tx, batch_rx) = mpsc::channel(config.queue_capacity.max(1));
        let callback_root = root.clone();
        let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let changes: Vec<ChangeEvent> = events
                        .iter()
                        .flat_map(|event| convert_event(&event.event, &callback_root, &extensions))
                        .collect();
                    if changes.is_empty() {
                        return;
                    }
                    match batch_tx.try_send(changes) {
                        Ok(()) | Err(TrySendError::Closed(_)) => {}
                        Err(TrySendError::Full(changes)) => {
                            // Rebuilds already queued will see these changes.
                            tracing::trace!(changes = changes.len(), "change queue full, dropping batch");
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        tracing::warn!(%error, "file watch error");
                    }
                }
            }
        })?;
        debouncer.watch(&root, RecursiveMode::Recursive)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(WatcherState::Idle);
        let worker = tokio::spawn(run_worker(builder, batch_rx, shutdown_rx, state_tx));

        tracing::info!(
            path = %root.display(),
            debounce_ms = debounce.as_millis() as u64,
            "watching for changes"
        );

        Ok(WatcherHandle {
            debouncer: Some(debouncer),
            shutdown_tx,
            state_rx,
            worker,
        })
    }
}

/// Running watcher. Dropping it without [`WatcherHandle::stop`] stops event
/// delivery but does not wait for an in-flight rebuild.
pub struct WatcherHandle {
    debouncer: Option<Debouncer<RecommendedWatcher, RecommendedCache>>,
    shutdown_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<WatcherState>,
    worker: JoinHandle<()>,
}

impl WatcherHandle {
    pub fn state(&self) -> WatcherState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<WatcherState> {
        self.state_rx.clone()
    }

    /// Stop delivering events and wait for the worker to exit. A rebuild
    /// already running completes first; queued events are discarded.
    pub async fn stop(mut self) {
        drop(self.debouncer.take());
        self.shutdown_tx.send_replace(true);
        if let Err(error) = (&mut self.worker).await {
            tracing::error!(%error, "watcher worker panicked");
        }
        tracing::info!("file watcher stopped");
    }
}

async fn run_worker(
    builder: Arc<IndexBuilder>,
    mut batches: mpsc::Receiver<Vec<ChangeEvent>>,
    mut shutdown: watch::Receiver<bool>,
    state: watch::Sender<WatcherState>,
) {
    loop {
        let mut changes = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            batch = batches.recv() => match batch {
                Some(batch) => batch,
                None => break,
            },
        };
        // Anything queued behind it is covered by the same full rebuild.
        while let Ok(more) = batches.try_recv() {
            changes.extend(more);
        }

        if *shutdown.borrow() {
            break;
        }

        if let Some(first) = changes.first() {
            tracing::debug!(
                changes = changes.len(),
                first = %first.path.display(),
                kind = ?first.kind,
                "change detected, rebuilding memory"
            );
        }

        state.send_replace(WatcherState::Rebuilding);
        match builder.build().await {
            Ok(BuildOutcome::Built(stats)) => {
                tracing::info!(
                    generation = stats.generation,
                    records = stats.records,
                    "memory refreshed after file change"
                );
            }
            Ok(BuildOutcome::NoData { data_dir }) => {
                tracing::warn!(
                    path = %data_dir.display(),
                    "nothing left to index, keeping previous index"
                );
            }
            Err(error) => {
                tracing::error!(%error, "rebuild after file change failed, keeping previous index");
            }
        }
        state.send_replace(WatcherState::Idle);
    }

    state.send_replace(WatcherState::Stopped);
}

#[derive(Debug, Clone, Copy)]
enum EventClass {
    Fixed(ChangeKind),
    /// Renames and removals of unknown kind: decided per path by whether it
    /// still exists.
    Moved,
    FolderCreated,
    FolderRemoved,
}

/// Translate a raw notify event into the changes that affect the index.
///
/// Metadata-only changes, access events, hidden paths and files with other
/// extensions produce nothing. Folders count when they may carry indexable
/// files in or out: a removed folder always, a created or moved-in folder
/// only when it holds such files.
pub fn convert_event(event: &Event, root: &Path, extensions: &[String]) -> Vec<ChangeEvent> {
    let class = match &event.kind {
        EventKind::Create(CreateKind::Folder) => EventClass::FolderCreated,
        EventKind::Create(_) => EventClass::Fixed(ChangeKind::Created),
        EventKind::Modify(ModifyKind::Metadata(_)) => return Vec::new(),
        EventKind::Modify(ModifyKind::Name(_)) => EventClass::Moved,
        EventKind::Modify(_) => EventClass::Fixed(ChangeKind::Modified),
        EventKind::Remove(RemoveKind::File) => EventClass::Fixed(ChangeKind::Removed),
        EventKind::Remove(RemoveKind::Folder) => EventClass::FolderRemoved,
        EventKind::Remove(_) => EventClass::Moved,
        _ => return Vec::new(),
    };

    event
        .paths
        .iter()
        .filter(|path| !has_hidden_component(path, root))
        .filter_map(|path| {
            classify(path, class, extensions).map(|kind| ChangeEvent {
                path: path.clone(),
                kind,
            })
        })
        .collect()
}

fn classify(path: &Path, class: EventClass, extensions: &[String]) -> Option<ChangeKind> {
    let kind = match class {
        EventClass::FolderRemoved => return Some(ChangeKind::Removed),
        EventClass::FolderCreated => {
            return (path.is_dir() && contains_indexable(path, extensions))
                .then_some(ChangeKind::Created);
        }
        EventClass::Moved if path.exists() => ChangeKind::Created,
        EventClass::Moved => {
            // Gone without a trace, so an extension-less name may have been a
            // folder that held indexable files.
            let maybe_folder = dotted_extension(path).is_none();
            return (maybe_folder || has_allowed_extension(path, extensions))
                .then_some(ChangeKind::Removed);
        }
        EventClass::Fixed(kind) => kind,
    };

    if kind != ChangeKind::Removed && path.is_dir() {
        return (kind == ChangeKind::Created && contains_indexable(path, extensions))
            .then_some(kind);
    }
    has_allowed_extension(path, extensions).then_some(kind)
}

fn has_hidden_component(path: &Path, root: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().any(|component| match component {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    })
}
