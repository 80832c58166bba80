mod normalize;

pub use self::normalize::{SeriesPath, classify, normalize, resolve_series_path};

use crate::error::{ErrorKind, Result};
use crate::event::FileChangeEvent;
use exn::ResultExt;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use stacks_cache::LibraryId;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Sink = Arc<dyn Fn(FileChangeEvent) + Send + Sync>;

struct LibraryWatch {
    root: PathBuf,
    // Dropping the watcher stops it.
    _watcher: RecommendedWatcher,
}

/// One recursive filesystem watch per library.
///
/// Normalised events are handed to the sink on the watcher's own thread, so
/// the sink must not block.
pub struct WatchManager {
    watches: Mutex<HashMap<LibraryId, LibraryWatch>>,
    sink: Sink,
}
impl WatchManager {
    pub fn new(sink: impl Fn(FileChangeEvent) + Send + Sync + 'static) -> Self {
        Self {
            watches: Mutex::new(HashMap::new()),
            sink: Arc::new(sink),
        }
    }

    fn watches(&self) -> MutexGuard<'_, HashMap<LibraryId, LibraryWatch>> {
        self.watches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start watching `root` for `library_id`, replacing any existing watch
    /// for that library.
    pub fn watch(&self, library_id: LibraryId, root: impl AsRef<Path>) -> Result<()> {
        let root = root.as_ref().to_path_buf();
        let sink = Arc::clone(&self.sink);
        let watched_root = root.clone();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| match result {
            Ok(event) => {
                for change in normalize(library_id, &watched_root, &event) {
                    sink(change);
                }
            },
            Err(err) => tracing::warn!(library = library_id, error = %err, "filesystem watch error"),
        })
        .or_raise(|| ErrorKind::Watch(root.clone()))?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .or_raise(|| ErrorKind::Watch(root.clone()))?;
        tracing::info!(library = library_id, root = %root.display(), "watching library");
        let replaced = self.watches().insert(library_id, LibraryWatch { root, _watcher: watcher });
        if replaced.is_some() {
            tracing::debug!(library = library_id, "replaced existing watch");
        }
        Ok(())
    }

    /// Stop watching a library. Returns `false` if it wasn't being watched.
    pub fn unwatch(&self, library_id: LibraryId) -> bool {
        let removed = self.watches().remove(&library_id);
        if let Some(watch) = &removed {
            tracing::info!(library = library_id, root = %watch.root.display(), "stopped watching library");
        }
        removed.is_some()
    }

    pub fn unwatch_all(&self) {
        let drained: Vec<_> = self.watches().drain().collect();
        tracing::debug!(count = drained.len(), "stopped all watches");
    }

    pub fn is_watching(&self, library_id: LibraryId) -> bool {
        self.watches().contains_key(&library_id)
    }

    /// Every active watch, ordered by library.
    pub fn watched(&self) -> Vec<(LibraryId, PathBuf)> {
        let mut watched: Vec<_> = self.watches().iter().map(|(id, w)| (*id, w.root.clone())).collect();
        watched.sort();
        watched
    }
}
