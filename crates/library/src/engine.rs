use crate::bus::{ChangeBus, Subscription, log_changes};
use crate::error::{ErrorKind, Result};
use crate::event::{ChangeKind, FileChangeEvent, LibraryChangeEvent};
use crate::pipeline::Pipeline;
use crate::reconcile::Reconciler;
use crate::task::Task;
use crate::watch::WatchManager;
use crate::worker;
use exn::{OptionExt, ResultExt};
use stacks_asyncutils::{CancellationToken, Priority, PriorityQueue};
use stacks_cache::{Library, LibraryId, Repository, SeriesId};
use stacks_extract::{ContentExtractor, CoverProcessor};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::fs;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// File extensions that count as books, without the dot.
    pub extensions: Vec<String>,
    /// Quiet window per path before a filesystem change is reconciled.
    pub debounce: Duration,
    /// Quiet window per series before its last-update time is written.
    pub touch_debounce: Duration,
    /// How often every library is rescanned; `None` to never do so.
    pub scan_interval: Option<Duration>,
    /// Per-subscriber buffer for both change streams.
    pub event_capacity: usize,
}
impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            extensions: vec!["epub".to_string()],
            debounce: Duration::from_secs(3),
            touch_debounce: Duration::from_secs(10),
            scan_interval: Some(Duration::from_secs(60)),
            event_capacity: 1024,
        }
    }
}

/// Keeps every registered library's catalog in step with its directory.
///
/// Filesystem events and explicit requests all become [`Task`]s on one
/// priority queue with a single consumer, so the catalog only ever has one
/// writer. Catalog changes are published on the bus returned by
/// [`subscribe`](Engine::subscribe).
pub struct Engine {
    cache: Repository,
    options: EngineOptions,
    queue: Arc<PriorityQueue<Task>>,
    pipeline: Pipeline,
    watches: WatchManager,
    bus: ChangeBus,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}
impl Engine {
    /// Start the background tasks. Nothing is watched or scanned until
    /// [`init`](Engine::init) is called.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        cache: Repository,
        options: EngineOptions,
        extractor: Arc<dyn ContentExtractor>,
        covers: Option<Arc<dyn CoverProcessor>>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let queue = Arc::new(PriorityQueue::new());
        let bus = ChangeBus::new(options.event_capacity);
        let (pipeline, mut tasks) = Pipeline::start(
            &queue,
            options.debounce,
            options.touch_debounce,
            options.event_capacity,
            &cancel,
        );

        let mut reconciler = Reconciler::new(cache.clone(), bus.clone(), extractor)
            .with_extensions(options.extensions.iter().cloned())
            .with_touches(pipeline.touches())
            .with_cancellation(cancel.child_token());
        if let Some(covers) = covers {
            reconciler = reconciler.with_covers(covers);
        }
        tasks.push(tokio::spawn(worker::consume(
            Arc::clone(&queue),
            Arc::new(reconciler),
            cancel.clone(),
        )));
        tasks.push(tokio::spawn(log_changes(bus.subscribe(), cancel.clone())));

        let watches = WatchManager::new({
            let pipeline = pipeline.clone();
            move |event| pipeline.submit(event)
        });
        Self {
            cache,
            options,
            queue,
            pipeline,
            watches,
            bus,
            cancel,
            tasks: Mutex::new(tasks),
        }
    }

    fn track(&self, task: JoinHandle<()>) {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).push(task);
    }

    /// Watch every catalogued library and queue a full scan of each, then
    /// start the periodic rescan if one is configured.
    pub async fn init(&self) -> Result<()> {
        let libraries = self.cache.list_libraries().await.or_raise(|| ErrorKind::Cache)?;
        tracing::info!(count = libraries.len(), "starting library sync");
        for library in &libraries {
            self.watch_library(library.id, &library.path);
            self.pipeline.submit(FileChangeEvent::library_scan(library.id, library.path.clone()));
        }
        if let Some(period) = self.options.scan_interval {
            self.track(tokio::spawn(rescan_periodically(
                self.cache.clone(),
                Arc::clone(&self.queue),
                period,
                self.cancel.clone(),
            )));
        }
        Ok(())
    }

    /// Register a directory as a library, start watching it and queue its
    /// first scan.
    ///
    /// The path is canonicalised first; `name` defaults to the directory name.
    pub async fn add_library(&self, path: impl AsRef<Path>, name: Option<String>) -> Result<Library> {
        let requested = path.as_ref();
        let path = fs::canonicalize(requested)
            .await
            .or_raise(|| ErrorKind::InvalidPath(requested.to_path_buf()))?;
        if !fs::metadata(&path).await.is_ok_and(|metadata| metadata.is_dir()) {
            exn::bail!(ErrorKind::InvalidPath(path));
        }
        if self.cache.get_library_by_path(&path).await.or_raise(|| ErrorKind::Cache)?.is_some() {
            exn::bail!(ErrorKind::AlreadyExists(path));
        }
        let name = name.unwrap_or_else(|| match path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => path.display().to_string(),
        });
        let library = match self.cache.insert_library(&path, &name).await {
            Ok(library) => library,
            // Registered by someone else since the lookup above.
            Err(err) if matches!(&*err, stacks_cache::error::ErrorKind::Duplicate(_)) => {
                return Err(err.raise(ErrorKind::AlreadyExists(path)));
            },
            Err(err) => return Err(err.raise(ErrorKind::Cache)),
        };
        tracing::info!(library = library.id, root = %library.path.display(), name = %library.name, "added library");
        self.bus.publish(LibraryChangeEvent::library(ChangeKind::Add, &library));
        self.watch_library(library.id, &library.path);
        self.pipeline.submit(FileChangeEvent::library_scan(library.id, library.path.clone()));
        Ok(library)
    }

    /// Stop watching a library and queue its removal from the catalog.
    pub async fn remove_library(&self, library_id: LibraryId) -> Result<()> {
        self.require_library(library_id).await?;
        self.stop_watch_library(library_id);
        self.queue.enqueue(Task::RemoveLibrary(library_id), Priority::High);
        Ok(())
    }

    pub async fn list_libraries(&self) -> Result<Vec<Library>> {
        self.cache.list_libraries().await.or_raise(|| ErrorKind::Cache)
    }

    /// Queue a full scan of a library ahead of any filesystem changes.
    pub async fn scan_library(&self, library_id: LibraryId) -> Result<()> {
        self.require_library(library_id).await?;
        self.queue.enqueue(Task::ScanLibrary(library_id), Priority::High);
        Ok(())
    }

    /// Queue a scan of one series ahead of any filesystem changes.
    pub async fn scan_series(&self, series_id: SeriesId) -> Result<()> {
        self.cache
            .get_series(series_id)
            .await
            .or_raise(|| ErrorKind::Cache)?
            .ok_or_raise(|| ErrorKind::SeriesNotFound(series_id))?;
        self.queue.enqueue(Task::ScanSeries(series_id), Priority::High);
        Ok(())
    }

    /// Start (or restart) watching a library.
    ///
    /// Returns `false` if the watch couldn't be installed; the library is
    /// then only kept up to date by scans.
    pub fn watch_library(&self, library_id: LibraryId, root: &Path) -> bool {
        match self.watches.watch(library_id, root) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(library = library_id, error = ?err, "could not watch library");
                false
            },
        }
    }

    pub fn stop_watch_library(&self, library_id: LibraryId) -> bool {
        self.watches.unwatch(library_id)
    }

    pub fn is_watching(&self, library_id: LibraryId) -> bool {
        self.watches.is_watching(library_id)
    }

    /// Catalog changes, in the order they were written.
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    /// Normalised filesystem changes as they arrive, before debouncing.
    pub fn file_changes(&self) -> broadcast::Receiver<FileChangeEvent> {
        self.pipeline.subscribe_raw()
    }

    /// Feed a change in as if the watcher had seen it.
    pub fn notify_change(&self, event: FileChangeEvent) {
        self.pipeline.submit(event);
    }

    /// Tasks waiting for the consumer.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Stop watching, discard pending work and wait for the task in progress
    /// (if any) to wind down.
    pub async fn shutdown(&self) {
        tracing::info!(pending = self.queue.len(), "shutting down library sync");
        self.watches.unwatch_all();
        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().unwrap_or_else(PoisonError::into_inner).drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "background task ended abnormally");
            }
        }
    }

    async fn require_library(&self, library_id: LibraryId) -> Result<Library> {
        self.cache
            .get_library(library_id)
            .await
            .or_raise(|| ErrorKind::Cache)?
            .ok_or_raise(|| ErrorKind::LibraryNotFound(library_id))
    }
}
impl Drop for Engine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn rescan_periodically(
    cache: Repository,
    queue: Arc<PriorityQueue<Task>>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; startup already queued a scan.
    interval.tick().await;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => match cache.list_libraries().await {
                Ok(libraries) => {
                    tracing::debug!(count = libraries.len(), "queueing periodic rescan");
                    for library in libraries {
                        // A scan still waiting from an earlier tick covers this one.
                        if !queue.enqueue_unique(Task::ScanLibrary(library.id), Priority::Low) {
                            tracing::debug!(library = library.id, "periodic rescan already queued");
                        }
                    }
                },
                Err(err) => tracing::warn!(error = ?err, "could not list libraries for periodic rescan"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeSource;
    use stacks_cache::Database;
    use stacks_extract::{Extracted, FilenameExtractor};
    use std::io::Read;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(10);

    fn options() -> EngineOptions {
        EngineOptions {
            debounce: Duration::from_millis(50),
            touch_debounce: Duration::from_millis(50),
            scan_interval: None,
            ..EngineOptions::default()
        }
    }

    async fn engine() -> (Engine, Database) {
        let db = Database::connect_in_memory().await.unwrap();
        let engine = Engine::start(Repository::from(&db), options(), Arc::new(FilenameExtractor), None);
        (engine, db)
    }

    fn library_dir() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Discworld")).unwrap();
        std::fs::write(dir.path().join("Discworld/Terry Pratchett - Mort.epub"), b"mort").unwrap();
        dir
    }

    /// Wait for an event matching `source` and `kind`, skipping others.
    async fn wait_for(events: &mut Subscription, source: ChangeSource, kind: ChangeKind) -> LibraryChangeEvent {
        tokio::time::timeout(WAIT, async {
            loop {
                let event = events.recv().await.unwrap();
                if event.source == source && event.kind == kind {
                    return event;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no {source} {kind} event"))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_added_library_is_watched_and_scanned() {
        let (engine, _db) = engine().await;
        let mut events = engine.subscribe();
        let dir = library_dir();
        let library = engine.add_library(dir.path(), None).await.unwrap();
        assert_eq!(library.path, dir.path().canonicalize().unwrap());
        assert!(engine.is_watching(library.id));
        assert_eq!(wait_for(&mut events, ChangeSource::Library, ChangeKind::Add).await.id, library.id);
        wait_for(&mut events, ChangeSource::Series, ChangeKind::Add).await;
        let book = wait_for(&mut events, ChangeSource::Book, ChangeKind::Add).await;
        assert!(book.path.ends_with("Discworld/Terry Pratchett - Mort.epub"));
        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_watched_changes_are_reconciled() {
        let (engine, _db) = engine().await;
        let mut events = engine.subscribe();
        let dir = library_dir();
        let library = engine.add_library(dir.path(), Some("Fiction".to_string())).await.unwrap();
        assert_eq!(library.name, "Fiction");
        wait_for(&mut events, ChangeSource::Book, ChangeKind::Add).await;

        let culture = library.path.join("Culture");
        std::fs::create_dir(&culture).unwrap();
        std::fs::write(culture.join("Iain Banks - Excession.epub"), b"excession").unwrap();
        let series = wait_for(&mut events, ChangeSource::Series, ChangeKind::Add).await;
        assert_eq!(series.path, culture);

        std::fs::remove_dir_all(&culture).unwrap();
        let deleted = wait_for(&mut events, ChangeSource::Series, ChangeKind::Delete).await;
        assert_eq!(deleted.id, series.id);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_add_library_rejects_bad_paths() {
        let (engine, _db) = engine().await;
        let dir = library_dir();
        let err = engine.add_library(dir.path().join("missing"), None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
        let file = dir.path().join("Discworld/Terry Pratchett - Mort.epub");
        let err = engine.add_library(&file, None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));

        engine.add_library(dir.path(), None).await.unwrap();
        let err = engine.add_library(dir.path(), None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_adds_of_one_directory() {
        let (engine, _db) = engine().await;
        let dir = library_dir();
        let (first, second) = tokio::join!(engine.add_library(dir.path(), None), engine.add_library(dir.path(), None));
        let (added, rejected) = match (first, second) {
            (Ok(library), Err(err)) | (Err(err), Ok(library)) => (library, err),
            (first, second) => panic!("expected exactly one add to succeed: {first:?}, {second:?}"),
        };
        assert!(matches!(&*rejected, ErrorKind::AlreadyExists(path) if path == &added.path));
        assert_eq!(engine.list_libraries().await.unwrap().len(), 1);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_queued() {
        let (engine, _db) = engine().await;
        assert!(engine.scan_library(404).await.unwrap_err().is_not_found());
        assert!(engine.scan_series(404).await.unwrap_err().is_not_found());
        assert!(engine.remove_library(404).await.unwrap_err().is_not_found());
        assert_eq!(engine.pending(), 0);
        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_remove_library() {
        let (engine, _db) = engine().await;
        let mut events = engine.subscribe();
        let dir = library_dir();
        let library = engine.add_library(dir.path(), None).await.unwrap();
        wait_for(&mut events, ChangeSource::Book, ChangeKind::Add).await;
        engine.remove_library(library.id).await.unwrap();
        assert!(!engine.is_watching(library.id));
        assert_eq!(wait_for(&mut events, ChangeSource::Library, ChangeKind::Delete).await.id, library.id);
        assert!(engine.list_libraries().await.unwrap().is_empty());
        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_init_scans_existing_libraries() {
        let db = Database::connect_in_memory().await.unwrap();
        let dir = library_dir();
        let root = dir.path().canonicalize().unwrap();
        Repository::from(&db).insert_library(&root, "Library").await.unwrap();

        let engine = Engine::start(Repository::from(&db), options(), Arc::new(FilenameExtractor), None);
        let mut events = engine.subscribe();
        let mut raw = engine.file_changes();
        engine.init().await.unwrap();
        let synthetic = tokio::time::timeout(WAIT, raw.recv()).await.unwrap().unwrap();
        assert!(synthetic.is_library_scan());
        assert_eq!(synthetic.path, root);
        wait_for(&mut events, ChangeSource::Book, ChangeKind::Add).await;
        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_manual_series_scan() {
        let (engine, db) = engine().await;
        let mut events = engine.subscribe();
        let dir = library_dir();
        let library = engine.add_library(dir.path(), None).await.unwrap();
        wait_for(&mut events, ChangeSource::Book, ChangeKind::Add).await;
        engine.stop_watch_library(library.id);

        let mort = library.path.join("Discworld/Terry Pratchett - Mort.epub");
        std::fs::remove_file(&mort).unwrap();
        let series = Repository::from(&db).get_series_by_path(library.path.join("Discworld")).await.unwrap().unwrap();
        engine.scan_series(series.id).await.unwrap();
        assert_eq!(wait_for(&mut events, ChangeSource::Book, ChangeKind::Delete).await.path, mort);
        engine.shutdown().await;
    }

    /// Takes its time over every book.
    struct SlowExtractor(Duration);
    impl ContentExtractor for SlowExtractor {
        fn extract(&self, path: &Path, reader: &mut dyn Read) -> stacks_extract::error::Result<Extracted> {
            std::thread::sleep(self.0);
            FilenameExtractor.extract(path, reader)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_periodic_rescans_do_not_pile_up_behind_a_slow_scan() {
        let db = Database::connect_in_memory().await.unwrap();
        let dir = library_dir();
        let root = dir.path().canonicalize().unwrap();
        Repository::from(&db).insert_library(&root, "Library").await.unwrap();
        let options = EngineOptions {
            scan_interval: Some(Duration::from_millis(20)),
            ..options()
        };
        let extractor = Arc::new(SlowExtractor(Duration::from_millis(1500)));
        let engine = Engine::start(Repository::from(&db), options, extractor, None);
        engine.init().await.unwrap();

        // At most the startup scan and one periodic scan can be waiting.
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(engine.pending() <= 2, "{} tasks pending", engine.pending());
        }
        engine.shutdown().await;
    }
}
