//! Bringing the catalog in line with what is on disk.
//!
//! Every write is followed by exactly one [`LibraryChangeEvent`], and nothing
//! is published unless the write succeeded. Deletions are soft: rows are only
//! flagged, so a directory or file that comes back keeps its ids.

pub(crate) mod error;
mod walk;

use crate::bus::ChangeBus;
use crate::error::{Error as LibraryError, ErrorKind as LibraryErrorKind, Result as LibraryResult};
use crate::event::{ChangeKind, FileChangeEvent, LibraryChangeEvent};
use crate::reconcile::error::{Error, ErrorKind, Result};
use crate::reconcile::walk::BookFile;
use crate::task::Task;
use derive_more::Display;
use exn::{OptionExt, ResultExt};
use futures::StreamExt;
use stacks_asyncutils::{CancellationToken, Debouncer};
use stacks_cache::{Book, BookContent, Cover, LibraryId, Repository, Series, SeriesId};
use stacks_extract::{ContentExtractor, CoverProcessor, hash_file};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use time::UtcDateTime;
use tokio::fs;

/// What a scan did.
#[derive(Clone, Debug, Default, Display, Eq, PartialEq)]
#[display(
    "{added} added, {readded} re-added, {updated} updated, {refreshed} refreshed, {deleted} deleted, {unchanged} unchanged, {failed} failed"
)]
pub struct ScanStats {
    pub added: u64,
    pub readded: u64,
    pub updated: u64,
    /// Stat changed but the content didn't.
    pub refreshed: u64,
    pub deleted: u64,
    pub unchanged: u64,
    /// Entries skipped because of an error. The scan carried on without them.
    pub failed: u64,
    /// Series whose last-update time was moved forward.
    pub touched: BTreeSet<SeriesId>,
}
impl ScanStats {
    /// Number of entities whose catalog state changed.
    pub fn changed(&self) -> u64 {
        self.added + self.readded + self.updated + self.deleted
    }

    fn record(&mut self, outcome: BookOutcome) {
        match outcome {
            BookOutcome::Added => self.added += 1,
            BookOutcome::ReAdded => self.readded += 1,
            BookOutcome::Updated => self.updated += 1,
            BookOutcome::Refreshed => self.refreshed += 1,
            BookOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ScanOutcome {
    Completed(ScanStats),
    /// Another library scan was in progress, so this one didn't run.
    AlreadyRunning,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum BookOutcome {
    Added,
    ReAdded,
    Updated,
    Refreshed,
    Unchanged,
}
impl BookOutcome {
    fn touches_series(self) -> bool {
        matches!(self, Self::Added | Self::ReAdded | Self::Updated)
    }
}

struct Running<'a>(&'a AtomicBool);
impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn raise(err: Error) -> LibraryError {
    let kind = match &*err {
        ErrorKind::UnknownLibrary(id) => LibraryErrorKind::LibraryNotFound(*id),
        ErrorKind::UnknownSeries(id) => LibraryErrorKind::SeriesNotFound(*id),
        _ => LibraryErrorKind::Reconcile,
    };
    err.raise(kind)
}

async fn is_dir(path: &Path) -> bool {
    // Symlinks are never followed, same as the walk.
    fs::symlink_metadata(path).await.is_ok_and(|metadata| metadata.is_dir())
}

/// Immediate sub-directories of a library root.
#[derive(Debug, Default)]
struct SeriesListing {
    directories: Vec<PathBuf>,
    /// Entries that couldn't be inspected. While there are any, the listing
    /// can't be used to decide that a series has gone.
    failed: u64,
}
impl SeriesListing {
    fn push(&mut self, path: PathBuf, metadata: std::io::Result<std::fs::Metadata>) {
        match metadata {
            Ok(metadata) if metadata.is_dir() => self.directories.push(path),
            Ok(_) => {},
            // Removed since the directory was read.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {},
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "could not inspect library entry");
                self.failed += 1;
            },
        }
    }

    fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// List the series directories of a library root, sorted.
///
/// Only failing to open the root is an error. A bad entry is skipped and
/// counted instead.
async fn series_directories(root: &Path) -> Result<SeriesListing> {
    let mut entries = fs::read_dir(root).await.or_raise(|| ErrorKind::Io(root.to_path_buf()))?;
    let mut listing = SeriesListing::default();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => listing.push(entry.path(), entry.metadata().await),
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(root = %root.display(), error = %err, "could not finish listing library");
                listing.failed += 1;
                break;
            },
        }
    }
    listing.directories.sort();
    Ok(listing)
}

fn cover(processor: Option<&dyn CoverProcessor>, path: &Path, data: Vec<u8>) -> Cover {
    let processed = match processor.map(|processor| processor.process(&data)) {
        Some(Ok(processed)) => Some(processed),
        Some(Err(err)) => {
            tracing::warn!(path = %path.display(), error = ?err, "could not process cover; storing it as-is");
            None
        },
        None => None,
    };
    match processed {
        Some(processed) => Cover {
            data,
            width: Some(processed.width),
            height: Some(processed.height),
            thumbnail: Some(processed.thumbnail),
            placeholder: Some(processed.placeholder),
        },
        None => Cover {
            data,
            width: None,
            height: None,
            thumbnail: None,
            placeholder: None,
        },
    }
}

/// Applies filesystem state to the catalog.
///
/// Meant to be driven by a single consumer; the only concurrency it guards
/// against is two library scans overlapping.
pub struct Reconciler {
    cache: Repository,
    bus: ChangeBus,
    extractor: Arc<dyn ContentExtractor>,
    covers: Option<Arc<dyn CoverProcessor>>,
    touches: Option<Debouncer<SeriesId, UtcDateTime>>,
    extensions: Vec<String>,
    cancel: CancellationToken,
    library_scan: AtomicBool,
}
impl Reconciler {
    pub fn new(cache: Repository, bus: ChangeBus, extractor: Arc<dyn ContentExtractor>) -> Self {
        Self {
            cache,
            bus,
            extractor,
            covers: None,
            touches: None,
            extensions: vec!["epub".to_string()],
            cancel: CancellationToken::new(),
            library_scan: AtomicBool::new(false),
        }
    }

    /// Generate thumbnails and placeholders for covers. Without a processor,
    /// covers are stored without them.
    pub fn with_covers(mut self, covers: Arc<dyn CoverProcessor>) -> Self {
        self.covers = Some(covers);
        self
    }

    /// File extensions that count as books, without the dot.
    pub fn with_extensions<S: Into<String>>(mut self, extensions: impl IntoIterator<Item = S>) -> Self {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Hand series touches to a debouncer instead of writing them
    /// immediately.
    pub fn with_touches(mut self, touches: Debouncer<SeriesId, UtcDateTime>) -> Self {
        self.touches = Some(touches);
        self
    }

    /// Scans stop early, without detecting deletions, once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self, task: Task) -> LibraryResult<()> {
        match task {
            Task::FileChange(event) => self.handle_file_change(&event).await.map(drop),
            Task::ScanLibrary(id) => self.scan_library(id).await.map(drop),
            Task::ScanSeries(id) => self.scan_series(id).await.map(drop),
            Task::TouchSeries { series_id, at } => self.touch_series(series_id, at).await,
            Task::RemoveLibrary(id) => self.remove_library(id).await.map(drop),
        }
    }

    /// Reconcile every series of a library, then flag the ones whose
    /// directories have gone.
    ///
    /// Only one library scan runs at a time; a second one returns
    /// [`ScanOutcome::AlreadyRunning`] straight away. If the root, or any
    /// entry in it, can't be listed, nothing is flagged.
    pub async fn scan_library(&self, library_id: LibraryId) -> LibraryResult<ScanOutcome> {
        self.scan_library_inner(library_id).await.map_err(raise)
    }

    /// Reconcile the books of one series.
    pub async fn scan_series(&self, series_id: SeriesId) -> LibraryResult<ScanStats> {
        self.scan_series_inner(series_id).await.map_err(raise)
    }

    /// Apply a debounced filesystem change.
    ///
    /// A change on the library root is a full library scan. Otherwise the
    /// series directory is rescanned if it exists, or flagged as deleted if
    /// it doesn't. Changes for libraries that no longer exist are ignored.
    pub async fn handle_file_change(&self, event: &FileChangeEvent) -> LibraryResult<ScanStats> {
        self.handle_file_change_inner(event).await.map_err(raise)
    }

    pub async fn touch_series(&self, series_id: SeriesId, at: UtcDateTime) -> LibraryResult<()> {
        self.cache.touch_series(series_id, at).await.or_raise(|| LibraryErrorKind::Cache)
    }

    /// Remove a library and everything catalogued beneath it. Returns `false`
    /// if there was no such library.
    pub async fn remove_library(&self, library_id: LibraryId) -> LibraryResult<bool> {
        self.remove_library_inner(library_id).await.map_err(raise)
    }

    async fn scan_library_inner(&self, library_id: LibraryId) -> Result<ScanOutcome> {
        if self
            .library_scan
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::info!(library = library_id, "a library scan is already running; skipping");
            return Ok(ScanOutcome::AlreadyRunning);
        }
        let _running = Running(&self.library_scan);

        let library = self
            .cache
            .get_library(library_id)
            .await
            .or_raise(|| ErrorKind::Cache)?
            .ok_or_raise(|| ErrorKind::UnknownLibrary(library_id))?;
        tracing::info!(library = library.id, root = %library.path.display(), "scanning library");
        let listing = series_directories(&library.path).await?;
        self.reconcile_library(library.id, listing).await
    }

    async fn reconcile_library(&self, library_id: LibraryId, listing: SeriesListing) -> Result<ScanOutcome> {
        let mut stats = ScanStats {
            failed: listing.failed,
            ..ScanStats::default()
        };
        for path in &listing.directories {
            if self.cancel.is_cancelled() {
                break;
            }
            if let Err(err) = self.refresh_series(library_id, path, &mut stats).await {
                tracing::warn!(series = %path.display(), error = ?err, "could not scan series");
                stats.failed += 1;
            }
        }
        if self.cancel.is_cancelled() {
            tracing::info!(library = library_id, "library scan cancelled");
            return Ok(ScanOutcome::Completed(stats));
        }
        if !listing.is_complete() {
            tracing::warn!(library = library_id, %stats, "library listing incomplete; not looking for deleted series");
            return Ok(ScanOutcome::Completed(stats));
        }

        let present: HashSet<&PathBuf> = listing.directories.iter().collect();
        let vanished: Vec<Series> = self
            .cache
            .list_series(library_id)
            .await
            .or_raise(|| ErrorKind::Cache)?
            .into_iter()
            .filter(|series| !present.contains(&series.path))
            .collect();
        self.delete_series(vanished, &mut stats).await?;
        tracing::info!(library = library_id, %stats, "library scan complete");
        Ok(ScanOutcome::Completed(stats))
    }

    async fn scan_series_inner(&self, series_id: SeriesId) -> Result<ScanStats> {
        let series = self
            .cache
            .get_series(series_id)
            .await
            .or_raise(|| ErrorKind::Cache)?
            .ok_or_raise(|| ErrorKind::UnknownSeries(series_id))?;
        let mut stats = ScanStats::default();
        if !is_dir(&series.path).await {
            if !series.deleted {
                self.delete_series(vec![series], &mut stats).await?;
            }
            return Ok(stats);
        }
        self.refresh_series(series.library_id, &series.path, &mut stats).await?;
        tracing::info!(series = series_id, %stats, "series scan complete");
        Ok(stats)
    }

    async fn handle_file_change_inner(&self, event: &FileChangeEvent) -> Result<ScanStats> {
        let library = self.cache.get_library(event.library_id).await.or_raise(|| ErrorKind::Cache)?;
        let Some(library) = library else {
            tracing::debug!(library = event.library_id, "change for a library that no longer exists; ignoring");
            return Ok(ScanStats::default());
        };
        if event.is_library_scan() {
            return Ok(match self.scan_library_inner(library.id).await? {
                ScanOutcome::Completed(stats) => stats,
                ScanOutcome::AlreadyRunning => ScanStats::default(),
            });
        }

        tracing::debug!(kind = %event.kind, path = %event.path.display(), "applying change");
        let mut stats = ScanStats::default();
        if is_dir(&event.path).await {
            self.refresh_series(library.id, &event.path, &mut stats).await?;
            return Ok(stats);
        }
        match self.cache.get_series_by_path(&event.path).await.or_raise(|| ErrorKind::Cache)? {
            Some(series) if !series.deleted => self.delete_series(vec![series], &mut stats).await?,
            _ => tracing::debug!(path = %event.path.display(), "change does not affect any series; ignoring"),
        }
        Ok(stats)
    }

    async fn remove_library_inner(&self, library_id: LibraryId) -> Result<bool> {
        let Some(library) = self.cache.get_library(library_id).await.or_raise(|| ErrorKind::Cache)? else {
            return Ok(false);
        };
        let removed = self.cache.delete_library(library.id).await.or_raise(|| ErrorKind::Cache)?;
        if removed {
            tracing::info!(library = library.id, root = %library.path.display(), "removed library");
            self.bus.publish(LibraryChangeEvent::library(ChangeKind::Delete, &library));
        }
        Ok(removed)
    }

    /// Make sure a live series row exists for `path`, then reconcile its
    /// books.
    async fn refresh_series(&self, library_id: LibraryId, path: &Path, stats: &mut ScanStats) -> Result<()> {
        let series = self.ensure_series(library_id, path, stats).await?;
        self.scan_books(&series, stats).await
    }

    async fn ensure_series(&self, library_id: LibraryId, path: &Path, stats: &mut ScanStats) -> Result<Series> {
        match self.cache.get_series_by_path(path).await.or_raise(|| ErrorKind::Cache)? {
            None => {
                let series = self.cache.insert_series(library_id, path).await.or_raise(|| ErrorKind::Cache)?;
                self.bus.publish(LibraryChangeEvent::series(ChangeKind::Add, &series));
                stats.added += 1;
                Ok(series)
            },
            Some(series) if series.deleted => {
                self.cache.restore_series(series.id).await.or_raise(|| ErrorKind::Cache)?;
                let series = Series { deleted: false, ..series };
                self.bus.publish(LibraryChangeEvent::series(ChangeKind::ReAdd, &series));
                stats.readded += 1;
                Ok(series)
            },
            Some(series) => Ok(series),
        }
    }

    async fn scan_books(&self, series: &Series, stats: &mut ScanStats) -> Result<()> {
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut touched = false;
        let mut files = std::pin::pin!(walk::book_files(&series.path, &self.extensions));
        while let Some(file) = files.next().await {
            if self.cancel.is_cancelled() {
                tracing::info!(series = series.id, "series scan cancelled");
                return Ok(());
            }
            let file = match file {
                Ok(file) => file,
                Err(err) => {
                    tracing::warn!(series = series.id, error = ?err, "could not list part of series");
                    stats.failed += 1;
                    continue;
                },
            };
            seen.insert(file.path.clone());
            match self.scan_book(series, &file).await {
                Ok(outcome) => {
                    touched |= outcome.touches_series();
                    stats.record(outcome);
                },
                Err(err) => {
                    tracing::warn!(path = %file.path.display(), error = ?err, "could not scan book");
                    stats.failed += 1;
                },
            }
        }

        let mut missing = Vec::new();
        for book in self.cache.list_books(series.id).await.or_raise(|| ErrorKind::Cache)? {
            // Anything unseen is only gone if the filesystem says so.
            if !seen.contains(&book.path) && matches!(fs::try_exists(&book.path).await, Ok(false)) {
                missing.push(book);
            }
        }
        self.delete_books(missing, stats).await?;
        if touched {
            self.touch(series.id, stats).await?;
        }
        Ok(())
    }

    async fn scan_book(&self, series: &Series, file: &BookFile) -> Result<BookOutcome> {
        let existing = self.cache.get_book_by_path(&file.path).await.or_raise(|| ErrorKind::Cache)?;
        let Some(book) = existing else {
            let content = self.read_content(file, None).await?;
            let book = self
                .cache
                .insert_book(series.id, &file.path, &content)
                .await
                .or_raise(|| ErrorKind::Cache)?;
            self.publish_book(ChangeKind::Add, &book);
            return Ok(BookOutcome::Added);
        };

        if book.stat_matches(file.size, file.modified) {
            if !book.deleted {
                return Ok(BookOutcome::Unchanged);
            }
            self.cache.restore_book(book.id).await.or_raise(|| ErrorKind::Cache)?;
            self.publish_book(ChangeKind::ReAdd, &book);
            return Ok(BookOutcome::ReAdded);
        }

        let hash = self.hash(&file.path).await?;
        if hash == book.hash {
            tracing::debug!(path = %file.path.display(), "stat changed but content didn't");
            self.cache
                .update_book_stat(book.id, file.size, file.modified)
                .await
                .or_raise(|| ErrorKind::Cache)?;
            if !book.deleted {
                return Ok(BookOutcome::Refreshed);
            }
            self.publish_book(ChangeKind::ReAdd, &book);
            return Ok(BookOutcome::ReAdded);
        }

        let content = self.read_content(file, Some(hash)).await?;
        self.cache.update_book_content(book.id, &content).await.or_raise(|| ErrorKind::Cache)?;
        if book.deleted {
            self.publish_book(ChangeKind::ReAdd, &book);
            Ok(BookOutcome::ReAdded)
        } else {
            self.publish_book(ChangeKind::Update, &book);
            Ok(BookOutcome::Updated)
        }
    }

    async fn hash(&self, path: &Path) -> Result<String> {
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || hash_file(owned))
            .await
            .or_raise(|| ErrorKind::Join)?
            .or_raise(|| ErrorKind::Hash(path.to_path_buf()))
    }

    /// Hash (unless already known), extract and process the cover, all on
    /// the blocking pool.
    async fn read_content(&self, file: &BookFile, hash: Option<String>) -> Result<BookContent> {
        let extractor = Arc::clone(&self.extractor);
        let covers = self.covers.clone();
        let BookFile { path, size, modified } = file.clone();
        tokio::task::spawn_blocking(move || -> Result<BookContent> {
            let hash = match hash {
                Some(hash) => hash,
                None => hash_file(&path).or_raise(|| ErrorKind::Hash(path.clone()))?,
            };
            let mut reader = std::fs::File::open(&path).or_raise(|| ErrorKind::Io(path.clone()))?;
            let extracted = extractor
                .extract(&path, &mut reader)
                .or_raise(|| ErrorKind::Extract(path.clone()))?;
            Ok(BookContent {
                hash,
                size,
                modified,
                title: extracted.title,
                author: extracted.author,
                manifest: extracted.manifest,
                cover: extracted.cover.map(|data| cover(covers.as_deref(), &path, data)),
            })
        })
        .await
        .or_raise(|| ErrorKind::Join)?
    }

    async fn touch(&self, series_id: SeriesId, stats: &mut ScanStats) -> Result<()> {
        let at = UtcDateTime::now();
        stats.touched.insert(series_id);
        match &self.touches {
            Some(touches) => {
                if !touches.push(series_id, at) {
                    tracing::debug!(series = series_id, "touch debouncer stopped; dropping touch");
                }
                Ok(())
            },
            None => self.cache.touch_series(series_id, at).await.or_raise(|| ErrorKind::Cache),
        }
    }

    async fn delete_series(&self, series: Vec<Series>, stats: &mut ScanStats) -> Result<()> {
        if series.is_empty() {
            return Ok(());
        }
        let ids: Vec<SeriesId> = series.iter().map(|series| series.id).collect();
        self.cache.set_series_deleted(&ids).await.or_raise(|| ErrorKind::Cache)?;
        for series in &series {
            self.bus.publish(LibraryChangeEvent::series(ChangeKind::Delete, series));
        }
        stats.deleted += series.len() as u64;
        Ok(())
    }

    async fn delete_books(&self, books: Vec<Book>, stats: &mut ScanStats) -> Result<()> {
        if books.is_empty() {
            return Ok(());
        }
        let ids: Vec<_> = books.iter().map(|book| book.id).collect();
        self.cache.set_books_deleted(&ids).await.or_raise(|| ErrorKind::Cache)?;
        for book in &books {
            self.publish_book(ChangeKind::Delete, book);
        }
        stats.deleted += books.len() as u64;
        Ok(())
    }

    fn publish_book(&self, kind: ChangeKind, book: &Book) {
        self.bus.publish(LibraryChangeEvent::book(kind, book));
    }
}
