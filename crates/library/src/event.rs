use derive_more::Display;
use stacks_cache::{Book, Library, LibraryId, Series};
use std::path::PathBuf;

/// What the filesystem said happened.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Hash)]
pub enum FileChangeKind {
    Created,
    Changed,
    Deleted,
    Renamed,
}

/// A filesystem change, already resolved to the series directory (or the
/// library root) it affects.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileChangeEvent {
    pub library_id: LibraryId,
    pub library_root: PathBuf,
    pub kind: FileChangeKind,
    /// Either a direct child of `library_root`, or `library_root` itself.
    pub path: PathBuf,
}
impl FileChangeEvent {
    /// A change on the root itself, which asks for a full library scan.
    pub fn library_scan(library_id: LibraryId, library_root: PathBuf) -> Self {
        Self {
            library_id,
            path: library_root.clone(),
            library_root,
            kind: FileChangeKind::Changed,
        }
    }

    pub fn is_library_scan(&self) -> bool {
        self.path == self.library_root
    }
}

/// Kind of catalog entity a [`LibraryChangeEvent`] is about.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ChangeSource {
    Library,
    Series,
    Book,
}

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ChangeKind {
    /// Catalogued for the first time.
    Add,
    /// Previously soft-deleted, and now back.
    ReAdd,
    /// Content changed.
    Update,
    /// Soft-deleted (or, for libraries, removed).
    Delete,
}

/// Published on the bus after a catalog write has succeeded.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
#[display("[{source}] {kind}: {} ({id})", path.display())]
pub struct LibraryChangeEvent {
    pub source: ChangeSource,
    pub kind: ChangeKind,
    pub id: i64,
    pub path: PathBuf,
}
impl LibraryChangeEvent {
    pub fn library(kind: ChangeKind, library: &Library) -> Self {
        Self {
            source: ChangeSource::Library,
            kind,
            id: library.id,
            path: library.path.clone(),
        }
    }

    pub fn series(kind: ChangeKind, series: &Series) -> Self {
        Self {
            source: ChangeSource::Series,
            kind,
            id: series.id,
            path: series.path.clone(),
        }
    }

    pub fn book(kind: ChangeKind, book: &Book) -> Self {
        Self {
            source: ChangeSource::Book,
            kind,
            id: book.id,
            path: book.path.clone(),
        }
    }
}
