//! Catalog models.
//!
//! These are the types handed to and returned from the [`Repository`](crate::Repository).
//! Their database representations live in [`row`] and never leave this crate.

pub(crate) mod row;

pub(crate) use self::row::{BookRow, CoverRow, LibraryRow, SeriesRow};
use std::path::PathBuf;
use time::UtcDateTime;

pub type LibraryId = i64;
pub type SeriesId = i64;
pub type BookId = i64;

/// A watched root directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Library {
    pub id: LibraryId,
    pub path: PathBuf,
    pub name: String,
    pub created_at: UtcDateTime,
}

/// An immediate sub-directory of a library root.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Series {
    pub id: SeriesId,
    pub library_id: LibraryId,
    pub path: PathBuf,
    pub deleted: bool,
    pub created_at: UtcDateTime,
    /// Last time a book in this series was added or changed.
    pub updated_at: UtcDateTime,
}

/// A content file somewhere beneath a series directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Book {
    pub id: BookId,
    pub series_id: SeriesId,
    pub path: PathBuf,
    /// BLAKE3 digest of the file, hex encoded.
    pub hash: String,
    pub size: u64,
    pub modified: UtcDateTime,
    pub deleted: bool,
    pub title: Option<String>,
    pub author: Option<String>,
    pub manifest: Option<String>,
    pub created_at: UtcDateTime,
}
impl Book {
    /// Whether the on-disk stat still matches what was catalogued.
    ///
    /// A match means the file is assumed unchanged without hashing it.
    pub fn stat_matches(&self, size: u64, modified: UtcDateTime) -> bool {
        self.size == size && self.modified == modified
    }
}

/// Everything learnt from reading a book file, used to create or refresh a
/// [`Book`] row.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BookContent {
    pub hash: String,
    pub size: u64,
    pub modified: UtcDateTime,
    pub title: Option<String>,
    pub author: Option<String>,
    pub manifest: Option<String>,
    pub cover: Option<Cover>,
}

/// Cover image of a book, along with its derived thumbnail and placeholder.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cover {
    pub data: Vec<u8>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub thumbnail: Option<Vec<u8>>,
    pub placeholder: Option<String>,
}
