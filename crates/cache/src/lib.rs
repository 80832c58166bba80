//! SQLite catalog of watched libraries.
//!
//! The catalog mirrors what is on disk: a **library** is a watched root
//! directory, a **series** is an immediate sub-directory of a library root,
//! and a **book** is a content file anywhere beneath a series directory.
//! The filesystem stays the source of truth; rows are reconciled against it
//! and are soft-deleted (flagged, never removed) when their path disappears
//! so that identities survive a file being moved away and back again.
//!
//! Nothing cascades inside the database. Removing a library, or purging
//! soft-deleted rows, is spelled out table by table in the [`Repository`].

mod db;
pub mod error;
pub mod models;
mod repo;

pub use crate::db::Database;
pub use crate::models::{Book, BookContent, BookId, Cover, Library, LibraryId, Series, SeriesId};
pub use crate::repo::{Purged, Repository};
