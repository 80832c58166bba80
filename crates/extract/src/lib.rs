//! Everything the sync engine needs to know about the *contents* of a book.
//!
//! The engine itself only deals in paths, stats and hashes. Reading titles and
//! authors out of a book, and turning a cover image into a thumbnail and a
//! placeholder, happen behind the [`ContentExtractor`] and [`CoverProcessor`]
//! traits so that format support can grow without touching reconciliation.

mod content;
mod cover;
pub mod error;
mod hash;

pub use crate::content::{ContentExtractor, Extracted, FilenameExtractor};
pub use crate::cover::{CoverProcessor, ImageCoverProcessor, ProcessedCover};
pub use crate::hash::{hash_file, hash_reader};
