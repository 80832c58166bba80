//! Library Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use stacks_cache::{LibraryId, SeriesId};
use std::path::PathBuf;

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("library not found: {_0}")]
    LibraryNotFound(#[error(not(source))] LibraryId),
    #[display("series not found: {_0}")]
    SeriesNotFound(#[error(not(source))] SeriesId),
    #[display("a library is already registered at {}", _0.display())]
    AlreadyExists(#[error(not(source))] PathBuf),
    #[display("not a directory: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    #[display("could not watch {}", _0.display())]
    Watch(#[error(not(source))] PathBuf),
    #[display("catalog error")]
    Cache,
    #[display("reconciliation failed")]
    Reconcile,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Cache | Self::Reconcile | Self::Watch(_))
    }

    /// Returns `true` if the error means the requested entity doesn't exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::LibraryNotFound(_) | Self::SeriesNotFound(_))
    }
}
