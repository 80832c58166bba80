//! Extraction Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// An extraction error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The file could not be read.
    #[display("could not read content")]
    Io,
    /// The file was read but isn't a book this extractor understands.
    #[display("malformed content: {_0}")]
    Malformed(#[error(not(source))] &'static str),
    /// The cover bytes are not a decodable image.
    #[display("unsupported cover image")]
    Image,
    #[display("could not encode cover thumbnail")]
    Thumbnail,
    #[display("could not compute cover placeholder: {_0}")]
    Placeholder(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // A file being rewritten while it is read looks like any other I/O
        // error; everything else is a property of the bytes themselves.
        matches!(self, Self::Io)
    }
}
