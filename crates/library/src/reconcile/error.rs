use derive_more::{Display, Error};
use stacks_cache::{LibraryId, SeriesId};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("catalog error")]
    Cache,
    #[display("could not read {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
    #[display("could not hash {}", _0.display())]
    Hash(#[error(not(source))] PathBuf),
    #[display("could not extract {}", _0.display())]
    Extract(#[error(not(source))] PathBuf),
    #[display("unknown library: {_0}")]
    UnknownLibrary(#[error(not(source))] LibraryId),
    #[display("unknown series: {_0}")]
    UnknownSeries(#[error(not(source))] SeriesId),
    #[display("background task failed")]
    Join,
}
