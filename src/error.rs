use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("could not open the catalog at {}", _0.display())]
    Database(#[error(not(source))] PathBuf),
    #[display("library operation failed")]
    Library,
    #[display("could not wait for shutdown signal")]
    Signal,
}
