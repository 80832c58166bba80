//! Keeps a catalog of libraries, series and books in step with the
//! filesystem.
//!
//! A *library* is a watched root directory, a *series* is any immediate
//! sub-directory of a library, and a *book* is any file with a recognised
//! extension at any depth below a series. The [`Engine`] ties the pieces
//! together; [`Reconciler`] can also be driven directly for one-off scans.

mod bus;
mod engine;
pub mod error;
mod event;
mod pipeline;
mod reconcile;
mod task;
pub mod watch;
mod worker;

pub use crate::bus::{ChangeBus, Subscription};
pub use crate::engine::{Engine, EngineOptions};
pub use crate::event::{ChangeKind, ChangeSource, FileChangeEvent, FileChangeKind, LibraryChangeEvent};
pub use crate::reconcile::{Reconciler, ScanOutcome, ScanStats};
pub use crate::task::Task;
pub use crate::watch::WatchManager;
