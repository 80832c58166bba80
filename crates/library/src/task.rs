use crate::event::FileChangeEvent;
use stacks_cache::{LibraryId, SeriesId};
use time::UtcDateTime;

/// Unit of work for the queue consumer. Every catalog write goes through one
/// of these.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Task {
    /// A debounced filesystem change.
    FileChange(FileChangeEvent),
    ScanLibrary(LibraryId),
    ScanSeries(SeriesId),
    /// Record that books in a series changed at `at`.
    TouchSeries { series_id: SeriesId, at: UtcDateTime },
    RemoveLibrary(LibraryId),
}
impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FileChange(_) => "file-change",
            Self::ScanLibrary(_) => "scan-library",
            Self::ScanSeries(_) => "scan-series",
            Self::TouchSeries { .. } => "touch-series",
            Self::RemoveLibrary(_) => "remove-library",
        }
    }
}
