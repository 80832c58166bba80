use crate::event::FileChangeEvent;
use crate::task::Task;
use stacks_asyncutils::{CancellationToken, Debouncer, Priority, PriorityQueue};
use stacks_cache::SeriesId;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use time::UtcDateTime;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Between the watcher and the queue.
///
/// Every normalised change is first re-broadcast as-is, then debounced per
/// path; a path that has been quiet for the change window becomes one
/// low-priority [`Task::FileChange`]. Series touches get their own, longer
/// window and become normal-priority [`Task::TouchSeries`].
#[derive(Clone)]
pub(crate) struct Pipeline {
    raw: broadcast::Sender<FileChangeEvent>,
    changes: Debouncer<PathBuf, FileChangeEvent>,
    touches: Debouncer<SeriesId, UtcDateTime>,
}
impl Pipeline {
    pub(crate) fn start(
        queue: &Arc<PriorityQueue<Task>>,
        change_window: Duration,
        touch_window: Duration,
        raw_capacity: usize,
        cancel: &CancellationToken,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (raw, _) = broadcast::channel(raw_capacity);
        let (changes, changes_task) = Debouncer::spawn(change_window, cancel.child_token(), {
            let queue = Arc::clone(queue);
            move |_, event: FileChangeEvent| {
                tracing::debug!(kind = %event.kind, path = %event.path.display(), "queueing file change");
                queue.enqueue(Task::FileChange(event), Priority::Low);
            }
        });
        let (touches, touches_task) = Debouncer::spawn(touch_window, cancel.child_token(), {
            let queue = Arc::clone(queue);
            move |series_id, at| queue.enqueue(Task::TouchSeries { series_id, at }, Priority::Normal)
        });
        (Self { raw, changes, touches }, vec![changes_task, touches_task])
    }

    /// Hand over a change. Safe to call from any thread.
    pub(crate) fn submit(&self, event: FileChangeEvent) {
        // No raw subscribers is fine.
        let _ = self.raw.send(event.clone());
        if !self.changes.push(event.path.clone(), event) {
            tracing::debug!("change pipeline stopped; dropping event");
        }
    }

    pub(crate) fn touches(&self) -> Debouncer<SeriesId, UtcDateTime> {
        self.touches.clone()
    }

    pub(crate) fn subscribe_raw(&self) -> broadcast::Receiver<FileChangeEvent> {
        self.raw.subscribe()
    }
}
