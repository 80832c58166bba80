use crate::reconcile::Reconciler;
use crate::task::Task;
use stacks_asyncutils::{CancellationToken, PriorityQueue};
use std::sync::Arc;

/// The single queue consumer.
///
/// Tasks run one at a time. A task that fails, or panics, is logged and the
/// loop moves on to the next one.
pub(crate) async fn consume(queue: Arc<PriorityQueue<Task>>, reconciler: Arc<Reconciler>, cancel: CancellationToken) {
    tracing::debug!("queue consumer started");
    while let Some(task) = queue.dequeue(&cancel).await {
        let name = task.name();
        tracing::debug!(task = name, pending = queue.len(), "running task");
        let reconciler = Arc::clone(&reconciler);
        match tokio::spawn(async move { reconciler.run(task).await }).await {
            Ok(Ok(())) => {},
            Ok(Err(err)) => tracing::error!(task = name, error = ?err, "task failed"),
            Err(err) if err.is_panic() => tracing::error!(task = name, "task panicked"),
            Err(err) => tracing::warn!(task = name, error = %err, "task did not finish"),
        }
    }
    tracing::debug!(abandoned = queue.len(), "queue consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ChangeBus;
    use crate::event::{ChangeKind, ChangeSource};
    use stacks_asyncutils::Priority;
    use stacks_cache::{Database, Repository};
    use stacks_extract::FilenameExtractor;
    use std::time::Duration;

    #[tokio::test]
    async fn test_failed_task_does_not_stop_the_consumer() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Discworld")).unwrap();
        std::fs::write(dir.path().join("Discworld/Mort.epub"), b"mort").unwrap();
        let db = Database::connect_in_memory().await.unwrap();
        let cache = Repository::from(&db);
        let library = cache.insert_library(dir.path(), "Library").await.unwrap();
        let bus = ChangeBus::new(64);
        let mut events = bus.subscribe();
        let reconciler = Arc::new(Reconciler::new(cache, bus, Arc::new(FilenameExtractor)));
        let queue = Arc::new(PriorityQueue::new());
        let cancel = CancellationToken::new();

        queue.enqueue(Task::ScanSeries(404), Priority::High);
        queue.enqueue(Task::ScanLibrary(library.id), Priority::Low);
        let consumer = tokio::spawn(consume(Arc::clone(&queue), reconciler, cancel.clone()));

        let first = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
        assert_eq!((first.source, first.kind), (ChangeSource::Series, ChangeKind::Add));
        cancel.cancel();
        consumer.await.unwrap();
    }
}
