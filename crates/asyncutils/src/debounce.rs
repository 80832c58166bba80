use futures::StreamExt;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::time::{DelayQueue, delay_queue};

/// Keyed trailing-edge throttle.
///
/// Every [`push`](Debouncer::push) for a key replaces that key's pending value
/// and restarts its quiet window. Once a key has seen no pushes for a full
/// window, its latest value is handed to the `on_fire` callback exactly once
/// and the key is forgotten. Memory is bounded by the number of keys that are
/// currently inside their window.
///
/// The handle is cheap to clone and `push` is synchronous, so it can be called
/// from threads that are not part of the Tokio runtime (filesystem watcher
/// callbacks, for example). The timers themselves run on a single task.
pub struct Debouncer<K, V> {
    tx: mpsc::UnboundedSender<(K, V)>,
}
impl<K, V> Clone for Debouncer<K, V> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}
impl<K, V> Debouncer<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    /// Start the timer task.
    ///
    /// The task stops when `cancel` fires (pending values are discarded) or
    /// when every handle has been dropped (pending values are still delivered
    /// when their windows elapse).
    pub fn spawn<F>(window: Duration, cancel: CancellationToken, on_fire: F) -> (Self, JoinHandle<()>)
    where
        F: FnMut(K, V) + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_timers(window, cancel, rx, on_fire));
        (Self { tx }, handle)
    }

    /// Record a value for `key`, restarting its quiet window.
    ///
    /// Returns `false` if the timer task has already stopped.
    pub fn push(&self, key: K, value: V) -> bool {
        self.tx.send((key, value)).is_ok()
    }
}

async fn run_timers<K, V, F>(
    window: Duration,
    cancel: CancellationToken,
    mut rx: mpsc::UnboundedReceiver<(K, V)>,
    mut on_fire: F,
) where
    K: Eq + Hash + Clone,
    F: FnMut(K, V),
{
    let mut timers: DelayQueue<K> = DelayQueue::new();
    let mut pending: HashMap<K, (delay_queue::Key, V)> = HashMap::new();
    let mut open = true;
    while open || !pending.is_empty() {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if !pending.is_empty() {
                    tracing::debug!(pending = pending.len(), "debouncer cancelled; discarding pending values");
                }
                break;
            },
            Some(expired) = timers.next(), if !timers.is_empty() => {
                let key = expired.into_inner();
                if let Some((_, value)) = pending.remove(&key) {
                    on_fire(key, value);
                }
            },
            received = rx.recv(), if open => match received {
                Some((key, value)) => match pending.get_mut(&key) {
                    Some((timer, latest)) => {
                        timers.reset(timer, window);
                        *latest = value;
                    },
                    None => {
                        let timer = timers.insert(key.clone(), window);
                        pending.insert(key, (timer, value));
                    },
                },
                None => open = false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    const WINDOW: Duration = Duration::from_secs(3);

    fn collector() -> (
        mpsc::UnboundedReceiver<(&'static str, u32)>,
        impl FnMut(&'static str, u32) + Send + 'static,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (rx, move |key, value| {
            let _ = tx.send((key, value));
        })
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<(&'static str, u32)>) -> Vec<(&'static str, u32)> {
        let mut fired = Vec::new();
        while let Ok(item) = rx.try_recv() {
            fired.push(item);
        }
        fired
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_last_value() {
        let (mut rx, on_fire) = collector();
        let (debouncer, _task) = Debouncer::spawn(WINDOW, CancellationToken::new(), on_fire);
        for value in 1..=5 {
            assert!(debouncer.push("series-a", value));
            sleep(Duration::from_millis(500)).await;
        }
        assert!(drain(&mut rx).is_empty());
        sleep(WINDOW).await;
        assert_eq!(drain(&mut rx), vec![("series-a", 5)]);
        sleep(WINDOW * 2).await;
        assert!(drain(&mut rx).is_empty(), "a key fires once per burst");
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let (mut rx, on_fire) = collector();
        let (debouncer, _task) = Debouncer::spawn(WINDOW, CancellationToken::new(), on_fire);
        debouncer.push("a", 1);
        sleep(Duration::from_secs(1)).await;
        debouncer.push("b", 2);
        sleep(Duration::from_secs(1)).await;
        debouncer.push("a", 3);
        sleep(Duration::from_millis(2500)).await;
        assert_eq!(drain(&mut rx), vec![("b", 2)]);
        sleep(Duration::from_secs(1)).await;
        assert_eq!(drain(&mut rx), vec![("a", 3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_push_restarts_the_window() {
        let (mut rx, on_fire) = collector();
        let (debouncer, _task) = Debouncer::spawn(WINDOW, CancellationToken::new(), on_fire);
        debouncer.push("a", 1);
        sleep(Duration::from_secs(2)).await;
        debouncer.push("a", 2);
        sleep(Duration::from_secs(2)).await;
        assert!(drain(&mut rx).is_empty());
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(drain(&mut rx), vec![("a", 2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_pending() {
        let (mut rx, on_fire) = collector();
        let cancel = CancellationToken::new();
        let (debouncer, task) = Debouncer::spawn(WINDOW, cancel.clone(), on_fire);
        debouncer.push("a", 1);
        sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        task.await.unwrap();
        assert!(drain(&mut rx).is_empty());
        assert!(!debouncer.push("a", 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handles_still_delivers_pending() {
        let (mut rx, on_fire) = collector();
        let (debouncer, task) = Debouncer::spawn(WINDOW, CancellationToken::new(), on_fire);
        debouncer.push("a", 1);
        drop(debouncer);
        task.await.unwrap();
        assert_eq!(drain(&mut rx), vec![("a", 1)]);
    }
}
