use crate::event::LibraryChangeEvent;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio_util::sync::CancellationToken;

/// Fan-out of [`LibraryChangeEvent`]s to any number of subscribers.
///
/// Publishing never blocks. Each subscriber gets every event published after
/// it subscribed, in publish order, unless it falls more than `capacity`
/// events behind; the oldest ones are then dropped for that subscriber only.
#[derive(Clone, Debug)]
pub struct ChangeBus {
    tx: broadcast::Sender<LibraryChangeEvent>,
}
impl ChangeBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: LibraryChangeEvent) {
        tracing::trace!(%event, "publishing change");
        // Only fails when nobody is listening.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription { rx: self.tx.subscribe() }
    }
}

pub struct Subscription {
    rx: broadcast::Receiver<LibraryChangeEvent>,
}
impl Subscription {
    /// Wait for the next event. Returns `None` once every [`ChangeBus`]
    /// handle has been dropped.
    pub async fn recv(&mut self) -> Option<LibraryChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => tracing::warn!(missed, "subscriber fell behind; events dropped"),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already waiting.
    pub fn try_recv(&mut self) -> Option<LibraryChangeEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(missed)) => tracing::warn!(missed, "subscriber fell behind; events dropped"),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

/// Log every event until cancelled.
pub(crate) async fn log_changes(mut changes: Subscription, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = changes.recv() => match event {
                Some(event) => tracing::info!("{event}"),
                None => break,
            },
        }
    }
}
