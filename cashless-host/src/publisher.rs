use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use cashless_icd::{OutboundEvent, StatusMessage};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Fire-and-forget status broadcast.
///
/// Publishing never blocks. With nobody subscribed the event is simply lost,
/// and a subscriber that falls more than `capacity` events behind skips ahead.
#[derive(Clone)]
pub struct StatusPublisher {
    tx: broadcast::Sender<StatusMessage>,
    seq: Arc<AtomicU32>,
}

impl StatusPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            seq: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusMessage> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: OutboundEvent) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        match self.tx.send(StatusMessage { seq, event }) {
            Ok(receivers) => {
                info!(seq, code = event.code(), amount = ?event.amount(), receivers, "Broadcasted event")
            }
            Err(_) => debug!(seq, code = event.code(), "Event not delivered, no subscribers"),
        }
    }
}
