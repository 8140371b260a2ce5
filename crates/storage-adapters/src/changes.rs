//! Change notifications for reports and votes.
//!
//! A thin wrapper over `tokio::broadcast`. Every subscriber gets its own
//! receiver; one that falls behind is told how many events it missed.

use async_trait::async_trait;
use domains::{ChangeNotice, ChangeSource, ChangeSubscription, StoreEvent};
use tokio::sync::broadcast::{self, error::RecvError};

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Cheap to clone (inner Arc via broadcast::Sender).
#[derive(Clone)]
pub struct ChangeBroadcaster {
    tx: broadcast::Sender<StoreEvent>,
}

impl ChangeBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Dropped silently when nobody is listening.
    pub fn publish(&self, event: StoreEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl ChangeSource for ChangeBroadcaster {
    fn subscribe(&self) -> Box<dyn ChangeSubscription> {
        Box::new(BroadcastSubscription { rx: self.tx.subscribe() })
    }
}

struct BroadcastSubscription {
    rx: broadcast::Receiver<StoreEvent>,
}

#[async_trait]
impl ChangeSubscription for BroadcastSubscription {
    async fn recv(&mut self) -> Option<ChangeNotice> {
        match self.rx.recv().await {
            Ok(event) => Some(ChangeNotice::Event(event)),
            Err(RecvError::Lagged(skipped)) => Some(ChangeNotice::Missed(skipped)),
            Err(RecvError::Closed) => None,
        }
    }
}
