//! Trader activity feed.

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::models::TraderActivity;

/// Push source of trades made by followed traders.
pub trait TraderFeed: Send + Sync {
    /// Stream of activity for one trader. The stream ends when the feed shuts
    /// down.
    fn subscribe(&self, trader_id: &str, buffer: usize) -> mpsc::Receiver<TraderActivity>;
}

/// In-process feed: publishers push events, subscribers get the events of the
/// trader they follow.
pub struct BroadcastFeed {
    tx: broadcast::Sender<TraderActivity>,
}

impl BroadcastFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event, returning how many subscriptions received it.
    pub fn publish(&self, activity: TraderActivity) -> usize {
        self.tx.send(activity).unwrap_or(0)
    }
}

impl TraderFeed for BroadcastFeed {
    fn subscribe(&self, trader_id: &str, buffer: usize) -> mpsc::Receiver<TraderActivity> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let mut source = self.tx.subscribe();
        let trader_id = trader_id.to_string();

        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(activity) if activity.trader_id == trader_id => {
                        if tx.send(activity).await.is_err() {
                            debug!(trader = %trader_id, "Subscriber dropped");
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(trader = %trader_id, skipped = skipped, "Activity subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        rx
    }
}
