//! Per-API-key fan-out of change events over tokio broadcast channels.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::domain::models::ChangeEvent;
use crate::ports::ChangePublisher;

const DEFAULT_CAPACITY: usize = 100;

/// Implementation of ChangePublisher using tokio broadcast channels.
/// Subscribers that fall behind lose the oldest events; each event carries
/// the full view so a lagging subscriber recovers on the next one.
#[derive(Clone)]
pub struct ChangeBroadcaster {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<ChangeEvent>>>>,
    capacity: usize,
}

impl Default for ChangeBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChangeBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, api_key: &str) -> broadcast::Sender<ChangeEvent> {
        if let Ok(channels) = self.channels.read() {
            if let Some(tx) = channels.get(api_key) {
                return tx.clone();
            }
        }

        let mut channels = match self.channels.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Channels nobody listens to any more are dropped before a new one is added
        channels.retain(|key, tx| key == api_key || tx.receiver_count() > 0);
        channels
            .entry(api_key.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    pub fn subscribe(&self, api_key: &str) -> broadcast::Receiver<ChangeEvent> {
        self.sender(api_key).subscribe()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().map(|channels| channels.len()).unwrap_or(0)
    }

    pub fn subscriber_count(&self, api_key: &str) -> usize {
        self.channels
            .read()
            .ok()
            .and_then(|channels| channels.get(api_key).map(|tx| tx.receiver_count()))
            .unwrap_or(0)
    }

    /// Run `callback` for every change on `api_key` until the task is aborted.
    pub fn on_change<F, Fut>(&self, api_key: &str, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(ChangeEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut rx = self.subscribe(api_key);
        let api_key = api_key.to_string();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => callback(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(api_key = %api_key, skipped, "Change subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[async_trait]
impl ChangePublisher for ChangeBroadcaster {
    async fn publish(&self, event: ChangeEvent) {
        let tx = match self.channels.read() {
            Ok(channels) => channels.get(&event.api_key).cloned(),
            Err(_) => None,
        };
        let Some(tx) = tx else {
            return;
        };
        let sequence = event.sequence;
        // No receivers is not an error
        if let Ok(receivers) = tx.send(event) {
            tracing::debug!(sequence, receivers, "Change event published");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AccountsView, SnapshotDiff};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn event(api_key: &str, sequence: u64) -> ChangeEvent {
        ChangeEvent::new(api_key, sequence, SnapshotDiff::default(), AccountsView::default())
    }

    #[tokio::test]
    async fn test_subscribers_only_see_their_key() {
        let broadcaster = ChangeBroadcaster::default();
        let mut rx_a = broadcaster.subscribe("a");
        let mut rx_b = broadcaster.subscribe("b");

        broadcaster.publish(event("a", 1)).await;

        assert_eq!(rx_a.recv().await.unwrap().sequence, 1);
        assert!(matches!(
            rx_b.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let broadcaster = ChangeBroadcaster::default();
        broadcaster.publish(event("a", 1)).await;
        assert_eq!(broadcaster.subscriber_count("a"), 0);
        assert_eq!(broadcaster.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_channels_are_pruned() {
        let broadcaster = ChangeBroadcaster::default();
        let _kept = broadcaster.subscribe("live");

        for i in 0..1000 {
            drop(broadcaster.subscribe(&format!("gone-{}", i)));
        }

        assert_eq!(broadcaster.channel_count(), 2);
        assert_eq!(broadcaster.subscriber_count("live"), 1);
    }

    #[tokio::test]
    async fn test_on_change_invokes_callback() {
        let broadcaster = ChangeBroadcaster::default();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = broadcaster.on_change("a", move |event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event.sequence);
            }
        });
        assert_eq!(broadcaster.subscriber_count("a"), 1);

        broadcaster.publish(event("a", 7)).await;
        let seq = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seq, 7);

        handle.abort();
    }

    #[tokio::test]
    async fn test_lagging_subscriber_keeps_receiving() {
        let broadcaster = ChangeBroadcaster::new(2);
        let mut rx = broadcaster.subscribe("a");

        for seq in 1..=5 {
            broadcaster.publish(event("a", seq)).await;
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert_eq!(rx.recv().await.unwrap().sequence, 4);
        assert_eq!(rx.recv().await.unwrap().sequence, 5);
    }
}
