//! Height capabilities consumed by the block-time observer.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::ChainError;
use crate::rpc::JsonRpcClient;

/// On-demand "current height" query.
#[async_trait]
pub trait HeightSource: Send + Sync {
    async fn current_height(&self) -> Result<u64, ChainError>;
}

/// Push-based "new height available" notifications.
#[async_trait]
pub trait HeightSubscriber: Send + Sync {
    async fn subscribe(&self) -> Result<HeightSubscription, ChainError>;
}

#[async_trait]
impl HeightSource for JsonRpcClient {
    async fn current_height(&self) -> Result<u64, ChainError> {
        self.block_number().await
    }
}

/// A live subscription. Heights arrive in delivery order through
/// [`next`](HeightSubscription::next); [`unsubscribe`](HeightSubscription::unsubscribe)
/// tears down the producer and waits for it to finish.
///
/// Dropping a subscription without unsubscribing closes the channel, which
/// the producer treats as a stop signal.
pub struct HeightSubscription {
    receiver: mpsc::Receiver<Result<u64, ChainError>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl HeightSubscription {
    /// Wrap a producer task that feeds `receiver` and stops when `shutdown`
    /// fires.
    pub fn new(
        receiver: mpsc::Receiver<Result<u64, ChainError>>,
        shutdown: oneshot::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            receiver,
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    /// A subscription fed directly by the other end of a channel, with no
    /// producer task to stop.
    pub fn from_channel(receiver: mpsc::Receiver<Result<u64, ChainError>>) -> Self {
        Self {
            receiver,
            shutdown: None,
            task: None,
        }
    }

    /// Next delivered height. `None` once the producer has gone away.
    pub async fn next(&mut self) -> Option<Result<u64, ChainError>> {
        self.receiver.recv().await
    }

    /// Remove the subscription. No heights are delivered afterwards.
    pub async fn unsubscribe(mut self) {
        self.receiver.close();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!("subscription task ended abnormally: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_subscription_delivers_in_order() {
        let (tx, rx) = mpsc::channel(4);
        let mut sub = HeightSubscription::from_channel(rx);
        tx.send(Ok(10)).await.unwrap();
        tx.send(Ok(11)).await.unwrap();
        drop(tx);

        assert_eq!(sub.next().await.unwrap().unwrap(), 10);
        assert_eq!(sub.next().await.unwrap().unwrap(), 11);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn unsubscribe_stops_producer_task() {
        let (tx, rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let _ = shutdown_rx.await;
            drop(tx);
        });
        let sub = HeightSubscription::new(rx, shutdown_tx, task);
        // Returns only once the producer has observed the shutdown signal.
        sub.unsubscribe().await;
    }

    #[tokio::test]
    async fn unsubscribe_closes_channel_for_sender() {
        let (tx, rx) = mpsc::channel(4);
        let sub = HeightSubscription::from_channel(rx);
        sub.unsubscribe().await;
        assert!(tx.send(Ok(1)).await.is_err());
    }
}
