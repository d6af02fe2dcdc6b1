//! Deployment channel: fan-out transport for deployment requests.
//!
//! Delivery is at-least-once and unordered. Every subscriber sees every
//! request; agents deduplicate through their stage table and the claim
//! store.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use conduit_types::{Action, DeploymentRequest, StageDescriptor, DEPLOY_TOPIC};
use tokio::sync::mpsc;

use crate::error::{ChannelError, DeploymentError};
use crate::retry::RetryPolicy;

/// Raw deployment request payload as delivered to subscribers.
pub type Payload = Arc<[u8]>;

/// Publish/subscribe contract for deployment requests.
#[async_trait]
pub trait DeploymentChannel: Send + Sync {
    /// Topic this channel carries.
    fn topic(&self) -> &str {
        DEPLOY_TOPIC
    }

    /// Deliver `payload` to every current subscriber.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Transient`] when the publish may be retried,
    /// [`ChannelError::Closed`] when the channel is gone.
    async fn publish(&self, payload: &[u8]) -> Result<(), ChannelError>;

    /// Register a new subscriber. Only requests published afterwards are
    /// delivered to it.
    fn subscribe(&self) -> Subscription;
}

/// Receiving end of a deployment channel subscription.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Payload>,
}

impl Subscription {
    #[must_use]
    pub fn new(rx: mpsc::UnboundedReceiver<Payload>) -> Self {
        Self { rx }
    }

    /// Next payload, or `None` once the channel is dropped.
    pub async fn recv(&mut self) -> Option<Payload> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Payload> {
        self.rx.try_recv().ok()
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Process-local deployment channel with fault injection for tests.
#[derive(Debug, Default)]
pub struct InMemoryDeploymentChannel {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Payload>>>,
    fail_next: AtomicU32,
    redeliver: AtomicU32,
    published: AtomicU64,
}

impl InMemoryDeploymentChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` publishes fail with [`ChannelError::Transient`].
    pub fn fail_next_publishes(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Deliver each of the next `count` publishes twice.
    pub fn redeliver_next(&self, count: u32) {
        self.redeliver.store(count, Ordering::SeqCst);
    }

    /// Number of successful publishes so far.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DeploymentChannel for InMemoryDeploymentChannel {
    async fn publish(&self, payload: &[u8]) -> Result<(), ChannelError> {
        if Self::take_one(&self.fail_next) {
            return Err(ChannelError::Transient("injected publish failure".into()));
        }
        let copies = if Self::take_one(&self.redeliver) { 2 } else { 1 };
        let payload: Payload = Arc::from(payload);

        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| (0..copies).all(|_| tx.send(Arc::clone(&payload)).is_ok()));
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        Subscription::new(rx)
    }
}

// ---------------------------------------------------------------------------
// Topology publishing
// ---------------------------------------------------------------------------

/// Publish one request per descriptor, in ascending index order.
///
/// Ordering is a hint only; agents wire stages correctly in any arrival
/// order. Each publish is retried on transient failure according to
/// `retry`. Returns the number of requests published.
///
/// # Errors
///
/// [`DeploymentError::Exhausted`] when a publish keeps failing transiently,
/// [`DeploymentError::Channel`] on a permanent channel failure and
/// [`DeploymentError::Protocol`] if a request cannot be encoded.
pub async fn publish_topology(
    channel: &dyn DeploymentChannel,
    descriptors: &[StageDescriptor],
    action: Action,
    retry: &RetryPolicy,
) -> Result<usize, DeploymentError> {
    let mut ordered: Vec<&StageDescriptor> = descriptors.iter().collect();
    ordered.sort_by_key(|d| d.index);

    for descriptor in &ordered {
        let request = DeploymentRequest::new((*descriptor).clone(), action);
        let payload = request.encode()?;
        let result = retry
            .retry_async("publish", || channel.publish(&payload))
            .await;
        match result {
            Ok(()) => tracing::debug!(
                topic = channel.topic(),
                group = %descriptor.group,
                index = descriptor.index,
                kind = %descriptor.kind,
                %action,
                "Published deployment request"
            ),
            Err(source) if source.is_transient() => {
                return Err(DeploymentError::Exhausted {
                    key: descriptor.key(),
                    action,
                    attempts: retry.max_attempts.max(1),
                    source,
                });
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(ordered.len())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use conduit_types::resolve;

    use super::*;

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn drain(sub: &mut Subscription) -> Vec<DeploymentRequest> {
        std::iter::from_fn(|| sub.try_recv())
            .map(|p| DeploymentRequest::decode(&p).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn publish_fans_out_to_every_subscriber() {
        let channel = InMemoryDeploymentChannel::new();
        let mut a = channel.subscribe();
        let mut b = channel.subscribe();
        channel.publish(b"hello").await.unwrap();
        assert_eq!(&*a.recv().await.unwrap(), b"hello");
        assert_eq!(&*b.recv().await.unwrap(), b"hello");
        assert_eq!(channel.published(), 1);
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let channel = InMemoryDeploymentChannel::new();
        let sub = channel.subscribe();
        let _keep = channel.subscribe();
        drop(sub);
        channel.publish(b"x").await.unwrap();
        assert_eq!(channel.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn topology_is_published_in_index_order() {
        let channel = InMemoryDeploymentChannel::new();
        let mut sub = channel.subscribe();
        let mut stages = resolve("a | b | c", Some("g1")).unwrap();
        stages.reverse();

        let n = publish_topology(&channel, &stages, Action::Deploy, &fast_retry(1))
            .await
            .unwrap();
        assert_eq!(n, 3);
        let indexes: Vec<u32> = drain(&mut sub).iter().map(|r| r.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let channel = InMemoryDeploymentChannel::new();
        let mut sub = channel.subscribe();
        channel.fail_next_publishes(2);
        let stages = resolve("a | b", Some("g1")).unwrap();

        publish_topology(&channel, &stages, Action::Undeploy, &fast_retry(3))
            .await
            .unwrap();
        let requests = drain(&mut sub);
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.action == Action::Undeploy));
    }

    #[tokio::test]
    async fn exhausted_retries_report_the_stage() {
        let channel = InMemoryDeploymentChannel::new();
        channel.fail_next_publishes(10);
        let stages = resolve("a | b", Some("g1")).unwrap();

        let err = publish_topology(&channel, &stages, Action::Deploy, &fast_retry(3))
            .await
            .unwrap_err();
        match err {
            DeploymentError::Exhausted { key, attempts, .. } => {
                assert_eq!(key.index, 0);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn redelivery_duplicates_payloads() {
        let channel = InMemoryDeploymentChannel::new();
        let mut sub = channel.subscribe();
        channel.redeliver_next(1);
        channel.publish(b"once").await.unwrap();
        channel.publish(b"twice?").await.unwrap();
        let got: Vec<Payload> = std::iter::from_fn(|| sub.try_recv()).collect();
        assert_eq!(got.len(), 3);
        assert_eq!(&*got[0], b"once");
        assert_eq!(&*got[1], b"once");
    }
}
