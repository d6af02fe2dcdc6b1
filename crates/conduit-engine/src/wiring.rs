//! Wiring registry: named data channels between adjacent stages.
//!
//! Stage `i` writes to `"<group>.<i+1>"` and stage `i+1` reads from the same
//! name. Whichever side deploys first creates the channel; the other side
//! attaches to it. Envelopes published before the consumer attaches are
//! buffered up to the channel capacity. A channel is dropped once both ends
//! have detached.
//!
//! The registry only matches names. It never infers topology.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use conduit_types::{channel_name, Envelope};
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::error::WiringError;

pub type EnvelopeSender = mpsc::Sender<Arc<Envelope>>;
pub type EnvelopeReceiver = mpsc::Receiver<Arc<Envelope>>;

/// Default buffer size for data channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Producer side of a data channel, held by the upstream stage driver.
#[derive(Debug, Clone)]
pub struct OutboundEnd {
    pub channel: String,
    pub sender: EnvelopeSender,
}

/// Consumer side of a data channel, held by the downstream stage driver.
///
/// The receiver stays in the registry while the channel lives so that a
/// consumer redeployed after a failure picks up any buffered envelopes.
#[derive(Debug, Clone)]
pub struct InboundEnd {
    pub channel: String,
    pub receiver: Arc<tokio::sync::Mutex<EnvelopeReceiver>>,
}

/// Attachment status of one data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    pub name: String,
    pub producer: bool,
    pub consumer: bool,
}

#[derive(Debug)]
struct DataChannel {
    sender: EnvelopeSender,
    receiver: Arc<tokio::sync::Mutex<EnvelopeReceiver>>,
    producer: bool,
    consumer: bool,
}

impl DataChannel {
    fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            producer: false,
            consumer: false,
        }
    }

    fn is_detached(&self) -> bool {
        !self.producer && !self.consumer
    }
}

/// Data channels of one group, keyed by channel index.
#[derive(Debug, Default)]
struct GroupWiring {
    channels: BTreeMap<u32, DataChannel>,
    /// Set when the group is removed from the registry; holders of a stale
    /// handle must look the group up again.
    retired: bool,
}

/// Registry of data channels, sharded by group.
///
/// Each group has its own lock, held for a single attach or detach, so
/// different groups never contend.
#[derive(Debug)]
pub struct WiringRegistry {
    groups: DashMap<String, Arc<Mutex<GroupWiring>>>,
    capacity: usize,
}

impl Default for WiringRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl WiringRegistry {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            groups: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn group(&self, group: &str) -> Arc<Mutex<GroupWiring>> {
        if let Some(existing) = self.groups.get(group) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.groups
                .entry(group.to_string())
                .or_default()
                .value(),
        )
    }

    fn with_group<R>(
        &self,
        group: &str,
        f: impl FnOnce(&mut BTreeMap<u32, DataChannel>) -> R,
    ) -> R {
        loop {
            let wiring = self.group(group);
            let mut guard = wiring.lock().unwrap_or_else(PoisonError::into_inner);
            if !guard.retired {
                return f(&mut guard.channels);
            }
        }
    }

    /// Attach the producer end of channel `<group>.<index>`, creating the
    /// channel if the consumer has not deployed yet.
    ///
    /// # Errors
    ///
    /// [`WiringError::EndInUse`] if another producer is attached.
    pub fn attach_outbound(&self, group: &str, index: u32) -> Result<OutboundEnd, WiringError> {
        let capacity = self.capacity;
        self.with_group(group, |wiring| {
            let channel = wiring
                .entry(index)
                .or_insert_with(|| DataChannel::new(capacity));
            if channel.producer {
                return Err(WiringError::EndInUse {
                    channel: channel_name(group, index),
                    end: "producer",
                });
            }
            channel.producer = true;
            tracing::debug!(group, index, "Attached producer");
            Ok(OutboundEnd {
                channel: channel_name(group, index),
                sender: channel.sender.clone(),
            })
        })
    }

    /// Attach the consumer end of channel `<group>.<index>`, creating the
    /// channel if the producer has not deployed yet.
    ///
    /// # Errors
    ///
    /// [`WiringError::EndInUse`] if another consumer is attached.
    pub fn attach_inbound(&self, group: &str, index: u32) -> Result<InboundEnd, WiringError> {
        let capacity = self.capacity;
        self.with_group(group, |wiring| {
            let channel = wiring
                .entry(index)
                .or_insert_with(|| DataChannel::new(capacity));
            if channel.consumer {
                return Err(WiringError::EndInUse {
                    channel: channel_name(group, index),
                    end: "consumer",
                });
            }
            channel.consumer = true;
            tracing::debug!(group, index, "Attached consumer");
            Ok(InboundEnd {
                channel: channel_name(group, index),
                receiver: Arc::clone(&channel.receiver),
            })
        })
    }

    /// Release the producer end. Detaching an unattached end is a no-op.
    pub fn detach_outbound(&self, group: &str, index: u32) {
        self.detach(group, index, |c| c.producer = false);
    }

    /// Release the consumer end. Detaching an unattached end is a no-op.
    pub fn detach_inbound(&self, group: &str, index: u32) {
        self.detach(group, index, |c| c.consumer = false);
    }

    fn detach(&self, group: &str, index: u32, release: impl FnOnce(&mut DataChannel)) {
        let emptied = self.with_group(group, |wiring| {
            if let Some(channel) = wiring.get_mut(&index) {
                release(channel);
                if channel.is_detached() {
                    wiring.remove(&index);
                    tracing::debug!(group, index, "Dropped data channel");
                }
            }
            wiring.is_empty()
        });
        if emptied {
            self.groups.remove_if(group, |_, wiring| {
                let mut guard = wiring.lock().unwrap_or_else(PoisonError::into_inner);
                guard.retired = guard.channels.is_empty();
                guard.retired
            });
        }
    }

    /// Whether channel `<group>.<index>` currently exists.
    #[must_use]
    pub fn contains(&self, group: &str, index: u32) -> bool {
        self.groups.get(group).is_some_and(|wiring| {
            wiring
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .channels
                .contains_key(&index)
        })
    }

    /// Attachment status of every live channel in `group`, by index.
    #[must_use]
    pub fn channels(&self, group: &str) -> Vec<ChannelStatus> {
        let Some(wiring) = self.groups.get(group).map(|w| Arc::clone(w.value())) else {
            return Vec::new();
        };
        let guard = wiring.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .channels
            .iter()
            .map(|(index, channel)| ChannelStatus {
                name: channel_name(group, *index),
                producer: channel.producer,
                consumer: channel.consumer,
            })
            .collect()
    }

    /// Number of groups with at least one live channel.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(n: i64) -> Arc<Envelope> {
        Arc::new(Envelope::builder().put("n", n).build().unwrap())
    }

    #[tokio::test]
    async fn producer_first_then_consumer() {
        let registry = WiringRegistry::new(8);
        let out = registry.attach_outbound("g1", 1).unwrap();
        assert_eq!(out.channel, "g1.1");
        out.sender.send(envelope(1)).await.unwrap();

        let inbound = registry.attach_inbound("g1", 1).unwrap();
        assert_eq!(inbound.channel, "g1.1");
        let got = inbound.receiver.lock().await.recv().await.unwrap();
        assert_eq!(got.get_i64("n").unwrap(), 1);
    }

    #[tokio::test]
    async fn consumer_first_then_producer() {
        let registry = WiringRegistry::new(8);
        let inbound = registry.attach_inbound("g1", 1).unwrap();
        let out = registry.attach_outbound("g1", 1).unwrap();
        out.sender.send(envelope(7)).await.unwrap();
        let got = inbound.receiver.lock().await.recv().await.unwrap();
        assert_eq!(got.get_i64("n").unwrap(), 7);
        assert_eq!(
            registry.channels("g1"),
            vec![ChannelStatus {
                name: "g1.1".into(),
                producer: true,
                consumer: true,
            }]
        );
    }

    #[test]
    fn channel_dropped_when_both_ends_detach() {
        let registry = WiringRegistry::new(8);
        registry.attach_outbound("g1", 1).unwrap();
        registry.attach_inbound("g1", 1).unwrap();

        registry.detach_outbound("g1", 1);
        assert!(registry.contains("g1", 1));
        registry.detach_inbound("g1", 1);
        assert!(!registry.contains("g1", 1));
        assert_eq!(registry.group_count(), 0);
    }

    #[test]
    fn double_attach_is_rejected() {
        let registry = WiringRegistry::new(8);
        registry.attach_inbound("g1", 2).unwrap();
        let err = registry.attach_inbound("g1", 2).unwrap_err();
        assert_eq!(
            err,
            WiringError::EndInUse {
                channel: "g1.2".into(),
                end: "consumer",
            }
        );
    }

    #[test]
    fn groups_are_independent() {
        let registry = WiringRegistry::new(8);
        registry.attach_outbound("a", 1).unwrap();
        registry.attach_outbound("b", 1).unwrap();
        assert_eq!(registry.group_count(), 2);
        registry.detach_outbound("a", 1);
        assert!(!registry.contains("a", 1));
        assert!(registry.contains("b", 1));
    }

    #[test]
    fn detaching_unknown_end_is_noop() {
        let registry = WiringRegistry::new(8);
        registry.detach_inbound("nope", 3);
        assert_eq!(registry.group_count(), 0);
    }
}
