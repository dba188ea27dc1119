//! Channel-backed discovery source for tests and demos.

use crate::backend::BackendResult;
use crate::error::BackendError;
use crate::failover::{
    parse_switch_master, DiscoverySource, FailoverNotification, Subscription,
    SWITCH_MASTER_CHANNEL,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct Endpoints {
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<FailoverNotification>>>,
    refused: HashSet<String>,
    subscribe_calls: usize,
}

/// A [`DiscoverySource`] fed by the test through in-process channels.
#[derive(Debug, Default)]
pub struct ChannelDiscovery {
    endpoints: Mutex<Endpoints>,
}

impl ChannelDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a notification to every live subscription of `endpoint`.
    ///
    /// Returns the number of subscriptions it reached.
    pub fn publish(&self, endpoint: &str, notification: FailoverNotification) -> usize {
        let mut endpoints = self.endpoints.lock();
        let Some(senders) = endpoints.subscribers.get_mut(endpoint) else {
            return 0;
        };
        senders.retain(|tx| tx.send(notification.clone()).is_ok());
        senders.len()
    }

    /// Deliver a raw pub/sub message as a sentinel would send it.
    ///
    /// Only well-formed payloads on [`SWITCH_MASTER_CHANNEL`] reach the
    /// subscribers; anything else is dropped and 0 is returned.
    pub fn publish_message(&self, endpoint: &str, channel: &str, payload: &str) -> usize {
        if channel != SWITCH_MASTER_CHANNEL {
            return 0;
        }
        match parse_switch_master(payload) {
            Some(notification) => self.publish(endpoint, notification),
            None => 0,
        }
    }

    /// Deliver a notification through every endpoint.
    pub fn broadcast(&self, notification: FailoverNotification) -> usize {
        let mut endpoints = self.endpoints.lock();
        let mut delivered = 0;
        for senders in endpoints.subscribers.values_mut() {
            senders.retain(|tx| tx.send(notification.clone()).is_ok());
            delivered += senders.len();
        }
        delivered
    }

    /// End every subscription of `endpoint`.
    pub fn disconnect(&self, endpoint: &str) {
        self.endpoints.lock().subscribers.remove(endpoint);
    }

    /// Fail further subscribe attempts to `endpoint`.
    pub fn refuse(&self, endpoint: impl Into<String>) {
        self.endpoints.lock().refused.insert(endpoint.into());
    }

    pub fn accept(&self, endpoint: &str) {
        self.endpoints.lock().refused.remove(endpoint);
    }

    /// Live subscriptions of `endpoint`.
    pub fn subscriber_count(&self, endpoint: &str) -> usize {
        self.endpoints
            .lock()
            .subscribers
            .get(endpoint)
            .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Subscribe attempts over all endpoints, refused ones included.
    pub fn subscribe_calls(&self) -> usize {
        self.endpoints.lock().subscribe_calls
    }
}

struct ChannelSubscription {
    rx: mpsc::UnboundedReceiver<FailoverNotification>,
}

#[async_trait]
impl Subscription for ChannelSubscription {
    async fn next(&mut self) -> Option<FailoverNotification> {
        self.rx.recv().await
    }
}

#[async_trait]
impl DiscoverySource for ChannelDiscovery {
    async fn subscribe(&self, endpoint: &str) -> BackendResult<Box<dyn Subscription>> {
        let mut endpoints = self.endpoints.lock();
        endpoints.subscribe_calls += 1;
        if endpoints.refused.contains(endpoint) {
            return Err(BackendError::Connection(format!(
                "discovery endpoint {} unreachable",
                endpoint
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        endpoints
            .subscribers
            .entry(endpoint.to_string())
            .or_default()
            .push(tx);
        Ok(Box::new(ChannelSubscription { rx }))
    }
}
