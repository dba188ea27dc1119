//! Discovery service boundary.
//!
//! A [`DiscoverySource`] opens subscriptions to one discovery endpoint (a
//! sentinel, in Redis terms). A subscription yields master-switch
//! notifications until the connection drops; the watcher then subscribes
//! again.

use super::events::FailoverNotification;
use crate::backend::BackendResult;
use async_trait::async_trait;

/// A live subscription to master-switch notifications.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next notification. `None` means the subscription ended.
    async fn next(&mut self) -> Option<FailoverNotification>;
}

/// Opens subscriptions to discovery endpoints.
#[async_trait]
pub trait DiscoverySource: Send + Sync + 'static {
    /// Subscribe to master switches announced by `endpoint`.
    async fn subscribe(&self, endpoint: &str) -> BackendResult<Box<dyn Subscription>>;
}
