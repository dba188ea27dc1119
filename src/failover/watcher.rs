//! Failover handling and the per-endpoint watcher loop.

use super::discovery::{DiscoverySource, Subscription};
use super::events::{FailoverNotification, FailoverOutcome};
use crate::backend::{BackendConnection, ConnectionFactory};
use crate::client::ShardedClient;
use crate::config::{FailoverConfig, PoolConfig, ShardedConfig};
use crate::error::{Error, Result};
use crate::types::ShardId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of one watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Not subscribed (starting, or waiting to resubscribe).
    Idle,
    /// Waiting for notifications.
    Subscribed,
    /// Checking a notification against the known addresses.
    Evaluating,
    /// Connecting to the new master and swapping the shard.
    Swapping,
    /// Shut down.
    Closed,
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WatcherState::Idle => "idle",
            WatcherState::Subscribed => "subscribed",
            WatcherState::Evaluating => "evaluating",
            WatcherState::Swapping => "swapping",
            WatcherState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// Last known master addresses, shared by every watcher.
#[derive(Debug, Default)]
struct AddressBook {
    /// Address each tracked shard was last switched to.
    known: HashMap<ShardId, String>,
    /// Swaps between evaluation and completion, by target address.
    in_flight: HashMap<ShardId, String>,
    /// Client topology generation `known` was last synced with.
    generation: u64,
}

impl AddressBook {
    /// Reseed `known` from the client after a topology rebuild.
    fn sync(&mut self, client: &ShardedClient) {
        if client.generation() == self.generation {
            return;
        }
        let (generation, shards) = client.snapshot();
        self.known = shards
            .iter()
            .map(|shard| (shard.id.clone(), shard.address.clone()))
            .collect();
        self.in_flight.retain(|id, _| self.known.contains_key(id));
        debug!(generation, shards = self.known.len(), "Failover address book resynced");
        self.generation = generation;
    }
}

/// A swap that passed evaluation.
#[derive(Debug)]
pub(crate) struct PendingSwap {
    shard: ShardId,
    address: String,
}

/// Applies failover notifications to a [`ShardedClient`].
///
/// Every watcher of a client shares one handler, so the same switch
/// announced by several endpoints is applied once.
pub struct FailoverHandler {
    client: Arc<ShardedClient>,
    factory: Arc<dyn ConnectionFactory>,
    pool: PoolConfig,
    /// `None` tracks every shard the client currently has.
    restriction: Option<HashSet<ShardId>>,
    book: Mutex<AddressBook>,
}

impl fmt::Debug for FailoverHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailoverHandler")
            .field("restriction", &self.restriction)
            .field("book", &*self.book.lock())
            .finish_non_exhaustive()
    }
}

impl FailoverHandler {
    /// Track every shard of `client`, seeded with its current addresses.
    ///
    /// Shards added or removed by [`ShardedClient::change_shards`] are picked
    /// up on the next notification.
    pub fn new(
        client: Arc<ShardedClient>,
        factory: Arc<dyn ConnectionFactory>,
        pool: PoolConfig,
    ) -> Self {
        let (generation, shards) = client.snapshot();
        let book = AddressBook {
            known: shards
                .iter()
                .map(|shard| (shard.id.clone(), shard.address.clone()))
                .collect(),
            in_flight: HashMap::new(),
            generation,
        };
        Self {
            client,
            factory,
            pool,
            restriction: None,
            book: Mutex::new(book),
        }
    }

    /// Like [`FailoverHandler::new`], seeded with the configured addresses
    /// and using the configured pool.
    pub fn from_config(
        client: Arc<ShardedClient>,
        factory: Arc<dyn ConnectionFactory>,
        config: &ShardedConfig,
    ) -> Self {
        let book = AddressBook {
            known: config
                .shards
                .iter()
                .map(|shard| (shard.id.clone(), shard.address.clone()))
                .collect(),
            in_flight: HashMap::new(),
            generation: client.generation(),
        };
        Self {
            client,
            factory,
            pool: config.pool.clone(),
            restriction: None,
            book: Mutex::new(book),
        }
    }

    /// Only track these shards, and only while the client has them.
    pub fn with_tracked<I, S>(mut self, shards: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ShardId>,
    {
        self.restriction = Some(shards.into_iter().map(Into::into).collect());
        self
    }

    /// Whether `shard` is currently part of the client and not filtered out.
    pub fn is_tracked(&self, shard: &str) -> bool {
        let allowed = self
            .restriction
            .as_ref()
            .map_or(true, |restriction| restriction.contains(shard));
        allowed && self.client.shard(shard).is_some()
    }

    /// Address `shard` was last switched to.
    pub fn known_address(&self, shard: &str) -> Option<String> {
        let mut book = self.book.lock();
        book.sync(&self.client);
        book.known.get(shard).cloned()
    }

    pub fn client(&self) -> &Arc<ShardedClient> {
        &self.client
    }

    /// Handle one notification end to end.
    ///
    /// Untracked masters are ignored. A notification matching the known
    /// (or in-flight) address fails with [`Error::StaleFailoverEvent`]. A
    /// failed reconnect leaves the shard and the known address untouched.
    pub async fn handle(&self, notification: &FailoverNotification) -> Result<FailoverOutcome> {
        match self.evaluate(notification)? {
            Some(pending) => self.swap(pending).await,
            None => Ok(FailoverOutcome::Untracked),
        }
    }

    /// Check a notification against the address book.
    ///
    /// Returns `None` for untracked masters. On success the swap is
    /// registered as in flight, so a duplicate arriving meanwhile is stale.
    pub(crate) fn evaluate(&self, notification: &FailoverNotification) -> Result<Option<PendingSwap>> {
        let shard = &notification.master_name;
        if !self.is_tracked(shard) {
            return Ok(None);
        }

        let mut book = self.book.lock();
        book.sync(&self.client);
        let address = &notification.address;
        if book.known.get(shard) == Some(address) || book.in_flight.get(shard) == Some(address) {
            return Err(Error::StaleFailoverEvent {
                shard: shard.clone(),
                address: address.clone(),
            });
        }
        book.in_flight.insert(shard.clone(), address.clone());

        Ok(Some(PendingSwap {
            shard: shard.clone(),
            address: address.clone(),
        }))
    }

    /// Connect to the new master and swap it in.
    ///
    /// No lock is held while connecting. If a newer switch for the same
    /// shard was evaluated in the meantime, this one gives way to it.
    pub(crate) async fn swap(&self, pending: PendingSwap) -> Result<FailoverOutcome> {
        let PendingSwap { shard, address } = pending;

        let connection = match self.factory.connect(&address, &self.pool).await {
            Ok(connection) => connection,
            Err(e) => {
                self.clear_in_flight(&shard, &address);
                return Err(Error::from_backend(&shard, e));
            }
        };

        let outcome = {
            let mut book = self.book.lock();
            if book.in_flight.get(&shard) != Some(&address) {
                Err(Error::StaleFailoverEvent {
                    shard: shard.clone(),
                    address: address.clone(),
                })
            } else {
                book.in_flight.remove(&shard);
                let replaced = self
                    .client
                    .shard(&shard)
                    .ok_or_else(|| Error::ShardNotFound(shard.clone()))
                    .and_then(|current| {
                        self.client
                            .replace(&shard, current.successor(&address, connection.clone()))
                    });
                if replaced.is_ok() {
                    book.known.insert(shard.clone(), address.clone());
                }
                replaced
            }
        };

        match outcome {
            Ok(_) => Ok(FailoverOutcome::Replaced { shard, address }),
            Err(e) => {
                discard(&shard, connection).await;
                Err(e)
            }
        }
    }

    fn clear_in_flight(&self, shard: &str, address: &str) {
        let mut book = self.book.lock();
        if book.in_flight.get(shard).map(String::as_str) == Some(address) {
            book.in_flight.remove(shard);
        }
    }
}

/// Close a connection that never made it into the ring.
async fn discard(shard: &str, connection: Arc<dyn BackendConnection>) {
    if let Err(e) = connection.close().await {
        warn!(shard = %shard, error = %e, "Failed to close unused connection");
    }
}

/// Watches one discovery endpoint for the lifetime of the process.
pub struct FailoverWatcher {
    endpoint: String,
    handler: Arc<FailoverHandler>,
    source: Arc<dyn DiscoverySource>,
    backoff: Duration,
    state: watch::Sender<WatcherState>,
}

enum Step<T> {
    Cancelled,
    Ready(T),
}

impl FailoverWatcher {
    pub fn new(
        endpoint: impl Into<String>,
        handler: Arc<FailoverHandler>,
        source: Arc<dyn DiscoverySource>,
        backoff: Duration,
    ) -> Self {
        let (state, _) = watch::channel(WatcherState::Idle);
        Self {
            endpoint: endpoint.into(),
            handler,
            source,
            backoff,
            state,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<WatcherState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: WatcherState) {
        self.state.send_replace(state);
    }

    /// Run until `token` is cancelled.
    ///
    /// Subscription failures and ended subscriptions are retried after the
    /// backoff. Notification errors are logged, never fatal.
    pub async fn run(self, token: CancellationToken) {
        info!(endpoint = %self.endpoint, "Failover watcher started");

        loop {
            let subscribed = tokio::select! {
                _ = token.cancelled() => Step::Cancelled,
                result = self.source.subscribe(&self.endpoint) => Step::Ready(result),
            };

            match subscribed {
                Step::Cancelled => break,
                Step::Ready(Ok(subscription)) => {
                    debug!(endpoint = %self.endpoint, "Subscribed to failover notifications");
                    self.set_state(WatcherState::Subscribed);
                    if self.listen(subscription, &token).await {
                        break;
                    }
                    warn!(endpoint = %self.endpoint, "Failover subscription ended, resubscribing");
                }
                Step::Ready(Err(e)) => {
                    warn!(endpoint = %self.endpoint, error = %e, "Failover subscription failed, retrying");
                }
            }

            self.set_state(WatcherState::Idle);
            let waited = tokio::select! {
                _ = token.cancelled() => Step::Cancelled,
                _ = tokio::time::sleep(self.backoff) => Step::Ready(()),
            };
            if let Step::Cancelled = waited {
                break;
            }
        }

        self.set_state(WatcherState::Closed);
        info!(endpoint = %self.endpoint, "Failover watcher stopped");
    }

    /// Consume one subscription. Returns true if cancelled.
    async fn listen(&self, mut subscription: Box<dyn Subscription>, token: &CancellationToken) -> bool {
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => Step::Cancelled,
                notification = subscription.next() => Step::Ready(notification),
            };
            match next {
                Step::Cancelled => return true,
                Step::Ready(Some(notification)) => {
                    self.process(&notification).await;
                    self.set_state(WatcherState::Subscribed);
                }
                Step::Ready(None) => return false,
            }
        }
    }

    async fn process(&self, notification: &FailoverNotification) {
        self.set_state(WatcherState::Evaluating);

        let pending = match self.handler.evaluate(notification) {
            Ok(Some(pending)) => pending,
            Ok(None) => {
                debug!(
                    endpoint = %self.endpoint,
                    master = %notification.master_name,
                    "Ignoring failover of untracked master"
                );
                return;
            }
            Err(Error::StaleFailoverEvent { shard, address }) => {
                debug!(endpoint = %self.endpoint, shard = %shard, address = %address, "Ignoring stale failover event");
                return;
            }
            Err(e) => {
                error!(endpoint = %self.endpoint, error = %e, "Failed to evaluate failover event");
                return;
            }
        };

        self.set_state(WatcherState::Swapping);
        match self.handler.swap(pending).await {
            Ok(FailoverOutcome::Replaced { shard, address }) => {
                info!(endpoint = %self.endpoint, shard = %shard, address = %address, "Failover applied");
            }
            Ok(FailoverOutcome::Untracked) => {}
            Err(Error::StaleFailoverEvent { shard, address }) => {
                debug!(endpoint = %self.endpoint, shard = %shard, address = %address, "Failover superseded by a newer switch");
            }
            Err(e) => {
                error!(
                    endpoint = %self.endpoint,
                    master = %notification.master_name,
                    address = %notification.address,
                    error = %e,
                    "Failover reconnect failed, keeping current shard"
                );
            }
        }
    }
}

struct WatcherHandle {
    endpoint: String,
    state: watch::Receiver<WatcherState>,
}

/// Owns one watcher per discovery endpoint.
pub struct FailoverManager {
    handler: Arc<FailoverHandler>,
    token: CancellationToken,
    watchers: Vec<WatcherHandle>,
    tasks: Vec<JoinHandle<()>>,
}

impl FailoverManager {
    /// Spawn a watcher for every configured endpoint.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        handler: Arc<FailoverHandler>,
        source: Arc<dyn DiscoverySource>,
        config: &FailoverConfig,
    ) -> Self {
        let token = CancellationToken::new();
        let mut watchers = Vec::with_capacity(config.endpoints.len());
        let mut tasks = Vec::with_capacity(config.endpoints.len());

        for endpoint in &config.endpoints {
            let watcher = FailoverWatcher::new(
                endpoint.clone(),
                handler.clone(),
                source.clone(),
                config.resubscribe_backoff,
            );
            watchers.push(WatcherHandle {
                endpoint: endpoint.clone(),
                state: watcher.state(),
            });
            tasks.push(tokio::spawn(watcher.run(token.child_token())));
        }

        info!(watchers = watchers.len(), "Failover manager started");

        Self {
            handler,
            token,
            watchers,
            tasks,
        }
    }

    pub fn handler(&self) -> &Arc<FailoverHandler> {
        &self.handler
    }

    /// Current state of every watcher, in endpoint order.
    pub fn states(&self) -> Vec<(String, WatcherState)> {
        self.watchers
            .iter()
            .map(|w| (w.endpoint.clone(), *w.state.borrow()))
            .collect()
    }

    /// Observe the state of the watcher for `endpoint`.
    pub fn watch_state(&self, endpoint: &str) -> Option<watch::Receiver<WatcherState>> {
        self.watchers
            .iter()
            .find(|w| w.endpoint == endpoint)
            .map(|w| w.state.clone())
    }

    /// Check if the watchers have not been shut down.
    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Stop every watcher and wait for them to finish.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.token.cancel();
        let mut first_error = None;
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!(error = %e, "Failover watcher task failed");
                first_error.get_or_insert(Error::Internal(format!("failover watcher task failed: {}", e)));
            }
        }
        info!("Failover manager stopped");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for FailoverManager {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryBackend, MemoryConnectionFactory};
    use crate::types::ShardInfo;

    fn setup() -> (Arc<ShardedClient>, Arc<MemoryConnectionFactory>, FailoverHandler) {
        let shards = ["a", "b"]
            .iter()
            .map(|id| {
                ShardInfo::new(
                    *id,
                    format!("{}-1:6379", id),
                    Arc::new(MemoryBackend::new(*id)),
                )
            })
            .collect();
        let client = Arc::new(ShardedClient::from_shards(shards, 160).unwrap());
        let factory = Arc::new(MemoryConnectionFactory::new());
        let handler = FailoverHandler::new(client.clone(), factory.clone(), PoolConfig::default());
        (client, factory, handler)
    }

    #[tokio::test]
    async fn test_handle_replaces_tracked_shard() {
        let (client, factory, handler) = setup();

        let outcome = handler
            .handle(&FailoverNotification::new("a", "a-2:6379"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            FailoverOutcome::Replaced {
                shard: "a".into(),
                address: "a-2:6379".into()
            }
        );
        assert_eq!(client.shard("a").unwrap().address, "a-2:6379");
        assert_eq!(handler.known_address("a").as_deref(), Some("a-2:6379"));
        assert_eq!(factory.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_untracked_and_stale() {
        let (client, factory, handler) = setup();
        let handler = handler.with_tracked(["a"]);

        let outcome = handler
            .handle(&FailoverNotification::new("b", "b-2:6379"))
            .await
            .unwrap();
        assert_eq!(outcome, FailoverOutcome::Untracked);

        let err = handler
            .handle(&FailoverNotification::new("a", "a-1:6379"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StaleFailoverEvent { .. }));

        assert_eq!(factory.connect_count(), 0);
        assert_eq!(client.shard("b").unwrap().address, "b-1:6379");
    }

    #[tokio::test]
    async fn test_in_flight_duplicate_is_stale() {
        let (_client, factory, handler) = setup();

        let notification = FailoverNotification::new("a", "a-2:6379");
        let pending = handler.evaluate(&notification).unwrap().unwrap();
        assert!(matches!(
            handler.evaluate(&notification),
            Err(Error::StaleFailoverEvent { .. })
        ));

        handler.swap(pending).await.unwrap();
        assert!(matches!(
            handler.evaluate(&notification),
            Err(Error::StaleFailoverEvent { .. })
        ));
        assert_eq!(factory.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_superseded_swap_gives_way() {
        let (client, factory, handler) = setup();

        let older = handler
            .evaluate(&FailoverNotification::new("a", "a-2:6379"))
            .unwrap()
            .unwrap();
        let newer = handler
            .evaluate(&FailoverNotification::new("a", "a-3:6379"))
            .unwrap()
            .unwrap();

        handler.swap(newer).await.unwrap();
        let err = handler.swap(older).await.unwrap_err();
        assert!(matches!(err, Error::StaleFailoverEvent { ref address, .. } if address == "a-2:6379"));

        assert_eq!(client.shard("a").unwrap().address, "a-3:6379");
        assert!(factory.backend("a-2:6379").unwrap().is_closed());
    }

    #[tokio::test]
    async fn test_failed_reconnect_keeps_shard() {
        let (client, factory, handler) = setup();
        factory.refuse("a-2:6379");

        let notification = FailoverNotification::new("a", "a-2:6379");
        let err = handler.handle(&notification).await.unwrap_err();
        assert!(matches!(err, Error::ShardUnavailable { .. }));
        assert_eq!(client.shard("a").unwrap().address, "a-1:6379");
        assert_eq!(handler.known_address("a").as_deref(), Some("a-1:6379"));

        factory.accept("a-2:6379");
        handler.handle(&notification).await.unwrap();
        assert_eq!(client.shard("a").unwrap().address, "a-2:6379");
    }

    #[tokio::test]
    async fn test_tracking_follows_change_shards() {
        let (client, factory, handler) = setup();
        let shard = |id: &str, address: &str| {
            ShardInfo::new(id, address, Arc::new(MemoryBackend::new(id)))
        };

        client
            .change_shards(vec![shard("a", "a-1:6379"), shard("c", "c-1:6379")])
            .unwrap();
        assert!(handler.is_tracked("c"));
        assert!(!handler.is_tracked("b"));

        let outcome = handler
            .handle(&FailoverNotification::new("c", "c-2:6379"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            FailoverOutcome::Replaced {
                shard: "c".into(),
                address: "c-2:6379".into()
            }
        );
        assert_eq!(client.shard("c").unwrap().address, "c-2:6379");

        let outcome = handler
            .handle(&FailoverNotification::new("b", "b-2:6379"))
            .await
            .unwrap();
        assert_eq!(outcome, FailoverOutcome::Untracked);

        // A rebuilt shard's new address is already known.
        client
            .change_shards(vec![shard("a", "a-9:6379"), shard("c", "c-2:6379")])
            .unwrap();
        let err = handler
            .handle(&FailoverNotification::new("a", "a-9:6379"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StaleFailoverEvent { ref address, .. } if address == "a-9:6379"));
        assert_eq!(handler.known_address("a").as_deref(), Some("a-9:6379"));
        assert_eq!(factory.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_restriction_still_applies_after_change_shards() {
        let (client, _factory, handler) = setup();
        let handler = handler.with_tracked(["a", "c"]);

        assert!(!handler.is_tracked("c"));
        client
            .change_shards(vec![
                ShardInfo::new("b", "b-1:6379", Arc::new(MemoryBackend::new("b"))),
                ShardInfo::new("c", "c-1:6379", Arc::new(MemoryBackend::new("c"))),
            ])
            .unwrap();

        assert!(handler.is_tracked("c"));
        assert!(!handler.is_tracked("a"));
        assert!(!handler.is_tracked("b"));
    }
}
