//! Sharded client: the routing front door.
//!
//! [`ShardedClient`] owns the ring and the registry behind one reader-writer
//! lock and exposes the per-key command surface of a single backend (see
//! `commands.rs`), transparently routed to the shard owning each key.
//!
//! # Locking Strategy
//!
//! ## Read Path (every command, every pipeline)
//! - `lookup()` takes the read lock, clones the `Arc<ShardInfo>` and
//!   releases the lock before any backend I/O.
//! - Read locks allow full concurrency; `parking_lot::RwLock` guards are not
//!   `Send`, so a guard can never be held across an `.await`.
//!
//! ## Write Path (topology changes)
//! - `replace()` and `change_shards()` take the write lock only to swap
//!   in-memory pointers. Retired connections are closed afterwards on a
//!   background task, once nothing in the ring can reach them.
//! - Both need a Tokio runtime for that task and fail with
//!   `Error::Internal` before touching the topology when there is none.
//! - `change_shards()` bumps the topology generation; `replace()` keeps it.

mod commands;

use crate::backend::{BackendConnection, ConnectionFactory};
use crate::command::{Command, KeyScope};
use crate::config::ShardedConfig;
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use crate::ring::{HashRing, ShardRegistry};
use crate::types::{Reply, ShardId, ShardInfo};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Ring and registry, always mutated together.
#[derive(Debug)]
struct Topology {
    ring: HashRing,
    registry: ShardRegistry,
    /// Bumped by every rebuild; `replace` keeps it.
    generation: u64,
}

impl Topology {
    fn build(shards: &[Arc<ShardInfo>], virtual_nodes: usize, generation: u64) -> Result<Self> {
        let registry = ShardRegistry::from_shards(shards)?;
        let ring = HashRing::build(shards, virtual_nodes)?;
        Ok(Self {
            ring,
            registry,
            generation,
        })
    }
}

/// Shards of a batch, each with the positions of the keys it serves.
#[derive(Debug, Clone)]
pub struct ShardBatch {
    /// Target shard.
    pub shard: Arc<ShardInfo>,
    /// Positions in the original batch, in submission order.
    pub indices: Vec<usize>,
}

/// A client spreading keys over several backends with consistent hashing.
#[derive(Debug)]
pub struct ShardedClient {
    /// Ring and registry.
    topology: RwLock<Topology>,

    /// Virtual nodes per unit of weight.
    virtual_nodes: usize,
}

impl ShardedClient {
    /// Create a client over already-connected shards.
    pub fn from_shards(shards: Vec<ShardInfo>, virtual_nodes: usize) -> Result<Self> {
        let shards: Vec<Arc<ShardInfo>> = shards.into_iter().map(Arc::new).collect();
        let topology = Topology::build(&shards, virtual_nodes, 0)?;

        info!(
            shards = shards.len(),
            ring_entries = topology.ring.len(),
            "Sharded client created"
        );

        Ok(Self {
            topology: RwLock::new(topology),
            virtual_nodes,
        })
    }

    /// Connect every configured shard and build the client.
    ///
    /// If one shard cannot be reached, the connections opened so far are
    /// closed and the error is returned.
    pub async fn connect(config: &ShardedConfig, factory: &dyn ConnectionFactory) -> Result<Self> {
        config.validate()?;

        let mut shards = Vec::with_capacity(config.shards.len());
        for shard_config in &config.shards {
            match factory.connect(&shard_config.address, &config.pool).await {
                Ok(connection) => {
                    debug!(shard = %shard_config.id, address = %shard_config.address, "Shard connected");
                    shards.push(
                        ShardInfo::new(&shard_config.id, &shard_config.address, connection)
                            .with_tag(&shard_config.tag)
                            .with_weight(shard_config.weight),
                    );
                }
                Err(e) => {
                    warn!(
                        shard = %shard_config.id,
                        address = %shard_config.address,
                        error = %e,
                        "Shard connection failed, closing opened shards"
                    );
                    for opened in &shards {
                        if let Err(close_err) = opened.connection.close().await {
                            warn!(shard = %opened.id, error = %close_err, "Failed to close shard");
                        }
                    }
                    return Err(Error::from_backend(&shard_config.id, e));
                }
            }
        }

        Self::from_shards(shards, config.virtual_nodes_per_shard)
    }

    /// Get the shard serving `key`.
    pub fn lookup(&self, key: &[u8]) -> Arc<ShardInfo> {
        self.topology.read().ring.lookup(key)
    }

    /// Get the id of the shard serving `key`.
    pub fn shard_for_key(&self, key: &[u8]) -> ShardId {
        self.lookup(key).id.clone()
    }

    /// Get a shard by id.
    pub fn shard(&self, id: &str) -> Option<Arc<ShardInfo>> {
        self.topology.read().registry.get(id).cloned()
    }

    /// All shards in configuration order.
    pub fn shards(&self) -> Vec<Arc<ShardInfo>> {
        self.topology.read().registry.all()
    }

    /// All shard ids in configuration order.
    pub fn shard_ids(&self) -> Vec<ShardId> {
        self.topology.read().registry.ids().to_vec()
    }

    /// Number of ring positions.
    pub fn ring_len(&self) -> usize {
        self.topology.read().ring.len()
    }

    /// Virtual nodes per unit of weight.
    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }

    /// Number of `change_shards` rebuilds so far.
    pub fn generation(&self) -> u64 {
        self.topology.read().generation
    }

    /// Shards together with the generation they belong to.
    pub fn snapshot(&self) -> (u64, Vec<Arc<ShardInfo>>) {
        let topology = self.topology.read();
        (topology.generation, topology.registry.all())
    }

    /// Route a batch of keys to their shards.
    ///
    /// All lookups happen under one read-lock acquisition, so the whole
    /// batch sees the same topology. Groups are ordered by first appearance.
    pub fn route_batch<'k, I>(&self, keys: I) -> Vec<ShardBatch>
    where
        I: IntoIterator<Item = &'k [u8]>,
    {
        let topology = self.topology.read();
        let mut groups: Vec<ShardBatch> = Vec::new();
        let mut by_shard: HashMap<ShardId, usize> = HashMap::new();

        for (idx, key) in keys.into_iter().enumerate() {
            let shard = topology.ring.lookup(key);
            match by_shard.get(&shard.id) {
                Some(&group) => groups[group].indices.push(idx),
                None => {
                    by_shard.insert(shard.id.clone(), groups.len());
                    groups.push(ShardBatch {
                        shard,
                        indices: vec![idx],
                    });
                }
            }
        }

        groups
    }

    /// Replace the shard registered under `id`.
    ///
    /// Ring positions are unchanged: every entry that pointed at the old
    /// shard now points at `new_shard`, so only that shard's keys move and
    /// they move together. The old connection is closed on a background
    /// task after the swap; a close failure is only logged. Returns the
    /// retired shard.
    ///
    /// Outside a Tokio runtime nothing is changed and [`Error::Internal`] is
    /// returned.
    pub fn replace(&self, id: &str, new_shard: ShardInfo) -> Result<Arc<ShardInfo>> {
        if new_shard.id != id {
            return Err(Error::Config(format!(
                "replacement shard id {} does not match {}",
                new_shard.id, id
            )));
        }

        let runtime = current_runtime()?;
        let new_shard = Arc::new(new_shard);
        let (old, rewritten) = {
            let mut topology = self.topology.write();
            let old = topology
                .registry
                .get(id)
                .cloned()
                .ok_or_else(|| Error::ShardNotFound(id.to_string()))?;
            topology.registry.replace(new_shard.clone())?;
            let rewritten = topology.ring.replace_shard(&old, new_shard.clone());
            (old, rewritten)
        };

        info!(
            shard = %id,
            old_address = %old.address,
            new_address = %new_shard.address,
            rewritten,
            "Shard replaced"
        );

        if !same_connection(&old.connection, &new_shard.connection) {
            spawn_close(&runtime, old.clone());
        }
        Ok(old)
    }

    /// Rebuild the whole topology from a new shard list.
    ///
    /// Connections of retired shards that are not reused by the new list are
    /// closed in the background. Outside a Tokio runtime nothing is changed
    /// and [`Error::Internal`] is returned.
    pub fn change_shards(&self, shards: Vec<ShardInfo>) -> Result<()> {
        let runtime = current_runtime()?;
        let shards: Vec<Arc<ShardInfo>> = shards.into_iter().map(Arc::new).collect();
        let mut topology = Topology::build(&shards, self.virtual_nodes, 0)?;
        let ring_entries = topology.ring.len();

        let (retired, generation) = {
            let mut current = self.topology.write();
            topology.generation = current.generation + 1;
            let generation = topology.generation;
            (std::mem::replace(&mut *current, topology).registry.all(), generation)
        };

        info!(
            shards = shards.len(),
            ring_entries,
            generation,
            "Shard topology rebuilt"
        );

        for old in retired {
            let reused = shards
                .iter()
                .any(|s| same_connection(&s.connection, &old.connection));
            if !reused {
                spawn_close(&runtime, old);
            }
        }
        Ok(())
    }

    /// Execute an arbitrary command, routed by its key.
    ///
    /// Global-scope commands and commands with anything but exactly one key
    /// are rejected with [`Error::UnsupportedOperation`] before any backend
    /// is contacted.
    pub async fn execute(&self, command: Command) -> Result<Reply> {
        let shard = self.route(&command)?;
        shard
            .connection
            .execute(&command)
            .await
            .map_err(|e| Error::from_backend(&shard.id, e))
    }

    /// Resolve the shard for a routable command.
    fn route(&self, command: &Command) -> Result<Arc<ShardInfo>> {
        let kind = command.kind();
        if kind.scope() == KeyScope::Global {
            return Err(Error::unsupported(
                kind.name(),
                "global-scope command has no single owning shard",
            ));
        }
        match command.single_key() {
            Some(key) => Ok(self.lookup(key)),
            None => Err(Error::unsupported(
                kind.name(),
                format!(
                    "exactly one key required, got {}; keys may live on different shards",
                    command.key_args().len()
                ),
            )),
        }
    }

    /// Start a pipeline over this client.
    pub fn pipeline(&self) -> Pipeline<'_> {
        Pipeline::new(self)
    }

    /// Ping every shard over its connection.
    pub async fn ping_all(&self) -> Vec<(ShardId, Result<()>)> {
        let ping = Command::new(crate::command::CommandKind::Ping);
        let mut results = Vec::new();
        for shard in self.shards() {
            let result = shard
                .connection
                .execute(&ping)
                .await
                .map(|_| ())
                .map_err(|e| Error::from_backend(&shard.id, e));
            results.push((shard.id.clone(), result));
        }
        results
    }

    /// Close every shard connection.
    ///
    /// All shards are closed even if some fail; the first failure is returned.
    pub async fn close(&self) -> Result<()> {
        let mut first_error = None;
        for shard in self.shards() {
            if let Err(e) = shard.connection.close().await {
                warn!(shard = %shard.id, error = %e, "Failed to close shard");
                first_error.get_or_insert(Error::from_backend(&shard.id, e));
            }
        }
        info!("Sharded client closed");
        first_error.map_or(Ok(()), Err)
    }
}

fn same_connection(a: &Arc<dyn BackendConnection>, b: &Arc<dyn BackendConnection>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

fn current_runtime() -> Result<Handle> {
    Handle::try_current().map_err(|_| {
        Error::Internal("topology changes must run inside a Tokio runtime".into())
    })
}

/// Close a retired shard's connection without blocking the caller.
fn spawn_close(runtime: &Handle, shard: Arc<ShardInfo>) {
    runtime.spawn(async move {
        match shard.connection.close().await {
            Ok(()) => debug!(shard = %shard.id, address = %shard.address, "Retired connection closed"),
            Err(e) => warn!(
                shard = %shard.id,
                address = %shard.address,
                error = %e,
                "Failed to close retired connection"
            ),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;
    use crate::config::ShardConfig;
    use crate::testing::{MemoryBackend, MemoryConnectionFactory};

    fn memory_shards(ids: &[&str]) -> (Vec<ShardInfo>, Vec<Arc<MemoryBackend>>) {
        let backends: Vec<Arc<MemoryBackend>> =
            ids.iter().map(|id| Arc::new(MemoryBackend::new(*id))).collect();
        let shards = ids
            .iter()
            .zip(&backends)
            .map(|(id, backend)| ShardInfo::new(*id, format!("{}:6379", id), backend.clone()))
            .collect();
        (shards, backends)
    }

    #[test]
    fn test_from_shards_rejects_duplicates() {
        let (mut shards, _) = memory_shards(&["a", "b"]);
        shards.push(ShardInfo::new("a", "x", Arc::new(MemoryBackend::new("a2"))));
        assert!(matches!(
            ShardedClient::from_shards(shards, 160),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_route_batch_groups_in_order() {
        let (shards, _) = memory_shards(&["a", "b", "c"]);
        let client = ShardedClient::from_shards(shards, 160).unwrap();

        let keys: Vec<String> = (0..50).map(|i| format!("key-{}", i)).collect();
        let groups = client.route_batch(keys.iter().map(|k| k.as_bytes()));

        let total: usize = groups.iter().map(|g| g.indices.len()).sum();
        assert_eq!(total, 50);
        for group in &groups {
            assert!(group.indices.windows(2).all(|w| w[0] < w[1]));
            for &idx in &group.indices {
                assert_eq!(client.shard_for_key(keys[idx].as_bytes()), group.shard.id);
            }
        }
        assert_eq!(groups[0].indices[0], 0);
    }

    #[tokio::test]
    async fn test_execute_rejects_before_backend() {
        let (shards, backends) = memory_shards(&["a", "b"]);
        let client = ShardedClient::from_shards(shards, 160).unwrap();

        let err = client
            .execute(Command::new(CommandKind::Del).keys(["x", "y"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation { command: "DEL", .. }));

        let err = client.execute(Command::new(CommandKind::FlushAll)).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation { command: "FLUSHALL", .. }));

        let err = client.execute(Command::new(CommandKind::Get)).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation { .. }));

        assert!(backends.iter().all(|b| b.executed_commands() == 0));
    }

    #[tokio::test]
    async fn test_replace_unknown_or_mismatched_id() {
        let (shards, _) = memory_shards(&["a"]);
        let client = ShardedClient::from_shards(shards, 160).unwrap();

        let stray = ShardInfo::new("z", "z:6379", Arc::new(MemoryBackend::new("z")));
        assert!(matches!(
            client.replace("z", stray),
            Err(Error::ShardNotFound(id)) if id == "z"
        ));

        let mismatched = ShardInfo::new("b", "b:6379", Arc::new(MemoryBackend::new("b")));
        assert!(matches!(client.replace("a", mismatched), Err(Error::Config(_))));
    }

    #[test]
    fn test_topology_changes_need_a_runtime() {
        let (shards, backends) = memory_shards(&["a", "b"]);
        let client = ShardedClient::from_shards(shards, 160).unwrap();

        let current = client.shard("a").unwrap();
        let next = current.successor("a-2:6379", Arc::new(MemoryBackend::new("a-2")));
        assert!(matches!(client.replace("a", next), Err(Error::Internal(_))));
        assert_eq!(client.shard("a").unwrap().address, "a:6379");

        let (rebuilt, _) = memory_shards(&["c"]);
        assert!(matches!(client.change_shards(rebuilt), Err(Error::Internal(_))));
        assert_eq!(client.shard_ids(), ["a", "b"]);
        assert_eq!(client.generation(), 0);
        assert!(backends.iter().all(|b| !b.is_closed()));
    }

    #[tokio::test]
    async fn test_generation_counts_rebuilds_only() {
        let (shards, _) = memory_shards(&["a", "b"]);
        let client = ShardedClient::from_shards(shards, 160).unwrap();

        let current = client.shard("a").unwrap();
        client
            .replace("a", current.successor("a-2:6379", Arc::new(MemoryBackend::new("a-2"))))
            .unwrap();
        assert_eq!(client.generation(), 0);

        let (rebuilt, _) = memory_shards(&["c"]);
        client.change_shards(rebuilt).unwrap();
        let (generation, shards) = client.snapshot();
        assert_eq!(generation, 1);
        assert_eq!(shards.len(), 1);
        assert_eq!(shards[0].id, "c");
    }

    #[tokio::test]
    async fn test_connect_closes_opened_shards_on_failure() {
        let factory = MemoryConnectionFactory::new();
        factory.refuse("10.0.0.3:6379");
        let config = ShardedConfig::new(vec![
            ShardConfig::new("a", "10.0.0.1:6379"),
            ShardConfig::new("b", "10.0.0.2:6379"),
            ShardConfig::new("c", "10.0.0.3:6379"),
        ]);

        let err = ShardedClient::connect(&config, &factory).await.unwrap_err();
        assert!(matches!(err, Error::ShardUnavailable { ref shard, .. } if shard == "c"));

        assert!(factory.backend("10.0.0.1:6379").unwrap().is_closed());
        assert!(factory.backend("10.0.0.2:6379").unwrap().is_closed());
    }

    #[tokio::test]
    async fn test_connect_applies_config() {
        let factory = MemoryConnectionFactory::new();
        let config = ShardedConfig::new(vec![
            ShardConfig::new("a", "10.0.0.1:6379").with_weight(2),
            ShardConfig::new("b", "10.0.0.2:6379").with_tag("beta"),
        ])
        .with_virtual_nodes(10);

        let client = ShardedClient::connect(&config, &factory).await.unwrap();
        assert_eq!(client.shard_ids(), ["a", "b"]);
        assert_eq!(client.ring_len(), 30);
        assert_eq!(client.shard("a").unwrap().weight, 2);
        assert_eq!(client.shard("b").unwrap().tag, "beta");
        assert_eq!(factory.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_close_reports_first_failure() {
        let (shards, backends) = memory_shards(&["a", "b"]);
        backends[0].fail_close(true);
        let client = ShardedClient::from_shards(shards, 160).unwrap();

        let err = client.close().await.unwrap_err();
        assert!(matches!(err, Error::ShardUnavailable { ref shard, .. } if shard == "a"));
        assert!(backends[1].is_closed());
    }

    #[tokio::test]
    async fn test_ping_all() {
        let (shards, backends) = memory_shards(&["a", "b"]);
        backends[1].fail_connections(true);
        let client = ShardedClient::from_shards(shards, 160).unwrap();

        let results = client.ping_all().await;
        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_ok());
        assert!(matches!(results[1].1, Err(Error::ShardUnavailable { .. })));
    }
}
