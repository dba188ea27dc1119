//! # Shardis
//!
//! A client-side sharding layer over independent key-value backends.
//!
//! Keys are spread over shards with a consistent hash ring, multi-command
//! pipelines fan out to every involved shard in parallel and come back in
//! submission order, and a failover watcher swaps a shard's connection in
//! place when a sentinel announces a new master.
//!
//! ## Features
//!
//! - **Consistent hashing**: weighted virtual nodes on a 64-bit XxHash ring
//! - **Key tags**: `{tag}` keys always land on the same shard
//! - **Typed command surface**: strings, hashes, lists, sets and sorted sets
//! - **Pipelines**: one round trip per shard, results in submission order
//! - **Failover**: sentinel `+switch-master` events replace a shard's
//!   connection without remapping any key
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                          ShardedClient                            │
//! │                                                                   │
//! │   execute / typed commands          Pipeline::exec                │
//! │            │                              │                       │
//! │            ▼                              ▼                       │
//! │   ┌─────────────────────────────────────────────────────┐         │
//! │   │        RwLock<Topology { HashRing, ShardRegistry }> │◄──┐     │
//! │   └─────────────────────────────────────────────────────┘   │     │
//! │            │ Arc<ShardInfo>                                 │     │
//! │            ▼                                   replace()    │     │
//! │   ┌──────────────────┐                    ┌──────────────────┐    │
//! │   │ BackendConnection│  ...one per shard  │ FailoverManager  │    │
//! │   └──────────────────┘                    │  watcher/endpoint│    │
//! │                                           └──────────────────┘    │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shardis::testing::MemoryConnectionFactory;
//! use shardis::{ShardConfig, ShardedClient, ShardedConfig};
//!
//! # async fn example() -> shardis::Result<()> {
//! let config = ShardedConfig::new(vec![
//!     ShardConfig::new("cache-1", "10.0.0.1:6379"),
//!     ShardConfig::new("cache-2", "10.0.0.2:6379").with_weight(2),
//! ]);
//! let client = ShardedClient::connect(&config, &MemoryConnectionFactory::new()).await?;
//!
//! client.set("{user42}name", "Ada").await?;
//!
//! let mut pipeline = client.pipeline();
//! pipeline.get("{user42}name");
//! pipeline.incr("visits");
//! pipeline.exec().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Failover
//!
//! ```rust,ignore
//! use shardis::failover::{FailoverHandler, FailoverManager};
//!
//! let handler = Arc::new(FailoverHandler::from_config(client.clone(), factory, &config));
//! let mut manager = FailoverManager::start(handler, sentinels, &config.failover);
//!
//! // Master switches are applied in the background
//! manager.shutdown().await?;
//! ```

pub mod backend;
pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod failover;
pub mod pipeline;
pub mod ring;
pub mod testing;
pub mod types;

// Re-export main types for convenience
pub use client::{ShardBatch, ShardedClient};
pub use config::{FailoverConfig, PoolConfig, ShardConfig, ShardedConfig};
pub use error::{BackendError, Error, Result};
pub use types::{Reply, ShardId, ShardInfo};

// Re-export backend seam
pub use backend::{BackendConnection, BackendResult, ConnectionFactory};

// Re-export command types
pub use command::{Command, CommandCategory, CommandKind, KeyScope};

// Re-export ring types
pub use ring::{HashRing, ShardRegistry, DEFAULT_VIRTUAL_NODES_PER_SHARD};

// Re-export pipeline types
pub use pipeline::{Pipeline, PipelineCommand};

// Re-export failover types
pub use failover::{
    DiscoverySource, FailoverHandler, FailoverManager, FailoverNotification, FailoverOutcome,
    FailoverWatcher, Subscription, WatcherState,
};
