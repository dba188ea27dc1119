//! Testing utilities for the sharded client.
//!
//! This module provides in-process stand-ins for the two outside systems
//! the crate talks to:
//! - [`MemoryBackend`] / [`MemoryConnectionFactory`]: key-value backends
//!   with call counting, latency and failure injection
//! - [`ChannelDiscovery`]: a discovery source that tests push master
//!   switches into
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Testing Framework                          │
//! │                                                                 │
//! │  ┌──────────────────────────┐   ┌────────────────────────────┐ │
//! │  │ MemoryConnectionFactory  │   │ ChannelDiscovery           │ │
//! │  │  address → MemoryBackend │   │  endpoint → mpsc senders   │ │
//! │  │  - refuse / accept       │   │  - publish / broadcast     │ │
//! │  │  - connect counting      │   │  - disconnect / refuse     │ │
//! │  └──────────────────────────┘   └────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use shardis::testing::MemoryConnectionFactory;
//! use shardis::{ShardConfig, ShardedClient, ShardedConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> shardis::Result<()> {
//! let factory = MemoryConnectionFactory::new();
//! let config = ShardedConfig::new(vec![
//!     ShardConfig::new("a", "10.0.0.1:6379"),
//!     ShardConfig::new("b", "10.0.0.2:6379"),
//! ]);
//! let client = ShardedClient::connect(&config, &factory).await?;
//!
//! client.set("{user42}name", "Ada").await?;
//! assert_eq!(client.get("{user42}name").await?, Some("Ada".into()));
//! # Ok(())
//! # }
//! ```

mod discovery;
mod memory;

#[cfg(test)]
mod pipeline_tests;
#[cfg(test)]
mod utils;

pub use discovery::ChannelDiscovery;
pub use memory::{key_slot, MemoryBackend, MemoryConnectionFactory};
