//! Consistent-hash shard topology.
//!
//! This module holds the two in-memory structures routing depends on:
//! - [`HashRing`]: sorted virtual-node positions mapping keys to shards
//! - [`ShardRegistry`]: the authoritative `id → ShardInfo` map
//!
//! Both are guarded together by the client's topology lock, see
//! [`ShardedClient`](crate::client::ShardedClient).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Topology                            │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │                    HashRing                           │  │
//! │  │  ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐   │  │
//! │  │  │VN A │→│VN B │→│VN C │→│VN A │→│VN B │→│VN C │   │  │
//! │  │  └─────┘ └─────┘ └─────┘ └─────┘ └─────┘ └─────┘   │  │
//! │  │   weight × 160 virtual nodes per shard              │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │ ShardRegistry   "a" → ShardInfo  "b" → ShardInfo ... │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! │                                                             │
//! │  Key "{user42}profile" → hash("user42") → VN → Shard B     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod hashring;
mod registry;

pub use hashring::{hash_key, routing_key, HashRing, RingEntry, DEFAULT_VIRTUAL_NODES_PER_SHARD};
pub use registry::ShardRegistry;
