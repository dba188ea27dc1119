//! Backend connection boundary.
//!
//! The sharding layer never speaks a wire protocol itself; it forwards
//! [`Command`]s to whatever implements [`BackendConnection`]. Connections
//! are created through a [`ConnectionFactory`] with the shared
//! [`PoolConfig`]; failover replacements use the same one.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │             ShardedClient / Pipeline                      │
//! └───────────────────────────────────────────────────────────┘
//!                            │ Command / &[Command]
//!                            ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │            BackendConnection Trait                        │
//! │   execute(&Command)  pipeline(&[Command])  close()        │
//! └───────────────────────────────────────────────────────────┘
//!           │                                  │
//!           ▼                                  ▼
//! ┌──────────────────┐              ┌──────────────────────┐
//! │ MemoryBackend    │              │ Real client driver   │
//! │ (testing)        │              │ (supplied by caller) │
//! └──────────────────┘              └──────────────────────┘
//! ```

use crate::command::Command;
use crate::config::PoolConfig;
use crate::error::BackendError;
use crate::types::Reply;
use async_trait::async_trait;
use std::sync::Arc;

/// Result of one backend call.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// An already-connected handle to one backend.
#[async_trait]
pub trait BackendConnection: Send + Sync + 'static {
    /// Execute a single command.
    async fn execute(&self, command: &Command) -> BackendResult<Reply>;

    /// Execute commands as one pipelined round trip.
    ///
    /// Replies must come back in submission order, one per command. The
    /// outer error is for failures that hit the whole batch (the
    /// connection could not be used at all).
    async fn pipeline(&self, commands: &[Command]) -> BackendResult<Vec<BackendResult<Reply>>>;

    /// Close the connection and release its resources.
    async fn close(&self) -> BackendResult<()>;
}

/// Builds backend connections.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Connect to `address` using the shared pool configuration.
    async fn connect(
        &self,
        address: &str,
        pool: &PoolConfig,
    ) -> BackendResult<Arc<dyn BackendConnection>>;
}
