//! Core types used throughout the sharded client.

use crate::backend::BackendConnection;
use crate::error::{Error, Result};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// Logical shard identifier, stable across failovers.
pub type ShardId = String;

/// One shard: a logical identity bound to a backend connection.
///
/// The connection is owned exclusively by this `ShardInfo`; replacing the
/// shard hands ownership of a new connection to a new `ShardInfo`.
pub struct ShardInfo {
    /// Stable logical identity, also the name failover events use.
    pub id: ShardId,
    /// Seed for the shard's virtual node labels. Empty means position-derived.
    pub tag: String,
    /// Relative share of the ring.
    pub weight: u32,
    /// Address the connection points at.
    pub address: String,
    /// Backend connection handle.
    pub connection: Arc<dyn BackendConnection>,
}

impl ShardInfo {
    /// Create a new shard with weight 1 and no tag.
    pub fn new(
        id: impl Into<ShardId>,
        address: impl Into<String>,
        connection: Arc<dyn BackendConnection>,
    ) -> Self {
        Self {
            id: id.into(),
            tag: String::new(),
            weight: 1,
            address: address.into(),
            connection,
        }
    }

    /// Set the hash tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Set the weight.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Build the replacement for this shard: same identity and ring
    /// placement, new address and connection.
    pub fn successor(
        &self,
        address: impl Into<String>,
        connection: Arc<dyn BackendConnection>,
    ) -> Self {
        Self {
            id: self.id.clone(),
            tag: self.tag.clone(),
            weight: self.weight,
            address: address.into(),
            connection,
        }
    }
}

impl fmt::Debug for ShardInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardInfo")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("weight", &self.weight)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// A backend reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Missing value.
    Nil,
    /// Simple status string (OK, PONG, type names).
    Status(String),
    /// Integer reply.
    Integer(i64),
    /// Binary-safe string.
    Bulk(Bytes),
    /// Nested replies.
    Array(Vec<Reply>),
}

impl Reply {
    /// Create a bulk reply.
    pub fn bulk(value: impl Into<Bytes>) -> Self {
        Reply::Bulk(value.into())
    }

    /// The `OK` status.
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    fn unexpected(self, command: &'static str) -> Error {
        Error::UnexpectedReply {
            command,
            reply: format!("{:?}", self),
        }
    }

    /// Expect a status or nil reply; nil means the write did not happen.
    pub fn into_done(self, command: &'static str) -> Result<bool> {
        match self {
            Reply::Status(_) => Ok(true),
            Reply::Nil => Ok(false),
            other => Err(other.unexpected(command)),
        }
    }

    /// Expect a status string.
    pub fn into_status(self, command: &'static str) -> Result<String> {
        match self {
            Reply::Status(s) => Ok(s),
            other => Err(other.unexpected(command)),
        }
    }

    /// Expect an integer.
    pub fn into_integer(self, command: &'static str) -> Result<i64> {
        match self {
            Reply::Integer(n) => Ok(n),
            other => Err(other.unexpected(command)),
        }
    }

    /// Expect a 0/1 integer.
    pub fn into_bool(self, command: &'static str) -> Result<bool> {
        self.into_integer(command).map(|n| n != 0)
    }

    /// Expect an optional bulk string.
    pub fn into_optional_bytes(self, command: &'static str) -> Result<Option<Bytes>> {
        match self {
            Reply::Bulk(b) => Ok(Some(b)),
            Reply::Nil => Ok(None),
            other => Err(other.unexpected(command)),
        }
    }

    /// Expect an optional float encoded as a bulk string.
    pub fn into_optional_f64(self, command: &'static str) -> Result<Option<f64>> {
        match self {
            Reply::Nil => Ok(None),
            Reply::Bulk(b) => std::str::from_utf8(&b)
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
                .map(Some)
                .ok_or_else(|| Reply::Bulk(b).unexpected(command)),
            other => Err(other.unexpected(command)),
        }
    }

    /// Expect an optional integer (nil or integer).
    pub fn into_optional_integer(self, command: &'static str) -> Result<Option<i64>> {
        match self {
            Reply::Nil => Ok(None),
            Reply::Integer(n) => Ok(Some(n)),
            other => Err(other.unexpected(command)),
        }
    }

    /// Expect an array of bulk strings.
    pub fn into_bytes_vec(self, command: &'static str) -> Result<Vec<Bytes>> {
        match self {
            Reply::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Reply::Bulk(b) => Ok(b),
                    other => Err(other.unexpected(command)),
                })
                .collect(),
            other => Err(other.unexpected(command)),
        }
    }

    /// Expect an array of optional bulk strings.
    pub fn into_optional_bytes_vec(self, command: &'static str) -> Result<Vec<Option<Bytes>>> {
        match self {
            Reply::Array(items) => items
                .into_iter()
                .map(|item| item.into_optional_bytes(command))
                .collect(),
            other => Err(other.unexpected(command)),
        }
    }

    /// Expect a flat array of alternating fields and values.
    pub fn into_pairs(self, command: &'static str) -> Result<Vec<(Bytes, Bytes)>> {
        let flat = self.into_bytes_vec(command)?;
        if flat.len() % 2 != 0 {
            return Err(Error::UnexpectedReply {
                command,
                reply: format!("odd number of elements ({})", flat.len()),
            });
        }
        let mut pairs = Vec::with_capacity(flat.len() / 2);
        let mut iter = flat.into_iter();
        while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
            pairs.push((field, value));
        }
        Ok(pairs)
    }
}
