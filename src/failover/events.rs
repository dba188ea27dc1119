//! Failover notifications and their outcomes.

use crate::types::ShardId;
use std::fmt;

/// Sentinel channel announcing master switches.
pub const SWITCH_MASTER_CHANNEL: &str = "+switch-master";

/// A master of some shard moved to a new address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverNotification {
    /// Master name, matched against shard ids.
    pub master_name: String,
    /// New master address as `host:port`.
    pub address: String,
}

impl FailoverNotification {
    pub fn new(master_name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            master_name: master_name.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for FailoverNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.master_name, self.address)
    }
}

/// Parse a `+switch-master` payload.
///
/// The payload is `<name> <old-ip> <old-port> <new-ip> <new-port>`. Returns
/// `None` for anything else.
pub fn parse_switch_master(payload: &str) -> Option<FailoverNotification> {
    let parts: Vec<&str> = payload.split_whitespace().collect();
    match parts.as_slice() {
        [name, _old_ip, _old_port, new_ip, new_port] => {
            new_port.parse::<u16>().ok()?;
            Some(FailoverNotification::new(
                *name,
                format!("{}:{}", new_ip, new_port),
            ))
        }
        _ => None,
    }
}

/// What handling a notification did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverOutcome {
    /// The master name is not one of this client's shards.
    Untracked,
    /// The shard now points at `address`.
    Replaced { shard: ShardId, address: String },
}
