//! Failover watching.
//!
//! Every configured discovery endpoint gets a [`FailoverWatcher`] task that
//! listens for master switches and swaps the affected shard's connection in
//! place. Ring positions never move on failover: the shard keeps its id,
//! tag and weight, only its address and connection change.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  ┌────────────┐  ┌────────────┐
//! │ endpoint 1 │  │ endpoint 2 │  │ endpoint 3 │   DiscoverySource
//! └─────┬──────┘  └─────┬──────┘  └─────┬──────┘
//!       ▼               ▼               ▼
//! ┌────────────┐  ┌────────────┐  ┌────────────┐
//! │  Watcher   │  │  Watcher   │  │  Watcher   │   one task each
//! └─────┬──────┘  └─────┬──────┘  └─────┬──────┘
//!       └───────────────┼───────────────┘
//!                       ▼
//!            ┌─────────────────────┐
//!            │   FailoverHandler   │  tracked set + address book
//!            └──────────┬──────────┘
//!                       ▼  connect, then replace()
//!            ┌─────────────────────┐
//!            │    ShardedClient    │
//!            └─────────────────────┘
//! ```
//!
//! # Watcher states
//!
//! `Idle → Subscribed → Evaluating → Swapping → Subscribed`, back to `Idle`
//! while resubscribing, and `Closed` after [`FailoverManager::shutdown`].

mod discovery;
mod events;
mod watcher;

pub use discovery::{DiscoverySource, Subscription};
pub use events::{parse_switch_master, FailoverNotification, FailoverOutcome, SWITCH_MASTER_CHANNEL};
pub use watcher::{FailoverHandler, FailoverManager, FailoverWatcher, WatcherState};
