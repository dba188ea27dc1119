//! In-memory backend for tests and demos.
//!
//! [`MemoryBackend`] stands in for one key-value server plus the connection
//! to it. It understands the per-key command set the sharded client routes,
//! keeps values in a `parking_lot::Mutex<HashMap>`, expires keys lazily and
//! counts every call so tests can assert which shard was touched.
//!
//! Failure injection:
//! - `fail_connections(true)` makes every call fail at connection level
//! - `fail_close(true)` makes `close()` fail
//! - `set_latency(d)` delays every call by `d`

use crate::backend::{BackendConnection, BackendResult, ConnectionFactory};
use crate::command::{Command, CommandKind};
use crate::config::PoolConfig;
use crate::error::BackendError;
use crate::ring::routing_key;
use crate::types::Reply;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use crc::{Crc, CRC_16_XMODEM};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Number of hash slots reported by CLUSTER KEYSLOT.
const SLOT_COUNT: u16 = 16384;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Value {
    Str(Bytes),
    List(VecDeque<Bytes>),
    Hash(BTreeMap<Bytes, Bytes>),
    Set(BTreeSet<Bytes>),
    ZSet(BTreeMap<Bytes, f64>),
    /// HyperLogLog, kept exact.
    Hll(BTreeSet<Bytes>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
            Value::ZSet(_) => "zset",
            Value::Hll(_) => "string",
        }
    }

    fn is_empty_collection(&self) -> bool {
        match self {
            Value::Str(_) | Value::Hll(_) => false,
            Value::List(l) => l.is_empty(),
            Value::Hash(h) => h.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::ZSet(z) => z.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

type Store = HashMap<Bytes, Entry>;

macro_rules! typed_access {
    ($get:ident, $get_mut:ident, $get_or_create:ident, $variant:ident, $ty:ty) => {
        fn $get<'d>(data: &'d Store, key: &[u8]) -> BackendResult<Option<&'d $ty>> {
            match data.get(key) {
                None => Ok(None),
                Some(Entry {
                    value: Value::$variant(v),
                    ..
                }) => Ok(Some(v)),
                Some(_) => Err(BackendError::WrongType),
            }
        }

        fn $get_mut<'d>(data: &'d mut Store, key: &[u8]) -> BackendResult<Option<&'d mut $ty>> {
            match data.get_mut(key) {
                None => Ok(None),
                Some(Entry {
                    value: Value::$variant(v),
                    ..
                }) => Ok(Some(v)),
                Some(_) => Err(BackendError::WrongType),
            }
        }

        fn $get_or_create<'d>(data: &'d mut Store, key: &Bytes) -> BackendResult<&'d mut $ty> {
            let entry = data
                .entry(key.clone())
                .or_insert_with(|| Entry::new(Value::$variant(Default::default())));
            match &mut entry.value {
                Value::$variant(v) => Ok(v),
                _ => Err(BackendError::WrongType),
            }
        }
    };
}

typed_access!(list, list_mut, list_or_create, List, VecDeque<Bytes>);
typed_access!(hash, hash_mut, hash_or_create, Hash, BTreeMap<Bytes, Bytes>);
typed_access!(set, set_mut, set_or_create, Set, BTreeSet<Bytes>);
typed_access!(zset, zset_mut, zset_or_create, ZSet, BTreeMap<Bytes, f64>);

fn hll<'d>(data: &'d Store, key: &[u8]) -> BackendResult<Option<&'d BTreeSet<Bytes>>> {
    match data.get(key) {
        None => Ok(None),
        Some(Entry {
            value: Value::Hll(v),
            ..
        }) => Ok(Some(v)),
        Some(_) => Err(BackendError::WrongType),
    }
}

fn hll_or_create<'d>(data: &'d mut Store, key: &Bytes) -> BackendResult<&'d mut BTreeSet<Bytes>> {
    let entry = data
        .entry(key.clone())
        .or_insert_with(|| Entry::new(Value::Hll(BTreeSet::new())));
    match &mut entry.value {
        Value::Hll(v) => Ok(v),
        _ => Err(BackendError::WrongType),
    }
}

fn string<'d>(data: &'d Store, key: &[u8]) -> BackendResult<Option<&'d Bytes>> {
    match data.get(key) {
        None => Ok(None),
        Some(Entry {
            value: Value::Str(v),
            ..
        }) => Ok(Some(v)),
        Some(_) => Err(BackendError::WrongType),
    }
}

fn not_integer() -> BackendError {
    BackendError::Response("ERR value is not an integer or out of range".into())
}

fn not_float() -> BackendError {
    BackendError::Response("ERR value is not a valid float".into())
}

fn wrong_args(command: &Command) -> BackendError {
    BackendError::Response(format!(
        "ERR wrong number of arguments for '{}' command",
        command.name().to_lowercase()
    ))
}

fn parse_int(bytes: &[u8]) -> BackendResult<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(not_integer)
}

fn parse_float(bytes: &[u8]) -> BackendResult<f64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| match s {
            "-inf" => Some(f64::NEG_INFINITY),
            "+inf" | "inf" => Some(f64::INFINITY),
            other => other.parse().ok(),
        })
        .filter(|f: &f64| !f.is_nan())
        .ok_or_else(not_float)
}

fn format_float(value: f64) -> Bytes {
    Bytes::from(value.to_string())
}

/// Inclusive index range with negative indices counted from the end.
fn index_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len || stop < 0 {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

fn bulk_array<I: IntoIterator<Item = Bytes>>(items: I) -> Reply {
    Reply::Array(items.into_iter().map(Reply::Bulk).collect())
}

fn int_reply(value: usize) -> Reply {
    Reply::Integer(value as i64)
}

/// Members of a sorted set ordered by (score, member).
fn zset_ordered(zset: &BTreeMap<Bytes, f64>) -> Vec<(&Bytes, f64)> {
    let mut members: Vec<(&Bytes, f64)> = zset.iter().map(|(m, s)| (m, *s)).collect();
    members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    members
}

/// Slot of a key, following the `{tag}` rule.
pub fn key_slot(key: &[u8]) -> u16 {
    CRC16.checksum(routing_key(key)) % SLOT_COUNT
}

/// An in-memory key-value backend.
#[derive(Debug)]
pub struct MemoryBackend {
    name: String,
    data: Mutex<Store>,
    latency: Mutex<Duration>,
    completed_at: Mutex<Option<Instant>>,
    executed: AtomicUsize,
    pipeline_calls: AtomicUsize,
    pipelined_commands: AtomicUsize,
    close_calls: AtomicUsize,
    closed: AtomicBool,
    fail_connections: AtomicBool,
    fail_close: AtomicBool,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Mutex::new(HashMap::new()),
            latency: Mutex::new(Duration::ZERO),
            completed_at: Mutex::new(None),
            executed: AtomicUsize::new(0),
            pipeline_calls: AtomicUsize::new(0),
            pipelined_commands: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            fail_connections: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
        }
    }

    /// Create a backend that delays every call.
    pub fn with_latency(name: impl Into<String>, latency: Duration) -> Self {
        let backend = Self::new(name);
        backend.set_latency(latency);
        backend
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Fail every call at connection level.
    pub fn fail_connections(&self, fail: bool) {
        self.fail_connections.store(fail, Ordering::SeqCst);
    }

    /// Fail `close()`.
    pub fn fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Number of single commands executed.
    pub fn executed_commands(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    /// Number of pipelined round trips.
    pub fn pipeline_calls(&self) -> usize {
        self.pipeline_calls.load(Ordering::SeqCst)
    }

    /// Number of commands received through pipelines.
    pub fn pipelined_commands(&self) -> usize {
        self.pipelined_commands.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// When the last call completed.
    pub fn completed_at(&self) -> Option<Instant> {
        *self.completed_at.lock()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.data.lock().values().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if a live key is stored here.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.data.lock().get(key).is_some_and(|e| !e.is_expired())
    }

    fn check_connection(&self) -> BackendResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }
        if self.fail_connections.load(Ordering::SeqCst) {
            return Err(BackendError::Connection(format!(
                "{}: connection reset",
                self.name
            )));
        }
        Ok(())
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn mark_completed(&self) {
        *self.completed_at.lock() = Some(Instant::now());
    }

    /// Apply one command to the store.
    fn apply(&self, command: &Command) -> BackendResult<Reply> {
        let mut data = self.data.lock();
        for key in command.key_args() {
            if data.get(key).is_some_and(Entry::is_expired) {
                data.remove(key);
            }
        }

        let reply = match command.kind() {
            CommandKind::Ping => Reply::Status("PONG".into()),
            CommandKind::DbSize => Reply::Integer(
                data.values().filter(|e| !e.is_expired()).count() as i64,
            ),
            CommandKind::FlushDb | CommandKind::FlushAll => {
                data.clear();
                Reply::ok()
            }
            CommandKind::Del | CommandKind::Unlink => int_reply(
                command
                    .key_args()
                    .iter()
                    .filter(|k| data.remove(*k).is_some())
                    .count(),
            ),
            CommandKind::Exists | CommandKind::Touch => int_reply(
                command
                    .key_args()
                    .iter()
                    .filter(|k| data.contains_key(*k))
                    .count(),
            ),
            CommandKind::MGet => Reply::Array(
                command
                    .key_args()
                    .iter()
                    .map(|k| match data.get(k) {
                        Some(Entry {
                            value: Value::Str(v),
                            ..
                        }) => Reply::Bulk(v.clone()),
                        _ => Reply::Nil,
                    })
                    .collect(),
            ),
            CommandKind::SUnion | CommandKind::SInter | CommandKind::SDiff => {
                Self::set_algebra(&data, command)?
            }
            CommandKind::PfCount => {
                let mut union = BTreeSet::new();
                for key in command.key_args() {
                    union.extend(hll(&data, key)?.into_iter().flatten().cloned());
                }
                int_reply(union.len())
            }
            _ => {
                let key = command.single_key().ok_or_else(|| wrong_args(command))?.clone();
                Self::apply_keyed(&mut data, &key, command)?
            }
        };

        Ok(reply)
    }

    fn set_algebra(data: &Store, command: &Command) -> BackendResult<Reply> {
        let mut sets = Vec::with_capacity(command.key_args().len());
        for key in command.key_args() {
            sets.push(set(data, key)?.cloned().unwrap_or_default());
        }
        let mut iter = sets.into_iter();
        let first = iter.next().ok_or_else(|| wrong_args(command))?;
        let result = iter.fold(first, |acc, next| match command.kind() {
            CommandKind::SUnion => acc.union(&next).cloned().collect(),
            CommandKind::SInter => acc.intersection(&next).cloned().collect(),
            _ => acc.difference(&next).cloned().collect(),
        });
        Ok(bulk_array(result))
    }

    fn apply_keyed(data: &mut Store, key: &Bytes, command: &Command) -> BackendResult<Reply> {
        let args = command.args();
        let arg = |i: usize| args.get(i).ok_or_else(|| wrong_args(command));

        let reply = match command.kind() {
            // ==================== keys ====================
            CommandKind::Expire | CommandKind::PExpire | CommandKind::ExpireAt => {
                let amount = parse_int(arg(0)?)?;
                let ttl = match command.kind() {
                    CommandKind::Expire => amount.saturating_mul(1000),
                    CommandKind::PExpire => amount,
                    _ => {
                        let now = SystemTime::now()
                            .duration_since(UNIX_EPOCH)
                            .unwrap_or_default()
                            .as_millis() as i64;
                        amount.saturating_mul(1000).saturating_sub(now)
                    }
                };
                if !data.contains_key(key) {
                    return Ok(Reply::Integer(0));
                }
                if ttl <= 0 {
                    data.remove(key);
                } else if let Some(entry) = data.get_mut(key) {
                    entry.expires_at = Some(Instant::now() + Duration::from_millis(ttl as u64));
                }
                Reply::Integer(1)
            }
            CommandKind::Ttl | CommandKind::PTtl => match data.get(key) {
                None => Reply::Integer(-2),
                Some(Entry {
                    expires_at: None, ..
                }) => Reply::Integer(-1),
                Some(Entry {
                    expires_at: Some(at),
                    ..
                }) => {
                    let remaining = at.saturating_duration_since(Instant::now()).as_millis();
                    if command.kind() == CommandKind::Ttl {
                        Reply::Integer(((remaining + 500) / 1000) as i64)
                    } else {
                        Reply::Integer(remaining as i64)
                    }
                }
            },
            CommandKind::Persist => match data.get_mut(key) {
                Some(entry) if entry.expires_at.is_some() => {
                    entry.expires_at = None;
                    Reply::Integer(1)
                }
                _ => Reply::Integer(0),
            },
            CommandKind::Type => Reply::Status(
                data.get(key)
                    .map_or("none", |e| e.value.type_name())
                    .to_string(),
            ),
            CommandKind::Dump => match data.get(key) {
                None => Reply::Nil,
                Some(entry) => {
                    let payload = bincode::serialize(&entry.value)
                        .map_err(|e| BackendError::Response(format!("ERR dump failed: {}", e)))?;
                    Reply::Bulk(Bytes::from(payload))
                }
            },

            // ==================== strings ====================
            CommandKind::Get => string(data, key)?.cloned().map_or(Reply::Nil, Reply::Bulk),
            CommandKind::Set => {
                data.insert(key.clone(), Entry::new(Value::Str(arg(0)?.clone())));
                Reply::ok()
            }
            CommandKind::SetEx => {
                let secs = parse_int(arg(0)?)?;
                if secs <= 0 {
                    return Err(BackendError::Response(
                        "ERR invalid expire time in 'setex' command".into(),
                    ));
                }
                let mut entry = Entry::new(Value::Str(arg(1)?.clone()));
                entry.expires_at = Some(Instant::now() + Duration::from_secs(secs as u64));
                data.insert(key.clone(), entry);
                Reply::ok()
            }
            CommandKind::SetNx => {
                if data.contains_key(key) {
                    Reply::Integer(0)
                } else {
                    data.insert(key.clone(), Entry::new(Value::Str(arg(0)?.clone())));
                    Reply::Integer(1)
                }
            }
            CommandKind::GetSet => {
                let previous = string(data, key)?.cloned();
                data.insert(key.clone(), Entry::new(Value::Str(arg(0)?.clone())));
                previous.map_or(Reply::Nil, Reply::Bulk)
            }
            CommandKind::Incr | CommandKind::IncrBy | CommandKind::Decr | CommandKind::DecrBy => {
                let delta = match command.kind() {
                    CommandKind::Incr => 1,
                    CommandKind::Decr => -1,
                    CommandKind::IncrBy => parse_int(arg(0)?)?,
                    _ => parse_int(arg(0)?)?.checked_neg().ok_or_else(not_integer)?,
                };
                let current = match string(data, key)? {
                    Some(v) => parse_int(v)?,
                    None => 0,
                };
                let next = current.checked_add(delta).ok_or_else(not_integer)?;
                let expires_at = data.get(key).and_then(|e| e.expires_at);
                data.insert(
                    key.clone(),
                    Entry {
                        value: Value::Str(Bytes::from(next.to_string())),
                        expires_at,
                    },
                );
                Reply::Integer(next)
            }
            CommandKind::Append => {
                let mut value = BytesMut::from(string(data, key)?.map_or(&b""[..], |v| v.as_ref()));
                value.extend_from_slice(arg(0)?);
                let len = value.len();
                let expires_at = data.get(key).and_then(|e| e.expires_at);
                data.insert(
                    key.clone(),
                    Entry {
                        value: Value::Str(value.freeze()),
                        expires_at,
                    },
                );
                int_reply(len)
            }
            CommandKind::StrLen => int_reply(string(data, key)?.map_or(0, |v| v.len())),
            CommandKind::GetRange => {
                let start = parse_int(arg(0)?)?;
                let end = parse_int(arg(1)?)?;
                let value = string(data, key)?.cloned().unwrap_or_default();
                match index_range(value.len(), start, end) {
                    Some((s, e)) => Reply::Bulk(value.slice(s..=e)),
                    None => Reply::Bulk(Bytes::new()),
                }
            }
            CommandKind::SetRange => {
                let offset = parse_int(arg(0)?)?;
                if offset < 0 {
                    return Err(BackendError::Response("ERR offset is out of range".into()));
                }
                let offset = offset as usize;
                let patch = arg(1)?;
                let mut value = BytesMut::from(string(data, key)?.map_or(&b""[..], |v| v.as_ref()));
                if value.len() < offset + patch.len() {
                    value.resize(offset + patch.len(), 0);
                }
                value[offset..offset + patch.len()].copy_from_slice(patch);
                let len = value.len();
                let expires_at = data.get(key).and_then(|e| e.expires_at);
                data.insert(
                    key.clone(),
                    Entry {
                        value: Value::Str(value.freeze()),
                        expires_at,
                    },
                );
                int_reply(len)
            }

            // ==================== hashes ====================
            CommandKind::HGet => {
                let field = arg(0)?;
                hash(data, key)?
                    .and_then(|h| h.get(field).cloned())
                    .map_or(Reply::Nil, Reply::Bulk)
            }
            CommandKind::HSet | CommandKind::HSetNx => {
                if args.is_empty() || args.len() % 2 != 0 {
                    return Err(wrong_args(command));
                }
                let only_new = command.kind() == CommandKind::HSetNx;
                let hash = hash_or_create(data, key)?;
                let mut added = 0;
                for pair in args.chunks(2) {
                    if only_new && hash.contains_key(&pair[0]) {
                        continue;
                    }
                    if hash.insert(pair[0].clone(), pair[1].clone()).is_none() {
                        added += 1;
                    }
                }
                int_reply(added)
            }
            CommandKind::HMGet => {
                let hash = hash(data, key)?;
                Reply::Array(
                    args.iter()
                        .map(|field| {
                            hash.and_then(|h| h.get(field).cloned())
                                .map_or(Reply::Nil, Reply::Bulk)
                        })
                        .collect(),
                )
            }
            CommandKind::HDel => {
                let removed = match hash_mut(data, key)? {
                    Some(hash) => args.iter().filter(|f| hash.remove(*f).is_some()).count(),
                    None => 0,
                };
                int_reply(removed)
            }
            CommandKind::HExists => {
                let field = arg(0)?;
                Reply::Integer(hash(data, key)?.is_some_and(|h| h.contains_key(field)) as i64)
            }
            CommandKind::HGetAll => Reply::Array(
                hash(data, key)?
                    .into_iter()
                    .flatten()
                    .flat_map(|(f, v)| [Reply::Bulk(f.clone()), Reply::Bulk(v.clone())])
                    .collect(),
            ),
            CommandKind::HKeys => {
                bulk_array(hash(data, key)?.into_iter().flat_map(|h| h.keys().cloned()))
            }
            CommandKind::HVals => {
                bulk_array(hash(data, key)?.into_iter().flat_map(|h| h.values().cloned()))
            }
            CommandKind::HLen => int_reply(hash(data, key)?.map_or(0, |h| h.len())),
            CommandKind::HIncrBy => {
                let field = arg(0)?.clone();
                let delta = parse_int(arg(1)?)?;
                let hash = hash_or_create(data, key)?;
                let current = match hash.get(&field) {
                    Some(v) => parse_int(v)?,
                    None => 0,
                };
                let next = current.checked_add(delta).ok_or_else(not_integer)?;
                hash.insert(field, Bytes::from(next.to_string()));
                Reply::Integer(next)
            }

            // ==================== lists ====================
            CommandKind::LPush | CommandKind::RPush => {
                if args.is_empty() {
                    return Err(wrong_args(command));
                }
                let front = command.kind() == CommandKind::LPush;
                let list = list_or_create(data, key)?;
                for value in args {
                    if front {
                        list.push_front(value.clone());
                    } else {
                        list.push_back(value.clone());
                    }
                }
                int_reply(list.len())
            }
            CommandKind::LPop | CommandKind::RPop => {
                let popped = match list_mut(data, key)? {
                    Some(list) if command.kind() == CommandKind::LPop => list.pop_front(),
                    Some(list) => list.pop_back(),
                    None => None,
                };
                popped.map_or(Reply::Nil, Reply::Bulk)
            }
            CommandKind::LRange => {
                let start = parse_int(arg(0)?)?;
                let stop = parse_int(arg(1)?)?;
                let items = match list(data, key)? {
                    Some(list) => match index_range(list.len(), start, stop) {
                        Some((s, e)) => list.range(s..=e).cloned().collect(),
                        None => Vec::new(),
                    },
                    None => Vec::new(),
                };
                bulk_array(items)
            }
            CommandKind::LLen => int_reply(list(data, key)?.map_or(0, |l| l.len())),
            CommandKind::LIndex => {
                let index = parse_int(arg(0)?)?;
                list(data, key)?
                    .and_then(|l| {
                        let idx = if index < 0 { l.len() as i64 + index } else { index };
                        usize::try_from(idx).ok().and_then(|i| l.get(i).cloned())
                    })
                    .map_or(Reply::Nil, Reply::Bulk)
            }
            CommandKind::LSet => {
                let index = parse_int(arg(0)?)?;
                let value = arg(1)?.clone();
                let list = list_mut(data, key)?
                    .ok_or_else(|| BackendError::Response("ERR no such key".into()))?;
                let idx = if index < 0 { list.len() as i64 + index } else { index };
                let slot = usize::try_from(idx)
                    .ok()
                    .and_then(|i| list.get_mut(i))
                    .ok_or_else(|| BackendError::Response("ERR index out of range".into()))?;
                *slot = value;
                Reply::ok()
            }
            CommandKind::LTrim => {
                let start = parse_int(arg(0)?)?;
                let stop = parse_int(arg(1)?)?;
                if let Some(list) = list_mut(data, key)? {
                    match index_range(list.len(), start, stop) {
                        Some((s, e)) => {
                            list.truncate(e + 1);
                            list.drain(..s);
                        }
                        None => list.clear(),
                    }
                }
                Reply::ok()
            }
            CommandKind::LRem => {
                let count = parse_int(arg(0)?)?;
                let value = arg(1)?.clone();
                let removed = match list_mut(data, key)? {
                    Some(list) => {
                        let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() as usize };
                        let mut removed = 0;
                        if count >= 0 {
                            let mut i = 0;
                            while i < list.len() && removed < limit {
                                if list[i] == value {
                                    list.remove(i);
                                    removed += 1;
                                } else {
                                    i += 1;
                                }
                            }
                        } else {
                            let mut i = list.len();
                            while i > 0 && removed < limit {
                                i -= 1;
                                if list[i] == value {
                                    list.remove(i);
                                    removed += 1;
                                }
                            }
                        }
                        removed
                    }
                    None => 0,
                };
                int_reply(removed)
            }

            // ==================== sets ====================
            CommandKind::SAdd => {
                if args.is_empty() {
                    return Err(wrong_args(command));
                }
                let set = set_or_create(data, key)?;
                int_reply(args.iter().filter(|m| set.insert((*m).clone())).count())
            }
            CommandKind::SRem => {
                let removed = match set_mut(data, key)? {
                    Some(set) => args.iter().filter(|m| set.remove(*m)).count(),
                    None => 0,
                };
                int_reply(removed)
            }
            CommandKind::SMembers => bulk_array(set(data, key)?.into_iter().flatten().cloned()),
            CommandKind::SIsMember => {
                let member = arg(0)?;
                Reply::Integer(set(data, key)?.is_some_and(|s| s.contains(member)) as i64)
            }
            CommandKind::SCard => int_reply(set(data, key)?.map_or(0, |s| s.len())),
            CommandKind::SPop => set_mut(data, key)?
                .and_then(|s| s.pop_first())
                .map_or(Reply::Nil, Reply::Bulk),
            CommandKind::SRandMember => set(data, key)?
                .and_then(|s| s.first().cloned())
                .map_or(Reply::Nil, Reply::Bulk),

            // ==================== sorted sets ====================
            CommandKind::ZAdd => {
                if args.is_empty() || args.len() % 2 != 0 {
                    return Err(wrong_args(command));
                }
                let mut pairs = Vec::with_capacity(args.len() / 2);
                for pair in args.chunks(2) {
                    pairs.push((parse_float(&pair[0])?, pair[1].clone()));
                }
                let zset = zset_or_create(data, key)?;
                let added = pairs
                    .into_iter()
                    .filter(|(score, member)| zset.insert(member.clone(), *score).is_none())
                    .count();
                int_reply(added)
            }
            CommandKind::ZRem => {
                let removed = match zset_mut(data, key)? {
                    Some(zset) => args.iter().filter(|m| zset.remove(*m).is_some()).count(),
                    None => 0,
                };
                int_reply(removed)
            }
            CommandKind::ZScore => {
                let member = arg(0)?;
                zset(data, key)?
                    .and_then(|z| z.get(member).copied())
                    .map_or(Reply::Nil, |s| Reply::Bulk(format_float(s)))
            }
            CommandKind::ZIncrBy => {
                let delta = parse_float(arg(0)?)?;
                let member = arg(1)?.clone();
                let zset = zset_or_create(data, key)?;
                let score = zset.entry(member).or_insert(0.0);
                *score += delta;
                Reply::Bulk(format_float(*score))
            }
            CommandKind::ZCard => int_reply(zset(data, key)?.map_or(0, |z| z.len())),
            CommandKind::ZCount | CommandKind::ZRangeByScore => {
                let min = parse_float(arg(0)?)?;
                let max = parse_float(arg(1)?)?;
                let members: Vec<Bytes> = zset(data, key)?
                    .map(|z| {
                        zset_ordered(z)
                            .into_iter()
                            .filter(|(_, s)| *s >= min && *s <= max)
                            .map(|(m, _)| m.clone())
                            .collect()
                    })
                    .unwrap_or_default();
                if command.kind() == CommandKind::ZCount {
                    int_reply(members.len())
                } else {
                    bulk_array(members)
                }
            }
            CommandKind::ZRank => {
                let member = arg(0)?;
                zset(data, key)?
                    .and_then(|z| zset_ordered(z).iter().position(|(m, _)| *m == member))
                    .map_or(Reply::Nil, int_reply)
            }
            CommandKind::ZRange | CommandKind::ZRevRange => {
                let start = parse_int(arg(0)?)?;
                let stop = parse_int(arg(1)?)?;
                let members = match zset(data, key)? {
                    Some(z) => {
                        let mut ordered = zset_ordered(z);
                        if command.kind() == CommandKind::ZRevRange {
                            ordered.reverse();
                        }
                        match index_range(ordered.len(), start, stop) {
                            Some((s, e)) => ordered[s..=e].iter().map(|(m, _)| (*m).clone()).collect(),
                            None => Vec::new(),
                        }
                    }
                    None => Vec::new(),
                };
                bulk_array(members)
            }

            // ==================== hyperloglog ====================
            CommandKind::PfAdd => {
                let created = !data.contains_key(key);
                let registers = hll_or_create(data, key)?;
                let changed = args.iter().filter(|e| registers.insert((*e).clone())).count();
                Reply::Integer((created || changed > 0) as i64)
            }

            CommandKind::ClusterKeySlot => Reply::Integer(key_slot(key) as i64),
            CommandKind::ClusterCountKeysInSlot => {
                let slot = key_slot(key);
                int_reply(
                    data.iter()
                        .filter(|(k, e)| !e.is_expired() && key_slot(&k[..]) == slot)
                        .count(),
                )
            }

            other => {
                return Err(BackendError::Response(format!(
                    "ERR unknown command '{}'",
                    other.name()
                )))
            }
        };

        if data.get(key).is_some_and(|e| e.value.is_empty_collection()) {
            data.remove(key);
        }
        Ok(reply)
    }
}

#[async_trait]
impl BackendConnection for MemoryBackend {
    async fn execute(&self, command: &Command) -> BackendResult<Reply> {
        self.check_connection()?;
        self.delay().await;
        self.check_connection()?;
        self.executed.fetch_add(1, Ordering::SeqCst);
        let reply = self.apply(command);
        self.mark_completed();
        reply
    }

    async fn pipeline(&self, commands: &[Command]) -> BackendResult<Vec<BackendResult<Reply>>> {
        self.check_connection()?;
        self.delay().await;
        self.check_connection()?;
        self.pipeline_calls.fetch_add(1, Ordering::SeqCst);
        self.pipelined_commands
            .fetch_add(commands.len(), Ordering::SeqCst);
        let replies = commands.iter().map(|c| self.apply(c)).collect();
        self.mark_completed();
        Ok(replies)
    }

    async fn close(&self) -> BackendResult<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(BackendError::Connection(format!(
                "{}: close failed",
                self.name
            )));
        }
        self.closed.store(true, Ordering::SeqCst);
        debug!(backend = %self.name, "Memory backend closed");
        Ok(())
    }
}

/// Connection factory handing out [`MemoryBackend`]s by address.
///
/// A backend is created on first connect to an address and reused after
/// that, so data written through one connection is visible to the next.
#[derive(Debug, Default)]
pub struct MemoryConnectionFactory {
    backends: Mutex<HashMap<String, Arc<MemoryBackend>>>,
    refused: Mutex<HashSet<String>>,
    last_pool: Mutex<Option<PoolConfig>>,
    connects: AtomicUsize,
}

impl MemoryConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `address` with a prepared backend.
    pub fn register(&self, address: impl Into<String>, backend: Arc<MemoryBackend>) {
        self.backends.lock().insert(address.into(), backend);
    }

    /// The backend behind `address`, if anything connected to it.
    pub fn backend(&self, address: &str) -> Option<Arc<MemoryBackend>> {
        self.backends.lock().get(address).cloned()
    }

    /// Refuse connections to `address`.
    pub fn refuse(&self, address: impl Into<String>) {
        self.refused.lock().insert(address.into());
    }

    /// Accept connections to `address` again.
    pub fn accept(&self, address: &str) {
        self.refused.lock().remove(address);
    }

    /// Number of connection attempts.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Pool configuration of the last connection attempt.
    pub fn last_pool(&self) -> Option<PoolConfig> {
        self.last_pool.lock().clone()
    }
}

#[async_trait]
impl ConnectionFactory for MemoryConnectionFactory {
    async fn connect(
        &self,
        address: &str,
        pool: &PoolConfig,
    ) -> BackendResult<Arc<dyn BackendConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.last_pool.lock() = Some(pool.clone());

        if self.refused.lock().contains(address) {
            return Err(BackendError::Connection(format!(
                "connection refused: {}",
                address
            )));
        }

        let backend = self
            .backends
            .lock()
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(MemoryBackend::new(address)))
            .clone();
        // A new connection to a server whose previous connection was closed.
        backend.closed.store(false, Ordering::SeqCst);
        debug!(address, "Memory connection opened");
        Ok(backend)
    }
}
