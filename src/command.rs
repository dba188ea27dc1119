//! Backend commands as routed by the sharding layer.
//!
//! A [`Command`] is the unit both routers work with: the command kind, the
//! key arguments (the only part routing looks at) and the remaining
//! arguments, forwarded to the backend untouched.

use bytes::Bytes;
use std::fmt;

/// Command family, used by the pipeline allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCategory {
    /// Generic key management (DEL, EXPIRE, TTL, ...).
    Keys,
    Strings,
    Hashes,
    Lists,
    Sets,
    SortedSets,
    /// Key serialization (DUMP).
    Serialization,
    /// Slot/topology inspection.
    Cluster,
    Server,
    Scripting,
    PubSub,
    Transactions,
}

impl CommandCategory {
    /// Categories that a sharded pipeline may carry.
    pub const PIPELINE_ALLOWED: [CommandCategory; 6] = [
        CommandCategory::Keys,
        CommandCategory::Strings,
        CommandCategory::Hashes,
        CommandCategory::Lists,
        CommandCategory::Sets,
        CommandCategory::SortedSets,
    ];

    /// Check if commands of this category may be pipelined across shards.
    pub fn is_pipeline_allowed(&self) -> bool {
        Self::PIPELINE_ALLOWED.contains(self)
    }
}

impl fmt::Display for CommandCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandCategory::Keys => "keys",
            CommandCategory::Strings => "strings",
            CommandCategory::Hashes => "hashes",
            CommandCategory::Lists => "lists",
            CommandCategory::Sets => "sets",
            CommandCategory::SortedSets => "sorted-sets",
            CommandCategory::Serialization => "serialization",
            CommandCategory::Cluster => "cluster",
            CommandCategory::Server => "server",
            CommandCategory::Scripting => "scripting",
            CommandCategory::PubSub => "pubsub",
            CommandCategory::Transactions => "transactions",
        };
        write!(f, "{}", name)
    }
}

/// How many keys a command addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScope {
    /// Exactly one key.
    Single,
    /// Syntactically accepts several keys; routable only with one.
    Multi,
    /// Whole keyspace, server state, or cross-key semantics. Never routable.
    Global,
}

macro_rules! command_kinds {
    ($($variant:ident => ($name:literal, $category:ident, $scope:ident)),+ $(,)?) => {
        /// Every command the sharding layer knows about.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum CommandKind {
            $($variant),+
        }

        impl CommandKind {
            /// Wire name of the command.
            pub fn name(&self) -> &'static str {
                match self {
                    $(CommandKind::$variant => $name),+
                }
            }

            /// Command family.
            pub fn category(&self) -> CommandCategory {
                match self {
                    $(CommandKind::$variant => CommandCategory::$category),+
                }
            }

            /// Key scope of the command.
            pub fn scope(&self) -> KeyScope {
                match self {
                    $(CommandKind::$variant => KeyScope::$scope),+
                }
            }
        }
    };
}

command_kinds! {
    // keys
    Del => ("DEL", Keys, Multi),
    Exists => ("EXISTS", Keys, Multi),
    Touch => ("TOUCH", Keys, Multi),
    Unlink => ("UNLINK", Keys, Multi),
    Expire => ("EXPIRE", Keys, Single),
    PExpire => ("PEXPIRE", Keys, Single),
    ExpireAt => ("EXPIREAT", Keys, Single),
    Ttl => ("TTL", Keys, Single),
    PTtl => ("PTTL", Keys, Single),
    Persist => ("PERSIST", Keys, Single),
    Type => ("TYPE", Keys, Single),
    Dump => ("DUMP", Serialization, Single),

    // strings
    Get => ("GET", Strings, Single),
    Set => ("SET", Strings, Single),
    SetEx => ("SETEX", Strings, Single),
    SetNx => ("SETNX", Strings, Single),
    GetSet => ("GETSET", Strings, Single),
    MGet => ("MGET", Strings, Multi),
    Incr => ("INCR", Strings, Single),
    IncrBy => ("INCRBY", Strings, Single),
    Decr => ("DECR", Strings, Single),
    DecrBy => ("DECRBY", Strings, Single),
    Append => ("APPEND", Strings, Single),
    StrLen => ("STRLEN", Strings, Single),
    GetRange => ("GETRANGE", Strings, Single),
    SetRange => ("SETRANGE", Strings, Single),
    PfAdd => ("PFADD", Strings, Single),
    PfCount => ("PFCOUNT", Strings, Multi),

    // hashes
    HGet => ("HGET", Hashes, Single),
    HSet => ("HSET", Hashes, Single),
    HSetNx => ("HSETNX", Hashes, Single),
    HMGet => ("HMGET", Hashes, Single),
    HDel => ("HDEL", Hashes, Single),
    HExists => ("HEXISTS", Hashes, Single),
    HGetAll => ("HGETALL", Hashes, Single),
    HKeys => ("HKEYS", Hashes, Single),
    HVals => ("HVALS", Hashes, Single),
    HLen => ("HLEN", Hashes, Single),
    HIncrBy => ("HINCRBY", Hashes, Single),

    // lists
    LPush => ("LPUSH", Lists, Single),
    RPush => ("RPUSH", Lists, Single),
    LPop => ("LPOP", Lists, Single),
    RPop => ("RPOP", Lists, Single),
    LRange => ("LRANGE", Lists, Single),
    LLen => ("LLEN", Lists, Single),
    LIndex => ("LINDEX", Lists, Single),
    LSet => ("LSET", Lists, Single),
    LTrim => ("LTRIM", Lists, Single),
    LRem => ("LREM", Lists, Single),

    // sets
    SAdd => ("SADD", Sets, Single),
    SRem => ("SREM", Sets, Single),
    SMembers => ("SMEMBERS", Sets, Single),
    SIsMember => ("SISMEMBER", Sets, Single),
    SCard => ("SCARD", Sets, Single),
    SPop => ("SPOP", Sets, Single),
    SRandMember => ("SRANDMEMBER", Sets, Single),
    SUnion => ("SUNION", Sets, Multi),
    SInter => ("SINTER", Sets, Multi),
    SDiff => ("SDIFF", Sets, Multi),

    // sorted sets
    ZAdd => ("ZADD", SortedSets, Single),
    ZRem => ("ZREM", SortedSets, Single),
    ZScore => ("ZSCORE", SortedSets, Single),
    ZIncrBy => ("ZINCRBY", SortedSets, Single),
    ZCard => ("ZCARD", SortedSets, Single),
    ZCount => ("ZCOUNT", SortedSets, Single),
    ZRank => ("ZRANK", SortedSets, Single),
    ZRange => ("ZRANGE", SortedSets, Single),
    ZRevRange => ("ZREVRANGE", SortedSets, Single),
    ZRangeByScore => ("ZRANGEBYSCORE", SortedSets, Single),

    // key-tag inspection
    ClusterKeySlot => ("CLUSTER KEYSLOT", Cluster, Single),
    ClusterCountKeysInSlot => ("CLUSTER COUNTKEYSINSLOT", Cluster, Single),

    // global scope
    Keys => ("KEYS", Keys, Global),
    Scan => ("SCAN", Keys, Global),
    RandomKey => ("RANDOMKEY", Keys, Global),
    Rename => ("RENAME", Keys, Global),
    RenameNx => ("RENAMENX", Keys, Global),
    MSet => ("MSET", Strings, Global),
    MSetNx => ("MSETNX", Strings, Global),
    BitOp => ("BITOP", Strings, Global),
    RPopLPush => ("RPOPLPUSH", Lists, Global),
    SMove => ("SMOVE", Sets, Global),
    SUnionStore => ("SUNIONSTORE", Sets, Global),
    SInterStore => ("SINTERSTORE", Sets, Global),
    SDiffStore => ("SDIFFSTORE", Sets, Global),
    ZUnionStore => ("ZUNIONSTORE", SortedSets, Global),
    ZInterStore => ("ZINTERSTORE", SortedSets, Global),
    DbSize => ("DBSIZE", Server, Global),
    FlushDb => ("FLUSHDB", Server, Global),
    FlushAll => ("FLUSHALL", Server, Global),
    Info => ("INFO", Server, Global),
    Ping => ("PING", Server, Global),
    ClusterNodes => ("CLUSTER NODES", Cluster, Global),
    Eval => ("EVAL", Scripting, Global),
    EvalSha => ("EVALSHA", Scripting, Global),
    ScriptLoad => ("SCRIPT LOAD", Scripting, Global),
    Publish => ("PUBLISH", PubSub, Global),
    Subscribe => ("SUBSCRIBE", PubSub, Global),
    Watch => ("WATCH", Transactions, Global),
    Multi => ("MULTI", Transactions, Global),
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A single backend command.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    kind: CommandKind,
    keys: Vec<Bytes>,
    args: Vec<Bytes>,
}

impl Command {
    /// Create a command without arguments.
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            keys: Vec::new(),
            args: Vec::new(),
        }
    }

    /// Create a command addressing a single key.
    pub fn with_key(kind: CommandKind, key: impl Into<Bytes>) -> Self {
        Self::new(kind).key(key)
    }

    /// Add a key argument.
    pub fn key(mut self, key: impl Into<Bytes>) -> Self {
        self.keys.push(key.into());
        self
    }

    /// Add several key arguments.
    pub fn keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.keys.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Add a non-key argument.
    pub fn arg(mut self, arg: impl Into<Bytes>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add a numeric argument in its decimal text form.
    pub fn int_arg(self, value: i64) -> Self {
        self.arg(value.to_string())
    }

    /// Add a floating point argument in its text form.
    pub fn float_arg(self, value: f64) -> Self {
        self.arg(value.to_string())
    }

    /// Command kind.
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Key arguments.
    pub fn key_args(&self) -> &[Bytes] {
        &self.keys
    }

    /// Non-key arguments.
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// The routing key, if the command addresses exactly one key.
    pub fn single_key(&self) -> Option<&Bytes> {
        match self.keys.as_slice() {
            [key] => Some(key),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.name())?;
        for key in &self.keys {
            write!(f, " {}", String::from_utf8_lossy(key))?;
        }
        for arg in &self.args {
            write!(f, " {}", String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = Command::with_key(CommandKind::SetEx, "k").int_arg(10).arg("v");
        assert_eq!(cmd.kind(), CommandKind::SetEx);
        assert_eq!(cmd.single_key().map(|k| k.as_ref()), Some(&b"k"[..]));
        assert_eq!(cmd.args().len(), 2);
        assert_eq!(cmd.to_string(), "SETEX k 10 v");
    }

    #[test]
    fn test_single_key_requires_exactly_one() {
        assert!(Command::new(CommandKind::Del).single_key().is_none());
        assert!(Command::new(CommandKind::Del)
            .keys(["a", "b"])
            .single_key()
            .is_none());
    }

    #[test]
    fn test_pipeline_allow_list() {
        assert!(CommandKind::Get.category().is_pipeline_allowed());
        assert!(CommandKind::ZAdd.category().is_pipeline_allowed());
        assert!(CommandKind::Expire.category().is_pipeline_allowed());
        assert!(!CommandKind::Dump.category().is_pipeline_allowed());
        assert!(!CommandKind::ClusterKeySlot.category().is_pipeline_allowed());
        assert!(!CommandKind::Eval.category().is_pipeline_allowed());
    }

    #[test]
    fn test_scopes() {
        assert_eq!(CommandKind::Get.scope(), KeyScope::Single);
        assert_eq!(CommandKind::MGet.scope(), KeyScope::Multi);
        assert_eq!(CommandKind::Keys.scope(), KeyScope::Global);
        assert_eq!(CommandKind::SUnionStore.scope(), KeyScope::Global);
    }
}
