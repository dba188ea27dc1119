//! Typed per-key command surface of [`ShardedClient`].
//!
//! Single-key commands are forwarded to the shard owning the key.
//! Multi-key commands work only with one key. Global-scope commands always
//! fail with [`Error::UnsupportedOperation`](crate::Error::UnsupportedOperation).

use super::ShardedClient;
use crate::command::{Command, CommandKind};
use crate::error::Result;
use bytes::Bytes;
use std::time::Duration;

impl ShardedClient {
    async fn call(&self, command: Command) -> Result<crate::types::Reply> {
        self.execute(command).await
    }

    // ==================== Key management ====================

    /// DEL: only a single key is supported.
    pub async fn del<I, K>(&self, keys: I) -> Result<i64>
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.call(Command::new(CommandKind::Del).keys(keys))
            .await?
            .into_integer("DEL")
    }

    /// EXISTS: only a single key is supported.
    pub async fn exists<I, K>(&self, keys: I) -> Result<i64>
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.call(Command::new(CommandKind::Exists).keys(keys))
            .await?
            .into_integer("EXISTS")
    }

    /// TOUCH: only a single key is supported.
    pub async fn touch<I, K>(&self, keys: I) -> Result<i64>
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.call(Command::new(CommandKind::Touch).keys(keys))
            .await?
            .into_integer("TOUCH")
    }

    /// UNLINK: only a single key is supported.
    pub async fn unlink<I, K>(&self, keys: I) -> Result<i64>
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.call(Command::new(CommandKind::Unlink).keys(keys))
            .await?
            .into_integer("UNLINK")
    }

    /// EXPIRE with second granularity.
    pub async fn expire(&self, key: impl Into<Bytes>, ttl: Duration) -> Result<bool> {
        self.call(Command::with_key(CommandKind::Expire, key).int_arg(ttl.as_secs() as i64))
            .await?
            .into_bool("EXPIRE")
    }

    /// PEXPIRE with millisecond granularity.
    pub async fn pexpire(&self, key: impl Into<Bytes>, ttl: Duration) -> Result<bool> {
        self.call(Command::with_key(CommandKind::PExpire, key).int_arg(ttl.as_millis() as i64))
            .await?
            .into_bool("PEXPIRE")
    }

    /// EXPIREAT with a unix timestamp in seconds.
    pub async fn expire_at(&self, key: impl Into<Bytes>, unix_secs: i64) -> Result<bool> {
        self.call(Command::with_key(CommandKind::ExpireAt, key).int_arg(unix_secs))
            .await?
            .into_bool("EXPIREAT")
    }

    /// TTL in seconds; -1 without expiry, -2 for a missing key.
    pub async fn ttl(&self, key: impl Into<Bytes>) -> Result<i64> {
        self.call(Command::with_key(CommandKind::Ttl, key))
            .await?
            .into_integer("TTL")
    }

    /// PTTL in milliseconds; -1 without expiry, -2 for a missing key.
    pub async fn pttl(&self, key: impl Into<Bytes>) -> Result<i64> {
        self.call(Command::with_key(CommandKind::PTtl, key))
            .await?
            .into_integer("PTTL")
    }

    pub async fn persist(&self, key: impl Into<Bytes>) -> Result<bool> {
        self.call(Command::with_key(CommandKind::Persist, key))
            .await?
            .into_bool("PERSIST")
    }

    /// TYPE of the value stored at `key` ("none" if missing).
    pub async fn key_type(&self, key: impl Into<Bytes>) -> Result<String> {
        self.call(Command::with_key(CommandKind::Type, key))
            .await?
            .into_status("TYPE")
    }

    /// DUMP the serialized value at `key`.
    pub async fn dump(&self, key: impl Into<Bytes>) -> Result<Option<Bytes>> {
        self.call(Command::with_key(CommandKind::Dump, key))
            .await?
            .into_optional_bytes("DUMP")
    }

    // ==================== Strings ====================

    pub async fn get(&self, key: impl Into<Bytes>) -> Result<Option<Bytes>> {
        self.call(Command::with_key(CommandKind::Get, key))
            .await?
            .into_optional_bytes("GET")
    }

    pub async fn set(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        self.call(Command::with_key(CommandKind::Set, key).arg(value))
            .await?
            .into_done("SET")
            .map(|_| ())
    }

    /// SETEX: set with a time to live in seconds.
    pub async fn set_ex(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        ttl: Duration,
    ) -> Result<()> {
        self.call(
            Command::with_key(CommandKind::SetEx, key)
                .int_arg(ttl.as_secs() as i64)
                .arg(value),
        )
        .await?
        .into_done("SETEX")
        .map(|_| ())
    }

    /// SETNX: set only if the key does not exist.
    pub async fn set_nx(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<bool> {
        self.call(Command::with_key(CommandKind::SetNx, key).arg(value))
            .await?
            .into_bool("SETNX")
    }

    pub async fn getset(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<Option<Bytes>> {
        self.call(Command::with_key(CommandKind::GetSet, key).arg(value))
            .await?
            .into_optional_bytes("GETSET")
    }

    /// MGET: only a single key is supported.
    pub async fn mget<I, K>(&self, keys: I) -> Result<Vec<Option<Bytes>>>
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.call(Command::new(CommandKind::MGet).keys(keys))
            .await?
            .into_optional_bytes_vec("MGET")
    }

    pub async fn incr(&self, key: impl Into<Bytes>) -> Result<i64> {
        self.call(Command::with_key(CommandKind::Incr, key))
            .await?
            .into_integer("INCR")
    }

    pub async fn incr_by(&self, key: impl Into<Bytes>, delta: i64) -> Result<i64> {
        self.call(Command::with_key(CommandKind::IncrBy, key).int_arg(delta))
            .await?
            .into_integer("INCRBY")
    }

    pub async fn decr(&self, key: impl Into<Bytes>) -> Result<i64> {
        self.call(Command::with_key(CommandKind::Decr, key))
            .await?
            .into_integer("DECR")
    }

    pub async fn decr_by(&self, key: impl Into<Bytes>, delta: i64) -> Result<i64> {
        self.call(Command::with_key(CommandKind::DecrBy, key).int_arg(delta))
            .await?
            .into_integer("DECRBY")
    }

    /// APPEND, returning the new length.
    pub async fn append(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<i64> {
        self.call(Command::with_key(CommandKind::Append, key).arg(value))
            .await?
            .into_integer("APPEND")
    }

    pub async fn strlen(&self, key: impl Into<Bytes>) -> Result<i64> {
        self.call(Command::with_key(CommandKind::StrLen, key))
            .await?
            .into_integer("STRLEN")
    }

    pub async fn getrange(&self, key: impl Into<Bytes>, start: i64, end: i64) -> Result<Bytes> {
        let reply = self
            .call(
                Command::with_key(CommandKind::GetRange, key)
                    .int_arg(start)
                    .int_arg(end),
            )
            .await?;
        Ok(reply.into_optional_bytes("GETRANGE")?.unwrap_or_default())
    }

    /// SETRANGE, returning the new length.
    pub async fn setrange(
        &self,
        key: impl Into<Bytes>,
        offset: i64,
        value: impl Into<Bytes>,
    ) -> Result<i64> {
        self.call(
            Command::with_key(CommandKind::SetRange, key)
                .int_arg(offset)
                .arg(value),
        )
        .await?
        .into_integer("SETRANGE")
    }

    // ==================== Hashes ====================

    pub async fn hget(
        &self,
        key: impl Into<Bytes>,
        field: impl Into<Bytes>,
    ) -> Result<Option<Bytes>> {
        self.call(Command::with_key(CommandKind::HGet, key).arg(field))
            .await?
            .into_optional_bytes("HGET")
    }

    /// HSET one field; true if the field is new.
    pub async fn hset(
        &self,
        key: impl Into<Bytes>,
        field: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<bool> {
        self.call(Command::with_key(CommandKind::HSet, key).arg(field).arg(value))
            .await?
            .into_bool("HSET")
    }

    /// HSET several fields; returns the number of new fields.
    pub async fn hset_multiple<I, F, V>(&self, key: impl Into<Bytes>, pairs: I) -> Result<i64>
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<Bytes>,
        V: Into<Bytes>,
    {
        let mut command = Command::with_key(CommandKind::HSet, key);
        for (field, value) in pairs {
            command = command.arg(field).arg(value);
        }
        self.call(command).await?.into_integer("HSET")
    }

    pub async fn hset_nx(
        &self,
        key: impl Into<Bytes>,
        field: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<bool> {
        self.call(
            Command::with_key(CommandKind::HSetNx, key)
                .arg(field)
                .arg(value),
        )
        .await?
        .into_bool("HSETNX")
    }

    pub async fn hmget<I, F>(&self, key: impl Into<Bytes>, fields: I) -> Result<Vec<Option<Bytes>>>
    where
        I: IntoIterator<Item = F>,
        F: Into<Bytes>,
    {
        let mut command = Command::with_key(CommandKind::HMGet, key);
        for field in fields {
            command = command.arg(field);
        }
        self.call(command).await?.into_optional_bytes_vec("HMGET")
    }

    pub async fn hdel<I, F>(&self, key: impl Into<Bytes>, fields: I) -> Result<i64>
    where
        I: IntoIterator<Item = F>,
        F: Into<Bytes>,
    {
        let mut command = Command::with_key(CommandKind::HDel, key);
        for field in fields {
            command = command.arg(field);
        }
        self.call(command).await?.into_integer("HDEL")
    }

    pub async fn hexists(&self, key: impl Into<Bytes>, field: impl Into<Bytes>) -> Result<bool> {
        self.call(Command::with_key(CommandKind::HExists, key).arg(field))
            .await?
            .into_bool("HEXISTS")
    }

    pub async fn hgetall(&self, key: impl Into<Bytes>) -> Result<Vec<(Bytes, Bytes)>> {
        self.call(Command::with_key(CommandKind::HGetAll, key))
            .await?
            .into_pairs("HGETALL")
    }

    pub async fn hkeys(&self, key: impl Into<Bytes>) -> Result<Vec<Bytes>> {
        self.call(Command::with_key(CommandKind::HKeys, key))
            .await?
            .into_bytes_vec("HKEYS")
    }

    pub async fn hvals(&self, key: impl Into<Bytes>) -> Result<Vec<Bytes>> {
        self.call(Command::with_key(CommandKind::HVals, key))
            .await?
            .into_bytes_vec("HVALS")
    }

    pub async fn hlen(&self, key: impl Into<Bytes>) -> Result<i64> {
        self.call(Command::with_key(CommandKind::HLen, key))
            .await?
            .into_integer("HLEN")
    }

    pub async fn hincr_by(
        &self,
        key: impl Into<Bytes>,
        field: impl Into<Bytes>,
        delta: i64,
    ) -> Result<i64> {
        self.call(
            Command::with_key(CommandKind::HIncrBy, key)
                .arg(field)
                .int_arg(delta),
        )
        .await?
        .into_integer("HINCRBY")
    }

    // ==================== Lists ====================

    /// LPUSH, returning the new length.
    pub async fn lpush<I, V>(&self, key: impl Into<Bytes>, values: I) -> Result<i64>
    where
        I: IntoIterator<Item = V>,
        V: Into<Bytes>,
    {
        let mut command = Command::with_key(CommandKind::LPush, key);
        for value in values {
            command = command.arg(value);
        }
        self.call(command).await?.into_integer("LPUSH")
    }

    /// RPUSH, returning the new length.
    pub async fn rpush<I, V>(&self, key: impl Into<Bytes>, values: I) -> Result<i64>
    where
        I: IntoIterator<Item = V>,
        V: Into<Bytes>,
    {
        let mut command = Command::with_key(CommandKind::RPush, key);
        for value in values {
            command = command.arg(value);
        }
        self.call(command).await?.into_integer("RPUSH")
    }

    pub async fn lpop(&self, key: impl Into<Bytes>) -> Result<Option<Bytes>> {
        self.call(Command::with_key(CommandKind::LPop, key))
            .await?
            .into_optional_bytes("LPOP")
    }

    pub async fn rpop(&self, key: impl Into<Bytes>) -> Result<Option<Bytes>> {
        self.call(Command::with_key(CommandKind::RPop, key))
            .await?
            .into_optional_bytes("RPOP")
    }

    pub async fn lrange(&self, key: impl Into<Bytes>, start: i64, stop: i64) -> Result<Vec<Bytes>> {
        self.call(
            Command::with_key(CommandKind::LRange, key)
                .int_arg(start)
                .int_arg(stop),
        )
        .await?
        .into_bytes_vec("LRANGE")
    }

    pub async fn llen(&self, key: impl Into<Bytes>) -> Result<i64> {
        self.call(Command::with_key(CommandKind::LLen, key))
            .await?
            .into_integer("LLEN")
    }

    pub async fn lindex(&self, key: impl Into<Bytes>, index: i64) -> Result<Option<Bytes>> {
        self.call(Command::with_key(CommandKind::LIndex, key).int_arg(index))
            .await?
            .into_optional_bytes("LINDEX")
    }

    pub async fn lset(&self, key: impl Into<Bytes>, index: i64, value: impl Into<Bytes>) -> Result<()> {
        self.call(
            Command::with_key(CommandKind::LSet, key)
                .int_arg(index)
                .arg(value),
        )
        .await?
        .into_done("LSET")
        .map(|_| ())
    }

    pub async fn ltrim(&self, key: impl Into<Bytes>, start: i64, stop: i64) -> Result<()> {
        self.call(
            Command::with_key(CommandKind::LTrim, key)
                .int_arg(start)
                .int_arg(stop),
        )
        .await?
        .into_done("LTRIM")
        .map(|_| ())
    }

    /// LREM, returning the number of removed elements.
    pub async fn lrem(&self, key: impl Into<Bytes>, count: i64, value: impl Into<Bytes>) -> Result<i64> {
        self.call(
            Command::with_key(CommandKind::LRem, key)
                .int_arg(count)
                .arg(value),
        )
        .await?
        .into_integer("LREM")
    }

    // ==================== Sets ====================

    /// SADD, returning the number of new members.
    pub async fn sadd<I, M>(&self, key: impl Into<Bytes>, members: I) -> Result<i64>
    where
        I: IntoIterator<Item = M>,
        M: Into<Bytes>,
    {
        let mut command = Command::with_key(CommandKind::SAdd, key);
        for member in members {
            command = command.arg(member);
        }
        self.call(command).await?.into_integer("SADD")
    }

    /// SREM, returning the number of removed members.
    pub async fn srem<I, M>(&self, key: impl Into<Bytes>, members: I) -> Result<i64>
    where
        I: IntoIterator<Item = M>,
        M: Into<Bytes>,
    {
        let mut command = Command::with_key(CommandKind::SRem, key);
        for member in members {
            command = command.arg(member);
        }
        self.call(command).await?.into_integer("SREM")
    }

    pub async fn smembers(&self, key: impl Into<Bytes>) -> Result<Vec<Bytes>> {
        self.call(Command::with_key(CommandKind::SMembers, key))
            .await?
            .into_bytes_vec("SMEMBERS")
    }

    pub async fn sismember(&self, key: impl Into<Bytes>, member: impl Into<Bytes>) -> Result<bool> {
        self.call(Command::with_key(CommandKind::SIsMember, key).arg(member))
            .await?
            .into_bool("SISMEMBER")
    }

    pub async fn scard(&self, key: impl Into<Bytes>) -> Result<i64> {
        self.call(Command::with_key(CommandKind::SCard, key))
            .await?
            .into_integer("SCARD")
    }

    pub async fn spop(&self, key: impl Into<Bytes>) -> Result<Option<Bytes>> {
        self.call(Command::with_key(CommandKind::SPop, key))
            .await?
            .into_optional_bytes("SPOP")
    }

    pub async fn srandmember(&self, key: impl Into<Bytes>) -> Result<Option<Bytes>> {
        self.call(Command::with_key(CommandKind::SRandMember, key))
            .await?
            .into_optional_bytes("SRANDMEMBER")
    }

    /// SUNION: only a single key is supported.
    pub async fn sunion<I, K>(&self, keys: I) -> Result<Vec<Bytes>>
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.call(Command::new(CommandKind::SUnion).keys(keys))
            .await?
            .into_bytes_vec("SUNION")
    }

    /// SINTER: only a single key is supported.
    pub async fn sinter<I, K>(&self, keys: I) -> Result<Vec<Bytes>>
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.call(Command::new(CommandKind::SInter).keys(keys))
            .await?
            .into_bytes_vec("SINTER")
    }

    /// SDIFF: only a single key is supported.
    pub async fn sdiff<I, K>(&self, keys: I) -> Result<Vec<Bytes>>
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.call(Command::new(CommandKind::SDiff).keys(keys))
            .await?
            .into_bytes_vec("SDIFF")
    }

    // ==================== HyperLogLog ====================

    /// PFADD, returning whether the estimate changed.
    pub async fn pfadd<I, E>(&self, key: impl Into<Bytes>, elements: I) -> Result<bool>
    where
        I: IntoIterator<Item = E>,
        E: Into<Bytes>,
    {
        let mut command = Command::with_key(CommandKind::PfAdd, key);
        for element in elements {
            command = command.arg(element);
        }
        self.call(command).await?.into_bool("PFADD")
    }

    /// PFCOUNT: only a single key is supported.
    pub async fn pfcount<I, K>(&self, keys: I) -> Result<i64>
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.call(Command::new(CommandKind::PfCount).keys(keys))
            .await?
            .into_integer("PFCOUNT")
    }

    // ==================== Sorted sets ====================

    /// ZADD one member; true if the member is new.
    pub async fn zadd(&self, key: impl Into<Bytes>, score: f64, member: impl Into<Bytes>) -> Result<bool> {
        self.call(
            Command::with_key(CommandKind::ZAdd, key)
                .float_arg(score)
                .arg(member),
        )
        .await?
        .into_bool("ZADD")
    }

    /// ZADD several members; returns the number of new members.
    pub async fn zadd_multiple<I, M>(&self, key: impl Into<Bytes>, members: I) -> Result<i64>
    where
        I: IntoIterator<Item = (f64, M)>,
        M: Into<Bytes>,
    {
        let mut command = Command::with_key(CommandKind::ZAdd, key);
        for (score, member) in members {
            command = command.float_arg(score).arg(member);
        }
        self.call(command).await?.into_integer("ZADD")
    }

    pub async fn zrem<I, M>(&self, key: impl Into<Bytes>, members: I) -> Result<i64>
    where
        I: IntoIterator<Item = M>,
        M: Into<Bytes>,
    {
        let mut command = Command::with_key(CommandKind::ZRem, key);
        for member in members {
            command = command.arg(member);
        }
        self.call(command).await?.into_integer("ZREM")
    }

    pub async fn zscore(&self, key: impl Into<Bytes>, member: impl Into<Bytes>) -> Result<Option<f64>> {
        self.call(Command::with_key(CommandKind::ZScore, key).arg(member))
            .await?
            .into_optional_f64("ZSCORE")
    }

    /// ZINCRBY, returning the new score.
    pub async fn zincr_by(&self, key: impl Into<Bytes>, delta: f64, member: impl Into<Bytes>) -> Result<f64> {
        let score = self
            .call(
                Command::with_key(CommandKind::ZIncrBy, key)
                    .float_arg(delta)
                    .arg(member),
            )
            .await?
            .into_optional_f64("ZINCRBY")?;
        Ok(score.unwrap_or(delta))
    }

    pub async fn zcard(&self, key: impl Into<Bytes>) -> Result<i64> {
        self.call(Command::with_key(CommandKind::ZCard, key))
            .await?
            .into_integer("ZCARD")
    }

    /// ZCOUNT over the inclusive score range.
    pub async fn zcount(&self, key: impl Into<Bytes>, min: f64, max: f64) -> Result<i64> {
        self.call(
            Command::with_key(CommandKind::ZCount, key)
                .float_arg(min)
                .float_arg(max),
        )
        .await?
        .into_integer("ZCOUNT")
    }

    pub async fn zrank(&self, key: impl Into<Bytes>, member: impl Into<Bytes>) -> Result<Option<i64>> {
        self.call(Command::with_key(CommandKind::ZRank, key).arg(member))
            .await?
            .into_optional_integer("ZRANK")
    }

    pub async fn zrange(&self, key: impl Into<Bytes>, start: i64, stop: i64) -> Result<Vec<Bytes>> {
        self.call(
            Command::with_key(CommandKind::ZRange, key)
                .int_arg(start)
                .int_arg(stop),
        )
        .await?
        .into_bytes_vec("ZRANGE")
    }

    pub async fn zrevrange(&self, key: impl Into<Bytes>, start: i64, stop: i64) -> Result<Vec<Bytes>> {
        self.call(
            Command::with_key(CommandKind::ZRevRange, key)
                .int_arg(start)
                .int_arg(stop),
        )
        .await?
        .into_bytes_vec("ZREVRANGE")
    }

    /// ZRANGEBYSCORE over the inclusive score range.
    pub async fn zrange_by_score(&self, key: impl Into<Bytes>, min: f64, max: f64) -> Result<Vec<Bytes>> {
        self.call(
            Command::with_key(CommandKind::ZRangeByScore, key)
                .float_arg(min)
                .float_arg(max),
        )
        .await?
        .into_bytes_vec("ZRANGEBYSCORE")
    }

    // ==================== Key-tag inspection ====================

    /// CLUSTER KEYSLOT, asked of the shard that owns `key`.
    pub async fn cluster_keyslot(&self, key: impl Into<Bytes>) -> Result<i64> {
        self.call(Command::with_key(CommandKind::ClusterKeySlot, key))
            .await?
            .into_integer("CLUSTER KEYSLOT")
    }

    /// CLUSTER COUNTKEYSINSLOT for the slot of `key`, asked of its owner.
    pub async fn cluster_count_keys_in_slot(&self, key: impl Into<Bytes>) -> Result<i64> {
        self.call(Command::with_key(CommandKind::ClusterCountKeysInSlot, key))
            .await?
            .into_integer("CLUSTER COUNTKEYSINSLOT")
    }

    // ==================== Global scope (always rejected) ====================

    /// KEYS: no shard sees the whole keyspace.
    pub async fn keys(&self, pattern: impl Into<Bytes>) -> Result<Vec<Bytes>> {
        self.call(Command::new(CommandKind::Keys).arg(pattern))
            .await?
            .into_bytes_vec("KEYS")
    }

    /// SCAN: no shard sees the whole keyspace.
    pub async fn scan(&self, cursor: u64, pattern: impl Into<Bytes>) -> Result<Vec<Bytes>> {
        self.call(
            Command::new(CommandKind::Scan)
                .int_arg(cursor as i64)
                .arg("MATCH")
                .arg(pattern),
        )
        .await?
        .into_bytes_vec("SCAN")
    }

    pub async fn random_key(&self) -> Result<Option<Bytes>> {
        self.call(Command::new(CommandKind::RandomKey))
            .await?
            .into_optional_bytes("RANDOMKEY")
    }

    /// RENAME: source and destination may live on different shards.
    pub async fn rename(&self, key: impl Into<Bytes>, new_key: impl Into<Bytes>) -> Result<()> {
        self.call(Command::new(CommandKind::Rename).key(key).key(new_key))
            .await?
            .into_done("RENAME")
            .map(|_| ())
    }

    pub async fn rename_nx(&self, key: impl Into<Bytes>, new_key: impl Into<Bytes>) -> Result<bool> {
        self.call(Command::new(CommandKind::RenameNx).key(key).key(new_key))
            .await?
            .into_bool("RENAMENX")
    }

    /// MSET: keys may live on different shards, and MSET is atomic.
    pub async fn mset<I, K, V>(&self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Bytes>,
        V: Into<Bytes>,
    {
        let mut command = Command::new(CommandKind::MSet);
        for (key, value) in pairs {
            command = command.key(key).arg(value);
        }
        self.call(command).await?.into_done("MSET").map(|_| ())
    }

    pub async fn msetnx<I, K, V>(&self, pairs: I) -> Result<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Bytes>,
        V: Into<Bytes>,
    {
        let mut command = Command::new(CommandKind::MSetNx);
        for (key, value) in pairs {
            command = command.key(key).arg(value);
        }
        self.call(command).await?.into_bool("MSETNX")
    }

    pub async fn bitop<I, K>(&self, operation: &str, dest: impl Into<Bytes>, keys: I) -> Result<i64>
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.call(
            Command::new(CommandKind::BitOp)
                .arg(operation.to_string())
                .key(dest)
                .keys(keys),
        )
        .await?
        .into_integer("BITOP")
    }

    pub async fn rpoplpush(&self, source: impl Into<Bytes>, dest: impl Into<Bytes>) -> Result<Option<Bytes>> {
        self.call(Command::new(CommandKind::RPopLPush).key(source).key(dest))
            .await?
            .into_optional_bytes("RPOPLPUSH")
    }

    pub async fn smove(
        &self,
        source: impl Into<Bytes>,
        dest: impl Into<Bytes>,
        member: impl Into<Bytes>,
    ) -> Result<bool> {
        self.call(
            Command::new(CommandKind::SMove)
                .key(source)
                .key(dest)
                .arg(member),
        )
        .await?
        .into_bool("SMOVE")
    }

    pub async fn sunionstore<I, K>(&self, dest: impl Into<Bytes>, keys: I) -> Result<i64>
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.call(Command::new(CommandKind::SUnionStore).key(dest).keys(keys))
            .await?
            .into_integer("SUNIONSTORE")
    }

    pub async fn sinterstore<I, K>(&self, dest: impl Into<Bytes>, keys: I) -> Result<i64>
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.call(Command::new(CommandKind::SInterStore).key(dest).keys(keys))
            .await?
            .into_integer("SINTERSTORE")
    }

    pub async fn sdiffstore<I, K>(&self, dest: impl Into<Bytes>, keys: I) -> Result<i64>
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.call(Command::new(CommandKind::SDiffStore).key(dest).keys(keys))
            .await?
            .into_integer("SDIFFSTORE")
    }

    pub async fn zunionstore<I, K>(&self, dest: impl Into<Bytes>, keys: I) -> Result<i64>
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.call(Command::new(CommandKind::ZUnionStore).key(dest).keys(keys))
            .await?
            .into_integer("ZUNIONSTORE")
    }

    pub async fn zinterstore<I, K>(&self, dest: impl Into<Bytes>, keys: I) -> Result<i64>
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.call(Command::new(CommandKind::ZInterStore).key(dest).keys(keys))
            .await?
            .into_integer("ZINTERSTORE")
    }

    /// DBSIZE: would only count one shard.
    pub async fn dbsize(&self) -> Result<i64> {
        self.call(Command::new(CommandKind::DbSize))
            .await?
            .into_integer("DBSIZE")
    }

    pub async fn flushdb(&self) -> Result<()> {
        self.call(Command::new(CommandKind::FlushDb))
            .await?
            .into_done("FLUSHDB")
            .map(|_| ())
    }

    pub async fn flushall(&self) -> Result<()> {
        self.call(Command::new(CommandKind::FlushAll))
            .await?
            .into_done("FLUSHALL")
            .map(|_| ())
    }

    pub async fn info(&self, section: impl Into<Bytes>) -> Result<Option<Bytes>> {
        self.call(Command::new(CommandKind::Info).arg(section))
            .await?
            .into_optional_bytes("INFO")
    }

    pub async fn cluster_nodes(&self) -> Result<Option<Bytes>> {
        self.call(Command::new(CommandKind::ClusterNodes))
            .await?
            .into_optional_bytes("CLUSTER NODES")
    }

    /// EVAL: scripts may touch keys on several shards.
    pub async fn eval<I, K>(&self, script: impl Into<Bytes>, keys: I) -> Result<crate::types::Reply>
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.call(Command::new(CommandKind::Eval).arg(script).keys(keys))
            .await
    }

    pub async fn evalsha<I, K>(&self, sha: impl Into<Bytes>, keys: I) -> Result<crate::types::Reply>
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.call(Command::new(CommandKind::EvalSha).arg(sha).keys(keys))
            .await
    }

    pub async fn script_load(&self, script: impl Into<Bytes>) -> Result<Option<Bytes>> {
        self.call(Command::new(CommandKind::ScriptLoad).arg(script))
            .await?
            .into_optional_bytes("SCRIPT LOAD")
    }

    pub async fn publish(&self, channel: impl Into<Bytes>, message: impl Into<Bytes>) -> Result<i64> {
        self.call(Command::new(CommandKind::Publish).arg(channel).arg(message))
            .await?
            .into_integer("PUBLISH")
    }

    pub async fn subscribe(&self, channel: impl Into<Bytes>) -> Result<()> {
        self.call(Command::new(CommandKind::Subscribe).arg(channel))
            .await
            .map(|_| ())
    }

    /// WATCH: transactions cannot span shards.
    pub async fn watch<I, K>(&self, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.call(Command::new(CommandKind::Watch).keys(keys))
            .await
            .map(|_| ())
    }

    pub async fn multi(&self) -> Result<()> {
        self.call(Command::new(CommandKind::Multi)).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::testing::MemoryBackend;
    use crate::types::ShardInfo;
    use std::sync::Arc;

    fn client() -> (ShardedClient, Vec<Arc<MemoryBackend>>) {
        let backends: Vec<Arc<MemoryBackend>> = ["a", "b", "c"]
            .iter()
            .map(|id| Arc::new(MemoryBackend::new(*id)))
            .collect();
        let shards = backends
            .iter()
            .map(|b| ShardInfo::new(b.name(), format!("{}:6379", b.name()), b.clone()))
            .collect();
        (ShardedClient::from_shards(shards, 160).unwrap(), backends)
    }

    fn untouched(backends: &[Arc<MemoryBackend>]) -> bool {
        backends.iter().all(|b| b.executed_commands() == 0)
    }

    #[tokio::test]
    async fn test_string_commands() {
        let (client, _) = client();

        client.set("foo", "bar").await.unwrap();
        assert_eq!(client.get("foo").await.unwrap(), Some(Bytes::from("bar")));
        assert_eq!(client.append("foo", "baz").await.unwrap(), 6);
        assert_eq!(client.strlen("foo").await.unwrap(), 6);
        assert_eq!(client.getrange("foo", 0, 2).await.unwrap(), Bytes::from("bar"));
        assert_eq!(
            client.getset("foo", "new").await.unwrap(),
            Some(Bytes::from("barbaz"))
        );

        assert!(client.set_nx("fresh", "1").await.unwrap());
        assert!(!client.set_nx("fresh", "2").await.unwrap());

        assert_eq!(client.incr("counter").await.unwrap(), 1);
        assert_eq!(client.incr_by("counter", 9).await.unwrap(), 10);
        assert_eq!(client.decr_by("counter", 3).await.unwrap(), 7);
        assert_eq!(client.decr("counter").await.unwrap(), 6);

        assert_eq!(client.mget(["foo"]).await.unwrap(), vec![Some(Bytes::from("new"))]);
    }

    #[tokio::test]
    async fn test_key_commands() {
        let (client, _) = client();

        client.set("k", "v").await.unwrap();
        assert_eq!(client.exists(["k"]).await.unwrap(), 1);
        assert_eq!(client.ttl("k").await.unwrap(), -1);
        assert!(client.expire("k", Duration::from_secs(100)).await.unwrap());
        let ttl = client.ttl("k").await.unwrap();
        assert!(ttl > 90 && ttl <= 100, "ttl = {}", ttl);
        assert!(client.persist("k").await.unwrap());
        assert_eq!(client.ttl("k").await.unwrap(), -1);
        assert_eq!(client.key_type("k").await.unwrap(), "string");

        assert_eq!(client.del(["k"]).await.unwrap(), 1);
        assert_eq!(client.ttl("k").await.unwrap(), -2);
        assert_eq!(client.key_type("k").await.unwrap(), "none");
    }

    #[tokio::test]
    async fn test_collection_commands() {
        let (client, _) = client();

        assert!(client.hset("h", "f1", "v1").await.unwrap());
        assert_eq!(client.hset_multiple("h", [("f2", "v2"), ("f3", "v3")]).await.unwrap(), 2);
        assert_eq!(client.hget("h", "f2").await.unwrap(), Some(Bytes::from("v2")));
        assert_eq!(client.hlen("h").await.unwrap(), 3);
        assert_eq!(client.hincr_by("h", "n", 5).await.unwrap(), 5);
        assert_eq!(client.hgetall("h").await.unwrap().len(), 4);

        assert_eq!(client.rpush("l", ["a", "b", "c"]).await.unwrap(), 3);
        assert_eq!(client.lpush("l", ["z"]).await.unwrap(), 4);
        assert_eq!(
            client.lrange("l", 0, -1).await.unwrap(),
            vec![Bytes::from("z"), Bytes::from("a"), Bytes::from("b"), Bytes::from("c")]
        );
        assert_eq!(client.lpop("l").await.unwrap(), Some(Bytes::from("z")));
        assert_eq!(client.lindex("l", -1).await.unwrap(), Some(Bytes::from("c")));

        assert_eq!(client.sadd("s", ["x", "y", "x"]).await.unwrap(), 2);
        assert!(client.sismember("s", "y").await.unwrap());
        assert_eq!(client.scard("s").await.unwrap(), 2);
        assert_eq!(client.sunion(["s"]).await.unwrap().len(), 2);

        assert!(client.zadd("z", 2.0, "two").await.unwrap());
        assert_eq!(client.zadd_multiple("z", [(1.0, "one"), (3.0, "three")]).await.unwrap(), 2);
        assert_eq!(client.zscore("z", "two").await.unwrap(), Some(2.0));
        assert_eq!(client.zrank("z", "three").await.unwrap(), Some(2));
        assert_eq!(client.zincr_by("z", 10.0, "one").await.unwrap(), 11.0);
        assert_eq!(
            client.zrange("z", 0, -1).await.unwrap(),
            vec![Bytes::from("two"), Bytes::from("three"), Bytes::from("one")]
        );
        assert_eq!(client.zcount("z", 2.0, 3.0).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_multi_key_commands_need_one_key() {
        let (client, backends) = client();

        let err = client.del(["a", "b"]).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation { command: "DEL", .. }));
        assert!(client.exists(["a", "b"]).await.is_err());
        assert!(client.mget(["a", "b", "c"]).await.is_err());
        assert!(client.sinter(["a", "b"]).await.is_err());
        assert!(client.sdiff(Vec::<Bytes>::new()).await.is_err());
        assert!(client.unlink(["a", "b"]).await.is_err());
        assert!(client.touch(["a", "b"]).await.is_err());

        assert!(untouched(&backends));
    }

    #[tokio::test]
    async fn test_global_commands_rejected() {
        let (client, backends) = client();

        let unsupported = |r: &Error| matches!(r, Error::UnsupportedOperation { .. });

        assert!(unsupported(&client.keys("*").await.unwrap_err()));
        assert!(unsupported(&client.scan(0, "*").await.unwrap_err()));
        assert!(unsupported(&client.dbsize().await.unwrap_err()));
        assert!(unsupported(&client.flushall().await.unwrap_err()));
        assert!(unsupported(&client.flushdb().await.unwrap_err()));
        assert!(unsupported(&client.random_key().await.unwrap_err()));
        assert!(unsupported(&client.info("server").await.unwrap_err()));
        assert!(unsupported(&client.cluster_nodes().await.unwrap_err()));
        assert!(unsupported(&client.eval("return 1", ["{t}a"]).await.unwrap_err()));
        assert!(unsupported(&client.publish("chan", "msg").await.unwrap_err()));
        assert!(unsupported(&client.rename("a", "b").await.unwrap_err()));
        assert!(unsupported(&client.mset([("a", "1")]).await.unwrap_err()));
        assert!(unsupported(&client.sunionstore("d", ["a"]).await.unwrap_err()));
        assert!(unsupported(&client.zinterstore("d", ["a"]).await.unwrap_err()));
        assert!(unsupported(&client.rpoplpush("a", "b").await.unwrap_err()));
        assert!(unsupported(&client.multi().await.unwrap_err()));

        assert!(untouched(&backends));
    }

    #[tokio::test]
    async fn test_keyslot_routes_by_key() {
        let (client, backends) = client();

        client.cluster_keyslot("{user42}profile").await.unwrap();
        let owner = client.shard_for_key(b"{user42}profile");
        for backend in &backends {
            let expected = if backend.name() == owner { 1 } else { 0 };
            assert_eq!(backend.executed_commands(), expected);
        }
    }

    #[tokio::test]
    async fn test_hyperloglog_and_slot_counts() {
        let (client, _) = client();

        assert!(client.pfadd("{visits}day", ["u1", "u2", "u1"]).await.unwrap());
        assert!(!client.pfadd("{visits}day", ["u2"]).await.unwrap());
        assert_eq!(client.pfcount(["{visits}day"]).await.unwrap(), 2);
        assert!(client.pfcount(["{visits}day", "{visits}week"]).await.is_err());

        client.set("{visits}total", "2").await.unwrap();
        assert_eq!(
            client.cluster_count_keys_in_slot("{visits}any").await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_backend_errors_pass_through() {
        let (client, _) = client();

        client.set("str", "x").await.unwrap();
        let err = client.lpush("str", ["v"]).await.unwrap_err();
        assert_eq!(err, Error::Backend(crate::error::BackendError::WrongType));

        let err = client.incr("str").await.unwrap_err();
        assert!(matches!(err, Error::Backend(crate::error::BackendError::Response(_))));
    }
}
