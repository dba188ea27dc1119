//! Sharded pipelines.
//!
//! A [`Pipeline`] collects single-key commands, splits them by owning shard
//! and sends each group as one pipelined round trip, all groups
//! concurrently. Results are written back in submission order.
//!
//! # Flow
//!
//! ```text
//!  push/get/set/...          exec()
//! ┌──────────────┐   ┌───────────────────────────────────────────┐
//! │ #0 SET a     │   │ 1. validate every command (allow-list,    │
//! │ #1 GET b     │──▶│    key scope, exactly one key)            │
//! │ #2 INCR c    │   │ 2. route_batch under one read lock        │
//! │ #3 GET a     │   │ 3. one task per shard group               │
//! └──────────────┘   │ 4. join every task                        │
//!                    │ 5. fill slots, return first error         │
//!                    └───────────────────────────────────────────┘
//!        shard A: [#0, #3]     shard B: [#1]     shard C: [#2]
//! ```

use crate::backend::BackendResult;
use crate::client::ShardedClient;
use crate::command::{Command, CommandKind, KeyScope};
use crate::error::{Error, Result};
use crate::types::{Reply, ShardId};
use bytes::Bytes;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type GroupHandle = JoinHandle<BackendResult<Vec<BackendResult<Reply>>>>;

/// A command queued in a pipeline together with its result slot.
#[derive(Debug, Clone)]
pub struct PipelineCommand {
    command: Command,
    result: Option<Result<Reply>>,
}

impl PipelineCommand {
    fn new(command: Command) -> Self {
        Self {
            command,
            result: None,
        }
    }

    /// The queued command.
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// The result, once the pipeline has been executed.
    pub fn result(&self) -> Option<&Result<Reply>> {
        self.result.as_ref()
    }
}

/// A batch of single-key commands executed across shards.
#[derive(Debug)]
pub struct Pipeline<'a> {
    client: &'a ShardedClient,
    commands: Vec<PipelineCommand>,
}

impl<'a> Pipeline<'a> {
    /// Create an empty pipeline over `client`.
    pub fn new(client: &'a ShardedClient) -> Self {
        Self {
            client,
            commands: Vec::new(),
        }
    }

    /// Queue a command, returning its index.
    pub fn push(&mut self, command: Command) -> usize {
        self.commands.push(PipelineCommand::new(command));
        self.commands.len() - 1
    }

    fn push_key(&mut self, kind: CommandKind, key: impl Into<Bytes>) -> usize {
        self.push(Command::with_key(kind, key))
    }

    pub fn get(&mut self, key: impl Into<Bytes>) -> usize {
        self.push_key(CommandKind::Get, key)
    }

    pub fn set(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> usize {
        self.push(Command::with_key(CommandKind::Set, key).arg(value))
    }

    pub fn set_ex(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>, ttl: Duration) -> usize {
        self.push(
            Command::with_key(CommandKind::SetEx, key)
                .int_arg(ttl.as_secs() as i64)
                .arg(value),
        )
    }

    pub fn incr(&mut self, key: impl Into<Bytes>) -> usize {
        self.push_key(CommandKind::Incr, key)
    }

    pub fn incr_by(&mut self, key: impl Into<Bytes>, delta: i64) -> usize {
        self.push(Command::with_key(CommandKind::IncrBy, key).int_arg(delta))
    }

    pub fn decr(&mut self, key: impl Into<Bytes>) -> usize {
        self.push_key(CommandKind::Decr, key)
    }

    pub fn del(&mut self, key: impl Into<Bytes>) -> usize {
        self.push_key(CommandKind::Del, key)
    }

    pub fn exists(&mut self, key: impl Into<Bytes>) -> usize {
        self.push_key(CommandKind::Exists, key)
    }

    pub fn expire(&mut self, key: impl Into<Bytes>, ttl: Duration) -> usize {
        self.push(Command::with_key(CommandKind::Expire, key).int_arg(ttl.as_secs() as i64))
    }

    pub fn ttl(&mut self, key: impl Into<Bytes>) -> usize {
        self.push_key(CommandKind::Ttl, key)
    }

    pub fn hset(
        &mut self,
        key: impl Into<Bytes>,
        field: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> usize {
        self.push(Command::with_key(CommandKind::HSet, key).arg(field).arg(value))
    }

    pub fn hget(&mut self, key: impl Into<Bytes>, field: impl Into<Bytes>) -> usize {
        self.push(Command::with_key(CommandKind::HGet, key).arg(field))
    }

    pub fn hgetall(&mut self, key: impl Into<Bytes>) -> usize {
        self.push_key(CommandKind::HGetAll, key)
    }

    pub fn lpush(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> usize {
        self.push(Command::with_key(CommandKind::LPush, key).arg(value))
    }

    pub fn rpush(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> usize {
        self.push(Command::with_key(CommandKind::RPush, key).arg(value))
    }

    pub fn lrange(&mut self, key: impl Into<Bytes>, start: i64, stop: i64) -> usize {
        self.push(
            Command::with_key(CommandKind::LRange, key)
                .int_arg(start)
                .int_arg(stop),
        )
    }

    pub fn sadd(&mut self, key: impl Into<Bytes>, member: impl Into<Bytes>) -> usize {
        self.push(Command::with_key(CommandKind::SAdd, key).arg(member))
    }

    pub fn smembers(&mut self, key: impl Into<Bytes>) -> usize {
        self.push_key(CommandKind::SMembers, key)
    }

    pub fn zadd(&mut self, key: impl Into<Bytes>, score: f64, member: impl Into<Bytes>) -> usize {
        self.push(
            Command::with_key(CommandKind::ZAdd, key)
                .float_arg(score)
                .arg(member),
        )
    }

    pub fn zscore(&mut self, key: impl Into<Bytes>, member: impl Into<Bytes>) -> usize {
        self.push(Command::with_key(CommandKind::ZScore, key).arg(member))
    }

    /// Queue DUMP. Serialization commands are never pipelineable, so
    /// `exec` rejects the batch.
    pub fn dump(&mut self, key: impl Into<Bytes>) -> usize {
        self.push_key(CommandKind::Dump, key)
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Check if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Drop every queued command and result.
    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Queued commands with their result slots.
    pub fn commands(&self) -> &[PipelineCommand] {
        &self.commands
    }

    /// Result of the command at `index`, once executed.
    pub fn result(&self, index: usize) -> Option<&Result<Reply>> {
        self.commands.get(index).and_then(|c| c.result.as_ref())
    }

    /// All result slots in submission order.
    pub fn results(&self) -> Vec<Option<&Result<Reply>>> {
        self.commands.iter().map(|c| c.result.as_ref()).collect()
    }

    /// Take every result slot, leaving the pipeline empty.
    pub fn take_results(&mut self) -> Vec<Option<Result<Reply>>> {
        self.commands.drain(..).map(|c| c.result).collect()
    }

    /// Execute the queued commands.
    ///
    /// The whole batch is validated first; on a validation error nothing is
    /// executed and no slot changes. Otherwise every shard group runs, every
    /// slot gets a result, and the first error in submission order is
    /// returned.
    pub async fn exec(&mut self) -> Result<()> {
        if self.commands.is_empty() {
            return Ok(());
        }

        let keys = self.validate()?;
        let groups = self.client.route_batch(keys.iter().map(|key| &key[..]));

        debug!(
            commands = self.commands.len(),
            shards = groups.len(),
            "Dispatching pipeline"
        );

        let mut tasks: Vec<(Vec<usize>, ShardId, GroupHandle)> = Vec::with_capacity(groups.len());
        for group in groups {
            let batch: Vec<Command> = group
                .indices
                .iter()
                .map(|&idx| self.commands[idx].command.clone())
                .collect();
            let shard = group.shard.clone();
            let handle = tokio::spawn(async move { shard.connection.pipeline(&batch).await });
            tasks.push((group.indices, group.shard.id.clone(), handle));
        }

        // Every group is awaited before any result is returned.
        for (indices, shard, handle) in tasks {
            match handle.await {
                Ok(Ok(replies)) if replies.len() == indices.len() => {
                    for (idx, reply) in indices.into_iter().zip(replies) {
                        self.commands[idx].result =
                            Some(reply.map_err(|e| Error::from_backend(&shard, e)));
                    }
                }
                Ok(Ok(replies)) => {
                    warn!(
                        shard = %shard,
                        expected = indices.len(),
                        received = replies.len(),
                        "Pipeline reply count mismatch"
                    );
                    let err = Error::Internal(format!(
                        "shard {} returned {} replies for {} commands",
                        shard,
                        replies.len(),
                        indices.len()
                    ));
                    self.fill(&indices, err);
                }
                Ok(Err(e)) => {
                    warn!(shard = %shard, error = %e, "Pipeline batch failed");
                    self.fill(&indices, Error::from_backend(&shard, e));
                }
                Err(join_err) => {
                    warn!(shard = %shard, error = %join_err, "Pipeline task failed");
                    let err = Error::Internal(format!(
                        "pipeline task for shard {} failed: {}",
                        shard, join_err
                    ));
                    self.fill(&indices, err);
                }
            }
        }

        match self
            .commands
            .iter()
            .find_map(|c| c.result.as_ref().and_then(|r| r.as_ref().err()))
        {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Check every command and collect the routing keys.
    fn validate(&self) -> Result<Vec<Bytes>> {
        let mut keys = Vec::with_capacity(self.commands.len());
        for (index, queued) in self.commands.iter().enumerate() {
            let command = &queued.command;
            let kind = command.kind();
            if kind.scope() == KeyScope::Global {
                return Err(Error::InvalidCommand {
                    index,
                    command: command.name(),
                    reason: "global-scope command has no single owning shard".into(),
                });
            }
            let category = kind.category();
            if !category.is_pipeline_allowed() {
                return Err(Error::InvalidCommand {
                    index,
                    command: command.name(),
                    reason: format!("{} commands cannot be pipelined across shards", category),
                });
            }
            match command.single_key() {
                Some(key) => keys.push(key.clone()),
                None => {
                    return Err(Error::InvalidCommand {
                        index,
                        command: command.name(),
                        reason: format!(
                            "exactly one key required, got {}",
                            command.key_args().len()
                        ),
                    })
                }
            }
        }
        Ok(keys)
    }

    fn fill(&mut self, indices: &[usize], err: Error) {
        for &idx in indices {
            self.commands[idx].result = Some(Err(err.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryBackend;
    use crate::types::ShardInfo;
    use std::sync::Arc;

    fn client(ids: &[&str]) -> (ShardedClient, Vec<Arc<MemoryBackend>>) {
        let backends: Vec<Arc<MemoryBackend>> =
            ids.iter().map(|id| Arc::new(MemoryBackend::new(*id))).collect();
        let shards = backends
            .iter()
            .map(|b| ShardInfo::new(b.name(), format!("{}:6379", b.name()), b.clone()))
            .collect();
        (ShardedClient::from_shards(shards, 160).unwrap(), backends)
    }

    #[tokio::test]
    async fn test_empty_pipeline() {
        let (client, backends) = client(&["a", "b"]);
        let mut pipeline = client.pipeline();
        assert!(pipeline.is_empty());
        pipeline.exec().await.unwrap();
        assert!(backends.iter().all(|b| b.pipeline_calls() == 0));
    }

    #[tokio::test]
    async fn test_results_in_submission_order() {
        let (client, backends) = client(&["a", "b", "c"]);
        let mut pipeline = client.pipeline();

        for i in 0..30 {
            pipeline.set(format!("key-{}", i), format!("value-{}", i));
        }
        for i in 0..30 {
            pipeline.get(format!("key-{}", i));
        }
        assert_eq!(pipeline.len(), 60);

        pipeline.exec().await.unwrap();
        for i in 0..30 {
            assert_eq!(pipeline.result(i), Some(&Ok(Reply::ok())));
            assert_eq!(
                pipeline.result(30 + i),
                Some(&Ok(Reply::bulk(format!("value-{}", i))))
            );
        }

        // One round trip per shard that owns at least one key.
        let calls: usize = backends.iter().map(|b| b.pipeline_calls()).sum();
        assert!(calls <= 3);
        assert!(backends.iter().all(|b| b.executed_commands() == 0));
    }

    #[tokio::test]
    async fn test_validation_rejects_whole_batch() {
        let (client, backends) = client(&["a", "b"]);
        let mut pipeline = client.pipeline();
        pipeline.set("a", "1");
        pipeline.push(Command::new(CommandKind::Del).keys(["x", "y"]));
        pipeline.get("a");

        let err = pipeline.exec().await.unwrap_err();
        assert!(matches!(err, Error::InvalidCommand { index: 1, command: "DEL", .. }));
        assert!(pipeline.results().iter().all(|r| r.is_none()));
        assert!(backends.iter().all(|b| b.pipeline_calls() == 0));

        pipeline.clear();
        pipeline.push(Command::new(CommandKind::Keys).arg("*"));
        let err = pipeline.exec().await.unwrap_err();
        assert!(matches!(err, Error::InvalidCommand { index: 0, command: "KEYS", .. }));
    }

    #[tokio::test]
    async fn test_command_error_stays_in_its_slot() {
        let (client, _) = client(&["a", "b", "c"]);
        client.set("str", "x").await.unwrap();

        let mut pipeline = client.pipeline();
        let ok = pipeline.incr("counter");
        let bad = pipeline.lpush("str", "v");
        let after = pipeline.get("str");

        let err = pipeline.exec().await.unwrap_err();
        assert_eq!(err, Error::Backend(crate::error::BackendError::WrongType));
        assert_eq!(pipeline.result(ok), Some(&Ok(Reply::Integer(1))));
        assert!(matches!(pipeline.result(bad), Some(Err(Error::Backend(_)))));
        assert_eq!(pipeline.result(after), Some(&Ok(Reply::bulk("x"))));

        let taken = pipeline.take_results();
        assert_eq!(taken.len(), 3);
        assert!(pipeline.is_empty());
    }
}
