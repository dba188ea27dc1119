use super::utils::memory_client;
use super::MemoryBackend;
use crate::backend::BackendConnection;
use crate::command::{Command, CommandKind};
use crate::error::Error;
use crate::types::{Reply, ShardId, ShardInfo};
use crate::ShardedClient;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use test_log::test;

/// Pick one key per shard, `per_shard` times, so a batch covers every shard.
fn keys_covering(client: &ShardedClient, per_shard: usize) -> Vec<String> {
    let mut picked: Vec<String> = Vec::new();
    for id in client.shard_ids() {
        let mut found = 0;
        let mut i = 0;
        while found < per_shard {
            let key = format!("k{}:{}", id, i);
            if client.shard_for_key(key.as_bytes()) == id {
                picked.push(key);
                found += 1;
            }
            i += 1;
        }
    }
    picked
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_slow_shard_does_not_reorder_results() {
    let backends: Vec<Arc<MemoryBackend>> = vec![
        Arc::new(MemoryBackend::new("A")),
        Arc::new(MemoryBackend::with_latency("B", Duration::from_millis(150))),
        Arc::new(MemoryBackend::new("C")),
    ];
    let shards = backends
        .iter()
        .map(|b| {
            let connection: Arc<dyn BackendConnection> = b.clone();
            ShardInfo::new(b.name(), format!("{}:6379", b.name()), connection)
        })
        .collect();
    let client = ShardedClient::from_shards(shards, 160).unwrap();

    // Interleave shards: A, B, C, A, B, C.
    let per_shard = keys_covering(&client, 2);
    let keys: Vec<String> = (0..2)
        .flat_map(|round| (0..3).map(move |shard| (shard, round)))
        .map(|(shard, round)| per_shard[shard * 2 + round].clone())
        .collect();

    for key in &keys {
        client.set(key.clone(), format!("value of {}", key)).await.unwrap();
    }

    let mut pipeline = client.pipeline();
    for key in &keys {
        pipeline.get(key.clone());
    }
    pipeline.exec().await.unwrap();

    assert_eq!(pipeline.len(), 6);
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(
            pipeline.result(i),
            Some(&Ok(Reply::bulk(format!("value of {}", key)))),
            "result #{}",
            i
        );
    }

    // B really finished last.
    let b_done = backends[1].completed_at().unwrap();
    assert!(backends[0].completed_at().unwrap() < b_done);
    assert!(backends[2].completed_at().unwrap() < b_done);

    // One round trip per shard.
    for backend in &backends {
        assert_eq!(backend.pipeline_calls(), 1);
        assert_eq!(backend.pipelined_commands(), 2);
    }
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_dump_aborts_the_batch() {
    let (client, backends) = memory_client(&["A", "B", "C"]);

    let mut pipeline = client.pipeline();
    pipeline.set("x", "1");
    pipeline.incr("counter");
    let dump = pipeline.dump("x");
    pipeline.get("x");

    let err = pipeline.exec().await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidCommand { index, command: "DUMP", .. } if index == dump
    ));
    assert!(err.is_validation_error());

    assert!(pipeline.results().iter().all(Option::is_none));
    for backend in &backends {
        assert_eq!(backend.pipeline_calls(), 0);
        assert!(backend.is_empty());
    }
    assert_eq!(client.get("x").await.unwrap(), None);
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_large_batch_keeps_identity() {
    let (client, _) = memory_client(&["A", "B", "C", "D"]);

    let mut pipeline = client.pipeline();
    let mut expected = Vec::new();
    for i in 0..500i64 {
        let key = format!("counter:{}", i);
        pipeline.incr_by(key.clone(), i);
        expected.push(Ok(Reply::Integer(i)));
        pipeline.ttl(key);
        expected.push(Ok(Reply::Integer(-1)));
    }
    pipeline.exec().await.unwrap();

    let results: Vec<_> = pipeline.take_results().into_iter().map(Option::unwrap).collect();
    assert_eq!(results, expected);
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_unreachable_shard_fails_only_its_commands() {
    let (client, backends) = memory_client(&["A", "B", "C"]);
    backends[1].fail_connections(true);

    let keys = keys_covering(&client, 3);
    let mut pipeline = client.pipeline();
    for key in &keys {
        pipeline.set(key.clone(), "v");
    }

    let err = pipeline.exec().await.unwrap_err();
    assert!(matches!(err, Error::ShardUnavailable { ref shard, .. } if shard == "B"));

    let failed: HashSet<ShardId> = keys
        .iter()
        .enumerate()
        .filter(|(i, _)| matches!(pipeline.result(*i), Some(Err(_))))
        .map(|(_, k)| client.shard_for_key(k.as_bytes()))
        .collect();
    assert_eq!(failed, HashSet::from(["B".to_string()]));

    for (i, key) in keys.iter().enumerate() {
        if client.shard_for_key(key.as_bytes()) != "B" {
            assert_eq!(pipeline.result(i), Some(&Ok(Reply::ok())));
        }
    }
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_pipeline_follows_replaced_shard() {
    let (client, _) = memory_client(&["A", "B", "C"]);
    let keys = keys_covering(&client, 2);

    let replacement = Arc::new(MemoryBackend::new("B2"));
    let current = client.shard("B").unwrap();
    client
        .replace("B", current.successor("10.0.0.99:6379", replacement.clone()))
        .unwrap();

    let mut pipeline = client.pipeline();
    for key in &keys {
        pipeline.sadd(key.clone(), "member");
    }
    pipeline.exec().await.unwrap();

    assert_eq!(replacement.pipeline_calls(), 1);
    assert_eq!(replacement.pipelined_commands(), 2);

    pipeline.clear();
    assert!(pipeline.is_empty());
    pipeline.exec().await.unwrap();
    assert_eq!(replacement.pipeline_calls(), 1);
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_single_key_global_commands_are_rejected() {
    let (client, backends) = memory_client(&["A", "B", "C"]);

    let cross_key = [
        (Command::with_key(CommandKind::Keys, "*"), "KEYS"),
        (Command::with_key(CommandKind::Rename, "src").arg("dst"), "RENAME"),
        (Command::with_key(CommandKind::RPopLPush, "src").arg("dst"), "RPOPLPUSH"),
        (Command::with_key(CommandKind::MSet, "k").arg("v"), "MSET"),
        (Command::with_key(CommandKind::SUnionStore, "dest").arg("s"), "SUNIONSTORE"),
    ];

    for (command, name) in cross_key {
        let mut pipeline = client.pipeline();
        pipeline.set("before", "1");
        pipeline.push(command);

        let err = pipeline.exec().await.unwrap_err();
        assert!(
            matches!(err, Error::InvalidCommand { index: 1, command, .. } if command == name),
            "{} gave {:?}",
            name,
            err
        );
        assert!(pipeline.results().iter().all(Option::is_none));
    }

    for backend in &backends {
        assert_eq!(backend.pipeline_calls(), 0);
        assert!(backend.is_empty());
    }
}
