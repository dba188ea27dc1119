use crate::backend::BackendConnection;
use crate::client::ShardedClient;
use crate::types::ShardInfo;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use super::MemoryBackend;

/// Build a client over fresh memory backends, one per id, at `<id>:6379`.
pub(crate) fn memory_client(ids: &[&str]) -> (Arc<ShardedClient>, Vec<Arc<MemoryBackend>>) {
    let backends: Vec<Arc<MemoryBackend>> =
        ids.iter().map(|id| Arc::new(MemoryBackend::new(*id))).collect();
    let shards = backends
        .iter()
        .map(|backend| {
            let connection: Arc<dyn BackendConnection> = backend.clone();
            ShardInfo::new(backend.name(), format!("{}:6379", backend.name()), connection)
        })
        .collect();
    let client = ShardedClient::from_shards(shards, crate::ring::DEFAULT_VIRTUAL_NODES_PER_SHARD)
        .expect("memory shards form a valid ring");
    (Arc::new(client), backends)
}

pub async fn wait_for_result<F, Fut, T, P>(
    mut action: F,
    predicate: P,
    timeout: Duration,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = T>,
    P: Fn(&T) -> bool,
{
    let start = Instant::now();
    let interval = Duration::from_millis(20);

    while start.elapsed() < timeout {
        let result = action().await;
        if predicate(&result) {
            return Some(result);
        }
        sleep(interval).await;
    }
    None
}

/// Wait for a condition with timeout
pub(crate) async fn wait_for<F>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}
