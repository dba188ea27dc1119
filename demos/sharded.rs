//! Sharding, pipelining and failover against in-memory backends.

use shardis::testing::{ChannelDiscovery, MemoryConnectionFactory};
use shardis::{
    FailoverConfig, FailoverHandler, FailoverManager, ShardConfig, ShardedClient, ShardedConfig,
};
use shardis::failover::SWITCH_MASTER_CHANNEL;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter("shardis=debug,info")
        .init();

    let config = ShardedConfig::new(vec![
        ShardConfig::new("cache-1", "10.0.0.1:6379"),
        ShardConfig::new("cache-2", "10.0.0.2:6379"),
        ShardConfig::new("cache-3", "10.0.0.3:6379").with_weight(2),
    ])
    .with_failover_config(
        FailoverConfig::new(vec!["sentinel-1:26379".to_string()])
            .with_resubscribe_backoff(Duration::from_millis(100)),
    );

    let factory = Arc::new(MemoryConnectionFactory::new());
    let client = Arc::new(ShardedClient::connect(&config, factory.as_ref()).await?);
    println!("Ring has {} virtual nodes", client.ring_len());

    // Plain commands
    println!("\n--- Commands ---");
    client.set("{user42}name", "Ada").await?;
    client.set("{user42}email", "ada@example.com").await?;
    client.incr("visits").await?;
    client.sadd("{user42}roles", ["admin", "dev"]).await?;
    println!(
        "{{user42}} keys live on {}, visits on {}",
        client.shard_for_key(b"{user42}name"),
        client.shard_for_key(b"visits")
    );

    // Pipelines
    println!("\n--- Pipeline ---");
    let mut pipeline = client.pipeline();
    pipeline.get("{user42}name");
    pipeline.get("{user42}email");
    pipeline.incr("visits");
    pipeline.smembers("{user42}roles");
    pipeline.exec().await?;
    for (i, result) in pipeline.results().into_iter().enumerate() {
        println!("  #{} => {:?}", i, result);
    }

    // Failover
    println!("\n--- Failover ---");
    let discovery = Arc::new(ChannelDiscovery::new());
    let handler = Arc::new(FailoverHandler::from_config(client.clone(), factory.clone(), &config));
    let mut manager = FailoverManager::start(handler, discovery.clone(), &config.failover);

    let owner = client.shard_for_key(b"visits");
    while discovery.subscriber_count("sentinel-1:26379") == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let payload = format!("{} 10.0.0.1 6379 10.0.9.9 6379", owner);
    discovery.publish_message("sentinel-1:26379", SWITCH_MASTER_CHANNEL, &payload);

    while client.shard(&owner).map(|s| s.address.clone()).as_deref() != Some("10.0.9.9:6379") {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    println!("{} now served by 10.0.9.9:6379", owner);
    println!("visits on new master = {:?}", client.get("visits").await?);

    // Shutdown
    println!("\nShutting down...");
    manager.shutdown().await?;
    client.close().await?;

    Ok(())
}
