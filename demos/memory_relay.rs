//! Memory Relay Demo
//!
//! Runs the full relay against the in-process memory fabric: no NATS servers
//! required. A producer task publishes on the primary source, a consumer
//! subscribes on the destination, and the relay moves messages in between.
//!
//! Run with: cargo run --bin memory_relay

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use config_loader::{ConfigFormat, ConfigLoader};
use contracts::{Connection, Fabric, Subscription};
use fabric::MemoryFabric;
use relay::Server;

const CONFIG: &str = r#"
primary: "mem://primary"
destination: "mem://dest"
topic:
  "demo.>":
    shard: 3
    handler: 2
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    tracing::info!("Starting Memory Relay Demo");

    let config = ConfigLoader::load_from_str(CONFIG, ConfigFormat::Yaml)?;
    let fabric = Arc::new(MemoryFabric::new());

    // Consumer on the destination fabric
    let dest = fabric.connect("mem://dest").await?;
    let mut sink = dest.queue_subscribe("demo.>", "demo-consumer").await?;
    let consumer = tokio::spawn(async move {
        let mut received = 0u64;
        while let Some(msg) = sink.recv().await {
            received += 1;
            if received % 100 == 0 {
                tracing::info!(subject = %msg.subject, received, "consumer progress");
            }
        }
        received
    });

    // The relay itself
    let server = Server::new(Arc::clone(&fabric), config);
    server.start().await?;
    tracing::info!(links = server.link_count().await, "relay started");

    // Producer on the primary source fabric
    let producer = fabric.connect("mem://primary").await?;
    for i in 0..1000 {
        producer
            .publish(&format!("demo.topic.{}", i % 10), Bytes::from_static(b"payload"))
            .await?;
        if i % 250 == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
    tracing::info!("producer finished, draining relay");

    tokio::time::sleep(Duration::from_millis(200)).await;
    server.stop().await?;
    drop(dest);
    fabric.drop_subscriptions("mem://dest");

    let received = consumer.await?;
    tracing::info!(received, "demo complete");
    Ok(())
}
