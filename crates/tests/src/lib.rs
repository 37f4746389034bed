//! # Integration Tests
//!
//! End-to-end tests over the in-process memory fabric: configuration text in,
//! relayed messages out. No external servers required.

#[cfg(test)]
mod observability_tests {
    #[test]
    fn test_metric_descriptions_are_no_op_without_recorder() {
        observability::describe_metrics();
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{Connection, Fabric, RelayMessage, Subscription};
    use fabric::{MemoryFabric, MemorySubscription};
    use relay::Server;
    use tokio::time::timeout;

    const CONFIG_YAML: &str = r#"
primary: "mem://primary"
secondary: "mem://secondary"
destination: "mem://dest"
topic:
  "orders.>":
    shard: 3
    handler: 2
  "ticks.>":
    shard: 2
    prefix: 6
    loadbalance: true
"#;

    async fn recv(sub: &mut MemorySubscription) -> Option<RelayMessage> {
        timeout(Duration::from_millis(500), sub.recv())
            .await
            .ok()
            .flatten()
    }

    async fn dest_sink(fabric: &MemoryFabric) -> MemorySubscription {
        let conn = fabric.connect("mem://dest").await.unwrap();
        conn.queue_subscribe(">", "sink").await.unwrap()
    }

    /// Full path: YAML config -> server -> links -> sharded workers ->
    /// destination fabric.
    #[tokio::test]
    async fn test_e2e_config_to_delivery() {
        let config = ConfigLoader::load_from_str(CONFIG_YAML, ConfigFormat::Yaml).unwrap();
        let fabric = Arc::new(MemoryFabric::new());
        let mut sink = dest_sink(&fabric).await;

        let server = Server::new(Arc::clone(&fabric), config);
        server.start().await.unwrap();
        // 2 topics x 2 sources
        assert_eq!(server.link_count().await, 4);

        let primary = fabric.connect("mem://primary").await.unwrap();
        for i in 0..50 {
            primary
                .publish(&format!("orders.{i}"), Bytes::from_static(b"o"))
                .await
                .unwrap();
            primary
                .publish(&format!("ticks.{i}"), Bytes::from_static(b"t"))
                .await
                .unwrap();
        }

        let mut orders = 0;
        let mut ticks = 0;
        for _ in 0..100 {
            let msg = recv(&mut sink).await.expect("delivery missing");
            if msg.subject.starts_with("orders.") {
                orders += 1;
            } else {
                ticks += 1;
            }
        }
        assert_eq!(orders, 50);
        assert_eq!(ticks, 50);

        server.stop().await.unwrap();
    }

    /// The secondary source feeds the same destination as the primary.
    #[tokio::test]
    async fn test_e2e_secondary_failover_path() {
        let config = ConfigLoader::load_from_str(CONFIG_YAML, ConfigFormat::Yaml).unwrap();
        let fabric = Arc::new(MemoryFabric::new());
        let mut sink = dest_sink(&fabric).await;

        let server = Server::new(Arc::clone(&fabric), config);
        server.start().await.unwrap();

        // Primary drops off; traffic arriving on the secondary still flows.
        let secondary = fabric.connect("mem://secondary").await.unwrap();
        secondary
            .publish("orders.late", Bytes::from_static(b"x"))
            .await
            .unwrap();

        let msg = recv(&mut sink).await.expect("secondary path broken");
        assert_eq!(msg.subject, "orders.late");

        server.stop().await.unwrap();
    }

    /// Messages accepted before stop are delivered before connections close.
    #[tokio::test]
    async fn test_e2e_graceful_stop_delivers_backlog() {
        let config = ConfigLoader::load_from_str(CONFIG_YAML, ConfigFormat::Yaml).unwrap();
        let fabric = Arc::new(MemoryFabric::new());
        let mut sink = dest_sink(&fabric).await;

        let server = Server::new(Arc::clone(&fabric), config);
        server.start().await.unwrap();

        let primary = fabric.connect("mem://primary").await.unwrap();
        for i in 0..30 {
            primary
                .publish(&format!("orders.{i}"), Bytes::new())
                .await
                .unwrap();
        }
        server.stop().await.unwrap();

        let mut delivered = 0;
        while recv(&mut sink).await.is_some() {
            delivered += 1;
        }
        assert_eq!(delivered, 30);
    }

    /// Two relay instances with the same configuration load-share: each
    /// message is relayed exactly once.
    #[tokio::test]
    async fn test_e2e_instances_share_queue_group() {
        let fabric = Arc::new(MemoryFabric::new());
        let mut sink = dest_sink(&fabric).await;

        let config = ConfigLoader::load_from_str(CONFIG_YAML, ConfigFormat::Yaml).unwrap();
        let server_a = Server::new(Arc::clone(&fabric), config.clone());
        let server_b = Server::new(Arc::clone(&fabric), config);
        server_a.start().await.unwrap();
        server_b.start().await.unwrap();

        let primary = fabric.connect("mem://primary").await.unwrap();
        for i in 0..40 {
            primary
                .publish(&format!("orders.{i}"), Bytes::new())
                .await
                .unwrap();
        }

        let mut delivered = 0;
        while recv(&mut sink).await.is_some() {
            delivered += 1;
        }
        assert_eq!(delivered, 40, "queue group must not duplicate delivery");

        server_a.stop().await.unwrap();
        server_b.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_e2e_invalid_config_rejected_before_start() {
        let bad = r#"
primary: "mem://primary"
destination: "mem://primary"
topic: {}
"#;
        assert!(ConfigLoader::load_from_str(bad, ConfigFormat::Yaml).is_err());
    }
}
