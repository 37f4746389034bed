//! `run` command implementation.

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::RunArgs;

/// Execute the `run` command
pub async fn run_relay(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let mut config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Apply CLI overrides
    if let Some(ref primary) = args.primary {
        info!(url = %primary, "Overriding primary source URL from CLI");
        config.primary = primary.clone();
    }
    if let Some(ref secondary) = args.secondary {
        info!(url = %secondary, "Overriding secondary source URL from CLI");
        config.secondary = Some(secondary.clone());
    }
    if let Some(ref destination) = args.destination {
        info!(url = %destination, "Overriding destination URL from CLI");
        config.destination = destination.clone();
    }

    info!(
        primary = %config.primary,
        secondary = config.secondary.as_deref().unwrap_or("(none)"),
        destination = %config.destination,
        topics = config.topics.len(),
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&config);
        return Ok(());
    }

    if args.metrics_port != 0 {
        observability::init_metrics_only(args.metrics_port)
            .context("Failed to start metrics endpoint")?;
    }

    serve(config).await
}

#[cfg(feature = "real-nats")]
async fn serve(config: contracts::RelayConfig) -> Result<()> {
    use std::sync::Arc;
    use tokio::sync::watch;

    let server = relay::Server::new(Arc::new(fabric::NatsFabric::new()), config);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::warn!("Received shutdown signal, stopping relay...");
        let _ = cancel_tx.send(true);
    });

    info!("Starting relay...");
    server
        .run(cancel_rx)
        .await
        .context("Relay execution failed")?;

    info!("NATS Relay finished");
    Ok(())
}

#[cfg(not(feature = "real-nats"))]
async fn serve(_config: contracts::RelayConfig) -> Result<()> {
    anyhow::bail!("This build has no NATS support; rebuild with the `real-nats` feature")
}

/// Wait for Ctrl+C or SIGTERM
#[cfg(feature = "real-nats")]
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(config: &contracts::RelayConfig) {
    println!("\n=== Configuration Summary ===\n");
    println!("Sources:");
    println!("  Primary: {}", config.primary);
    if let Some(ref secondary) = config.secondary {
        println!("  Secondary: {}", secondary);
    }
    println!("  Destination: {}", config.destination);

    println!("\nTopics ({}):", config.topics.len());
    for (pattern, topic) in &config.topics {
        let topic = topic.normalized();
        println!(
            "  - {} ({} shard(s), {} handler(s), prefix {}, loadbalance {})",
            pattern, topic.shard_count, topic.handler_count, topic.prefix_len, topic.load_balance
        );
    }

    println!();
}
