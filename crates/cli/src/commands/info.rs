//! `info` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    primary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    secondary: Option<String>,
    destination: String,
    topics: Vec<TopicInfo>,
}

#[derive(Serialize)]
struct TopicInfo {
    pattern: String,
    shards: usize,
    handlers: usize,
    prefix_len: usize,
    load_balance: bool,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&config);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&config);
    }

    Ok(())
}

fn build_config_info(config: &contracts::RelayConfig) -> ConfigInfo {
    ConfigInfo {
        primary: config.primary.clone(),
        secondary: config.secondary.clone(),
        destination: config.destination.clone(),
        topics: config
            .topics
            .iter()
            .map(|(pattern, topic)| {
                let topic = topic.normalized();
                TopicInfo {
                    pattern: pattern.clone(),
                    shards: topic.shard_count,
                    handlers: topic.handler_count,
                    prefix_len: topic.prefix_len,
                    load_balance: topic.load_balance,
                }
            })
            .collect(),
    }
}

fn print_config_info(config: &contracts::RelayConfig) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                 NATS Relay Configuration                     ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("🔌 Sources");
    println!("   ├─ Primary: {}", config.primary);
    match &config.secondary {
        Some(secondary) => println!("   ├─ Secondary: {}", secondary),
        None => println!("   ├─ Secondary: (none)"),
    }
    println!("   └─ Destination: {}", config.destination);

    println!("\n📨 Topics ({})", config.topics.len());
    let count = config.topics.len();
    for (i, (pattern, topic)) in config.topics.iter().enumerate() {
        let topic = topic.normalized();
        let prefix = if i == count - 1 { "└─" } else { "├─" };
        println!(
            "   {} {} ({} shard(s), {} handler(s), prefix {}, loadbalance {})",
            prefix, pattern, topic.shard_count, topic.handler_count, topic.prefix_len,
            topic.load_balance
        );
    }

    println!();
}
