//! `validate` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    topic_count: usize,
    total_shards: usize,
    total_handlers: usize,
    has_secondary: bool,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            let normalized: Vec<_> = config.topics.values().map(|t| t.normalized()).collect();

            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    topic_count: config.topics.len(),
                    total_shards: normalized.iter().map(|t| t.shard_count).sum(),
                    total_handlers: normalized.iter().map(|t| t.handler_count).sum(),
                    has_secondary: config.secondary.is_some(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &contracts::RelayConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.secondary.is_none() {
        warnings.push("No secondary source configured - no failover path".to_string());
    }

    for (pattern, topic) in &config.topics {
        if topic.shard_count == 0 {
            warnings.push(format!("Topic '{pattern}': shard count 0 is clamped to 1"));
        }
        if topic.handler_count == 0 {
            warnings.push(format!("Topic '{pattern}': handler count 0 is clamped to 1"));
        }
        if topic.load_balance && topic.normalized().shard_count == 1 {
            warnings.push(format!(
                "Topic '{pattern}': loadbalance has no effect with a single shard"
            ));
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Topics: {}", summary.topic_count);
            println!("  Total shards: {}", summary.total_shards);
            println!("  Total handlers: {}", summary.total_handlers);
            println!(
                "  Secondary source: {}",
                if summary.has_secondary { "yes" } else { "no" }
            );
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
