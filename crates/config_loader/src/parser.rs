//! Configuration parsing
//!
//! YAML is the primary format; TOML and JSON are also supported.

use contracts::{RelayConfig, RelayError};

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format (recommended)
    Yaml,
    /// TOML format
    Toml,
    /// JSON format
    Json,
}

impl ConfigFormat {
    /// Infer format from a file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Parse YAML configuration
pub fn parse_yaml(content: &str) -> Result<RelayConfig, RelayError> {
    serde_yaml::from_str(content).map_err(|e| RelayError::ConfigParse {
        message: format!("YAML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// Parse TOML configuration
pub fn parse_toml(content: &str) -> Result<RelayConfig, RelayError> {
    toml::from_str(content).map_err(|e| RelayError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// Parse JSON configuration
pub fn parse_json(content: &str) -> Result<RelayConfig, RelayError> {
    serde_json::from_str(content).map_err(|e| RelayError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// Parse configuration content according to format
pub fn parse(content: &str, format: ConfigFormat) -> Result<RelayConfig, RelayError> {
    match format {
        ConfigFormat::Yaml => parse_yaml(content),
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}
