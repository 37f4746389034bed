//! Configuration validation
//!
//! Rules:
//! - primary / destination URLs non-empty
//! - topic table non-empty
//! - topic patterns non-empty
//! - secondary URL, when present, non-empty and distinct from primary

use contracts::{RelayConfig, RelayError};

/// Validate a RelayConfig.
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(config: &RelayConfig) -> Result<(), RelayError> {
    validate_urls(config)?;
    validate_topics(config)?;
    Ok(())
}

fn validate_urls(config: &RelayConfig) -> Result<(), RelayError> {
    if config.primary.is_empty() {
        return Err(RelayError::config_validation(
            "primary",
            "primary source URL cannot be empty",
        ));
    }
    if config.destination.is_empty() {
        return Err(RelayError::config_validation(
            "destination",
            "destination URL cannot be empty",
        ));
    }
    if let Some(secondary) = &config.secondary {
        if secondary.is_empty() {
            return Err(RelayError::config_validation(
                "secondary",
                "secondary source URL cannot be empty, omit the key instead",
            ));
        }
        if secondary == &config.primary {
            return Err(RelayError::config_validation(
                "secondary",
                "secondary source URL duplicates primary",
            ));
        }
    }
    Ok(())
}

fn validate_topics(config: &RelayConfig) -> Result<(), RelayError> {
    if config.topics.is_empty() {
        return Err(RelayError::config_validation(
            "topic",
            "at least one topic must be configured",
        ));
    }
    for pattern in config.topics.keys() {
        if pattern.is_empty() {
            return Err(RelayError::config_validation(
                "topic",
                "topic pattern cannot be empty",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::TopicConfig;
    use std::collections::BTreeMap;

    fn minimal_config() -> RelayConfig {
        RelayConfig {
            primary: "nats://primary:4222/".into(),
            secondary: Some("nats://secondary:4222/".into()),
            destination: "nats://dest:4222/".into(),
            topics: BTreeMap::from([("foo.>".to_string(), TopicConfig::default())]),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&minimal_config()).is_ok());
    }

    #[test]
    fn test_empty_primary() {
        let mut config = minimal_config();
        config.primary = String::new();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("primary"), "got: {err}");
    }

    #[test]
    fn test_empty_destination() {
        let mut config = minimal_config();
        config.destination = String::new();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("destination"), "got: {err}");
    }

    #[test]
    fn test_secondary_duplicates_primary() {
        let mut config = minimal_config();
        config.secondary = Some(config.primary.clone());
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("duplicates"), "got: {err}");
    }

    #[test]
    fn test_empty_topic_table() {
        let mut config = minimal_config();
        config.topics.clear();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("at least one topic"), "got: {err}");
    }

    #[test]
    fn test_empty_topic_pattern() {
        let mut config = minimal_config();
        config.topics.insert(String::new(), TopicConfig::default());
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("pattern"), "got: {err}");
    }
}
