//! Configuration for the activity classifier.
//!
//! Bus settings come from the environment; everything else has defaults that
//! the command line can override.

use crate::model::ClassifierConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Kafka bootstrap servers, comma-separated.
pub const ENV_BOOTSTRAP: &str = "KAFKA_BOOTSTRAP";
/// Topic carrying raw sensor samples.
pub const ENV_RAW_TOPIC: &str = "RAW_EVENTS_TOPIC";
/// Topic receiving label changes.
pub const ENV_PROCESSED_TOPIC: &str = "PROCESSED_EVENTS_TOPIC";

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Message bus settings; only present for commands that use the bus
    pub bus: Option<BusConfig>,

    /// Where recordings live
    pub data: DataConfig,

    /// Model architecture and training schedule
    pub classifier: ClassifierConfig,

    /// Phone capture server settings
    pub capture: CaptureConfig,
}

impl Config {
    /// Defaults plus bus settings read from the environment.
    pub fn with_bus_from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bus: Some(BusConfig::from_env()?),
            ..Self::default()
        })
    }
}

/// Kafka connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    pub bootstrap: Vec<String>,
    pub raw_topic: String,
    pub processed_topic: String,
    pub client_id: String,
}

impl BusConfig {
    pub const DEFAULT_CLIENT_ID: &'static str = "activity-sense";

    /// Read the bus settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the bus settings through `lookup`.
    ///
    /// All three variables are required and must be non-empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| -> Result<String, ConfigError> {
            let value = lookup(key).ok_or(ConfigError::Missing(key))?;
            let value = value.trim().to_string();
            if value.is_empty() {
                return Err(ConfigError::Empty(key));
            }
            Ok(value)
        };

        let bootstrap_raw = required(ENV_BOOTSTRAP)?;
        let raw_topic = required(ENV_RAW_TOPIC)?;
        let processed_topic = required(ENV_PROCESSED_TOPIC)?;

        let bootstrap: Vec<String> = bootstrap_raw
            .split(',')
            .map(|host| host.trim().to_string())
            .filter(|host| !host.is_empty())
            .collect();
        if bootstrap.is_empty() {
            return Err(ConfigError::Empty(ENV_BOOTSTRAP));
        }

        Ok(Self {
            bootstrap,
            raw_topic,
            processed_topic,
            client_id: Self::DEFAULT_CLIENT_ID.to_string(),
        })
    }
}

/// Locations of the CSV recordings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory holding `train-<label>.csv`
    pub training_dir: PathBuf,
    /// Directory holding `test-<label>.csv`
    pub test_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            training_dir: PathBuf::from("trainingdata"),
            test_dir: PathBuf::from("testdata"),
        }
    }
}

/// Settings for the phone capture server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Port to bind to (0 for random)
    pub port: u16,

    /// How long a training recording runs once warm-up is over
    #[serde(with = "duration_serde")]
    pub record_duration: Duration,

    /// Updates discarded before recording training samples
    pub record_warmup: u32,

    /// Updates discarded before relaying samples to the bus
    pub relay_warmup: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            record_duration: Duration::from_secs(60),
            record_warmup: 50,
            relay_warmup: 16,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    Missing(&'static str),

    #[error("environment variable {0} is empty")]
    Empty(&'static str),
}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_bus_config_from_lookup() {
        let vars = env(&[
            (ENV_BOOTSTRAP, "broker-1:9092, broker-2:9092"),
            (ENV_RAW_TOPIC, "sensor-raw"),
            (ENV_PROCESSED_TOPIC, "sensor-processed"),
        ]);

        let config = BusConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.bootstrap, vec!["broker-1:9092", "broker-2:9092"]);
        assert_eq!(config.raw_topic, "sensor-raw");
        assert_eq!(config.processed_topic, "sensor-processed");
        assert_eq!(config.client_id, BusConfig::DEFAULT_CLIENT_ID);
    }

    #[test]
    fn test_missing_variable() {
        let vars = env(&[(ENV_BOOTSTRAP, "localhost:9092"), (ENV_RAW_TOPIC, "raw")]);
        let err = BusConfig::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert_eq!(err, ConfigError::Missing(ENV_PROCESSED_TOPIC));
    }

    #[test]
    fn test_empty_variable() {
        let vars = env(&[
            (ENV_BOOTSTRAP, "localhost:9092"),
            (ENV_RAW_TOPIC, "  "),
            (ENV_PROCESSED_TOPIC, "processed"),
        ]);
        let err = BusConfig::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert_eq!(err, ConfigError::Empty(ENV_RAW_TOPIC));

        let vars = env(&[
            (ENV_BOOTSTRAP, ", ,"),
            (ENV_RAW_TOPIC, "raw"),
            (ENV_PROCESSED_TOPIC, "processed"),
        ]);
        let err = BusConfig::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert_eq!(err, ConfigError::Empty(ENV_BOOTSTRAP));
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.bus.is_none());
        assert_eq!(config.data.training_dir, PathBuf::from("trainingdata"));
        assert_eq!(config.data.test_dir, PathBuf::from("testdata"));
        assert_eq!(config.classifier.epochs, 25);
        assert_eq!(config.capture.record_duration, Duration::from_secs(60));
        assert_eq!(config.capture.record_warmup, 50);
        assert_eq!(config.capture.relay_warmup, 16);
    }

    #[test]
    fn test_config_serializes() {
        let json = serde_json::to_string_pretty(&Config::default()).unwrap();
        assert!(json.contains("\"record_duration\": 60"));
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.data, DataConfig::default());
    }
}
