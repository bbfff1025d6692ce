//! Configuration for resolving a channel.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Where a channel connects to and how long its operations may take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// `scheme://host:port`, or a bare `host:port` tried over TCP then UDP.
    pub address: String,
    /// Per-operation timeout. Zero disables automatic deadlines.
    #[serde(rename = "timeout_ms", with = "millis", default)]
    pub timeout: Duration,
}

impl ChannelConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: Duration::ZERO,
        }
    }

    /// Set the per-operation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Create configuration from environment variables.
    ///
    /// Expected variables:
    /// - `CHANNEL_ADDRESS`: address to resolve (required)
    /// - `CHANNEL_TIMEOUT_MS`: timeout in milliseconds (optional)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let address =
            lookup("CHANNEL_ADDRESS").ok_or_else(|| Error::custom("CHANNEL_ADDRESS not set"))?;
        let mut config = Self::new(address);

        if let Some(raw) = lookup("CHANNEL_TIMEOUT_MS") {
            let ms: u64 = raw
                .trim()
                .parse()
                .map_err(|_| Error::custom(format!("Invalid CHANNEL_TIMEOUT_MS: {raw}")))?;
            config.timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{ser::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).map_err(|_| {
            S::Error::custom(format!(
                "timeout of {value:?} does not fit in u64 milliseconds"
            ))
        })?;
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_config_builder() {
        let config = ChannelConfig::new("tcp://127.0.0.1:8080").with_timeout(Duration::from_secs(2));

        assert_eq!(config.address, "tcp://127.0.0.1:8080");
        assert_eq!(config.timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_from_env() {
        let config = ChannelConfig::from_lookup(env(&[
            ("CHANNEL_ADDRESS", "udp://10.0.0.1:53"),
            ("CHANNEL_TIMEOUT_MS", "1500"),
        ]))
        .unwrap();

        assert_eq!(config.address, "udp://10.0.0.1:53");
        assert_eq!(config.timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_from_env_requires_address() {
        let err = ChannelConfig::from_lookup(env(&[])).unwrap_err();
        assert!(err.to_string().contains("CHANNEL_ADDRESS"));
    }

    #[test]
    fn test_from_env_rejects_bad_timeout() {
        let result = ChannelConfig::from_lookup(env(&[
            ("CHANNEL_ADDRESS", "127.0.0.1:9"),
            ("CHANNEL_TIMEOUT_MS", "soon"),
        ]));
        assert!(matches!(result, Err(Error::Custom(msg)) if msg.contains("soon")));
    }

    #[test]
    fn test_deserialize_timeout_in_millis() {
        let config: ChannelConfig =
            serde_json::from_str(r#"{"address": "tcp://db:5432", "timeout_ms": 250}"#).unwrap();
        assert_eq!(config.timeout, Duration::from_millis(250));

        let config: ChannelConfig = serde_json::from_str(r#"{"address": "db:5432"}"#).unwrap();
        assert_eq!(config.timeout, Duration::ZERO);

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["timeout_ms"], 0);
    }

    #[test]
    fn test_serialize_rejects_oversized_timeout() {
        let config = ChannelConfig::new("tcp://db:5432").with_timeout(Duration::MAX);
        let err = serde_json::to_string(&config).unwrap_err();
        assert!(err.to_string().contains("u64 milliseconds"));

        let config =
            ChannelConfig::new("tcp://db:5432").with_timeout(Duration::from_millis(u64::MAX));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["timeout_ms"], u64::MAX);
    }
}
