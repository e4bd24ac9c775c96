use serde::{Deserialize, Serialize};

use crate::error::{GraphexError, Result};

pub const ENV_SEND_RETRY_LIMIT: &str = "GRAPHEX_SEND_RETRY_LIMIT";
pub const ENV_SEND_RETRY_INTERVAL_MS: &str = "GRAPHEX_SEND_RETRY_INTERVAL_MS";
pub const ENV_MAX_MESSAGE_BYTES: &str = "GRAPHEX_MAX_MESSAGE_BYTES";
pub const ENV_LOCAL_BUFFER_CAPACITY: &str = "GRAPHEX_LOCAL_BUFFER_CAPACITY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Exchange-layer knobs shared by every worker of a query.
pub struct ExchangeConfig {
    /// Delivery attempts per message before the send fails for good.
    pub send_retry_limit: u32,
    /// Fixed sleep between two delivery attempts.
    pub send_retry_interval_ms: u64,
    /// Largest payload a worker accepts. Larger payloads fail without retry.
    pub max_message_bytes: usize,
    /// Capacity of bounded local buffers created for a query.
    pub local_buffer_capacity: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            send_retry_limit: 100,
            send_retry_interval_ms: 10,
            max_message_bytes: 10 * 1024 * 1024,
            local_buffer_capacity: 1024,
        }
    }
}

impl ExchangeConfig {
    /// Defaults overridden by `GRAPHEX_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `GRAPHEX_*` key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = lookup(ENV_SEND_RETRY_LIMIT) {
            config.send_retry_limit = parse_env(ENV_SEND_RETRY_LIMIT, &v)?;
        }
        if let Some(v) = lookup(ENV_SEND_RETRY_INTERVAL_MS) {
            config.send_retry_interval_ms = parse_env(ENV_SEND_RETRY_INTERVAL_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_MESSAGE_BYTES) {
            config.max_message_bytes = parse_env(ENV_MAX_MESSAGE_BYTES, &v)?;
        }
        if let Some(v) = lookup(ENV_LOCAL_BUFFER_CAPACITY) {
            config.local_buffer_capacity = parse_env(ENV_LOCAL_BUFFER_CAPACITY, &v)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.send_retry_limit == 0 {
            return Err(GraphexError::InvalidConfig(
                "send_retry_limit must be at least 1".to_string(),
            ));
        }
        if self.max_message_bytes == 0 {
            return Err(GraphexError::InvalidConfig(
                "max_message_bytes must be positive".to_string(),
            ));
        }
        if self.local_buffer_capacity == 0 {
            return Err(GraphexError::InvalidConfig(
                "local_buffer_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| GraphexError::InvalidConfig(format!("{key}={value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn lookup_overrides_defaults() {
        let env = HashMap::from([
            (ENV_SEND_RETRY_LIMIT, "3"),
            (ENV_MAX_MESSAGE_BYTES, " 4096 "),
        ]);
        let config = ExchangeConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()))
            .expect("config");
        assert_eq!(config.send_retry_limit, 3);
        assert_eq!(config.max_message_bytes, 4096);
        assert_eq!(config.send_retry_interval_ms, 10);
        assert_eq!(config.local_buffer_capacity, 1024);
    }

    #[test]
    fn rejects_garbage_and_zero_values() {
        let err = ExchangeConfig::from_lookup(|k| {
            (k == ENV_SEND_RETRY_INTERVAL_MS).then(|| "soon".to_string())
        })
        .expect_err("unparsable interval");
        assert!(err.to_string().contains(ENV_SEND_RETRY_INTERVAL_MS));

        let err = ExchangeConfig::from_lookup(|k| {
            (k == ENV_SEND_RETRY_LIMIT).then(|| "0".to_string())
        })
        .expect_err("zero retries");
        assert!(matches!(err, GraphexError::InvalidConfig(_)));
    }
}
