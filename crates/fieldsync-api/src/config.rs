use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Shared bearer token; `None` disables auth
    pub auth_token: Option<String>,
    pub rate_limit_window: Duration,
    pub push_rate_limit_per_window: u32,
    pub max_batch_records: usize,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "push_rate_limit_per_window",
                &self.push_rate_limit_per_window,
            )
            .field("max_batch_records", &self.max_batch_records)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            auth_token: None,
            rate_limit_window: Duration::from_secs(60),
            push_rate_limit_per_window: 120,
            max_batch_records: 5_000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "FIELDSYNC_API_BIND_ADDR", "127.0.0.1:8080");
        let auth_token = optional_trimmed(&lookup, "FIELDSYNC_API_AUTH_TOKEN");

        let rate_limit_window_secs = value_or_default(&lookup, "RATE_LIMIT_WINDOW_SECS", "60")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "RATE_LIMIT_WINDOW_SECS must be an integer in [1, 3600]".to_string(),
                )
            })?;
        if !(1..=3_600).contains(&rate_limit_window_secs) {
            return Err(ConfigError::Invalid(
                "RATE_LIMIT_WINDOW_SECS must be in [1, 3600]".to_string(),
            ));
        }

        let push_rate_limit_per_window =
            value_or_default(&lookup, "PUSH_RATE_LIMIT_PER_WINDOW", "120")
                .parse::<u32>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "PUSH_RATE_LIMIT_PER_WINDOW must be an integer in [1, 10000]".to_string(),
                    )
                })?;
        if !(1..=10_000).contains(&push_rate_limit_per_window) {
            return Err(ConfigError::Invalid(
                "PUSH_RATE_LIMIT_PER_WINDOW must be in [1, 10000]".to_string(),
            ));
        }

        let max_batch_records = value_or_default(&lookup, "MAX_BATCH_RECORDS", "5000")
            .parse::<usize>()
            .map_err(|_| {
                ConfigError::Invalid("MAX_BATCH_RECORDS must be a positive integer".to_string())
            })?;
        if max_batch_records == 0 {
            return Err(ConfigError::Invalid(
                "MAX_BATCH_RECORDS must be a positive integer".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            auth_token,
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            push_rate_limit_per_window,
            max_batch_records,
        })
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
