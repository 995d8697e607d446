//! Runtime configuration for the sync engine.
//!
//! Values come from `FIELDSYNC_*` environment variables. `from_lookup` takes an
//! arbitrary key lookup so parsing can be exercised without touching the
//! process environment.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::duplicate::{DuplicateGuard, DuplicateGuardConfig};
use crate::realtime::RealtimeOptions;
use crate::sync::PushPacing;
use crate::util::{is_http_url, is_ws_url};
use crate::{Error, Result};

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;
const DEFAULT_RECONNECT_MAX_SECS: u64 = 30;
const REALTIME_PATH: &str = "/v1/realtime";

/// Engine configuration shared by the HTTP backend, pacing, duplicate guard,
/// and real-time channel.
#[derive(Clone, PartialEq)]
pub struct SyncEngineConfig {
    pub api_base_url: String,
    pub realtime_url: String,
    pub auth_token: Option<String>,
    pub push_pacing: PushPacing,
    pub http_timeout: Duration,
    pub duplicate_tolerance_miles: f64,
    pub reconnect_max: Duration,
}

impl fmt::Debug for SyncEngineConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SyncEngineConfig")
            .field("api_base_url", &self.api_base_url)
            .field("realtime_url", &self.realtime_url)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("push_pacing", &self.push_pacing)
            .field("http_timeout", &self.http_timeout)
            .field("duplicate_tolerance_miles", &self.duplicate_tolerance_miles)
            .field("reconnect_max", &self.reconnect_max)
            .finish()
    }
}

impl SyncEngineConfig {
    pub fn from_env() -> Result<Self> {
        let values: HashMap<String, String> = std::env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_base_url = optional_trimmed(&lookup, "FIELDSYNC_API_BASE_URL")
            .ok_or_else(|| Error::Config("Missing FIELDSYNC_API_BASE_URL".to_string()))?;
        if !is_http_url(&api_base_url) {
            return Err(Error::Config(
                "FIELDSYNC_API_BASE_URL must start with http:// or https://".to_string(),
            ));
        }
        let api_base_url = api_base_url.trim_end_matches('/').to_string();

        let realtime_url = match optional_trimmed(&lookup, "FIELDSYNC_REALTIME_URL") {
            Some(url) if is_ws_url(&url) => url,
            Some(_) => {
                return Err(Error::Config(
                    "FIELDSYNC_REALTIME_URL must start with ws:// or wss://".to_string(),
                ))
            }
            None => derive_realtime_url(&api_base_url),
        };

        let defaults = PushPacing::default();
        let push_pacing_ms = parse_or(
            &lookup,
            "FIELDSYNC_PUSH_PACING_MS",
            u64::try_from(defaults.between_batches.as_millis()).unwrap_or(500),
        )?;
        let receipt_pacing_ms = parse_or(
            &lookup,
            "FIELDSYNC_RECEIPT_PACING_MS",
            u64::try_from(defaults.after_receipts.as_millis()).unwrap_or(1_500),
        )?;
        if push_pacing_ms > 60_000 || receipt_pacing_ms > 60_000 {
            return Err(Error::Config(
                "Push pacing must be in [0, 60000] ms".to_string(),
            ));
        }

        let http_timeout_secs =
            parse_or(&lookup, "FIELDSYNC_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?;
        if !(1..=300).contains(&http_timeout_secs) {
            return Err(Error::Config(
                "FIELDSYNC_HTTP_TIMEOUT_SECS must be in [1, 300]".to_string(),
            ));
        }

        let duplicate_tolerance_miles = parse_or(
            &lookup,
            "FIELDSYNC_DUPLICATE_TOLERANCE_MILES",
            DuplicateGuardConfig::default().distance_tolerance_miles,
        )?;
        if !duplicate_tolerance_miles.is_finite() || duplicate_tolerance_miles < 0.0 {
            return Err(Error::Config(
                "FIELDSYNC_DUPLICATE_TOLERANCE_MILES must be a non-negative number".to_string(),
            ));
        }

        let reconnect_max_secs = parse_or(
            &lookup,
            "FIELDSYNC_RECONNECT_MAX_SECS",
            DEFAULT_RECONNECT_MAX_SECS,
        )?;
        if !(1..=3_600).contains(&reconnect_max_secs) {
            return Err(Error::Config(
                "FIELDSYNC_RECONNECT_MAX_SECS must be in [1, 3600]".to_string(),
            ));
        }

        Ok(Self {
            api_base_url,
            realtime_url,
            auth_token: optional_trimmed(&lookup, "FIELDSYNC_AUTH_TOKEN"),
            push_pacing: PushPacing {
                between_batches: Duration::from_millis(push_pacing_ms),
                after_receipts: Duration::from_millis(receipt_pacing_ms),
            },
            http_timeout: Duration::from_secs(http_timeout_secs),
            duplicate_tolerance_miles,
            reconnect_max: Duration::from_secs(reconnect_max_secs),
        })
    }

    /// Duplicate guard using the configured distance tolerance.
    pub fn duplicate_guard(&self) -> DuplicateGuard {
        DuplicateGuard::new(DuplicateGuardConfig {
            distance_tolerance_miles: self.duplicate_tolerance_miles,
            ..DuplicateGuardConfig::default()
        })
    }

    /// Connection options for the real-time channel.
    pub fn realtime_options(&self) -> RealtimeOptions {
        RealtimeOptions {
            url: self.realtime_url.clone(),
            auth_token: self.auth_token.clone(),
            max_backoff: self.reconnect_max,
            ..RealtimeOptions::default()
        }
    }
}

/// `http(s)://host/base` becomes `ws(s)://host/base/v1/realtime`.
fn derive_realtime_url(api_base_url: &str) -> String {
    let base = api_base_url
        .strip_prefix("https://")
        .map(|rest| format!("wss://{rest}"))
        .or_else(|| {
            api_base_url
                .strip_prefix("http://")
                .map(|rest| format!("ws://{rest}"))
        })
        .unwrap_or_else(|| api_base_url.to_string());
    format!("{base}{REALTIME_PATH}")
}

fn parse_or<T: std::str::FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T> {
    match optional_trimmed(lookup, name) {
        Some(value) => value
            .parse::<T>()
            .map_err(|_| Error::Config(format!("{name} must be a number, got {value:?}"))),
        None => Ok(default),
    }
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
