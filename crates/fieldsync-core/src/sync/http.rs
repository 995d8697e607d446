//! HTTP client for the fieldsync backend.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;

use super::backend::{BatchAck, SyncBackend};
use crate::config::SyncEngineConfig;
use crate::models::{EmployeeId, EntityKind, RawRecord, Snapshot};
use crate::util::{is_http_url, normalize_text_option};
use crate::{Error, Result};

/// [`SyncBackend`] speaking JSON over HTTP.
#[derive(Clone)]
pub struct HttpSyncBackend {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpSyncBackend {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpSyncBackend")
            .field("base_url", &self.base_url)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl HttpSyncBackend {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = normalize_text_option(Some(base_url.into()))
            .ok_or_else(|| Error::Config("API base URL must not be empty".to_string()))?;
        if !is_http_url(&base_url) {
            return Err(Error::Config(
                "API base URL must include http:// or https://".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::Network(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: normalize_text_option(auth_token),
            client,
        })
    }

    pub fn from_config(config: &SyncEngineConfig) -> Result<Self> {
        Self::new(
            config.api_base_url.clone(),
            config.auth_token.clone(),
            config.http_timeout,
        )
    }

    fn records_url(&self, employee: &EmployeeId, kind: EntityKind) -> String {
        format!(
            "{}/v1/employees/{}/records/{}",
            self.base_url,
            urlencoding::encode(employee.as_str()),
            kind.table()
        )
    }

    fn snapshot_url(&self, employee: &EmployeeId) -> String {
        format!(
            "{}/v1/employees/{}/snapshot",
            self.base_url,
            urlencoding::encode(employee.as_str())
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = self
            .authorize(request)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|error| Error::Network(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(parse_api_error(status, &body));
        }
        Ok(response)
    }
}

impl SyncBackend for HttpSyncBackend {
    async fn push_batch(
        &self,
        employee: &EmployeeId,
        kind: EntityKind,
        records: &[RawRecord],
    ) -> Result<BatchAck> {
        let request = self
            .client
            .put(self.records_url(employee, kind))
            .json(&serde_json::json!({ "records": records }));

        self.send(request)
            .await?
            .json::<BatchAck>()
            .await
            .map_err(|error| Error::Network(format!("invalid push response: {error}")))
    }

    async fn fetch_snapshot(&self, employee: &EmployeeId) -> Result<Snapshot> {
        let request = self.client.get(self.snapshot_url(employee));

        self.send(request)
            .await?
            .json::<Snapshot>()
            .await
            .map_err(|error| Error::Network(format!("invalid snapshot response: {error}")))
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|payload| payload.message.or(payload.error))
        .map(|message| message.trim().to_string())
        .filter(|message| !message.is_empty())
        .or_else(|| normalize_text_option(Some(crate::util::compact_text(body))))
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

    Error::Backend {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> HttpSyncBackend {
        HttpSyncBackend::new(
            "https://api.example.com/",
            Some("secret-token".to_string()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn new_rejects_invalid_base_urls() {
        assert!(HttpSyncBackend::new("", None, Duration::from_secs(1)).is_err());
        assert!(HttpSyncBackend::new("api.example.com", None, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn urls_encode_employee_and_use_table_labels() {
        let backend = backend();
        let employee = EmployeeId::new("field team/7").unwrap();
        assert_eq!(
            backend.records_url(&employee, EntityKind::TimeEntry),
            "https://api.example.com/v1/employees/field%20team%2F7/records/time_entries"
        );
        assert_eq!(
            backend.snapshot_url(&employee),
            "https://api.example.com/v1/employees/field%20team%2F7/snapshot"
        );
    }

    #[test]
    fn debug_redacts_token() {
        let debug = format!("{:?}", backend());
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn parse_api_error_prefers_json_message() {
        let error = parse_api_error(StatusCode::TOO_MANY_REQUESTS, r#"{"error":"slow down"}"#);
        assert!(matches!(
            error,
            Error::Backend { status: 429, ref message } if message == "slow down"
        ));
    }

    #[test]
    fn parse_api_error_falls_back_to_body_or_status() {
        let error = parse_api_error(StatusCode::BAD_GATEWAY, "upstream down");
        assert!(matches!(error, Error::Backend { ref message, .. } if message == "upstream down"));

        let error = parse_api_error(StatusCode::BAD_GATEWAY, "  ");
        assert!(matches!(error, Error::Backend { ref message, .. } if message == "HTTP 502"));
        assert!(error.is_network());
    }
}
