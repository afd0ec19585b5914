use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::constants::{
    VENDOR_RETRY_ATTEMPTS, VENDOR_RETRY_BASE_DELAY_MS, VENDOR_STATUS_ERROR,
};
use crate::error::SyncError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Linear retry schedule: attempt `n` failing waits `base_delay * n`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: VENDOR_RETRY_ATTEMPTS,
            base_delay: Duration::from_millis(VENDOR_RETRY_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// HTTP client for the vendor API.
///
/// Every call is a POST to `{base_url}?action=<action>[&token=<token>]`
/// with a JSON body; a top-level `status` of 0 means success.
#[derive(Clone)]
pub struct VendorClient {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl std::fmt::Debug for VendorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorClient")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .finish()
    }
}

impl VendorClient {
    pub fn new(base_url: impl Into<String>, retry: RetryPolicy) -> Result<Self, SyncError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(format!("fleet-backup-server/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Call `action` with bounded retries.
    ///
    /// Transport errors, non-2xx responses and non-zero vendor statuses are
    /// all retried; once the attempts run out the last error is reported.
    pub async fn call(
        &self,
        action: &str,
        token: Option<&str>,
        body: &Value,
    ) -> Result<Value, SyncError> {
        let attempts = self.retry.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.call_once(action, token, body).await {
                Ok(response) => {
                    if attempt > 1 {
                        tracing::info!("Vendor action {} succeeded on attempt {}", action, attempt);
                    }
                    return Ok(response);
                }
                Err(e) => {
                    match &e {
                        SyncError::Vendor { status, .. } if *status == VENDOR_STATUS_ERROR => {
                            tracing::warn!(
                                "Vendor action {} attempt {}/{} hit a retryable error: {}",
                                action,
                                attempt,
                                attempts,
                                e
                            );
                        }
                        _ => tracing::warn!(
                            "Vendor action {} attempt {}/{} failed: {}",
                            action,
                            attempt,
                            attempts,
                            e
                        ),
                    }
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.retry.delay_after(attempt)).await;
                    }
                }
            }
        }

        Err(SyncError::RetriesExhausted {
            attempts,
            last_error,
        })
    }

    async fn call_once(
        &self,
        action: &str,
        token: Option<&str>,
        body: &Value,
    ) -> Result<Value, SyncError> {
        let mut request = self
            .http
            .post(&self.base_url)
            .query(&[("action", action)]);
        if let Some(token) = token {
            request = request.query(&[("token", token)]);
        }

        let response = request.json(body).send().await?.error_for_status()?;
        let payload: Value = response.json().await?;
        check_status(payload)
    }
}

/// Treat a missing `status` as success; anything else non-zero is an error
fn check_status(payload: Value) -> Result<Value, SyncError> {
    let status = payload.get("status").and_then(Value::as_i64).unwrap_or(0);
    if status == 0 {
        return Ok(payload);
    }

    let cause = payload
        .get("cause")
        .and_then(Value::as_str)
        .unwrap_or("unknown vendor error")
        .to_string();
    Err(SyncError::Vendor { status, cause })
}
