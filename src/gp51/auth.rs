use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use super::client::VendorClient;
use super::ACTION_LOGIN;
use crate::constants::VENDOR_STATUS_ERROR;
use crate::db::FleetStore;
use crate::error::SyncError;
use crate::models::VendorSession;
use crate::rate_limiter::RateLimiter;
use crate::security::{try_hash_password, validate_input};

/// Outcome of a vendor login. The session token itself is never exposed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResult {
    pub success: bool,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub remaining_attempts: Option<u32>,
    /// Set when the attempt was refused by the rate limiter
    pub reset_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl LoginResult {
    fn failed(error: impl Into<String>, remaining_attempts: Option<u32>) -> Self {
        Self {
            error: Some(error.into()),
            remaining_attempts,
            ..Default::default()
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.reset_time.is_some()
    }
}

/// Logs in to the vendor and stores the resulting session
#[derive(Clone)]
pub struct Authenticator {
    client: VendorClient,
    store: Arc<dyn FleetStore>,
    limiter: Arc<RateLimiter>,
    session_ttl: Duration,
}

impl Authenticator {
    pub fn new(
        client: VendorClient,
        store: Arc<dyn FleetStore>,
        limiter: Arc<RateLimiter>,
        session_ttl: Duration,
    ) -> Self {
        Self {
            client,
            store,
            limiter,
            session_ttl,
        }
    }

    /// Hash the password, consult the rate limiter, then call the vendor.
    ///
    /// Invalid credentials fail before any attempt is counted.
    pub async fn authenticate(&self, username: &str, password: &str) -> LoginResult {
        let username = username.trim();
        if username.is_empty() {
            return LoginResult::failed("Username cannot be empty", None);
        }
        let check = validate_input(username);
        if !check.is_valid {
            return LoginResult::failed(
                check.error.unwrap_or_else(|| "Invalid username".to_string()),
                None,
            );
        }

        let hash = match try_hash_password(password) {
            Ok(hash) => hash,
            Err(e) => return LoginResult::failed(e.to_string(), None),
        };

        let decision = self.limiter.check_limit(username);
        if !decision.allowed {
            let reset_time = decision.reset_time.unwrap_or_else(Utc::now);
            return LoginResult {
                remaining_attempts: Some(0),
                reset_time: Some(reset_time),
                error: Some(SyncError::RateLimited { reset_time }.to_string()),
                ..Default::default()
            };
        }

        match self.login(username, &hash).await {
            Ok(session) => {
                self.limiter.record_success(username);
                tracing::info!("Vendor login succeeded for {}", username);
                LoginResult {
                    success: true,
                    token_expires_at: Some(session.expires_at),
                    remaining_attempts: Some(self.limiter.max_attempts()),
                    ..Default::default()
                }
            }
            Err(e) => {
                self.limiter.record_failure(username, &e.to_string());
                tracing::warn!("Vendor login failed for {}: {}", username, e);
                LoginResult::failed(e.to_string(), Some(decision.remaining_attempts))
            }
        }
    }

    async fn login(&self, username: &str, password_hash: &str) -> Result<VendorSession, SyncError> {
        let response = self
            .client
            .call(
                ACTION_LOGIN,
                None,
                &json!({
                    "username": username,
                    "password": password_hash,
                    "from": "WEB",
                    "type": "USER",
                }),
            )
            .await?;

        let token = response
            .get("token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SyncError::Vendor {
                status: VENDOR_STATUS_ERROR,
                cause: "login response carried no token".to_string(),
            })?;

        let now = Utc::now();
        let session = VendorSession {
            username: username.to_string(),
            token: token.to_string(),
            expires_at: now + self.session_ttl,
            created_at: now,
        };
        self.store.save_session(&session).await?;
        Ok(session)
    }
}
