//! Credential exchange: trade a signed challenge for a bearer token.
//!
//! `POST /api/v1/auth/wallet` with `{wallet_address, signature, message}`;
//! a 2xx response carries `{token, user?}`. Any other status is a rejection.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AuthError;
use crate::redact::redact_sensitive_detail;

/// Longest response body excerpt kept in a rejection reason.
pub(crate) const MAX_REASON_CHARS: usize = 256;

/// Request body for the credential exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletAuthRequest {
    pub wallet_address: String,
    pub signature: String,
    pub message: String,
}

/// Account summary returned alongside the token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: u64,
    pub wallet_address: String,
    #[serde(default)]
    pub subscription_tier: Option<String>,
}

/// Successful exchange response.
#[derive(Clone, Deserialize)]
pub struct WalletAuthResponse {
    pub token: String,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

impl std::fmt::Debug for WalletAuthResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletAuthResponse")
            .field("token", &"[REDACTED]")
            .field("user", &self.user)
            .finish()
    }
}

/// Remote identity endpoint.
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    async fn exchange(
        &self,
        request: &WalletAuthRequest,
    ) -> Result<WalletAuthResponse, AuthError>;
}

/// HTTP implementation of [`CredentialExchange`].
#[derive(Debug, Clone)]
pub struct HttpCredentialExchange {
    client: Client,
    url: Url,
    timeout: Duration,
}

impl HttpCredentialExchange {
    pub fn new(url: Url, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            url,
            timeout,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn timeout_error(&self) -> AuthError {
        AuthError::CredentialExchangeTimeout {
            timeout_ms: self.timeout.as_millis().min(u128::from(u64::MAX)) as u64,
        }
    }

    fn transport_error(&self, error: reqwest::Error) -> AuthError {
        if error.is_timeout() {
            return self.timeout_error();
        }
        AuthError::CredentialExchangeFailed {
            reason: redact_sensitive_detail(&error.to_string()),
        }
    }

    async fn send(&self, request: &WalletAuthRequest) -> Result<WalletAuthResponse, AuthError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::CredentialExchangeRejected {
                status: status.as_u16(),
                reason: rejection_reason(&body, status),
            });
        }

        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        let parsed: WalletAuthResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::CredentialExchangeRejected {
                status: status.as_u16(),
                reason: format!("invalid response body: {e}"),
            })?;
        if parsed.token.trim().is_empty() {
            return Err(AuthError::CredentialExchangeRejected {
                status: status.as_u16(),
                reason: "response carried an empty token".to_string(),
            });
        }
        Ok(parsed)
    }
}

#[async_trait]
impl CredentialExchange for HttpCredentialExchange {
    async fn exchange(
        &self,
        request: &WalletAuthRequest,
    ) -> Result<WalletAuthResponse, AuthError> {
        tracing::debug!(
            "Exchanging signed challenge for {} at {}",
            request.wallet_address,
            self.url
        );
        match tokio::time::timeout(self.timeout, self.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(self.timeout_error()),
        }
    }
}

/// Prefer the server's `{"error": "..."}` message, else a trimmed body excerpt.
fn rejection_reason(body: &str, status: reqwest::StatusCode) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from));
    let reason = match from_json {
        Some(message) => message,
        None if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("request rejected")
            .to_string(),
        None => body.trim().chars().take(MAX_REASON_CHARS).collect(),
    };
    redact_sensitive_detail(&reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn request_serializes_to_wire_shape() {
        let request = WalletAuthRequest {
            wallet_address: "0xabc".to_string(),
            signature: "0xsig".to_string(),
            message: "Sign in".to_string(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "wallet_address": "0xabc",
                "signature": "0xsig",
                "message": "Sign in",
            })
        );
    }

    #[test]
    fn response_accepts_optional_user() {
        let bare: WalletAuthResponse = serde_json::from_str(r#"{"token":"T1"}"#).unwrap();
        assert_eq!(bare.token, "T1");
        assert!(bare.user.is_none());

        let full: WalletAuthResponse = serde_json::from_str(
            r#"{"token":"T1","user":{"id":7,"wallet_address":"0xabc","subscription_tier":"free"}}"#,
        )
        .unwrap();
        let user = full.user.unwrap();
        assert_eq!(user.id, 7);
        assert_eq!(user.subscription_tier.as_deref(), Some("free"));
    }

    #[test]
    fn response_debug_hides_token() {
        let response: WalletAuthResponse = serde_json::from_str(r#"{"token":"T-secret"}"#).unwrap();
        assert!(!format!("{response:?}").contains("T-secret"));
    }

    #[test]
    fn rejection_reason_prefers_error_field() {
        assert_eq!(
            rejection_reason(r#"{"error":"Invalid signature"}"#, StatusCode::UNAUTHORIZED),
            "Invalid signature"
        );
        assert_eq!(rejection_reason("", StatusCode::BAD_REQUEST), "Bad Request");
        let long = "x".repeat(1000);
        assert_eq!(
            rejection_reason(&long, StatusCode::INTERNAL_SERVER_ERROR).len(),
            MAX_REASON_CHARS
        );
    }
}
