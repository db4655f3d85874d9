//! Authenticated REST requests against the dashboard API.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::DEFAULT_EXCHANGE_TIMEOUT_MS;
use crate::error::ApiError;
use crate::exchange::{MAX_REASON_CHARS, UserProfile};
use crate::redact::redact_sensitive_detail;
use crate::store::CredentialStore;

pub const USER_PROFILE_PATH: &str = "/api/v1/user/profile";

/// Sends requests with the stored bearer token attached.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    store: Arc<CredentialStore>,
}

impl ApiClient {
    pub fn new(base_url: Url, store: Arc<CredentialStore>) -> Self {
        Self::with_timeout(
            base_url,
            store,
            Duration::from_millis(DEFAULT_EXCHANGE_TIMEOUT_MS),
        )
    }

    pub fn with_timeout(base_url: Url, store: Arc<CredentialStore>, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url,
            store,
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request::<(), T>(Method::GET, path, None).await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.request(Method::POST, path, Some(body)).await
    }

    /// Account summary for the logged-in wallet.
    pub async fn profile(&self) -> Result<UserProfile, ApiError> {
        self.get_json(USER_PROFILE_PATH).await
    }

    fn url_for(&self, path: &str) -> Result<Url, ApiError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{}", path.trim_start_matches('/'))).map_err(|e| {
            ApiError::RequestFailed {
                endpoint: path.to_string(),
                reason: e.to_string(),
            }
        })
    }

    async fn request<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError> {
        let endpoint = path.to_string();
        let token = self
            .store
            .token()
            .await
            .ok_or_else(|| ApiError::NoActiveSession {
                endpoint: endpoint.clone(),
            })?;
        let url = self.url_for(path)?;

        tracing::debug!("{} {}", method, url);
        let mut request = self
            .client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", token.expose_secret()));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| ApiError::RequestFailed {
            endpoint: endpoint.clone(),
            reason: redact_sensitive_detail(&e.to_string()),
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!("Bearer token rejected by {}", endpoint);
            return Err(ApiError::Unauthorized { endpoint });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::RequestFailed {
                endpoint,
                reason: failure_reason(status, &body),
            });
        }

        let body = response.text().await.map_err(|e| ApiError::RequestFailed {
            endpoint: endpoint.clone(),
            reason: redact_sensitive_detail(&e.to_string()),
        })?;
        serde_json::from_str(&body).map_err(|e| ApiError::InvalidResponse {
            endpoint,
            reason: e.to_string(),
        })
    }
}

fn failure_reason(status: StatusCode, body: &str) -> String {
    let body: String = body.trim().chars().take(MAX_REASON_CHARS).collect();
    redact_sensitive_detail(&format!("HTTP {status}: {body}"))
}
