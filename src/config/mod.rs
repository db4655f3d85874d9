//! Configuration for the session client.
//!
//! Settings are loaded with priority: env var > `./.env` >
//! `~/.defi-optimizer/.env` > default. Nothing here is persisted by the
//! client; the credential pair lives in the [`CredentialStore`] instead.
//!
//! [`CredentialStore`]: crate::store::CredentialStore

pub(crate) mod helpers;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::config::helpers::{first_non_empty_env, optional_env, parse_optional_env};
use crate::error::ConfigError;

pub const DEFAULT_API_URL: &str = "http://localhost:8080";
pub const DEFAULT_SERVICE_NAME: &str = "DeFi Optimizer";
pub const DEFAULT_EXCHANGE_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Credential-exchange endpoint, relative to the API base.
pub const AUTH_WALLET_PATH: &str = "/api/v1/auth/wallet";
/// Push channel endpoint, relative to the API base.
pub const LIVE_CHANNEL_PATH: &str = "/api/v1/ws";

/// Main configuration for the session client.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the remote API (e.g. `https://api.defi-optimizer.io`).
    pub api_base_url: Url,
    /// Service name embedded in sign-in challenges.
    pub service_name: String,
    /// Where the credential pair is persisted.
    pub credentials_path: PathBuf,
    pub exchange_timeout: Duration,
    pub connect_timeout: Duration,
}

impl SessionConfig {
    /// Defaults for the given API base, without reading the environment.
    pub fn for_api(api_base_url: Url) -> Self {
        Self {
            api_base_url,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            credentials_path: default_credentials_path(),
            exchange_timeout: Duration::from_millis(DEFAULT_EXCHANGE_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }

    /// Load configuration from env vars (after loading `.env` files).
    pub fn from_env() -> Result<Self, ConfigError> {
        crate::bootstrap::load_client_env();
        Self::resolve()
    }

    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let raw_url = first_non_empty_env(&["DEFI_API_URL", "VITE_API_URL"])?
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_base_url = parse_api_base_url(&raw_url, "DEFI_API_URL")?;

        let exchange_timeout_ms =
            parse_optional_env("DEFI_EXCHANGE_TIMEOUT_MS", DEFAULT_EXCHANGE_TIMEOUT_MS)?;
        let connect_timeout_ms =
            parse_optional_env("DEFI_CONNECT_TIMEOUT_MS", DEFAULT_CONNECT_TIMEOUT_MS)?;
        for (key, value) in [
            ("DEFI_EXCHANGE_TIMEOUT_MS", exchange_timeout_ms),
            ("DEFI_CONNECT_TIMEOUT_MS", connect_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }

        Ok(Self {
            api_base_url,
            service_name: optional_env("DEFI_SERVICE_NAME")?
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            credentials_path: optional_env("DEFI_CREDENTIALS_PATH")?
                .map(PathBuf::from)
                .unwrap_or_else(default_credentials_path),
            exchange_timeout: Duration::from_millis(exchange_timeout_ms),
            connect_timeout: Duration::from_millis(connect_timeout_ms),
        })
    }

    /// Absolute URL of the credential-exchange endpoint.
    /// Point the client at another API base. Only http(s) URLs are accepted.
    pub fn set_api_base_url(&mut self, url: &Url) -> Result<(), ConfigError> {
        self.api_base_url = parse_api_base_url(url.as_str(), "api_base_url")?;
        Ok(())
    }

    pub fn auth_url(&self) -> Result<Url, ConfigError> {
        self.endpoint(AUTH_WALLET_PATH)
    }

    /// Absolute URL of a REST endpoint under the API base.
    pub fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
        let base = self.api_base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Url::parse(&format!("{base}/{path}")).map_err(|e| ConfigError::InvalidValue {
            key: "DEFI_API_URL".to_string(),
            message: format!("cannot build endpoint '{path}': {e}"),
        })
    }

    /// Push channel URL: the API base with its scheme upgraded to a socket
    /// scheme (`http` → `ws`, `https` → `wss`). The token is not included.
    pub fn live_channel_url(&self) -> Result<Url, ConfigError> {
        let mut url = self.endpoint(LIVE_CHANNEL_PATH)?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "DEFI_API_URL".to_string(),
                    message: format!("unsupported scheme '{other}' for the live channel"),
                });
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ConfigError::InvalidValue {
                key: "DEFI_API_URL".to_string(),
                message: format!("cannot switch scheme to '{scheme}'"),
            })?;
        Ok(url)
    }
}

/// Local private-key wallet used by the CLI in place of a browser wallet.
#[derive(Debug, Clone)]
pub struct LocalWalletConfig {
    pub private_key: SecretString,
}

impl LocalWalletConfig {
    pub fn resolve() -> Result<Self, ConfigError> {
        let private_key =
            optional_env("DEFI_WALLET_PRIVATE_KEY")?.ok_or_else(|| ConfigError::MissingRequired {
                key: "DEFI_WALLET_PRIVATE_KEY".to_string(),
                hint: "Set it to a 0x-prefixed secp256k1 private key to sign in from the CLI."
                    .to_string(),
            })?;
        Ok(Self {
            private_key: SecretString::from(private_key),
        })
    }
}

/// Default credential file: `~/.defi-optimizer/credentials.json`.
pub fn default_credentials_path() -> PathBuf {
    crate::bootstrap::data_dir().join("credentials.json")
}

fn parse_api_base_url(raw: &str, key: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("must be an absolute URL: {e}"),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected an http(s) URL, got scheme '{other}'"),
        }),
    }
}
