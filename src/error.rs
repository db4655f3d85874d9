//! Error types for the DeFi Optimizer session client.

use serde::Serialize;

/// Top-level error type for the session client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),
}

/// Failure domains surfaced to UI consumers.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorDomain {
    Config,
    Wallet,
    Auth,
    Store,
    Channel,
    Api,
}

/// Structured error payload for UI consumers.
///
/// The subsystem performs no user-facing messaging itself; this envelope
/// gives the dashboard a stable code to branch on and a retry hint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub domain: ErrorDomain,
    pub code: &'static str,
    pub retryable: bool,
    pub message: String,
}

impl ErrorPayload {
    fn new(
        domain: ErrorDomain,
        code: &'static str,
        retryable: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            domain,
            code,
            retryable,
            message: message.into(),
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised by a wallet (key identity provider).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum WalletError {
    #[error("No wallet is available")]
    Unavailable,

    #[error("User rejected the wallet request")]
    Rejected,

    #[error("No account is selected in the wallet")]
    NoAccount,

    #[error("User declined to sign the message")]
    SignatureDeclined,

    #[error("Wallet failure: {0}")]
    Other(String),
}

/// Login handshake errors, propagated to the caller of `login()`.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("No wallet available")]
    NoWalletAvailable,

    #[error("User rejected the wallet connection")]
    UserRejected,

    #[error("No wallet account selected")]
    NoAccountSelected,

    #[error("User declined to sign the sign-in challenge")]
    SignatureDeclined,

    #[error("Wallet signed for {actual} but {expected} was requested")]
    SignerMismatch { expected: String, actual: String },

    #[error("Credential exchange rejected (HTTP {status}): {reason}")]
    CredentialExchangeRejected { status: u16, reason: String },

    #[error("Credential exchange timed out after {timeout_ms}ms")]
    CredentialExchangeTimeout { timeout_ms: u64 },

    #[error("Credential exchange request failed: {reason}")]
    CredentialExchangeFailed { reason: String },

    #[error("Login attempt was superseded by a logout")]
    Cancelled,

    #[error("Wallet failure: {0}")]
    Wallet(String),

    #[error("Failed to persist session: {0}")]
    Store(#[from] StoreError),
}

impl From<WalletError> for AuthError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::Unavailable => Self::NoWalletAvailable,
            WalletError::Rejected => Self::UserRejected,
            WalletError::NoAccount => Self::NoAccountSelected,
            WalletError::SignatureDeclined => Self::SignatureDeclined,
            WalletError::Other(reason) => Self::Wallet(reason),
        }
    }
}

/// Credential persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to serialize credentials: {0}")]
    Serialize(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Live channel errors. Cloneable so they can be broadcast as events.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("No active session; log in before connecting")]
    NoActiveSession,

    #[error("Connection not established within {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Invalid channel URL: {0}")]
    InvalidUrl(String),

    #[error("Connection attempt was superseded")]
    Superseded,
}

/// Authenticated REST API errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("No active session; log in before calling {endpoint}")]
    NoActiveSession { endpoint: String },

    #[error("Bearer token rejected by {endpoint}")]
    Unauthorized { endpoint: String },

    #[error("Request to {endpoint} failed: {reason}")]
    RequestFailed { endpoint: String, reason: String },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },
}

impl AuthError {
    pub fn to_error_payload(&self) -> ErrorPayload {
        let (code, retryable) = match self {
            Self::NoWalletAvailable => ("auth.no_wallet", false),
            Self::UserRejected => ("auth.user_rejected", true),
            Self::NoAccountSelected => ("auth.no_account", true),
            Self::SignatureDeclined => ("auth.signature_declined", true),
            Self::SignerMismatch { .. } => ("auth.signer_mismatch", false),
            Self::CredentialExchangeRejected { .. } => ("auth.exchange_rejected", false),
            Self::CredentialExchangeTimeout { .. } => ("auth.exchange_timeout", true),
            Self::CredentialExchangeFailed { .. } => ("auth.exchange_failed", true),
            Self::Cancelled => ("auth.cancelled", true),
            Self::Wallet(_) => ("auth.wallet_failed", true),
            Self::Store(_) => ("auth.persist_failed", true),
        };
        ErrorPayload::new(ErrorDomain::Auth, code, retryable, self.to_string())
    }
}

impl ChannelError {
    pub fn to_error_payload(&self) -> ErrorPayload {
        let (code, retryable) = match self {
            Self::NoActiveSession => ("channel.no_active_session", false),
            Self::ConnectTimeout { .. } => ("channel.connect_timeout", true),
            Self::TransportError(_) => ("channel.transport_error", true),
            Self::MalformedFrame(_) => ("channel.malformed_frame", false),
            Self::InvalidUrl(_) => ("channel.invalid_url", false),
            Self::Superseded => ("channel.superseded", false),
        };
        ErrorPayload::new(ErrorDomain::Channel, code, retryable, self.to_string())
    }
}

impl Error {
    /// Map any client error into the structured surface for UI consumers.
    pub fn to_error_payload(&self) -> ErrorPayload {
        match self {
            Self::Auth(err) => err.to_error_payload(),
            Self::Channel(err) => err.to_error_payload(),
            Self::Config(err) => {
                ErrorPayload::new(ErrorDomain::Config, "config.invalid", false, err.to_string())
            }
            Self::Wallet(err) => ErrorPayload {
                domain: ErrorDomain::Wallet,
                ..AuthError::from(err.clone()).to_error_payload()
            },
            Self::Store(err) => {
                ErrorPayload::new(ErrorDomain::Store, "store.io_error", true, err.to_string())
            }
            Self::Api(err) => match err {
                ApiError::NoActiveSession { .. } => ErrorPayload::new(
                    ErrorDomain::Api,
                    "api.no_active_session",
                    false,
                    err.to_string(),
                ),
                ApiError::Unauthorized { .. } => ErrorPayload::new(
                    ErrorDomain::Api,
                    "api.unauthorized",
                    false,
                    err.to_string(),
                ),
                ApiError::RequestFailed { .. } => ErrorPayload::new(
                    ErrorDomain::Api,
                    "api.request_failed",
                    true,
                    err.to_string(),
                ),
                ApiError::InvalidResponse { .. } => ErrorPayload::new(
                    ErrorDomain::Api,
                    "api.invalid_response",
                    false,
                    err.to_string(),
                ),
            },
        }
    }
}

/// Result type alias for the session client.
pub type Result<T> = std::result::Result<T, Error>;
