//! Durable credential store for the current session.
//!
//! Holds the (address, bearer token) pair as one unit: readers see either
//! both or neither. The pair is persisted to `~/.defi-optimizer/credentials.json`
//! as two string entries, `wallet_address` and `auth_token`, written through a
//! temp file and rename so a crash never leaves half a pair on disk.

use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::wallet::normalize_address;

pub const WALLET_ADDRESS_KEY: &str = "wallet_address";
pub const AUTH_TOKEN_KEY: &str = "auth_token";

/// A lowercase-normalized wallet address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    address: String,
}

impl Identity {
    /// Parse and normalize an address. Returns `None` unless it is a
    /// `0x`-prefixed 40-hex address.
    pub fn parse(address: &str) -> Option<Self> {
        normalize_address(address).map(|address| Self { address })
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.address)
    }
}

/// An opaque bearer token. Redacted from `Debug` output.
#[derive(Debug, Clone)]
pub struct Credential {
    token: SecretString,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
        }
    }

    pub fn token(&self) -> &SecretString {
        &self.token
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.token.expose_secret() == other.token.expose_secret()
    }
}

impl Eq for Credential {}

/// The authenticated session: identity and credential, both or neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: Identity,
    pub credential: Credential,
}

impl Session {
    pub fn new(identity: Identity, credential: Credential) -> Self {
        Self {
            identity,
            credential,
        }
    }

    pub fn address(&self) -> &str {
        self.identity.address()
    }

    pub fn token(&self) -> &SecretString {
        self.credential.token()
    }
}

/// On-disk shape. Both entries are optional so that a half-written file from
/// an older client can be detected and discarded instead of failing to parse.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedEntries {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    wallet_address: Option<String>,
    #[serde(default, alias = "token", skip_serializing_if = "Option::is_none")]
    auth_token: Option<String>,
}

impl PersistedEntries {
    fn from_session(session: &Session) -> Self {
        Self {
            wallet_address: Some(session.address().to_string()),
            auth_token: Some(session.token().expose_secret().to_string()),
        }
    }

    fn into_session(self) -> Result<Option<Session>, String> {
        let address = self.wallet_address.filter(|s| !s.trim().is_empty());
        let token = self
            .auth_token
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        match (address, token) {
            (None, None) => Ok(None),
            (Some(address), Some(token)) => {
                let identity = Identity::parse(&address)
                    .ok_or_else(|| format!("{WALLET_ADDRESS_KEY} is not a valid address"))?;
                Ok(Some(Session::new(identity, Credential::new(token))))
            }
            (Some(_), None) => Err(format!(
                "{WALLET_ADDRESS_KEY} present without {AUTH_TOKEN_KEY}"
            )),
            (None, Some(_)) => Err(format!(
                "{AUTH_TOKEN_KEY} present without {WALLET_ADDRESS_KEY}"
            )),
        }
    }
}

/// Process-wide credential store.
///
/// Only the session authenticator writes it; the live channel and the API
/// client read it when they need a token.
#[derive(Debug)]
pub struct CredentialStore {
    path: Option<PathBuf>,
    session: RwLock<Option<Session>>,
}

impl CredentialStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            session: RwLock::new(None),
        }
    }

    /// Open the store backed by `path`, loading any persisted session.
    ///
    /// A missing file is an empty store. An unreadable or half-populated
    /// file is discarded with a warning.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let session = match tokio::fs::read_to_string(&path).await {
            Ok(data) => match parse_entries(&data) {
                Ok(session) => {
                    if let Some(ref s) = session {
                        tracing::info!(
                            "Loaded session for {} from {}",
                            s.address(),
                            path.display()
                        );
                    }
                    session
                }
                Err(reason) => {
                    tracing::warn!(
                        "Discarding invalid credential file {}: {}",
                        path.display(),
                        reason
                    );
                    remove_file_if_exists(&path).await?;
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(io_error(&path, e)),
        };

        Ok(Self {
            path: Some(path),
            session: RwLock::new(session),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Snapshot of the current session.
    pub async fn get(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    /// Replace the session. Disk is written before memory, under the write
    /// lock, so a failed write leaves the previous session in place.
    pub async fn set(&self, session: Session) -> Result<(), StoreError> {
        let mut guard = self.session.write().await;
        if let Some(ref path) = self.path {
            persist_entries(path, &PersistedEntries::from_session(&session)).await?;
        }
        tracing::debug!("Stored session for {}", session.address());
        *guard = Some(session);
        Ok(())
    }

    /// Remove the session. Clearing an empty store is a no-op.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let mut guard = self.session.write().await;
        if let Some(ref path) = self.path {
            remove_file_if_exists(path).await?;
        }
        if guard.take().is_some() {
            tracing::debug!("Cleared stored session");
        }
        Ok(())
    }

    /// Read one persisted entry (`wallet_address` or `auth_token`).
    ///
    /// Entries are independently readable, but anything that needs a valid
    /// session should use [`get`](Self::get) and treat them as a pair.
    pub async fn entry(&self, key: &str) -> Option<String> {
        let guard = self.session.read().await;
        let session = guard.as_ref()?;
        match key {
            WALLET_ADDRESS_KEY => Some(session.address().to_string()),
            AUTH_TOKEN_KEY => Some(session.token().expose_secret().to_string()),
            _ => None,
        }
    }

    pub async fn current_address(&self) -> Option<String> {
        self.entry(WALLET_ADDRESS_KEY).await
    }

    /// Bearer token of the current session, if any.
    pub async fn token(&self) -> Option<SecretString> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.token().clone())
    }
}

fn parse_entries(data: &str) -> Result<Option<Session>, String> {
    if data.trim().is_empty() {
        return Ok(None);
    }
    let entries: PersistedEntries =
        serde_json::from_str(data).map_err(|e| format!("invalid JSON: {e}"))?;
    entries.into_session()
}

async fn persist_entries(path: &Path, entries: &PersistedEntries) -> Result<(), StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e))?;
    }

    let json =
        serde_json::to_string_pretty(entries).map_err(|e| StoreError::Serialize(e.to_string()))?;

    let tmp_path = tmp_path_for(path);
    tokio::fs::write(&tmp_path, json)
        .await
        .map_err(|e| io_error(&tmp_path, e))?;

    // Restrictive permissions: the file contains a bearer token
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| io_error(&tmp_path, e))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| io_error(path, e))
}

async fn remove_file_if_exists(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(path, e)),
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "credentials.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}
