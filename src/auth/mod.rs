//! Wallet sign-in handshake.
//!
//! `login` walks the wallet through address discovery and challenge signing,
//! exchanges the signature for a bearer token, and only then writes the
//! session to the [`CredentialStore`]. Every failure before that last step
//! leaves the store exactly as it was.

pub mod challenge;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

use crate::channel::LiveChannel;
use crate::error::{AuthError, StoreError};
use crate::exchange::{CredentialExchange, UserProfile, WalletAuthRequest};
use crate::store::{Credential, CredentialStore, Identity, Session};
use crate::wallet::{KeyIdentityProvider, WalletSignature, eip191, normalize_address};

pub use self::challenge::{Challenge, ChallengeBuilder};

/// Source of challenge timestamps, in epoch milliseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Result of a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub address: String,
    /// Account summary, when the server returned one.
    pub user: Option<UserProfile>,
}

/// Drives the login and logout flows.
pub struct SessionAuthenticator {
    wallet: Arc<dyn KeyIdentityProvider>,
    exchange: Arc<dyn CredentialExchange>,
    store: Arc<CredentialStore>,
    challenges: ChallengeBuilder,
    channel: Option<Arc<LiveChannel>>,
    clock: Clock,
    /// Bumped by every logout; a login that started under an older epoch
    /// must not commit.
    epoch: AtomicU64,
    /// Serializes login attempts.
    attempt: Mutex<()>,
    /// Held while committing a login or performing a logout.
    commit: Mutex<()>,
}

impl SessionAuthenticator {
    pub fn new(
        wallet: Arc<dyn KeyIdentityProvider>,
        exchange: Arc<dyn CredentialExchange>,
        store: Arc<CredentialStore>,
        challenges: ChallengeBuilder,
    ) -> Self {
        Self {
            wallet,
            exchange,
            store,
            challenges,
            channel: None,
            clock: Arc::new(|| chrono::Utc::now().timestamp_millis()),
            epoch: AtomicU64::new(0),
            attempt: Mutex::new(()),
            commit: Mutex::new(()),
        }
    }

    /// Close `channel` on logout.
    pub fn with_channel(mut self, channel: Arc<LiveChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Run the full sign-in handshake and persist the resulting session.
    ///
    /// Concurrent calls are serialized. If `logout` runs while this call is
    /// suspended, the late result is discarded and `Cancelled` is returned.
    pub async fn login(&self) -> Result<LoginOutcome, AuthError> {
        let _attempt = self.attempt.lock().await;
        let epoch = self.epoch.load(Ordering::SeqCst);

        let (session, user) = match self.handshake().await {
            Ok(result) => result,
            Err(error) => {
                tracing::warn!("Login failed: {}", error);
                return Err(error);
            }
        };

        let _commit = self.commit.lock().await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            tracing::info!(
                "Discarding login for {}: logged out mid-handshake",
                session.address()
            );
            return Err(AuthError::Cancelled);
        }
        let address = session.address().to_string();
        self.store.set(session).await?;
        tracing::info!("Logged in as {}", address);

        Ok(LoginOutcome { address, user })
    }

    async fn handshake(&self) -> Result<(Session, Option<UserProfile>), AuthError> {
        let raw_address = self.wallet.active_address().await?;
        let identity = Identity::parse(&raw_address).ok_or_else(|| {
            tracing::debug!("Wallet reported an unusable address: {:?}", raw_address);
            AuthError::NoAccountSelected
        })?;

        let challenge = self.challenges.build(&identity, (self.clock)());
        tracing::debug!(
            "Requesting signature for {} (issued at {})",
            identity,
            challenge.issued_at_millis
        );
        let signed = self
            .wallet
            .sign_message(identity.address(), challenge.message())
            .await?;
        verify_signer(&identity, &challenge, &signed)?;

        let request = WalletAuthRequest {
            wallet_address: identity.address().to_string(),
            signature: signed.signature,
            message: challenge.message().to_string(),
        };
        let response = self.exchange.exchange(&request).await?;
        let token = response.token.trim();
        if token.is_empty() {
            return Err(AuthError::CredentialExchangeRejected {
                status: 200,
                reason: "response carried an empty token".to_string(),
            });
        }

        Ok((Session::new(identity, Credential::new(token)), response.user))
    }

    /// Clear the session and close the live channel.
    ///
    /// Idempotent. Any login suspended at the time will return `Cancelled`.
    pub async fn logout(&self) -> Result<(), StoreError> {
        let _commit = self.commit.lock().await;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(channel) = &self.channel {
            channel.disconnect();
        }
        self.store.clear().await?;
        tracing::info!("Logged out");
        Ok(())
    }

    pub async fn is_authenticated(&self) -> bool {
        self.store.get().await.is_some()
    }

    pub async fn current_address(&self) -> Option<String> {
        self.store.current_address().await
    }
}

impl std::fmt::Debug for SessionAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionAuthenticator")
            .field("service", &self.challenges.service_name())
            .field("epoch", &self.epoch.load(Ordering::SeqCst))
            .finish()
    }
}

/// The wallet must have signed for the requested address. A declared signer
/// that differs is rejected outright; a 65-byte signature must also recover
/// to that address.
fn verify_signer(
    identity: &Identity,
    challenge: &Challenge,
    signed: &WalletSignature,
) -> Result<(), AuthError> {
    let mismatch = |actual: String| AuthError::SignerMismatch {
        expected: identity.address().to_string(),
        actual,
    };

    match normalize_address(&signed.signer) {
        Some(declared) if declared == identity.address() => {}
        _ => return Err(mismatch(signed.signer.clone())),
    }

    if eip191::is_signature_like(&signed.signature) {
        let recovered = eip191::recover_signer(challenge.message(), &signed.signature)
            .map_err(|e| mismatch(format!("unrecoverable signature ({e})")))?;
        if recovered != identity.address() {
            return Err(mismatch(recovered));
        }
    }
    Ok(())
}
