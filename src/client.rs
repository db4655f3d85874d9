//! Facade handed to dashboard views.
//!
//! Wires one [`CredentialStore`] into the authenticator, the live channel and
//! the REST client so they all see the same session.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use crate::api::ApiClient;
use crate::auth::{ChallengeBuilder, LoginOutcome, SessionAuthenticator};
use crate::channel::{
    ChannelEvent, ChannelMessage, ChannelState, Connector, LiveChannel, MessageStream, WsConnector,
};
use crate::config::SessionConfig;
use crate::error::Result;
use crate::exchange::{CredentialExchange, HttpCredentialExchange};
use crate::store::CredentialStore;
use crate::wallet::KeyIdentityProvider;

pub struct DashboardSession {
    config: SessionConfig,
    store: Arc<CredentialStore>,
    authenticator: SessionAuthenticator,
    channel: Arc<LiveChannel>,
    api: ApiClient,
}

impl DashboardSession {
    /// Production wiring: file-backed store, HTTP exchange, WebSocket channel.
    pub async fn from_config(
        config: SessionConfig,
        wallet: Arc<dyn KeyIdentityProvider>,
    ) -> Result<Self> {
        let store = Arc::new(CredentialStore::open(&config.credentials_path).await?);
        let exchange = Arc::new(HttpCredentialExchange::new(
            config.auth_url()?,
            config.exchange_timeout,
        ));
        Self::with_parts(config, wallet, exchange, Arc::new(WsConnector::new()), store)
    }

    pub fn with_parts(
        config: SessionConfig,
        wallet: Arc<dyn KeyIdentityProvider>,
        exchange: Arc<dyn CredentialExchange>,
        connector: Arc<dyn Connector>,
        store: Arc<CredentialStore>,
    ) -> Result<Self> {
        let channel = Arc::new(
            LiveChannel::new(config.live_channel_url()?, Arc::clone(&store), connector)
                .with_connect_timeout(config.connect_timeout),
        );
        let authenticator = SessionAuthenticator::new(
            wallet,
            exchange,
            Arc::clone(&store),
            ChallengeBuilder::new(config.service_name.clone()),
        )
        .with_channel(Arc::clone(&channel));
        let api = ApiClient::with_timeout(
            config.api_base_url.clone(),
            Arc::clone(&store),
            config.exchange_timeout,
        );

        Ok(Self {
            config,
            store,
            authenticator,
            channel,
            api,
        })
    }

    /// Sign in with the wallet.
    ///
    /// If the live channel was up, it is reconnected so it carries the new
    /// token. A failed reconnect is reported as an event, not as a login
    /// failure.
    pub async fn login(&self) -> Result<LoginOutcome> {
        let was_live = matches!(
            self.channel.state(),
            ChannelState::Connecting | ChannelState::Open
        );
        let outcome = self.authenticator.login().await?;
        if was_live && let Err(e) = self.channel.connect().await {
            tracing::warn!("Live channel did not come back after login: {}", e);
        }
        Ok(outcome)
    }

    /// Clear the session and close the live channel.
    pub async fn logout(&self) -> Result<()> {
        self.authenticator.logout().await?;
        Ok(())
    }

    pub async fn is_authenticated(&self) -> bool {
        self.authenticator.is_authenticated().await
    }

    pub async fn current_address(&self) -> Option<String> {
        self.authenticator.current_address().await
    }

    pub async fn connect_live(&self) -> Result<()> {
        self.channel.connect().await?;
        Ok(())
    }

    pub fn disconnect_live(&self) {
        self.channel.disconnect();
    }

    pub fn subscribe(&self) -> MessageStream {
        self.channel.subscribe()
    }

    /// Returns `false` when the channel is not open; nothing is sent then.
    pub fn send(&self, message: &ChannelMessage) -> bool {
        self.channel.send(message)
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn watch_channel_state(&self) -> watch::Receiver<ChannelState> {
        self.channel.watch_state()
    }

    pub fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.channel.events()
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl std::fmt::Debug for DashboardSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardSession")
            .field("api", &self.config.api_base_url.as_str())
            .field("channel", &self.channel.state())
            .finish_non_exhaustive()
    }
}
