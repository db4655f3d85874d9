//! `defi-session` command line.
//!
//! Drives the session layer with a local private key standing in for a
//! browser wallet. Commands that never sign use [`NoWallet`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use url::Url;

use crate::channel::ChannelMessage;
use crate::client::DashboardSession;
use crate::config::{LocalWalletConfig, SessionConfig};
use crate::wallet::{KeyIdentityProvider, LocalKeySigner, NoWallet};

#[derive(Parser, Debug)]
#[command(
    name = "defi-session",
    version,
    about = "DeFi Optimizer wallet session client",
    long_about = None
)]
pub struct Cli {
    /// Extra .env file, loaded before ./.env and ~/.defi-optimizer/.env.
    #[arg(long, global = true, value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    /// API base URL (overrides DEFI_API_URL).
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<Url>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Sign in with the key in DEFI_WALLET_PRIVATE_KEY.
    Login,
    /// Forget the stored session.
    Logout,
    /// Show the stored session and endpoints.
    Status,
    /// Fetch the account profile with the stored token.
    Profile,
    /// Print live messages as JSON lines until the channel closes.
    Listen {
        /// Stop after this many messages.
        #[arg(long)]
        count: Option<usize>,
    },
    /// Send one message over the live channel and print replies.
    Send {
        /// Message type.
        kind: String,
        /// JSON payload.
        #[arg(default_value = "null")]
        payload: String,
        /// How long to print replies before disconnecting.
        #[arg(long, value_name = "MS", default_value_t = 1000)]
        wait_ms: u64,
    },
}

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    match cli.command {
        Command::Login => login(config).await,
        Command::Logout => {
            let session = open(config, Arc::new(NoWallet)).await?;
            session.logout().await?;
            println!("Logged out.");
            Ok(())
        }
        Command::Status => status(config).await,
        Command::Profile => {
            let session = open(config, Arc::new(NoWallet)).await?;
            let profile = session.api().profile().await?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
            Ok(())
        }
        Command::Listen { count } => listen(config, count).await,
        Command::Send {
            kind,
            payload,
            wait_ms,
        } => send(config, kind, &payload, Duration::from_millis(wait_ms)).await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<SessionConfig> {
    if let Some(path) = &cli.env_file {
        dotenvy::from_path(path)
            .with_context(|| format!("failed to load env file {}", path.display()))?;
    }
    let mut config = SessionConfig::from_env()?;
    if let Some(url) = &cli.api_url {
        config
            .set_api_base_url(url)
            .context("invalid --api-url")?;
    }
    Ok(config)
}

async fn open(
    config: SessionConfig,
    wallet: Arc<dyn KeyIdentityProvider>,
) -> anyhow::Result<DashboardSession> {
    Ok(DashboardSession::from_config(config, wallet).await?)
}

async fn login(config: SessionConfig) -> anyhow::Result<()> {
    let key = LocalWalletConfig::resolve()?;
    let wallet = LocalKeySigner::from_private_key(&key.private_key)?;
    let session = open(config, Arc::new(wallet)).await?;

    let outcome = session.login().await?;
    match outcome.user.and_then(|u| u.subscription_tier) {
        Some(tier) => println!("Logged in as {} ({tier} tier).", outcome.address),
        None => println!("Logged in as {}.", outcome.address),
    }
    Ok(())
}

async fn status(config: SessionConfig) -> anyhow::Result<()> {
    let session = open(config, Arc::new(NoWallet)).await?;
    let config = session.config();

    println!("API:          {}", config.api_base_url);
    println!("Live channel: {}", config.live_channel_url()?);
    println!("Credentials:  {}", config.credentials_path.display());
    match session.current_address().await {
        Some(address) => println!("Session:      {address}"),
        None => println!("Session:      not logged in"),
    }
    Ok(())
}

async fn listen(config: SessionConfig, count: Option<usize>) -> anyhow::Result<()> {
    let session = open(config, Arc::new(NoWallet)).await?;
    let mut stream = session.subscribe();
    session.connect_live().await?;
    eprintln!("Listening on the live channel (Ctrl-C to stop).");

    let mut seen = 0usize;
    loop {
        tokio::select! {
            message = stream.recv() => match message {
                Some(message) => {
                    println!("{}", serde_json::to_string(&message)?);
                    seen += 1;
                    if count.is_some_and(|limit| seen >= limit) {
                        break;
                    }
                }
                None => {
                    eprintln!("Live channel closed.");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.disconnect_live();
    Ok(())
}

async fn send(
    config: SessionConfig,
    kind: String,
    payload: &str,
    wait: Duration,
) -> anyhow::Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("payload must be valid JSON")?;
    let session = open(config, Arc::new(NoWallet)).await?;
    let mut stream = session.subscribe();
    session.connect_live().await?;

    if !session.send(&ChannelMessage::new(kind, payload)) {
        anyhow::bail!("live channel closed before the message could be queued");
    }

    let deadline = tokio::time::sleep(wait);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            message = stream.recv() => match message {
                Some(message) => println!("{}", serde_json::to_string(&message)?),
                None => break,
            },
            _ = &mut deadline => break,
        }
    }

    session.disconnect_live();
    Ok(())
}
