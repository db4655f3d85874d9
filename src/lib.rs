//! Client-side identity and live-session layer for the DeFi Optimizer
//! dashboard.
//!
//! A wallet address is proven by signing a one-time challenge; the signature
//! is exchanged for a bearer token; the (address, token) pair is kept in a
//! [`CredentialStore`]; and a [`LiveChannel`] opens an authenticated push
//! connection with that token. [`DashboardSession`] wires the pieces together.

pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod channel;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod exchange;
pub mod redact;
pub mod store;
pub mod wallet;

pub use auth::{Challenge, ChallengeBuilder, LoginOutcome, SessionAuthenticator};
pub use channel::{ChannelEvent, ChannelMessage, ChannelState, LiveChannel, MessageStream};
pub use client::DashboardSession;
pub use config::SessionConfig;
pub use error::{Error, ErrorPayload, Result};
pub use store::{Credential, CredentialStore, Identity, Session};
pub use wallet::{KeyIdentityProvider, LocalKeySigner, NoWallet, WalletSignature};
