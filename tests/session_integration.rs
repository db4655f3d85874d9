//! End-to-end tests against a real HTTP + WebSocket server.
//!
//! Each test starts an Axum server on a random port that mimics the dashboard
//! API:
//! - `POST /api/v1/auth/wallet` verifies the EIP-191 signature and issues a token
//! - `GET /api/v1/user/profile` requires a bearer token it issued
//! - `GET /api/v1/ws` upgrades only when the `Authorization: Bearer` header
//!   carries an issued token, greets, echoes, emits a malformed frame on
//!   request, and closes on request

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tempfile::TempDir;
use tokio::time::timeout;
use url::Url;

use defi_session::channel::WsConnector;
use defi_session::error::{ApiError, AuthError, ChannelError, WalletError};
use defi_session::exchange::{CredentialExchange, WalletAuthRequest, WalletAuthResponse};
use defi_session::wallet::eip191;
use defi_session::{
    ChallengeBuilder, ChannelMessage, ChannelState, CredentialStore, DashboardSession, Error,
    KeyIdentityProvider, LiveChannel, LocalKeySigner, SessionAuthenticator, SessionConfig,
    WalletSignature,
};

const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
const DEV_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
const DENIED_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct ServerState {
    issued: Mutex<Vec<String>>,
    ws_tokens: Mutex<Vec<String>>,
    ws_query_tokens: Mutex<Vec<Option<String>>>,
    denied: Mutex<Vec<String>>,
    exchange_delay: Mutex<Option<Duration>>,
    counter: AtomicU64,
}

impl ServerState {
    fn is_issued(&self, token: &str) -> bool {
        self.issued.lock().unwrap().iter().any(|t| t == token)
    }
}

fn is_bind_permission_error<E: std::fmt::Display>(err: &E) -> bool {
    err.to_string().contains("Operation not permitted")
        || err.to_string().contains("failed to bind")
}

/// Start the mock API on a random port. Returns `None` when the sandbox
/// forbids binding sockets.
async fn start_test_server() -> Option<(SocketAddr, Arc<ServerState>)> {
    let state = Arc::new(ServerState::default());
    let app = Router::new()
        .route("/api/v1/auth/wallet", post(auth_wallet))
        .route("/api/v1/user/profile", get(user_profile))
        .route("/api/v1/ws", get(ws_upgrade))
        .with_state(Arc::clone(&state));

    let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(e) if is_bind_permission_error(&e) => return None,
        Err(e) => panic!("Failed to bind test server: {e}"),
    };
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Some((addr, state))
}

async fn auth_wallet(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<WalletAuthRequest>,
) -> Response {
    let delay = *state.exchange_delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let recovered = eip191::recover_signer(&request.message, &request.signature);
    let address_in_message = request
        .message
        .contains(&format!("Address: {}\n", request.wallet_address));
    if recovered.as_deref() != Ok(request.wallet_address.as_str()) || !address_in_message {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Invalid signature"})),
        )
            .into_response();
    }
    if state
        .denied
        .lock()
        .unwrap()
        .contains(&request.wallet_address)
    {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "Account suspended"})),
        )
            .into_response();
    }

    let n = state.counter.fetch_add(1, Ordering::SeqCst) + 1;
    let token = format!("tok-{n}");
    state.issued.lock().unwrap().push(token.clone());
    Json(json!({
        "token": token,
        "user": {
            "id": n,
            "wallet_address": request.wallet_address,
            "subscription_tier": "free",
        },
    }))
    .into_response()
}

fn bearer(headers: &HeaderMap) -> &str {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
}

async fn user_profile(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    let token = bearer(&headers);
    if !state.is_issued(token) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "Unauthorized"}))).into_response();
    }
    Json(json!({
        "id": 1,
        "wallet_address": DEV_ADDRESS,
        "subscription_tier": "free",
    }))
    .into_response()
}

async fn ws_upgrade(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = bearer(&headers);
    if !state.is_issued(token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.ws_tokens.lock().unwrap().push(token.to_string());
    state
        .ws_query_tokens
        .lock()
        .unwrap()
        .push(params.get("token").cloned());
    ws.on_upgrade(handle_socket)
}

fn text(value: String) -> WsMessage {
    WsMessage::Text(value.into())
}

async fn handle_socket(mut socket: WebSocket) {
    let _ = socket
        .send(text(json!({"type": "welcome", "payload": {}}).to_string()))
        .await;

    while let Some(Ok(msg)) = socket.recv().await {
        let WsMessage::Text(raw) = msg else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(raw.as_str()) else {
            continue;
        };
        match value["type"].as_str() {
            Some("echo") => {
                let reply = json!({"type": "echo", "payload": value["payload"]});
                let _ = socket.send(text(reply.to_string())).await;
            }
            Some("bad") => {
                let _ = socket.send(text("this is not json".to_string())).await;
                let _ = socket
                    .send(text(json!({"type": "after_bad", "payload": null}).to_string()))
                    .await;
            }
            Some("close") => {
                let _ = socket
                    .send(WsMessage::Close(Some(CloseFrame {
                        code: 1000,
                        reason: "bye".to_string().into(),
                    })))
                    .await;
                break;
            }
            _ => {}
        }
    }
}

fn config_for(addr: SocketAddr, dir: &TempDir) -> SessionConfig {
    let mut config = SessionConfig::for_api(Url::parse(&format!("http://{addr}")).unwrap());
    config.credentials_path = dir.path().join("credentials.json");
    config.exchange_timeout = Duration::from_secs(5);
    config.connect_timeout = Duration::from_secs(5);
    config
}

fn dev_wallet() -> Arc<LocalKeySigner> {
    Arc::new(LocalKeySigner::from_private_key(&SecretString::from(DEV_KEY.to_string())).unwrap())
}

async fn next_message(stream: &mut defi_session::MessageStream) -> Option<ChannelMessage> {
    timeout(TIMEOUT, stream.recv())
        .await
        .expect("message within timeout")
}

#[tokio::test]
async fn login_persists_session_and_authenticates_rest_calls() {
    let Some((addr, _state)) = start_test_server().await else {
        eprintln!("skipping: cannot bind test server");
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(addr, &dir);
    let path = config.credentials_path.clone();

    let session = DashboardSession::from_config(config, dev_wallet()).await.unwrap();
    let outcome = session.login().await.unwrap();

    assert_eq!(outcome.address, DEV_ADDRESS);
    assert_eq!(
        outcome.user.and_then(|u| u.subscription_tier).as_deref(),
        Some("free")
    );
    assert!(session.is_authenticated().await);

    let on_disk: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(on_disk["wallet_address"], DEV_ADDRESS);
    assert_eq!(on_disk["auth_token"], "tok-1");

    let reopened = CredentialStore::open(&path).await.unwrap();
    let restored = reopened.get().await.unwrap();
    assert_eq!(restored.address(), DEV_ADDRESS);
    assert_eq!(restored.token().expose_secret(), "tok-1");

    let profile = session.api().profile().await.unwrap();
    assert_eq!(profile.wallet_address, DEV_ADDRESS);
}

#[tokio::test]
async fn rejected_exchange_leaves_no_session() {
    let Some((addr, state)) = start_test_server().await else {
        eprintln!("skipping: cannot bind test server");
        return;
    };
    let wallet =
        LocalKeySigner::from_private_key(&SecretString::from(DENIED_KEY.to_string())).unwrap();
    state
        .denied
        .lock()
        .unwrap()
        .push(wallet.address().to_string());
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(addr, &dir);
    let path = config.credentials_path.clone();

    let session = DashboardSession::from_config(config, Arc::new(wallet))
        .await
        .unwrap();
    let err = session.login().await.unwrap_err();

    match err {
        Error::Auth(AuthError::CredentialExchangeRejected { status, reason }) => {
            assert_eq!(status, 403);
            assert_eq!(reason, "Account suspended");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(!session.is_authenticated().await);
    assert!(!path.exists());
}

#[tokio::test]
async fn slow_exchange_times_out() {
    let Some((addr, state)) = start_test_server().await else {
        eprintln!("skipping: cannot bind test server");
        return;
    };
    *state.exchange_delay.lock().unwrap() = Some(Duration::from_secs(3));
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(addr, &dir);
    config.exchange_timeout = Duration::from_millis(200);

    let session = DashboardSession::from_config(config, dev_wallet()).await.unwrap();
    let err = session.login().await.unwrap_err();

    assert!(matches!(
        err,
        Error::Auth(AuthError::CredentialExchangeTimeout { timeout_ms: 200 })
    ));
    assert!(!session.is_authenticated().await);
}

#[tokio::test]
async fn live_channel_round_trip() {
    let Some((addr, state)) = start_test_server().await else {
        eprintln!("skipping: cannot bind test server");
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let session = DashboardSession::from_config(config_for(addr, &dir), dev_wallet())
        .await
        .unwrap();
    session.login().await.unwrap();

    let mut stream = session.subscribe();
    session.connect_live().await.unwrap();
    assert_eq!(session.channel_state(), ChannelState::Open);
    assert_eq!(state.ws_tokens.lock().unwrap().as_slice(), ["tok-1"]);
    assert_eq!(
        state.ws_query_tokens.lock().unwrap().as_slice(),
        [Some("tok-1".to_string())]
    );

    assert_eq!(next_message(&mut stream).await.unwrap().kind, "welcome");

    assert!(session.send(&ChannelMessage::new("echo", json!({"n": 42}))));
    let echoed = next_message(&mut stream).await.unwrap();
    assert_eq!(echoed, ChannelMessage::new("echo", json!({"n": 42})));

    // The malformed frame in between is dropped without closing the channel.
    assert!(session.send(&ChannelMessage::new("bad", json!(null))));
    assert_eq!(next_message(&mut stream).await.unwrap().kind, "after_bad");
    assert_eq!(session.channel_state(), ChannelState::Open);

    assert!(session.send(&ChannelMessage::new("close", json!(null))));
    assert_eq!(next_message(&mut stream).await, None);
    let mut watch = session.watch_channel_state();
    timeout(TIMEOUT, watch.wait_for(|s| *s == ChannelState::Disconnected))
        .await
        .expect("closed in time")
        .unwrap();
    assert!(!session.send(&ChannelMessage::new("echo", json!(null))));
}

#[tokio::test]
async fn logout_closes_channel_and_blocks_reconnect() {
    let Some((addr, _state)) = start_test_server().await else {
        eprintln!("skipping: cannot bind test server");
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(addr, &dir);
    let path = config.credentials_path.clone();
    let session = DashboardSession::from_config(config, dev_wallet()).await.unwrap();
    session.login().await.unwrap();
    session.connect_live().await.unwrap();

    session.logout().await.unwrap();

    assert_eq!(session.channel_state(), ChannelState::Disconnected);
    assert!(!path.exists());
    assert!(matches!(
        session.connect_live().await,
        Err(Error::Channel(ChannelError::NoActiveSession))
    ));
    assert!(matches!(
        session.api().profile().await,
        Err(ApiError::NoActiveSession { .. })
    ));
}

#[tokio::test]
async fn reconnect_after_relogin_uses_new_token() {
    let Some((addr, state)) = start_test_server().await else {
        eprintln!("skipping: cannot bind test server");
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let session = DashboardSession::from_config(config_for(addr, &dir), dev_wallet())
        .await
        .unwrap();
    session.login().await.unwrap();
    session.connect_live().await.unwrap();

    session.login().await.unwrap();

    assert_eq!(session.channel_state(), ChannelState::Open);
    assert_eq!(
        state.ws_tokens.lock().unwrap().as_slice(),
        ["tok-1", "tok-2"]
    );
}

#[tokio::test]
async fn unknown_token_is_refused_by_the_socket() {
    let Some((addr, _state)) = start_test_server().await else {
        eprintln!("skipping: cannot bind test server");
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let session = DashboardSession::from_config(config_for(addr, &dir), dev_wallet())
        .await
        .unwrap();
    session
        .store()
        .set(defi_session::Session::new(
            defi_session::Identity::parse(DEV_ADDRESS).unwrap(),
            defi_session::Credential::new("forged"),
        ))
        .await
        .unwrap();
    let mut events = session.events();

    let err = session.connect_live().await.unwrap_err();

    assert!(matches!(
        err,
        Error::Channel(ChannelError::TransportError(_))
    ));
    assert_eq!(session.channel_state(), ChannelState::Disconnected);
    assert!(matches!(
        events.try_recv(),
        Ok(defi_session::ChannelEvent::Error(ChannelError::TransportError(_)))
    ));
    assert!(matches!(
        session.api().profile().await,
        Err(ApiError::Unauthorized { .. })
    ));
}

/// Wallet that always reports the fixed test address and returns an opaque
/// signature.
struct FixedWallet;

#[async_trait]
impl KeyIdentityProvider for FixedWallet {
    async fn active_address(&self) -> Result<String, WalletError> {
        Ok("0x1111111111111111111111111111111111111111".to_string())
    }

    async fn sign_message(
        &self,
        address: &str,
        _message: &str,
    ) -> Result<WalletSignature, WalletError> {
        Ok(WalletSignature {
            signer: address.to_string(),
            signature: "0xopaque".to_string(),
        })
    }
}

struct RecordingExchange {
    state: Arc<ServerState>,
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl CredentialExchange for RecordingExchange {
    async fn exchange(
        &self,
        request: &WalletAuthRequest,
    ) -> Result<WalletAuthResponse, AuthError> {
        self.messages.lock().unwrap().push(request.message.clone());
        self.state
            .issued
            .lock()
            .unwrap()
            .push("abc.def.ghi".to_string());
        Ok(serde_json::from_value(json!({"token": "abc.def.ghi"})).unwrap())
    }
}

#[tokio::test]
async fn fixed_clock_scenario_end_to_end() {
    let Some((addr, state)) = start_test_server().await else {
        eprintln!("skipping: cannot bind test server");
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(addr, &dir);
    let store = Arc::new(CredentialStore::open(&config.credentials_path).await.unwrap());
    let channel = Arc::new(LiveChannel::new(
        config.live_channel_url().unwrap(),
        Arc::clone(&store),
        Arc::new(WsConnector::new()),
    ));
    let exchange = Arc::new(RecordingExchange {
        state: Arc::clone(&state),
        messages: Mutex::new(Vec::new()),
    });
    let auth = SessionAuthenticator::new(
        Arc::new(FixedWallet),
        exchange.clone(),
        Arc::clone(&store),
        ChallengeBuilder::default(),
    )
    .with_clock(Arc::new(|| 1_700_000_000_000))
    .with_channel(Arc::clone(&channel));

    auth.login().await.unwrap();

    assert_eq!(
        exchange.messages.lock().unwrap().as_slice(),
        ["Sign in to DeFi Optimizer\n\nAddress: 0x1111111111111111111111111111111111111111\nTimestamp: 1700000000000"]
    );
    let session = store.get().await.unwrap();
    assert_eq!(session.address(), "0x1111111111111111111111111111111111111111");
    assert_eq!(session.token().expose_secret(), "abc.def.ghi");
    assert!(auth.is_authenticated().await);

    let mut stream = channel.subscribe();
    channel.connect().await.unwrap();
    assert_eq!(timeout(TIMEOUT, stream.recv()).await.unwrap().unwrap().kind, "welcome");
    assert_eq!(
        state.ws_tokens.lock().unwrap().as_slice(),
        ["abc.def.ghi"]
    );

    auth.logout().await.unwrap();
    assert_eq!(channel.state(), ChannelState::Disconnected);
    assert!(!auth.is_authenticated().await);
}
