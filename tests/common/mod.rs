#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use dashmap::DashMap;
use k256::ecdsa::SigningKey;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use agentgo_gateway::api::create_router;
use agentgo_gateway::clock::FakeClock;
use agentgo_gateway::config::Config;
use agentgo_gateway::crypto::eip191_hash;
use agentgo_gateway::state::AppState;

pub const DOMAIN: &str = "agentgo.test";
/// Hardhat account #0
pub const KEY_0: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const ADDRESS_0: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
/// Hardhat account #1
pub const KEY_1: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
pub const ADDRESS_1: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
/// Wallet the TrustGo stub refuses to link
pub const UNLINKED_ADDRESS: &str = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8";

/// Tweets served by the stub, keyed by id
pub type Tweets = Arc<DashMap<String, (String, String)>>;

/// Test client for API calls
pub struct TestClient {
    pub base_url: String,
    pub client: Client,
    pub token: Option<String>,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: Client::new(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: String) -> Self {
        self.token = Some(token);
        self
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        let mut req = self.client.get(format!("{}{}", self.base_url, path));
        if let Some(ref token) = self.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        req.send().await.expect("Failed to send request")
    }

    pub async fn post<T: serde::Serialize>(&self, path: &str, body: &T) -> reqwest::Response {
        let mut req = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body);
        if let Some(ref token) = self.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        req.send().await.expect("Failed to send request")
    }

    /// Run the challenge / sign / login round and return the session token
    pub async fn login(&self, key_hex: &str, address: &str) -> String {
        let challenge: Value = self
            .post("/auth/challenge", &json!({ "address": address }))
            .await
            .json()
            .await
            .unwrap();
        let message = challenge["data"]["message"].as_str().unwrap();
        let nonce = challenge["data"]["nonce"].as_str().unwrap();

        let resp = self
            .post(
                "/auth/login",
                &json!({
                    "address": address,
                    "nonce": nonce,
                    "signature": personal_sign(key_hex, message),
                }),
            )
            .await;
        assert_eq!(resp.status(), 200);

        let body: Value = resp.json().await.unwrap();
        body["data"]["token"].as_str().unwrap().to_string()
    }
}

/// EIP-191 personal_sign, 0x-prefixed r || s || v with v in {27, 28}
pub fn personal_sign(key_hex: &str, message: &str) -> String {
    let key = SigningKey::from_slice(&hex::decode(key_hex).unwrap()).unwrap();
    let (sig, recid) = key
        .sign_prehash_recoverable(&eip191_hash(message.as_bytes()))
        .unwrap();
    let mut bytes = sig.to_bytes().to_vec();
    bytes.push(27 + recid.to_byte());
    format!("0x{}", hex::encode(bytes))
}

pub struct TestServer {
    pub base_url: String,
    pub state: Arc<AppState>,
    pub clock: FakeClock,
    pub tweets: Tweets,
}

impl TestServer {
    pub fn client(&self) -> TestClient {
        TestClient::new(self.base_url.clone())
    }

    /// Publish a tweet the stubbed X API will return
    pub fn post_tweet(&self, id: &str, text: &str, screen_name: &str) {
        self.tweets
            .insert(id.to_string(), (text.to_string(), screen_name.to_string()));
    }
}

/// Start the gateway against a stubbed downstream, driven by a fake clock
pub async fn start_test_server() -> TestServer {
    let tweets: Tweets = Arc::new(DashMap::new());
    let downstream_url = start_downstream_stub(Arc::clone(&tweets)).await;

    let config = Config {
        host: "127.0.0.1".into(),
        port: 0,
        domain: DOMAIN.into(),
        challenge_ttl: std::time::Duration::from_secs(300),
        session_ttl: std::time::Duration::from_secs(3600),
        nonce_bytes: 16,
        session_token_bytes: 32,
        sweep_interval: std::time::Duration::from_secs(60),
        single_session_per_address: false,
        score_api_url: downstream_url.clone(),
        score_access_key: "ak".into(),
        score_secret_key: "sk".into(),
        trustgo_api_url: downstream_url.clone(),
        trustgo_invite_code: "8ZRT9G1".into(),
        trustgo_invite_from: "twitter".into(),
        twitter_api_url: downstream_url,
        twitter_api_host: "twitter.test".into(),
        rapidapi_key: "rapid".into(),
        x_challenge_ttl: std::time::Duration::from_secs(600),
        downstream_timeout: std::time::Duration::from_secs(5),
        ..Config::default()
    };

    let clock = FakeClock::new();
    let state = AppState::with_clock(config, Arc::new(clock.clone())).expect("Invalid config");
    let app = create_router(Arc::clone(&state));

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server failed");
    });

    TestServer {
        base_url: format!("http://{}", addr),
        state,
        clock,
        tweets,
    }
}

fn agent(headers: &HeaderMap) -> String {
    headers
        .get("x-agent-address")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn trustgo_authorized(headers: &HeaderMap) -> bool {
    let expected = format!("TOKEN tg-{}", agent(headers));
    headers
        .get("authorization")
        .map(|v| v == expected.as_str())
        .unwrap_or(false)
}

/// Minimal stand-in for the scoring, TrustGo and X APIs; echoes the forwarded agent
async fn start_downstream_stub(tweets: Tweets) -> String {
    let app = Router::new()
        .route(
            "/accounts/check_signed_message",
            post(|Json(body): Json<Value>| async move {
                let address = body["address"].as_str().unwrap_or_default().to_string();
                let message = body["message"].as_str().unwrap_or_default();
                if address == UNLINKED_ADDRESS
                    || !message.contains(&address)
                    || body["mode"] != "evm"
                    || body["invite_from"]["code"] != "8ZRT9G1"
                {
                    return Json(json!({"success": false, "message": "invalid signature"}));
                }
                Json(json!({"success": true, "data": {"token": format!("tg-{address}")}}))
            }),
        )
        .route(
            "/tweet.php",
            get(
                |State(tweets): State<Tweets>,
                 headers: HeaderMap,
                 Query(q): Query<HashMap<String, String>>| async move {
                    if headers.get("x-rapidapi-key").map(|v| v == "rapid") != Some(true) {
                        return (StatusCode::FORBIDDEN, Json(json!({"message": "no key"})));
                    }
                    let id = q.get("id").cloned().unwrap_or_default();
                    match tweets.get(&id) {
                        Some(tweet) => (
                            StatusCode::OK,
                            Json(json!({
                                "id": id,
                                "text": tweet.0,
                                "author": {"screen_name": tweet.1}
                            })),
                        ),
                        None => (StatusCode::NOT_FOUND, Json(json!({"message": "not found"}))),
                    }
                },
            ),
        )
        .route(
            "/service/openapi/getToken",
            post(|| async {
                Json(json!({"code": 0, "data": {"authorizationToken": "Bearer score-token"}}))
            }),
        )
        .route(
            "/service/openapi/queryAgentGoScore",
            get(
                |headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                    Json(json!({
                        "code": 0,
                        "data": {"slug": q.get("slug"), "score": 42, "agent": agent(&headers)}
                    }))
                },
            ),
        )
        .route(
            "/agentgo/ranked_bubbles",
            get(
                |headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                    if !trustgo_authorized(&headers) {
                        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "no"})));
                    }
                    (
                        StatusCode::OK,
                        Json(json!({"type": q.get("type"), "agent": agent(&headers)})),
                    )
                },
            ),
        )
        .route(
            "/accounts/attest_calldata",
            get(
                |headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                    if !trustgo_authorized(&headers) {
                        return Json(json!({"code": 401, "message": "bad token"}));
                    }
                    Json(json!({
                        "code": 0,
                        "data": {"slug": q.get("slug"), "calldata": "0xfeed", "agent": agent(&headers)}
                    }))
                },
            ),
        )
        .with_state(tweets);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Stub failed");
    });
    format!("http://{}", addr)
}
