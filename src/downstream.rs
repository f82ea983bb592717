//! Client for the scoring, market-data and certification APIs
//!
//! Only ever called after a session check; every request carries the
//! verified address in `X-Agent-Address`. TrustGo calls are made with the
//! per-wallet token obtained by replaying the login signature to
//! `check_signed_message`.

use std::fmt;
use std::str::FromStr;

use dashmap::DashMap;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::types::WalletAddress;

pub const AGENT_ADDRESS_HEADER: &str = "X-Agent-Address";

#[derive(Error, Debug)]
pub enum DownstreamError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream rejected request: {0}")]
    Upstream(String),

    #[error("Wallet has no TrustGo token")]
    NotLinked,
}

pub type DownstreamResult<T> = Result<T, DownstreamError>;

/// Market-data bubble rankings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BubbleKind {
    Price,
    SigmaScore,
    Mindshare,
}

impl BubbleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BubbleKind::Price => "price",
            BubbleKind::SigmaScore => "sigma_score",
            BubbleKind::Mindshare => "mindshare",
        }
    }
}

impl fmt::Display for BubbleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BubbleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "price" => Ok(BubbleKind::Price),
            "sigma_score" => Ok(BubbleKind::SigmaScore),
            "mindshare" => Ok(BubbleKind::Mindshare),
            other => Err(format!(
                "Invalid bubble type '{other}'. Must be one of: price, sigma_score, mindshare"
            )),
        }
    }
}

/// `{code, message, data}` wrapper used by the upstream services
#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Value,
}

impl Envelope {
    fn into_data(self) -> DownstreamResult<Value> {
        if self.code == 0 {
            Ok(self.data)
        } else {
            let code = self.code;
            Err(DownstreamError::Upstream(
                self.message.unwrap_or_else(|| format!("code {code}")),
            ))
        }
    }
}

/// The fields of a fetched tweet that binding needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tweet {
    pub text: String,
    pub screen_name: String,
}

#[derive(Debug, Deserialize)]
struct TweetAuthor {
    screen_name: String,
}

#[derive(Debug, Deserialize)]
struct TweetBody {
    text: String,
    author: TweetAuthor,
}

pub struct DownstreamClient {
    http: Client,
    score_api_url: String,
    score_access_key: String,
    score_secret_key: String,
    trustgo_api_url: String,
    trustgo_invite_code: String,
    trustgo_invite_from: String,
    twitter_api_url: String,
    twitter_api_host: String,
    rapidapi_key: String,
    /// Scoring API bearer token, fetched lazily
    score_token: RwLock<Option<String>>,
    /// TrustGo tokens per logged-in wallet
    trustgo_tokens: DashMap<WalletAddress, String>,
}

impl DownstreamClient {
    pub fn new(config: &Config) -> DownstreamResult<Self> {
        let http = Client::builder()
            .timeout(config.downstream_timeout)
            .user_agent(concat!("agentgo-gateway/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            score_api_url: config.score_api_url.trim_end_matches('/').to_string(),
            score_access_key: config.score_access_key.clone(),
            score_secret_key: config.score_secret_key.clone(),
            trustgo_api_url: config.trustgo_api_url.trim_end_matches('/').to_string(),
            trustgo_invite_code: config.trustgo_invite_code.clone(),
            trustgo_invite_from: config.trustgo_invite_from.clone(),
            twitter_api_url: config.twitter_api_url.trim_end_matches('/').to_string(),
            twitter_api_host: config.twitter_api_host.clone(),
            rapidapi_key: config.rapidapi_key.clone(),
            score_token: RwLock::new(None),
            trustgo_tokens: DashMap::new(),
        })
    }

    /// Log the wallet into TrustGo with the signature it just used here
    ///
    /// On success the returned token is kept for the wallet's TrustGo calls.
    pub async fn trustgo_login(
        &self,
        agent: &WalletAddress,
        message: &str,
        signature: &str,
    ) -> DownstreamResult<()> {
        let url = format!("{}/accounts/check_signed_message", self.trustgo_api_url);
        let body = serde_json::json!({
            "address": agent.to_string(),
            "message": message,
            "mode": "evm",
            "signature": signature,
            "invite_from": {
                "code": self.trustgo_invite_code,
                "from": self.trustgo_invite_from,
            },
        });

        let response = self
            .http
            .post(url)
            .header(AGENT_ADDRESS_HEADER, agent.to_string())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownstreamError::Upstream(format!(
                "check_signed_message returned {status}"
            )));
        }

        let body: Value = response.json().await?;
        if body.get("success").and_then(Value::as_bool) != Some(true) {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("TrustGo login refused");
            return Err(DownstreamError::Upstream(message.to_string()));
        }

        let token = body
            .pointer("/data/token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DownstreamError::Upstream("TrustGo login missing token".into()))?;

        self.trustgo_tokens.insert(*agent, token.to_string());
        tracing::info!(%agent, "Linked wallet to TrustGo");
        Ok(())
    }

    pub fn has_trustgo_token(&self, agent: &WalletAddress) -> bool {
        self.trustgo_tokens.contains_key(agent)
    }

    pub fn forget_trustgo_token(&self, agent: &WalletAddress) {
        if self.trustgo_tokens.remove(agent).is_some() {
            tracing::debug!(%agent, "Dropped TrustGo token");
        }
    }

    /// Keep only the TrustGo tokens of wallets `keep` accepts
    pub fn retain_trustgo_tokens(&self, keep: impl Fn(&WalletAddress) -> bool) -> usize {
        let before = self.trustgo_tokens.len();
        self.trustgo_tokens.retain(|agent, _| keep(agent));
        before.saturating_sub(self.trustgo_tokens.len())
    }

    /// Look up a tweet by id
    pub async fn fetch_tweet(&self, tweet_id: &str) -> DownstreamResult<Tweet> {
        let url = format!("{}/tweet.php", self.twitter_api_url);
        let response = self
            .http
            .get(url)
            .query(&[("id", tweet_id)])
            .header("x-rapidapi-key", &self.rapidapi_key)
            .header("x-rapidapi-host", &self.twitter_api_host)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownstreamError::Upstream(format!("tweet lookup returned {status}")));
        }

        let body: TweetBody = response.json().await?;
        Ok(Tweet {
            text: body.text,
            screen_name: body.author.screen_name,
        })
    }

    fn trustgo_authorization(&self, agent: &WalletAddress) -> DownstreamResult<String> {
        self.trustgo_tokens
            .get(agent)
            .map(|token| format!("TOKEN {}", token.value()))
            .ok_or(DownstreamError::NotLinked)
    }

    /// Sigma score of an agent
    pub async fn query_agent_score(
        &self,
        agent: &WalletAddress,
        slug: &str,
    ) -> DownstreamResult<Value> {
        let token = self.score_token().await?;
        let url = format!("{}/service/openapi/queryAgentGoScore", self.score_api_url);

        let request = self
            .http
            .get(url)
            .query(&[("slug", slug)])
            .bearer_auth(token);

        let result = self.send_enveloped(request, agent).await;
        if result.is_err() {
            // Force a fresh token on the next call
            *self.score_token.write().await = None;
        }
        result
    }

    /// Ranked bubbles; the upstream body is passed through untouched
    pub async fn ranked_bubbles(
        &self,
        agent: &WalletAddress,
        kind: BubbleKind,
    ) -> DownstreamResult<Value> {
        let url = format!("{}/agentgo/ranked_bubbles", self.trustgo_api_url);
        let request = self
            .http
            .get(url)
            .query(&[("type", kind.as_str())])
            .header("Authorization", self.trustgo_authorization(agent)?);

        let response = request
            .header(AGENT_ADDRESS_HEADER, agent.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownstreamError::Upstream(format!(
                "ranked_bubbles returned {status}"
            )));
        }
        Ok(response.json().await?)
    }

    /// Calldata for claiming a sigma attestation on-chain
    pub async fn attest_calldata(
        &self,
        agent: &WalletAddress,
        slug: &str,
    ) -> DownstreamResult<Value> {
        let url = format!("{}/accounts/attest_calldata", self.trustgo_api_url);
        let request = self
            .http
            .get(url)
            .query(&[("attest_type", "sigma"), ("slug", slug)])
            .header("Authorization", self.trustgo_authorization(agent)?);

        self.send_enveloped(request, agent).await
    }

    async fn score_token(&self) -> DownstreamResult<String> {
        if let Some(token) = self.score_token.read().await.as_ref() {
            return Ok(token.clone());
        }

        let mut cached = self.score_token.write().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let url = format!("{}/service/openapi/getToken", self.score_api_url);
        let body = serde_json::json!({
            "accessKey": self.score_access_key,
            "secretAccessKey": self.score_secret_key,
        });

        let envelope: Envelope = self.http.post(url).json(&body).send().await?.json().await?;
        let data = envelope.into_data()?;

        let authorization = data
            .get("authorizationToken")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                DownstreamError::Upstream("Token response missing authorizationToken".into())
            })?;
        let token = authorization
            .strip_prefix("Bearer ")
            .unwrap_or(authorization)
            .to_string();

        tracing::debug!("Fetched scoring API token");
        *cached = Some(token.clone());
        Ok(token)
    }

    async fn send_enveloped(
        &self,
        request: RequestBuilder,
        agent: &WalletAddress,
    ) -> DownstreamResult<Value> {
        let response = request
            .header(AGENT_ADDRESS_HEADER, agent.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownstreamError::Upstream(format!("upstream returned {status}")));
        }

        let envelope: Envelope = response.json().await?;
        envelope.into_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Query,
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const AGENT: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
    const OTHER: &str = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8";

    fn agent() -> WalletAddress {
        AGENT.parse().unwrap()
    }

    fn agent_header(headers: &HeaderMap) -> String {
        headers
            .get(AGENT_ADDRESS_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    async fn spawn_stub(token_calls: Arc<AtomicUsize>) -> String {
        let app = Router::new()
            .route(
                "/service/openapi/getToken",
                post(move |Json(body): Json<Value>| {
                    let token_calls = Arc::clone(&token_calls);
                    async move {
                        token_calls.fetch_add(1, Ordering::SeqCst);
                        if body["accessKey"] == "ak" && body["secretAccessKey"] == "sk" {
                            Json(json!({"code": 0, "data": {"authorizationToken": "Bearer tok-1"}}))
                        } else {
                            Json(json!({"code": 401, "message": "bad credentials"}))
                        }
                    }
                }),
            )
            .route(
                "/service/openapi/queryAgentGoScore",
                get(
                    |headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                        let authorized = headers
                            .get("authorization")
                            .map(|v| v == "Bearer tok-1")
                            .unwrap_or(false);
                        if !authorized || agent_header(&headers) != AGENT {
                            return Json(json!({"code": 403, "message": "forbidden"}));
                        }
                        Json(json!({"code": 0, "data": {"slug": q["slug"], "score": 87}}))
                    },
                ),
            )
            .route(
                "/accounts/check_signed_message",
                post(|Json(body): Json<Value>| async move {
                    let well_formed = body["mode"] == "evm"
                        && body["signature"].as_str().is_some_and(|s| s.starts_with("0x"))
                        && body["invite_from"]["code"] == "INV1"
                        && body["invite_from"]["from"] == "twitter";
                    if !well_formed || body["address"] == OTHER {
                        return Json(json!({"success": false, "message": "invalid signature"}));
                    }
                    let token = format!("tg-{}", body["address"].as_str().unwrap_or_default());
                    Json(json!({"success": true, "data": {"token": token}}))
                }),
            )
            .route(
                "/tweet.php",
                get(
                    |headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                        let keyed = headers.get("x-rapidapi-key").map(|v| v == "rk") == Some(true)
                            && headers.get("x-rapidapi-host").map(|v| v == "tw.test") == Some(true);
                        if !keyed {
                            return (StatusCode::FORBIDDEN, Json(json!({"message": "no key"})));
                        }
                        (
                            StatusCode::OK,
                            Json(json!({
                                "id": q["id"],
                                "text": "hello from the agent",
                                "author": {"screen_name": "agent_go", "name": "AgentGo"}
                            })),
                        )
                    },
                ),
            )
            .route(
                "/agentgo/ranked_bubbles",
                get(
                    |headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                        let expected = format!("TOKEN tg-{AGENT}");
                        if headers.get("authorization").map(|v| v == expected.as_str())
                            != Some(true)
                        {
                            return (StatusCode::UNAUTHORIZED, Json(json!({"message": "no"})));
                        }
                        (StatusCode::OK, Json(json!({"type": q["type"], "items": [1, 2]})))
                    },
                ),
            )
            .route(
                "/accounts/attest_calldata",
                get(
                    |headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                        if q.get("attest_type").map(String::as_str) != Some("sigma") {
                            return Json(json!({"code": 1, "message": "bad type"}));
                        }
                        if q.get("slug").map(String::as_str) == Some("unknown") {
                            return Json(json!({"code": 404, "message": "agent not found"}));
                        }
                        Json(json!({
                            "code": 0,
                            "data": {"to": "0xabc", "calldata": "0x1234", "agent": agent_header(&headers)}
                        }))
                    },
                ),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base: &str, access_key: &str) -> DownstreamClient {
        let config = Config {
            score_api_url: base.to_string(),
            score_access_key: access_key.to_string(),
            score_secret_key: "sk".into(),
            trustgo_api_url: format!("{base}/"),
            trustgo_invite_code: "INV1".into(),
            trustgo_invite_from: "twitter".into(),
            twitter_api_url: base.to_string(),
            twitter_api_host: "tw.test".into(),
            rapidapi_key: "rk".into(),
            downstream_timeout: std::time::Duration::from_secs(5),
            ..Config::default()
        };
        DownstreamClient::new(&config).unwrap()
    }

    #[test]
    fn test_bubble_kind_parse() {
        assert_eq!("price".parse::<BubbleKind>(), Ok(BubbleKind::Price));
        assert_eq!("sigma_score".parse::<BubbleKind>(), Ok(BubbleKind::SigmaScore));
        assert_eq!(BubbleKind::Mindshare.to_string(), "mindshare");
        assert!("volume".parse::<BubbleKind>().is_err());
    }

    #[tokio::test]
    async fn test_agent_score_caches_token() {
        let token_calls = Arc::new(AtomicUsize::new(0));
        let base = spawn_stub(Arc::clone(&token_calls)).await;
        let client = client(&base, "ak");

        let score = client.query_agent_score(&agent(), "my-agent").await.unwrap();
        assert_eq!(score["slug"], "my-agent");
        assert_eq!(score["score"], 87);

        client.query_agent_score(&agent(), "my-agent").await.unwrap();
        assert_eq!(token_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bad_credentials_surface_upstream_message() {
        let base = spawn_stub(Arc::new(AtomicUsize::new(0))).await;
        let client = client(&base, "wrong");

        let err = client.query_agent_score(&agent(), "my-agent").await.unwrap_err();
        assert!(matches!(err, DownstreamError::Upstream(ref m) if m == "bad credentials"));
    }

    async fn linked_client(base: &str) -> DownstreamClient {
        let client = client(base, "ak");
        client
            .trustgo_login(&agent(), "agentgo.test agent login", "0x1234")
            .await
            .unwrap();
        client
    }

    #[tokio::test]
    async fn test_trustgo_login_caches_token_per_wallet() {
        let base = spawn_stub(Arc::new(AtomicUsize::new(0))).await;
        let client = client(&base, "ak");
        assert!(!client.has_trustgo_token(&agent()));

        client
            .trustgo_login(&agent(), "agentgo.test agent login", "0x1234")
            .await
            .unwrap();
        assert!(client.has_trustgo_token(&agent()));

        let other: WalletAddress = OTHER.parse().unwrap();
        let err = client
            .trustgo_login(&other, "agentgo.test agent login", "0x1234")
            .await
            .unwrap_err();
        assert!(matches!(err, DownstreamError::Upstream(ref m) if m == "invalid signature"));
        assert!(!client.has_trustgo_token(&other));

        client.forget_trustgo_token(&agent());
        assert!(!client.has_trustgo_token(&agent()));
    }

    #[tokio::test]
    async fn test_unlinked_wallet_is_not_sent_upstream() {
        let base = spawn_stub(Arc::new(AtomicUsize::new(0))).await;
        let client = client(&base, "ak");

        let err = client
            .ranked_bubbles(&agent(), BubbleKind::Price)
            .await
            .unwrap_err();
        assert!(matches!(err, DownstreamError::NotLinked));
        let err = client.attest_calldata(&agent(), "my-agent").await.unwrap_err();
        assert!(matches!(err, DownstreamError::NotLinked));
    }

    #[tokio::test]
    async fn test_retain_trustgo_tokens() {
        let base = spawn_stub(Arc::new(AtomicUsize::new(0))).await;
        let client = linked_client(&base).await;

        assert_eq!(client.retain_trustgo_tokens(|_| true), 0);
        assert_eq!(client.retain_trustgo_tokens(|a| *a != agent()), 1);
        assert!(!client.has_trustgo_token(&agent()));
    }

    #[tokio::test]
    async fn test_fetch_tweet() {
        let base = spawn_stub(Arc::new(AtomicUsize::new(0))).await;
        let tweet = client(&base, "ak").fetch_tweet("1850000000000000000").await.unwrap();
        assert_eq!(tweet.text, "hello from the agent");
        assert_eq!(tweet.screen_name, "agent_go");

        let unkeyed = DownstreamClient::new(&Config {
            twitter_api_url: base.clone(),
            twitter_api_host: "tw.test".into(),
            rapidapi_key: String::new(),
            ..Config::default()
        })
        .unwrap();
        let err = unkeyed.fetch_tweet("1").await.unwrap_err();
        assert!(matches!(err, DownstreamError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_ranked_bubbles_passthrough() {
        let base = spawn_stub(Arc::new(AtomicUsize::new(0))).await;
        let client = linked_client(&base).await;

        let data = client
            .ranked_bubbles(&agent(), BubbleKind::SigmaScore)
            .await
            .unwrap();
        assert_eq!(data["type"], "sigma_score");
        assert_eq!(data["items"], json!([1, 2]));
    }

    #[tokio::test]
    async fn test_attest_calldata() {
        let base = spawn_stub(Arc::new(AtomicUsize::new(0))).await;
        let client = linked_client(&base).await;

        let data = client.attest_calldata(&agent(), "my-agent").await.unwrap();
        assert_eq!(data["calldata"], "0x1234");
        assert_eq!(data["agent"], AGENT);

        let err = client.attest_calldata(&agent(), "unknown").await.unwrap_err();
        assert!(matches!(err, DownstreamError::Upstream(ref m) if m == "agent not found"));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_http_error() {
        let client = client("http://127.0.0.1:1", "ak");
        let err = client
            .trustgo_login(&agent(), "agentgo.test agent login", "0x1234")
            .await
            .unwrap_err();
        assert!(matches!(err, DownstreamError::Http(_)));
    }
}
