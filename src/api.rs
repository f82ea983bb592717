use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use crate::downstream::BubbleKind;
use crate::error::{ApiError, ApiResult, XBindingError};
use crate::state::AppState;
use crate::types::*;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health
        .route("/health", get(health))
        // Login flow
        .route("/auth/challenge", post(request_challenge))
        .route("/auth/login", post(login))
        .route("/auth/session", get(get_session))
        .route("/auth/logout", post(logout))
        .route("/auth/logout-all", post(logout_all))
        // X account binding
        .route("/x/challenge", post(x_challenge))
        .route("/x/verify", post(x_verify))
        // Gated downstream calls
        .route("/agents/:slug/score", get(agent_score))
        .route("/bubbles/:kind", get(ranked_bubbles))
        .route("/attestations/sigma", post(claim_sigma_attestation))
        .with_state(state)
}

// ============ Auth Helpers ============

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Resolve the caller's session to the wallet it was issued for
fn require_session(state: &AppState, headers: &HeaderMap) -> ApiResult<WalletAddress> {
    let token = extract_bearer(headers).ok_or(ApiError::Unauthorized)?;
    Ok(state.gateway.validate_session(token)?)
}

// ============ Health ============

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ApiResponse::success(state.health()))
}

// ============ Login Flow ============

async fn request_challenge(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChallengeRequest>,
) -> ApiResult<impl IntoResponse> {
    let challenge = state.gateway.start_login(&req.address)?;
    Ok(Json(ApiResponse::success(challenge)))
}

/// Verify the signature, then replay it to TrustGo
///
/// A TrustGo refusal does not fail the login; gated TrustGo calls report
/// the wallet as unlinked instead.
async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let login = state
        .gateway
        .complete_login_signed(&req.address, req.nonce.as_deref(), &req.signature)?;
    let address = login.session.address;

    let trustgo_linked = match state
        .downstream
        .trustgo_login(&address, &login.challenge.message, &req.signature)
        .await
    {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(%address, error = %err, "TrustGo link failed");
            false
        }
    };

    Ok(Json(ApiResponse::success(LoginResponse::new(
        &login.session,
        trustgo_linked,
    ))))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let address = require_session(&state, &headers)?;
    Ok(Json(ApiResponse::success(SessionInfo {
        address,
        trustgo_linked: state.downstream.has_trustgo_token(&address),
        x_account: state.x_bindings.screen_name(&address),
    })))
}

/// Revoke the presented token; unknown tokens are not an error
async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let token = extract_bearer(&headers).ok_or(ApiError::Unauthorized)?;
    if let Some(address) = state.gateway.logout(token) {
        if !state.gateway.sessions().has_live_session(&address) {
            state.downstream.forget_trustgo_token(&address);
        }
    }
    Ok(Json(ApiResponse::ok()))
}

async fn logout_all(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let address = require_session(&state, &headers)?;
    let revoked = state.gateway.logout_everywhere(&address);
    state.downstream.forget_trustgo_token(&address);
    Ok(Json(ApiResponse::success(LogoutAllResponse { revoked })))
}

// ============ X Binding ============

async fn x_challenge(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let address = require_session(&state, &headers)?;
    Ok(Json(ApiResponse::success(state.x_bindings.issue(address))))
}

async fn x_verify(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<XVerifyRequest>,
) -> ApiResult<impl IntoResponse> {
    let address = require_session(&state, &headers)?;

    let tweet_id = req.tweet_id.trim();
    if tweet_id.is_empty() || !tweet_id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ApiError::BadRequest("tweet_id must be a numeric id".into()));
    }
    if state.x_bindings.pending(&address).is_none() {
        return Err(XBindingError::NoChallenge.into());
    }

    let tweet = state.downstream.fetch_tweet(tweet_id).await?;
    let screen_name = state
        .x_bindings
        .confirm(&address, &tweet.text, &tweet.screen_name)?;

    Ok(Json(ApiResponse::success(XBindingResponse {
        address,
        screen_name,
    })))
}

// ============ Downstream ============

async fn agent_score(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let address = require_session(&state, &headers)?;
    let score = state.downstream.query_agent_score(&address, &slug).await?;
    Ok(Json(ApiResponse::success(score)))
}

async fn ranked_bubbles(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let address = require_session(&state, &headers)?;
    let kind: BubbleKind = kind.parse().map_err(ApiError::BadRequest)?;

    let data = state.downstream.ranked_bubbles(&address, kind).await?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "bubble_type": kind.as_str(),
        "data": data,
    }))))
}

async fn claim_sigma_attestation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ClaimAttestationRequest>,
) -> ApiResult<impl IntoResponse> {
    let address = require_session(&state, &headers)?;

    let slug = req.slug.trim();
    if slug.is_empty() {
        return Err(ApiError::BadRequest("slug is required".into()));
    }

    let calldata = state.downstream.attest_calldata(&address, slug).await?;
    tracing::info!(%address, slug, "Sigma attestation calldata issued");
    Ok(Json(ApiResponse::success(calldata)))
}
