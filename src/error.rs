use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::downstream::DownstreamError;
use crate::types::ApiResponse;

/// Failure kinds of the authentication core.
///
/// Every kind is terminal for the current attempt. Messages never carry
/// the recovered signer, only the kind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid wallet address")]
    InvalidAddress,

    #[error("No outstanding challenge for this address and nonce")]
    ChallengeNotFound,

    #[error("Challenge has expired")]
    ChallengeExpired,

    #[error("Malformed signature")]
    MalformedSignature,

    #[error("Signer could not be recovered from signature")]
    RecoveryFailed,

    #[error("Signature does not match the claimed address")]
    AddressMismatch,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session has expired")]
    SessionExpired,

    #[error("Session has been revoked")]
    SessionRevoked,
}

impl AuthError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidAddress => "invalid_address",
            AuthError::ChallengeNotFound => "challenge_not_found",
            AuthError::ChallengeExpired => "challenge_expired",
            AuthError::MalformedSignature => "malformed_signature",
            AuthError::RecoveryFailed => "recovery_failed",
            AuthError::AddressMismatch => "address_mismatch",
            AuthError::SessionNotFound => "session_not_found",
            AuthError::SessionExpired => "session_expired",
            AuthError::SessionRevoked => "session_revoked",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AuthError::InvalidAddress | AuthError::MalformedSignature => StatusCode::BAD_REQUEST,
            AuthError::ChallengeNotFound => StatusCode::NOT_FOUND,
            AuthError::ChallengeExpired
            | AuthError::RecoveryFailed
            | AuthError::AddressMismatch
            | AuthError::SessionNotFound
            | AuthError::SessionExpired
            | AuthError::SessionRevoked => StatusCode::UNAUTHORIZED,
        }
    }

    fn hint(&self) -> Option<&'static str> {
        match self {
            AuthError::InvalidAddress => Some("Use a 0x-prefixed 20-byte hex address"),
            AuthError::ChallengeNotFound | AuthError::ChallengeExpired => {
                Some("Request a new challenge from /auth/challenge")
            }
            AuthError::MalformedSignature => Some("Send the 65-byte signature as 0x-prefixed hex"),
            AuthError::RecoveryFailed | AuthError::AddressMismatch => {
                Some("Sign the exact challenge message with the claimed wallet")
            }
            AuthError::SessionNotFound | AuthError::SessionExpired | AuthError::SessionRevoked => {
                Some("Log in again to obtain a new session token")
            }
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Failures while binding an X account to a wallet
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XBindingError {
    #[error("No pending X binding message for this address")]
    NoChallenge,

    #[error("X binding message has expired")]
    ChallengeExpired,

    #[error("Tweet does not contain the binding message")]
    TweetMismatch,
}

impl XBindingError {
    pub fn code(&self) -> &'static str {
        match self {
            XBindingError::NoChallenge => "x_challenge_not_found",
            XBindingError::ChallengeExpired => "x_challenge_expired",
            XBindingError::TweetMismatch => "x_tweet_mismatch",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            XBindingError::NoChallenge => StatusCode::NOT_FOUND,
            XBindingError::ChallengeExpired | XBindingError::TweetMismatch => {
                StatusCode::BAD_REQUEST
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    XBinding(#[from] XBindingError),

    #[error("Wallet is not linked to TrustGo")]
    NotLinked,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<DownstreamError> for ApiError {
    fn from(err: DownstreamError) -> Self {
        match err {
            DownstreamError::NotLinked => ApiError::NotLinked,
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Auth(err) => {
                let mut body = ApiResponse::<()>::error(err.to_string()).with_code(err.code());
                if let Some(hint) = err.hint() {
                    body.hint = Some(hint.to_string());
                }
                (err.status(), body)
            }
            ApiError::XBinding(err) => {
                let hint = match err {
                    XBindingError::TweetMismatch => "Post the exact message from /x/challenge",
                    _ => "Request a new message from /x/challenge",
                };
                (
                    err.status(),
                    ApiResponse::<()>::error_with_hint(err.to_string(), hint).with_code(err.code()),
                )
            }
            ApiError::NotLinked => (
                StatusCode::FORBIDDEN,
                ApiResponse::<()>::error_with_hint(
                    self.to_string(),
                    "Log in again so the wallet can be linked to TrustGo",
                )
                .with_code("trustgo_not_linked"),
            ),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ApiResponse::<()>::error_with_hint(
                    "Missing or malformed session token",
                    "Include 'Authorization: Bearer YOUR_SESSION_TOKEN' header",
                )
                .with_code("unauthorized"),
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ApiResponse::<()>::error(msg.clone()).with_code("bad_request"),
            ),
            ApiError::Upstream(msg) => {
                tracing::warn!(error = %msg, "Downstream service failed");
                (
                    StatusCode::BAD_GATEWAY,
                    ApiResponse::<()>::error_with_hint(
                        "Downstream service request failed",
                        "Please try again later",
                    )
                    .with_code("upstream_error"),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiResponse::<()>::error("Internal server error").with_code("internal"),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
