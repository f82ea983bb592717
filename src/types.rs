//! Core types for the AgentGo gateway
//!
//! Wallet addresses, challenges, sessions and the HTTP request/response
//! shapes used throughout the service.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::AuthError;

// ============ Wallet Address ============

/// 20-byte EVM account address
///
/// Displays as lower-case `0x` hex, which is the canonical form used for
/// storage keys, signed messages and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WalletAddress(Address);

impl WalletAddress {
    /// EIP-55 mixed-case checksum encoding
    pub fn to_checksum(&self) -> String {
        self.0.to_checksum(None)
    }
}

impl From<Address> for WalletAddress {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

impl FromStr for WalletAddress {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or(AuthError::InvalidAddress)?;

        if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AuthError::InvalidAddress);
        }

        // Single-case input carries no checksum; mixed case must be valid EIP-55
        let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
        let address = if has_lower && has_upper {
            Address::parse_checksummed(format!("0x{digits}"), None)
                .map_err(|_| AuthError::InvalidAddress)?
        } else {
            Address::from_str(digits).map_err(|_| AuthError::InvalidAddress)?
        };

        Ok(Self(address))
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0.as_slice()))
    }
}

impl Serialize for WalletAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WalletAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============ Auth Types ============

/// One-time login challenge bound to a claimed address
#[derive(Debug, Clone, Serialize)]
pub struct Challenge {
    pub address: WalletAddress,
    pub nonce: String,
    /// Exact text the wallet must sign
    pub message: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip)]
    pub consumed: bool,
}

impl Challenge {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Session credential minted after a verified login
#[derive(Debug, Clone)]
pub struct Session {
    /// Non-secret handle for logs
    pub id: Uuid,
    pub token: String,
    pub address: WalletAddress,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

// ============ API Request Types ============

#[derive(Debug, Deserialize)]
pub struct ChallengeRequest {
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub address: String,
    /// 65-byte signature, 0x-prefixed hex
    pub signature: String,
    /// Falls back to the latest outstanding challenge when absent
    #[serde(default)]
    pub nonce: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClaimAttestationRequest {
    pub slug: String,
}

#[derive(Debug, Deserialize)]
pub struct XVerifyRequest {
    pub tweet_id: String,
}

// ============ Response Types ============

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
            hint: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn ok() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            code: None,
            hint: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            code: None,
            hint: None,
        }
    }

    pub fn error_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            hint: Some(hint.into()),
            ..Self::error(message)
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Login response; the token is only ever returned here
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub address: WalletAddress,
    pub expires_at: DateTime<Utc>,
    /// Whether TrustGo accepted the same signature
    pub trustgo_linked: bool,
}

impl LoginResponse {
    pub fn new(s: &Session, trustgo_linked: bool) -> Self {
        Self {
            token: s.token.clone(),
            address: s.address,
            expires_at: s.expires_at,
            trustgo_linked,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub address: WalletAddress,
    pub trustgo_linked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_account: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct XBindingResponse {
    pub address: WalletAddress,
    pub screen_name: String,
}

#[derive(Debug, Serialize)]
pub struct LogoutAllResponse {
    pub revoked: usize,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub pending_challenges: usize,
    pub live_sessions: usize,
    pub pending_x_bindings: usize,
}
