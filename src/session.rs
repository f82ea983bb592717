//! Session manager
//!
//! Mints bearer tokens for verified wallet owners and answers the
//! per-request "is this token still good" question.

use std::sync::Arc;

use chrono::Duration;
use dashmap::DashMap;
use uuid::Uuid;

use crate::clock::Clock;
use crate::crypto::generate_session_token;
use crate::error::{AuthError, AuthResult};
use crate::types::{Session, WalletAddress};

pub struct SessionManager {
    /// Sessions indexed by token
    sessions: DashMap<String, Session>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    token_bytes: usize,
    single_session_per_address: bool,
}

impl SessionManager {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration, token_bytes: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            clock,
            ttl,
            token_bytes,
            single_session_per_address: false,
        }
    }

    /// Revoke earlier sessions of an address whenever it logs in again
    pub fn with_single_session_per_address(mut self, enabled: bool) -> Self {
        self.single_session_per_address = enabled;
        self
    }

    /// Mint a session for an address whose ownership was already proven
    pub(crate) fn create_session(&self, address: WalletAddress) -> Session {
        if self.single_session_per_address {
            let superseded = self.revoke_address(&address);
            if superseded > 0 {
                tracing::info!(%address, superseded, "Superseded previous sessions");
            }
        }

        let issued_at = self.clock.now();
        let session = Session {
            id: Uuid::new_v4(),
            token: generate_session_token(self.token_bytes),
            address,
            issued_at,
            expires_at: issued_at + self.ttl,
            revoked: false,
        };

        self.sessions.insert(session.token.clone(), session.clone());
        tracing::info!(%address, session_id = %session.id, "Session created");
        session
    }

    /// Resolve a token to the address it was issued for
    pub fn validate_session(&self, token: &str) -> AuthResult<WalletAddress> {
        let session = self.sessions.get(token).ok_or(AuthError::SessionNotFound)?;

        if session.revoked {
            return Err(AuthError::SessionRevoked);
        }
        if session.is_expired(self.clock.now()) {
            return Err(AuthError::SessionExpired);
        }
        Ok(session.address)
    }

    /// Revoke a session; unknown or already revoked tokens are a no-op
    ///
    /// Returns the address the token belonged to, if it was ever issued.
    pub fn revoke_session(&self, token: &str) -> Option<WalletAddress> {
        let mut session = self.sessions.get_mut(token)?;
        if !session.revoked {
            session.revoked = true;
            tracing::info!(
                address = %session.address,
                session_id = %session.id,
                "Session revoked"
            );
        }
        Some(session.address)
    }

    /// Whether `address` holds any session that would still validate
    pub fn has_live_session(&self, address: &WalletAddress) -> bool {
        let now = self.clock.now();
        self.sessions
            .iter()
            .any(|s| s.address == *address && !s.revoked && !s.is_expired(now))
    }

    /// Revoke every live session of an address, returning how many
    pub fn revoke_address(&self, address: &WalletAddress) -> usize {
        let mut revoked = 0;
        for mut entry in self.sessions.iter_mut() {
            let session = entry.value_mut();
            if session.address == *address && !session.revoked {
                session.revoked = true;
                revoked += 1;
            }
        }
        revoked
    }

    /// Remove sessions past their expiry, revoked or not
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired(now));
        before.saturating_sub(self.sessions.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
