//! Challenge store for wallet logins
//!
//! Issues single-use nonces bound to a claimed address and hands each one
//! out for verification at most once. An address holds at most one
//! outstanding challenge; issuing a new one replaces the old.

use std::sync::Arc;

use chrono::Duration;
use dashmap::DashMap;

use crate::clock::Clock;
use crate::crypto::generate_nonce;
use crate::error::{AuthError, AuthResult};
use crate::types::{Challenge, WalletAddress};
use crate::verifier::login_message;

/// Outstanding challenges keyed by (address, nonce)
pub struct ChallengeStore {
    challenges: DashMap<(WalletAddress, String), Challenge>,
    /// Most recent nonce issued per address
    latest: DashMap<WalletAddress, String>,
    clock: Arc<dyn Clock>,
    domain: String,
    ttl: Duration,
    nonce_bytes: usize,
}

impl ChallengeStore {
    pub fn new(
        clock: Arc<dyn Clock>,
        domain: impl Into<String>,
        ttl: Duration,
        nonce_bytes: usize,
    ) -> Self {
        Self {
            challenges: DashMap::new(),
            latest: DashMap::new(),
            clock,
            domain: domain.into(),
            ttl,
            nonce_bytes,
        }
    }

    /// Issue a fresh challenge for `claimed_address`
    pub fn issue_challenge(&self, claimed_address: &str) -> AuthResult<Challenge> {
        let address: WalletAddress = claimed_address.parse()?;
        let nonce = generate_nonce(self.nonce_bytes);
        let issued_at = self.clock.now();

        let challenge = Challenge {
            address,
            message: login_message(&self.domain, &address, &nonce),
            nonce: nonce.clone(),
            issued_at,
            expires_at: issued_at + self.ttl,
            consumed: false,
        };

        self.challenges
            .insert((address, nonce.clone()), challenge.clone());
        if let Some(previous) = self.latest.insert(address, nonce.clone()) {
            if previous != nonce {
                self.challenges.remove(&(address, previous));
            }
        }

        tracing::debug!(%address, expires_at = %challenge.expires_at, "Challenge issued");
        Ok(challenge)
    }

    /// Take the challenge out of the store, exactly once
    ///
    /// Removal is the atomic step: of any number of concurrent callers with
    /// the same key, only one receives the entry.
    pub fn consume_challenge(
        &self,
        address: &WalletAddress,
        nonce: &str,
    ) -> AuthResult<Challenge> {
        let (_, mut challenge) = self
            .challenges
            .remove(&(*address, nonce.to_string()))
            .ok_or(AuthError::ChallengeNotFound)?;

        self.latest.remove_if(address, |_, latest| latest == nonce);

        if challenge.is_expired(self.clock.now()) {
            return Err(AuthError::ChallengeExpired);
        }

        challenge.consumed = true;
        Ok(challenge)
    }

    /// Nonce of the challenge currently outstanding for `address`
    pub fn outstanding_nonce(&self, address: &WalletAddress) -> Option<String> {
        self.latest.get(address).map(|r| r.value().clone())
    }

    /// Drop expired challenges, returning how many were removed
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.challenges.len();

        self.challenges.retain(|_, c| !c.is_expired(now));
        self.latest
            .retain(|address, nonce| self.challenges.contains_key(&(*address, nonce.clone())));

        before.saturating_sub(self.challenges.len())
    }

    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }
}
