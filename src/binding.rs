//! X account binding
//!
//! An authenticated agent proves it controls an X account by posting a
//! one-time message. The message is issued here, the tweet is fetched
//! downstream, and a matching tweet binds the author's handle to the wallet.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;

use crate::clock::Clock;
use crate::error::XBindingError;
use crate::types::WalletAddress;

/// A message waiting to be posted by the agent
#[derive(Debug, Clone, Serialize)]
pub struct PendingBinding {
    pub message: String,
    pub expires_at: DateTime<Utc>,
}

pub fn binding_message(address: &WalletAddress, code: u32) -> String {
    format!("Using AgentGo to sign with twitter {address} code is {code}")
}

pub struct XBindingStore {
    pending: DashMap<WalletAddress, PendingBinding>,
    /// Bound X screen names
    bindings: DashMap<WalletAddress, String>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl XBindingStore {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            bindings: DashMap::new(),
            clock,
            ttl,
        }
    }

    /// Issue the message `address` has to post, replacing any earlier one
    pub fn issue(&self, address: WalletAddress) -> PendingBinding {
        let code = rand::thread_rng().gen_range(1_000_000..=9_999_999);
        let pending = PendingBinding {
            message: binding_message(&address, code),
            expires_at: self.clock.now() + self.ttl,
        };
        self.pending.insert(address, pending.clone());
        tracing::debug!(%address, "X binding message issued");
        pending
    }

    /// Bind `screen_name` if `tweet_text` is the pending message
    ///
    /// The pending message survives a mismatch so the agent can retry with
    /// the right tweet.
    pub fn confirm(
        &self,
        address: &WalletAddress,
        tweet_text: &str,
        screen_name: &str,
    ) -> Result<String, XBindingError> {
        let pending = self
            .pending
            .get(address)
            .map(|p| p.value().clone())
            .ok_or(XBindingError::NoChallenge)?;

        if self.clock.now() > pending.expires_at {
            self.pending.remove(address);
            return Err(XBindingError::ChallengeExpired);
        }
        if tweet_text.trim() != pending.message {
            return Err(XBindingError::TweetMismatch);
        }

        // Only the caller that removes the entry binds
        self.pending
            .remove_if(address, |_, p| p.message == pending.message)
            .ok_or(XBindingError::NoChallenge)?;

        let screen_name = screen_name.trim_start_matches('@').to_string();
        self.bindings.insert(*address, screen_name.clone());
        tracing::info!(%address, screen_name, "X account bound");
        Ok(screen_name)
    }

    pub fn screen_name(&self, address: &WalletAddress) -> Option<String> {
        self.bindings.get(address).map(|r| r.value().clone())
    }

    pub fn pending(&self, address: &WalletAddress) -> Option<PendingBinding> {
        self.pending.get(address).map(|r| r.value().clone())
    }

    /// Drop pending messages past their expiry
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.pending.len();
        self.pending.retain(|_, p| now <= p.expires_at);
        before.saturating_sub(self.pending.len())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
