//! Authentication gateway
//!
//! The single entry point the transport layer talks to. Drives a login
//! through challenge issuance, single-use consumption, signature
//! verification and session minting, and answers session checks for every
//! gated call.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::challenge::ChallengeStore;
use crate::clock::Clock;
use crate::config::{Config, ConfigError};
use crate::error::{AuthError, AuthResult};
use crate::session::SessionManager;
use crate::types::{Challenge, Session, WalletAddress};
use crate::verifier::{LoginVerifier, SignatureVerifier};

// ============ Login State Machine ============

/// Where the latest login attempt of an address stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginState {
    AwaitingChallenge,
    ChallengeIssued {
        nonce: String,
        expires_at: DateTime<Utc>,
    },
    Verifying {
        nonce: String,
    },
    Authenticated {
        session_id: Uuid,
    },
    Failed {
        error: AuthError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginEvent {
    ChallengeIssued {
        nonce: String,
        expires_at: DateTime<Utc>,
    },
    VerificationStarted {
        nonce: String,
    },
    Succeeded {
        session_id: Uuid,
    },
    Failed(AuthError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Illegal login transition: {event} while {from}")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub event: &'static str,
}

impl LoginState {
    pub fn name(&self) -> &'static str {
        match self {
            LoginState::AwaitingChallenge => "awaiting_challenge",
            LoginState::ChallengeIssued { .. } => "challenge_issued",
            LoginState::Verifying { .. } => "verifying",
            LoginState::Authenticated { .. } => "authenticated",
            LoginState::Failed { .. } => "failed",
        }
    }

    /// Apply an event, rejecting transitions the login flow never makes
    ///
    /// A new challenge restarts the flow from any state. Failure is
    /// reachable from anywhere, since a completion can arrive for an
    /// address with nothing outstanding.
    pub fn apply(self, event: LoginEvent) -> Result<LoginState, InvalidTransition> {
        match (self, event) {
            (_, LoginEvent::ChallengeIssued { nonce, expires_at }) => {
                Ok(LoginState::ChallengeIssued { nonce, expires_at })
            }
            (LoginState::ChallengeIssued { .. }, LoginEvent::VerificationStarted { nonce }) => {
                Ok(LoginState::Verifying { nonce })
            }
            (LoginState::Verifying { .. }, LoginEvent::Succeeded { session_id }) => {
                Ok(LoginState::Authenticated { session_id })
            }
            (_, LoginEvent::Failed(error)) => Ok(LoginState::Failed { error }),
            (from, event) => Err(InvalidTransition {
                from: from.name(),
                event: match event {
                    LoginEvent::ChallengeIssued { .. } => "challenge_issued",
                    LoginEvent::VerificationStarted { .. } => "verification_started",
                    LoginEvent::Succeeded { .. } => "succeeded",
                    LoginEvent::Failed(_) => "failed",
                },
            }),
        }
    }
}

// ============ Gateway ============

/// A completed login together with the challenge it answered
#[derive(Debug, Clone)]
pub struct SignedLogin {
    pub session: Session,
    pub challenge: Challenge,
}

pub struct AuthGateway {
    challenges: Arc<ChallengeStore>,
    verifier: Arc<dyn LoginVerifier>,
    sessions: Arc<SessionManager>,
    attempts: DashMap<WalletAddress, LoginState>,
}

impl AuthGateway {
    pub fn new(
        challenges: Arc<ChallengeStore>,
        verifier: Arc<dyn LoginVerifier>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            challenges,
            verifier,
            sessions,
            attempts: DashMap::new(),
        }
    }

    /// Wire fresh stores from configuration
    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        let challenges = ChallengeStore::new(
            Arc::clone(&clock),
            config.domain.clone(),
            config.challenge_lifetime()?,
            config.nonce_bytes,
        );
        let sessions = SessionManager::new(
            clock,
            config.session_lifetime()?,
            config.session_token_bytes,
        )
        .with_single_session_per_address(config.single_session_per_address);

        Ok(Self::new(
            Arc::new(challenges),
            Arc::new(SignatureVerifier::new(config.domain.clone())),
            Arc::new(sessions),
        ))
    }

    pub fn challenges(&self) -> &ChallengeStore {
        &self.challenges
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Begin a login: issue a challenge for `address` to sign
    pub fn start_login(&self, address: &str) -> AuthResult<Challenge> {
        let challenge = self.challenges.issue_challenge(address)?;
        self.transition(
            challenge.address,
            LoginEvent::ChallengeIssued {
                nonce: challenge.nonce.clone(),
                expires_at: challenge.expires_at,
            },
        );
        Ok(challenge)
    }

    /// Finish a login against the address's outstanding challenge
    pub fn complete_login(&self, address: &str, signature: &str) -> AuthResult<Session> {
        self.complete_login_signed(address, None, signature)
            .map(|login| login.session)
    }

    /// Finish a login against a specific challenge nonce
    pub fn complete_login_with_nonce(
        &self,
        address: &str,
        nonce: &str,
        signature: &str,
    ) -> AuthResult<Session> {
        self.complete_login_signed(address, Some(nonce), signature)
            .map(|login| login.session)
    }

    /// Finish a login and hand back the challenge that was signed
    ///
    /// Without a nonce the address's outstanding challenge is used.
    pub fn complete_login_signed(
        &self,
        address: &str,
        nonce: Option<&str>,
        signature: &str,
    ) -> AuthResult<SignedLogin> {
        let address: WalletAddress = address.parse()?;
        let nonce = match nonce {
            Some(nonce) => nonce.to_string(),
            None => self
                .challenges
                .outstanding_nonce(&address)
                .ok_or_else(|| self.fail(address, AuthError::ChallengeNotFound))?,
        };
        self.finish_login(address, &nonce, signature)
    }

    /// Resolve a bearer token to its verified address
    pub fn validate_session(&self, token: &str) -> AuthResult<WalletAddress> {
        self.sessions.validate_session(token)
    }

    /// Revoke one session, returning the address it belonged to
    pub fn logout(&self, token: &str) -> Option<WalletAddress> {
        self.sessions.revoke_session(token)
    }

    pub fn logout_everywhere(&self, address: &WalletAddress) -> usize {
        let revoked = self.sessions.revoke_address(address);
        tracing::info!(%address, revoked, "Revoked all sessions");
        revoked
    }

    pub fn login_state(&self, address: &WalletAddress) -> LoginState {
        self.attempts
            .get(address)
            .map(|r| r.value().clone())
            .unwrap_or(LoginState::AwaitingChallenge)
    }

    /// Number of addresses with a recorded login attempt
    pub fn tracked_attempts(&self) -> usize {
        self.attempts.len()
    }

    /// Forget attempts that have settled or whose challenge is gone
    ///
    /// Attempts mid-verification are kept.
    pub fn sweep_attempts(&self) -> usize {
        let before = self.attempts.len();
        self.attempts.retain(|address, state| match state {
            LoginState::Verifying { .. } => true,
            LoginState::ChallengeIssued { nonce, .. } => {
                self.challenges.outstanding_nonce(address).as_ref() == Some(nonce)
            }
            _ => false,
        });
        before.saturating_sub(self.attempts.len())
    }

    fn finish_login(
        &self,
        address: WalletAddress,
        nonce: &str,
        signature: &str,
    ) -> AuthResult<SignedLogin> {
        self.transition(
            address,
            LoginEvent::VerificationStarted {
                nonce: nonce.to_string(),
            },
        );

        // The challenge is burnt before verification, so a bad signature
        // cannot be retried against it
        let verified = self
            .challenges
            .consume_challenge(&address, nonce)
            .and_then(|challenge| {
                self.verify_guarded(&address, nonce, signature)
                    .map(|_| challenge)
            });

        let challenge = match verified {
            Ok(challenge) => challenge,
            Err(err) => return Err(self.fail(address, err)),
        };

        let session = self.sessions.create_session(address);
        self.transition(
            address,
            LoginEvent::Succeeded {
                session_id: session.id,
            },
        );
        Ok(SignedLogin { session, challenge })
    }

    fn verify_guarded(
        &self,
        address: &WalletAddress,
        nonce: &str,
        signature: &str,
    ) -> AuthResult<()> {
        catch_unwind(AssertUnwindSafe(|| {
            self.verifier.verify(address, nonce, signature)
        }))
        .unwrap_or_else(|_| {
            tracing::error!(%address, "Signature verification panicked");
            Err(AuthError::RecoveryFailed)
        })
    }

    fn fail(&self, address: WalletAddress, err: AuthError) -> AuthError {
        tracing::warn!(%address, code = err.code(), "Login failed");
        self.transition(address, LoginEvent::Failed(err.clone()));
        err
    }

    fn transition(&self, address: WalletAddress, event: LoginEvent) {
        let mut state = self
            .attempts
            .entry(address)
            .or_insert(LoginState::AwaitingChallenge);

        let current = state.value().clone();
        match current.apply(event) {
            Ok(next) => *state.value_mut() = next,
            Err(err) => tracing::debug!(%address, error = %err, "Login transition ignored"),
        }
    }
}
