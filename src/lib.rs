//! AgentGo gateway
//!
//! Wallet-signature authentication for AI agents.
//! An agent proves control of an EVM address by signing a one-time
//! challenge (EIP-191 `personal_sign`) and receives a short-lived session
//! token that gates every call to the scoring, market-data and
//! certification services behind the gateway.
//!
//! ## Architecture
//!
//! - **Challenges**: single-use nonces bound to a claimed address, with expiry
//! - **Verifier**: secp256k1 signer recovery over the canonical login message
//! - **Sessions**: opaque bearer tokens, revocable, with expiry
//! - **Gateway**: drives the login state machine and checks every gated call
//! - **X binding**: ties an X handle to a wallet through a posted message

pub mod api;
pub mod binding;
pub mod challenge;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod downstream;
pub mod error;
pub mod gateway;
pub mod session;
pub mod state;
pub mod types;
pub mod verifier;

pub use config::Config;
pub use error::{ApiError, ApiResult, AuthError, AuthResult};
pub use gateway::{AuthGateway, LoginState};
pub use state::AppState;
