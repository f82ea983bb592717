use std::env;
use std::time::Duration;

/// Minimum random bytes for nonces and session tokens (128 bits)
pub const MIN_ENTROPY_BYTES: usize = 16;

/// Upper bound on every configured lifetime and interval
pub const MAX_DURATION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub version: String,
    /// Domain-separation string embedded in every login message
    pub domain: String,
    pub challenge_ttl: Duration,
    pub session_ttl: Duration,
    pub nonce_bytes: usize,
    pub session_token_bytes: usize,
    pub sweep_interval: Duration,
    /// Revoke older sessions of an address on a fresh login
    pub single_session_per_address: bool,
    pub score_api_url: String,
    pub score_access_key: String,
    pub score_secret_key: String,
    pub trustgo_api_url: String,
    /// Invitation attached to every TrustGo account login
    pub trustgo_invite_code: String,
    pub trustgo_invite_from: String,
    pub twitter_api_url: String,
    pub twitter_api_host: String,
    pub rapidapi_key: String,
    /// How long an X binding code stays valid
    pub x_challenge_ttl: Duration,
    pub downstream_timeout: Duration,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be at least {MIN_ENTROPY_BYTES} bytes, got {got}")]
    InsufficientEntropy { name: &'static str, got: usize },
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("{name} must not exceed {max_secs} seconds")]
    DurationTooLong { name: &'static str, max_secs: u64 },
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.into())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", 8080),
            version: env!("CARGO_PKG_VERSION").into(),
            domain: env_or("AUTH_DOMAIN", "agentgo.trustalabs.ai"),
            challenge_ttl: Duration::from_secs(env_parse("CHALLENGE_TTL_SECS", 300)),
            session_ttl: Duration::from_secs(env_parse("SESSION_TTL_SECS", 12 * 60 * 60)),
            nonce_bytes: env_parse("NONCE_BYTES", 16),
            session_token_bytes: env_parse("SESSION_TOKEN_BYTES", 32),
            sweep_interval: Duration::from_secs(env_parse("SWEEP_INTERVAL_SECS", 60)),
            single_session_per_address: env_parse("SINGLE_SESSION_PER_ADDRESS", false),
            score_api_url: env_or(
                "SCORE_API_URL",
                "https://host-server-web-frat-server-uvoggbicsv.ap-southeast-1.fcapp.run",
            ),
            score_access_key: env_or("SCORE_ACCESS_KEY", ""),
            score_secret_key: env_or("SCORE_SECRET_KEY", ""),
            trustgo_api_url: env_or("TRUSTGO_API_URL", "https://dev.mp.trustalabs.ai"),
            trustgo_invite_code: env_or("TRUSTGO_INVITE_CODE", "8ZRT9G1"),
            trustgo_invite_from: env_or("TRUSTGO_INVITE_FROM", "twitter"),
            twitter_api_url: env_or("TWITTER_API_URL", "https://twitter-api45.p.rapidapi.com"),
            twitter_api_host: env_or("TWITTER_API_HOST", "twitter-api45.p.rapidapi.com"),
            rapidapi_key: env_or("RAPIDAPI_KEY", ""),
            x_challenge_ttl: Duration::from_secs(env_parse("X_CHALLENGE_TTL_SECS", 60 * 60)),
            downstream_timeout: Duration::from_secs(env_parse("DOWNSTREAM_TIMEOUT_SECS", 15)),
        }
    }

    /// Reject settings that would weaken the authentication core
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nonce_bytes < MIN_ENTROPY_BYTES {
            return Err(ConfigError::InsufficientEntropy {
                name: "NONCE_BYTES",
                got: self.nonce_bytes,
            });
        }
        if self.session_token_bytes < MIN_ENTROPY_BYTES {
            return Err(ConfigError::InsufficientEntropy {
                name: "SESSION_TOKEN_BYTES",
                got: self.session_token_bytes,
            });
        }
        self.challenge_lifetime()?;
        self.session_lifetime()?;
        self.x_challenge_lifetime()?;
        bounded("SWEEP_INTERVAL_SECS", self.sweep_interval)?;
        Ok(())
    }

    pub fn challenge_lifetime(&self) -> Result<chrono::Duration, ConfigError> {
        bounded("CHALLENGE_TTL_SECS", self.challenge_ttl)
    }

    pub fn session_lifetime(&self) -> Result<chrono::Duration, ConfigError> {
        bounded("SESSION_TTL_SECS", self.session_ttl)
    }

    pub fn x_challenge_lifetime(&self) -> Result<chrono::Duration, ConfigError> {
        bounded("X_CHALLENGE_TTL_SECS", self.x_challenge_ttl)
    }
}

/// Non-zero and at most [`MAX_DURATION`], as a chrono duration
fn bounded(name: &'static str, value: Duration) -> Result<chrono::Duration, ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::ZeroDuration(name));
    }
    if value > MAX_DURATION {
        return Err(ConfigError::DurationTooLong {
            name,
            max_secs: MAX_DURATION.as_secs(),
        });
    }
    chrono::Duration::from_std(value).map_err(|_| ConfigError::DurationTooLong {
        name,
        max_secs: MAX_DURATION.as_secs(),
    })
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
