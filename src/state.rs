//! Application state for the AgentGo gateway

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Notify;
use tokio::time::interval;

use crate::binding::XBindingStore;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::downstream::DownstreamClient;
use crate::gateway::AuthGateway;
use crate::types::HealthResponse;

/// Global application state
pub struct AppState {
    /// Login and session handling
    pub gateway: AuthGateway,
    /// Client for the services behind the gateway
    pub downstream: DownstreamClient,
    /// X account bindings
    pub x_bindings: XBindingStore,
    /// Configuration
    pub config: Config,
    /// Start time for uptime calculation
    pub start_time: Instant,
    /// Wakes the sweeper early on shutdown
    sweep_notify: Notify,
    /// Shutdown flag
    shutdown: AtomicBool,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build state driven by the given time source
    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> anyhow::Result<Arc<Self>> {
        config.validate()?;

        Ok(Arc::new(Self {
            gateway: AuthGateway::from_config(&config, Arc::clone(&clock))?,
            downstream: DownstreamClient::new(&config)?,
            x_bindings: XBindingStore::new(clock, config.x_challenge_lifetime()?),
            config,
            start_time: Instant::now(),
            sweep_notify: Notify::new(),
            shutdown: AtomicBool::new(false),
        }))
    }

    /// Start background expiry sweeper
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let state = Arc::clone(self);
        let sweep_interval = state.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = interval(sweep_interval);

            loop {
                if state.shutdown.load(Ordering::SeqCst) {
                    tracing::info!("Sweeper shutting down");
                    break;
                }

                tokio::select! {
                    _ = ticker.tick() => state.sweep(),
                    _ = state.sweep_notify.notified() => {}
                }
            }
        })
    }

    /// Drop expired challenges, sessions and everything hanging off them
    pub fn sweep(&self) {
        let challenges = self.gateway.challenges().sweep_expired();
        let sessions = self.gateway.sessions().sweep_expired();
        let attempts = self.gateway.sweep_attempts();
        let x_pending = self.x_bindings.sweep_expired();

        let sessions_ref = self.gateway.sessions();
        let trustgo_tokens = self
            .downstream
            .retain_trustgo_tokens(|agent| sessions_ref.has_live_session(agent));

        if challenges + sessions + attempts + x_pending + trustgo_tokens > 0 {
            tracing::debug!(
                challenges,
                sessions,
                attempts,
                x_pending,
                trustgo_tokens,
                "Swept expired entries"
            );
        }
    }

    /// Signal shutdown
    pub fn signal_shutdown(&self) {
        tracing::info!("Shutdown signaled");
        self.shutdown.store(true, Ordering::SeqCst);
        self.sweep_notify.notify_one();
    }

    /// Check if shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Get health info
    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "healthy".into(),
            version: self.config.version.clone(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            pending_challenges: self.gateway.challenges().len(),
            live_sessions: self.gateway.sessions().len(),
            pending_x_bindings: self.x_bindings.pending_len(),
        }
    }
}
