//! Periodic read cycle across all sessions.
//!
//! One tokio task owns every [`Session`]. Each tick runs `read_once` on
//! the sessions in configuration order, one after another. Cancellation is
//! checked between ticks only: a tick in progress always completes, then
//! every session is disconnected.
//!
//! # Panic-Free Guarantees
//!
//! Sessions never return errors, so a tick cannot fail.

use std::sync::Arc;
use std::time::Duration;

use opcbridge_core::{BridgeConfig, ConfigResult};
use opcbridge_protocol::Connector;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::resolver::Resolver;
use crate::session::{Session, SessionConfig};
use crate::state::BridgeState;

pub struct Poller {
    sessions: Vec<Session>,
    period: Duration,
}

impl Poller {
    pub fn new(sessions: Vec<Session>, period: Duration) -> Self {
        Self { sessions, period }
    }

    /// Builds one session per configured endpoint, in configuration order.
    pub fn from_config(
        config: &BridgeConfig,
        connector: Arc<dyn Connector>,
        state: BridgeState,
    ) -> ConfigResult<Self> {
        let registry = config.registry()?;
        let session_config = SessionConfig {
            resolver: Arc::new(Resolver::new(&config.layout, config.variable_set()?)),
            rounding: config.rounding(),
            io_timeout: config.io_timeout(),
        };

        let sessions = registry
            .iter()
            .map(|endpoint| {
                Session::new(
                    endpoint.clone(),
                    Arc::clone(&connector),
                    session_config.clone(),
                    state.clone(),
                )
            })
            .collect();

        Ok(Self::new(sessions, config.interval()))
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// One read cycle over every session, sequentially.
    pub async fn tick(&mut self) {
        for session in &mut self.sessions {
            session.read_once().await;
        }
    }

    /// Disconnects every session.
    pub async fn shutdown(&mut self) {
        for session in &mut self.sessions {
            session.disconnect().await;
        }
    }

    /// Ticks until `cancel_token` fires, then shuts down.
    pub async fn run(mut self, cancel_token: CancellationToken) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            endpoints = self.sessions.len(),
            interval_ms = self.period.as_millis() as u64,
            "Poller started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Poller shutting down");
                    break;
                }

                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        self.shutdown().await;
        debug!("Poller task completed");
    }
}

/// Spawns the poller task.
pub fn spawn_poller(poller: Poller, cancel_token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(poller.run(cancel_token))
}
