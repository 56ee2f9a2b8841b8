// Staged application start — health gate, then session restore, then ready.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::health::{HealthCheck, HealthFailure, HealthStatus};
use crate::auth::token::TokenStore;
use crate::config::{
    ClientConfig, BOOTSTRAP_HEALTHY_PROGRESS, BOOTSTRAP_HEALTH_PROGRESS, BOOTSTRAP_READY_DELAY,
    BOOTSTRAP_TICK_INTERVAL, BOOTSTRAP_TICK_STEP, HEALTH_CHECK_TIMEOUT,
};

/// Copy shown when the sequence fails for a reason other than the health probe.
pub const BOOTSTRAP_FAILED_MESSAGE: &str = "Failed to initialize the application. Please retry.";

const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPhase {
    CheckingHealth,
    /// Blocking error state; leave it with [`Bootstrapper::retry`].
    Unhealthy,
    /// Backend is healthy; the stored session (if any) is being restored.
    RestoringSession,
    Ready,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapState {
    pub progress: u8,
    pub health: HealthStatus,
    pub initializing: bool,
    pub phase: BootstrapPhase,
}

impl BootstrapState {
    fn initial() -> Self {
        Self {
            progress: 0,
            health: HealthStatus::checking(),
            initializing: true,
            phase: BootstrapPhase::CheckingHealth,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.phase == BootstrapPhase::Ready && !self.initializing
    }

    pub fn can_retry(&self) -> bool {
        self.phase == BootstrapPhase::Unhealthy
    }
}

/// Loads the signed-in user for a stored token. Success and failure both end loading.
#[async_trait]
pub trait SessionRestorer: Send + Sync {
    async fn fetch_current_user(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct BootstrapTimings {
    pub health_timeout: Duration,
    pub tick_interval: Duration,
    pub tick_step: u8,
    pub ready_delay: Duration,
}

impl Default for BootstrapTimings {
    fn default() -> Self {
        Self {
            health_timeout: HEALTH_CHECK_TIMEOUT,
            tick_interval: BOOTSTRAP_TICK_INTERVAL,
            tick_step: BOOTSTRAP_TICK_STEP,
            ready_delay: BOOTSTRAP_READY_DELAY,
        }
    }
}

impl BootstrapTimings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            health_timeout: config.health_timeout(),
            ..Self::default()
        }
    }
}

pub struct Bootstrapper {
    health: Arc<dyn HealthCheck>,
    session: Arc<dyn SessionRestorer>,
    tokens: Arc<dyn TokenStore>,
    state: Arc<watch::Sender<BootstrapState>>,
    timings: BootstrapTimings,
    mounted: CancellationToken,
}

impl Bootstrapper {
    pub fn new(
        health: Arc<dyn HealthCheck>,
        session: Arc<dyn SessionRestorer>,
        tokens: Arc<dyn TokenStore>,
    ) -> Self {
        let (state, _) = watch::channel(BootstrapState::initial());
        Self {
            health,
            session,
            tokens,
            state: Arc::new(state),
            timings: BootstrapTimings::default(),
            mounted: CancellationToken::new(),
        }
    }

    pub fn with_timings(mut self, timings: BootstrapTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Observe every state change (progress ticks included).
    pub fn subscribe(&self) -> watch::Receiver<BootstrapState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> BootstrapState {
        self.state.borrow().clone()
    }

    pub fn is_mounted(&self) -> bool {
        !self.mounted.is_cancelled()
    }

    /// Run the sequence once and return the state it settled in.
    pub async fn start(&self) -> BootstrapState {
        info!("bootstrap starting");
        self.run_guarded().await
    }

    /// Re-run the health-then-session sequence after an unhealthy result.
    pub async fn retry(&self) -> BootstrapState {
        info!("bootstrap retry requested");
        self.run_guarded().await
    }

    /// Stop publishing state. Requests already sent finish, but their results are dropped.
    pub fn unmount(&self) {
        debug!("bootstrap unmounted");
        self.mounted.cancel();
    }

    async fn run_guarded(&self) -> BootstrapState {
        let ticker = self.mounted.child_token();
        let outcome = AssertUnwindSafe(self.sequence(&ticker))
            .catch_unwind()
            .await;
        ticker.cancel();

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("bootstrap failed: {:#}", e);
                self.fail();
            }
            Err(_) => {
                error!("bootstrap panicked");
                self.fail();
            }
        }
        self.state()
    }

    fn fail(&self) {
        self.update(|s| {
            s.progress = s.progress.min(BOOTSTRAP_HEALTH_PROGRESS);
            s.phase = BootstrapPhase::Unhealthy;
            s.health = HealthStatus::unhealthy(HealthFailure::Internal, BOOTSTRAP_FAILED_MESSAGE);
        });
    }

    fn update(&self, modify: impl FnOnce(&mut BootstrapState)) {
        if self.mounted.is_cancelled() {
            return;
        }
        self.state.send_modify(modify);
    }

    async fn sequence(&self, ticker: &CancellationToken) -> Result<()> {
        self.update(|s| *s = BootstrapState::initial());
        self.spawn_ticker(ticker.clone());

        let health = self.health.check_health(self.timings.health_timeout).await;
        ticker.cancel();
        if !self.is_mounted() {
            return Ok(());
        }

        if !health.is_healthy() {
            warn!("bootstrap halted: backend unhealthy ({:?})", health.error);
            self.update(|s| {
                s.progress = BOOTSTRAP_HEALTH_PROGRESS;
                s.phase = BootstrapPhase::Unhealthy;
                s.health = health;
            });
            return Ok(());
        }

        self.update(|s| {
            s.progress = BOOTSTRAP_HEALTHY_PROGRESS;
            s.phase = BootstrapPhase::RestoringSession;
            s.health = health;
        });

        if self.tokens.token()?.is_some() {
            info!("bootstrap restoring stored session");
            if let Err(e) = self.session.fetch_current_user().await {
                warn!("session restore failed: {:#}", e);
            }
            if !self.is_mounted() {
                return Ok(());
            }
        } else {
            debug!("no stored token, skipping session restore");
        }

        self.update(|s| s.progress = 100);
        tokio::time::sleep(self.timings.ready_delay).await;
        self.update(|s| {
            s.initializing = false;
            s.phase = BootstrapPhase::Ready;
        });
        info!("bootstrap ready");
        Ok(())
    }

    /// Cosmetic progress while the health probe is outstanding, capped below the health gate.
    fn spawn_ticker(&self, token: CancellationToken) {
        let state = Arc::clone(&self.state);
        // `interval` panics on a zero period.
        let period = self.timings.tick_interval.max(MIN_TICK_INTERVAL);
        let step = self.timings.tick_step;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if token.is_cancelled() {
                            break;
                        }
                        state.send_modify(|s| {
                            if s.phase == BootstrapPhase::CheckingHealth {
                                s.progress = s
                                    .progress
                                    .saturating_add(step)
                                    .min(BOOTSTRAP_HEALTH_PROGRESS);
                            }
                        });
                    }
                }
            }
        });
    }
}

impl Drop for Bootstrapper {
    fn drop(&mut self) {
        self.mounted.cancel();
    }
}
