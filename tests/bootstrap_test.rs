use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use cloudstore_client::auth::token::{MemoryTokenStore, TokenStore};
use cloudstore_client::bootstrap::health::{
    HealthCheck, HealthFailure, HealthState, HealthStatus,
};
use cloudstore_client::bootstrap::sequencer::{
    BootstrapPhase, BootstrapTimings, Bootstrapper, SessionRestorer,
    BOOTSTRAP_FAILED_MESSAGE,
};

/// Answers health probes from a script; the last answer repeats.
struct FakeHealth {
    answers: Mutex<VecDeque<HealthStatus>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl FakeHealth {
    fn new(answers: Vec<HealthStatus>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into()),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    fn healthy() -> Arc<Self> {
        Self::new(vec![HealthStatus::healthy(None, None)], Duration::ZERO)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthCheck for FakeHealth {
    async fn check_health(&self, _timeout: Duration) -> HealthStatus {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut answers = self.answers.lock();
        if answers.len() > 1 {
            answers.pop_front().unwrap()
        } else {
            answers.front().cloned().unwrap()
        }
    }
}

#[derive(Clone, Copy)]
enum SessionBehaviour {
    Succeed,
    Fail,
    Panic,
}

struct FakeSession {
    behaviour: SessionBehaviour,
    delay: Duration,
    calls: AtomicUsize,
}

impl FakeSession {
    fn new(behaviour: SessionBehaviour, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionRestorer for FakeSession {
    async fn fetch_current_user(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.behaviour {
            SessionBehaviour::Succeed => Ok(()),
            SessionBehaviour::Fail => Err(anyhow!("401 Unauthorized")),
            SessionBehaviour::Panic => panic!("user store exploded"),
        }
    }
}

struct BrokenTokenStore;

impl TokenStore for BrokenTokenStore {
    fn token(&self) -> Result<Option<String>> {
        Err(anyhow!("storage unavailable"))
    }

    fn set_token(&self, _token: &str) -> Result<()> {
        Ok(())
    }

    fn clear_token(&self) -> Result<()> {
        Ok(())
    }
}

fn unhealthy() -> HealthStatus {
    HealthStatus::unhealthy(HealthFailure::Reported, "Service reported status 'unhealthy'")
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_halts_at_health_gate() {
    let session = FakeSession::new(SessionBehaviour::Succeed, Duration::ZERO);
    let boot = Bootstrapper::new(
        FakeHealth::new(vec![unhealthy()], Duration::ZERO),
        session.clone(),
        Arc::new(MemoryTokenStore::with_token("t")),
    );

    let state = boot.start().await;

    assert_eq!(state.progress, 30);
    assert_eq!(state.phase, BootstrapPhase::Unhealthy);
    assert_eq!(state.health.status, HealthState::Unhealthy);
    assert!(state.initializing);
    assert!(state.can_retry());
    assert!(!state.is_ready());
    assert_eq!(session.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_healthy_without_token_skips_session() {
    let session = FakeSession::new(SessionBehaviour::Succeed, Duration::ZERO);
    let boot = Bootstrapper::new(
        FakeHealth::healthy(),
        session.clone(),
        Arc::new(MemoryTokenStore::new()),
    );

    let state = boot.start().await;

    assert_eq!(state.progress, 100);
    assert!(state.is_ready());
    assert!(!state.initializing);
    assert_eq!(session.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_ready_waits_for_session_restore() {
    let session = FakeSession::new(SessionBehaviour::Succeed, Duration::from_secs(1));
    let boot = Arc::new(Bootstrapper::new(
        FakeHealth::healthy(),
        session.clone(),
        Arc::new(MemoryTokenStore::with_token("t")),
    ));
    let rx = boot.subscribe();

    let runner = boot.clone();
    let handle = tokio::spawn(async move { runner.start().await });

    tokio::time::sleep(Duration::from_millis(500)).await;
    {
        let state = rx.borrow();
        assert_eq!(state.phase, BootstrapPhase::RestoringSession);
        assert_eq!(state.progress, 50);
        assert!(state.initializing);
    }

    let state = handle.await.unwrap();
    assert!(state.is_ready());
    assert_eq!(state.progress, 100);
    assert_eq!(session.calls(), 1);
    assert!(rx.borrow().is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_failed_session_restore_still_finishes() {
    let session = FakeSession::new(SessionBehaviour::Fail, Duration::ZERO);
    let boot = Bootstrapper::new(
        FakeHealth::healthy(),
        session.clone(),
        Arc::new(MemoryTokenStore::with_token("expired")),
    );

    let state = boot.start().await;

    assert!(state.is_ready());
    assert_eq!(session.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_unhealthy() {
    let health = FakeHealth::new(
        vec![unhealthy(), HealthStatus::healthy(None, None)],
        Duration::ZERO,
    );
    let boot = Bootstrapper::new(
        health.clone(),
        FakeSession::new(SessionBehaviour::Succeed, Duration::ZERO),
        Arc::new(MemoryTokenStore::new()),
    );

    assert!(boot.start().await.can_retry());
    let state = boot.retry().await;

    assert!(state.is_ready());
    assert_eq!(health.calls(), 2);
    assert_eq!(state.health.status, HealthState::Healthy);
}

#[tokio::test(start_paused = true)]
async fn test_progress_ticks_are_capped_while_probing() {
    let boot = Arc::new(Bootstrapper::new(
        FakeHealth::new(vec![HealthStatus::healthy(None, None)], Duration::from_secs(3)),
        FakeSession::new(SessionBehaviour::Succeed, Duration::ZERO),
        Arc::new(MemoryTokenStore::new()),
    ));
    let rx = boot.subscribe();

    let runner = boot.clone();
    let handle = tokio::spawn(async move { runner.start().await });

    tokio::time::sleep(Duration::from_millis(250)).await;
    let early = rx.borrow().progress;
    assert!(early > 0 && early < 30, "progress {}", early);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(rx.borrow().progress, 30);
    assert_eq!(rx.borrow().phase, BootstrapPhase::CheckingHealth);

    assert!(handle.await.unwrap().is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_unmount_discards_late_results() {
    let boot = Arc::new(Bootstrapper::new(
        FakeHealth::new(vec![HealthStatus::healthy(None, None)], Duration::from_secs(1)),
        FakeSession::new(SessionBehaviour::Succeed, Duration::ZERO),
        Arc::new(MemoryTokenStore::new()),
    ));
    let rx = boot.subscribe();

    let runner = boot.clone();
    let handle = tokio::spawn(async move { runner.start().await });

    tokio::time::sleep(Duration::from_millis(150)).await;
    boot.unmount();
    let frozen = rx.borrow().clone();

    tokio::time::sleep(Duration::from_secs(5)).await;
    handle.await.unwrap();

    let after = rx.borrow().clone();
    assert_eq!(after, frozen);
    assert_eq!(after.phase, BootstrapPhase::CheckingHealth);
    assert!(after.initializing);
    assert!(!boot.is_mounted());
}

#[tokio::test(start_paused = true)]
async fn test_panicking_collaborator_becomes_unhealthy() {
    let boot = Bootstrapper::new(
        FakeHealth::healthy(),
        FakeSession::new(SessionBehaviour::Panic, Duration::ZERO),
        Arc::new(MemoryTokenStore::with_token("t")),
    );

    let state = boot.start().await;

    assert_eq!(state.phase, BootstrapPhase::Unhealthy);
    assert_eq!(state.health.failure, Some(HealthFailure::Internal));
    assert_eq!(state.health.error.as_deref(), Some(BOOTSTRAP_FAILED_MESSAGE));
    assert!(state.can_retry());
    assert!(state.progress <= 30);
}

#[tokio::test(start_paused = true)]
async fn test_token_store_failure_becomes_unhealthy() {
    let boot = Bootstrapper::new(
        FakeHealth::healthy(),
        FakeSession::new(SessionBehaviour::Succeed, Duration::ZERO),
        Arc::new(BrokenTokenStore),
    );

    let state = boot.start().await;

    assert_eq!(state.phase, BootstrapPhase::Unhealthy);
    assert_eq!(state.health.error.as_deref(), Some(BOOTSTRAP_FAILED_MESSAGE));
}

#[tokio::test(start_paused = true)]
async fn test_zero_tick_interval_still_completes() {
    let boot = Arc::new(
        Bootstrapper::new(
            FakeHealth::new(vec![HealthStatus::healthy(None, None)], Duration::from_millis(200)),
            FakeSession::new(SessionBehaviour::Succeed, Duration::ZERO),
            Arc::new(MemoryTokenStore::new()),
        )
        .with_timings(BootstrapTimings {
            tick_interval: Duration::ZERO,
            ..BootstrapTimings::default()
        }),
    );
    let rx = boot.subscribe();

    let runner = boot.clone();
    let handle = tokio::spawn(async move { runner.start().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(rx.borrow().progress, 30);

    assert!(handle.await.unwrap().is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_no_tick_lands_after_unmount() {
    let boot = Arc::new(
        Bootstrapper::new(
            FakeHealth::new(vec![HealthStatus::healthy(None, None)], Duration::from_secs(1)),
            FakeSession::new(SessionBehaviour::Succeed, Duration::ZERO),
            Arc::new(MemoryTokenStore::new()),
        )
        .with_timings(BootstrapTimings {
            tick_interval: Duration::from_millis(10),
            tick_step: 1,
            ..BootstrapTimings::default()
        }),
    );
    let rx = boot.subscribe();

    let runner = boot.clone();
    let handle = tokio::spawn(async move { runner.start().await });

    // Unmount exactly on a tick boundary.
    tokio::time::sleep(Duration::from_millis(100)).await;
    boot.unmount();
    let frozen = rx.borrow().progress;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(rx.borrow().progress, frozen);
    handle.await.unwrap();
}
