// Background job tracker — client-side projection of server-side jobs, kept fresh by polling.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::client::ApiClient;
use crate::config::{ClientConfig, JOB_POLL_INTERVAL};
use crate::error::ApiResult;

pub const JOBS_ENDPOINT: &str = "/jobs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// `completed` and `failed` end a job's lifecycle; nothing follows them.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    #[serde(default)]
    pub user_id: i64,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    /// Server-reported completion, 0..=100. Never computed locally.
    #[serde(default, deserialize_with = "deserialize_progress")]
    pub progress: u8,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Accepts integer or fractional percentages (and `null`), rounded and clamped to 0..=100.
fn deserialize_progress<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<f64>::deserialize(deserializer)?;
    Ok(raw
        .filter(|p| p.is_finite())
        .map(|p| p.clamp(0.0, 100.0).round() as u8)
        .unwrap_or(0))
}

impl Job {
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Field-wise partial update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub result: Option<Value>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    fn apply(self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(progress) = self.progress {
            job.progress = progress.min(100);
        }
        if let Some(message) = self.message {
            job.message = message;
        }
        if self.error.is_some() {
            job.error = self.error;
        }
        if self.result.is_some() {
            job.result = self.result;
        }
        if let Some(updated_at) = self.updated_at {
            job.updated_at = updated_at;
        }
    }
}

/// Where job state is read from. The server is the source of truth.
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn list_jobs(&self) -> ApiResult<Vec<Job>>;
    async fn get_job(&self, id: &str) -> ApiResult<Job>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JobList {
    Bare(Vec<Job>),
    Wrapped { jobs: Vec<Job> },
}

#[async_trait]
impl JobSource for ApiClient {
    async fn list_jobs(&self) -> ApiResult<Vec<Job>> {
        // Job state changes underneath us; never serve it from the cache.
        let list: JobList = self.get_fresh(JOBS_ENDPOINT).await?;
        Ok(match list {
            JobList::Bare(jobs) => jobs,
            JobList::Wrapped { jobs } => jobs,
        })
    }

    async fn get_job(&self, id: &str) -> ApiResult<Job> {
        self.get_fresh(&format!("{}/{}", JOBS_ENDPOINT, id)).await
    }
}

struct TrackerState {
    /// Full list in arrival order, terminal jobs included until dismissed.
    jobs: Vec<Job>,
    /// Ids removed by the user; late poll results for them are discarded.
    /// Pruned on `fetch_jobs` once the server stops listing an id and no
    /// poll chain for it is still alive.
    dismissed: HashSet<String>,
    /// Live poll chains per id (in flight or waiting for their next tick).
    chains: HashMap<String, usize>,
}

pub struct JobTracker {
    source: Arc<dyn JobSource>,
    state: Mutex<TrackerState>,
    poll_interval: Duration,
    shutdown_token: CancellationToken,
}

impl JobTracker {
    pub fn new(source: Arc<dyn JobSource>) -> Self {
        Self::with_poll_interval(source, JOB_POLL_INTERVAL)
    }

    pub fn from_config(source: Arc<dyn JobSource>, config: &ClientConfig) -> Self {
        Self::with_poll_interval(source, config.poll_interval())
    }

    pub fn with_poll_interval(source: Arc<dyn JobSource>, poll_interval: Duration) -> Self {
        Self {
            source,
            state: Mutex::new(TrackerState {
                jobs: Vec::new(),
                dismissed: HashSet::new(),
                chains: HashMap::new(),
            }),
            poll_interval,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.state.lock().jobs.clone()
    }

    /// Jobs not yet in a terminal state.
    pub fn active_jobs(&self) -> Vec<Job> {
        self.state
            .lock()
            .jobs
            .iter()
            .filter(|job| job.is_active())
            .cloned()
            .collect()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn job(&self, id: &str) -> Option<Job> {
        self.state.lock().jobs.iter().find(|job| job.id == id).cloned()
    }

    /// Track a job observed outside a list fetch. Re-admits a dismissed id.
    pub fn add_job(&self, job: Job) {
        let mut state = self.state.lock();
        state.dismissed.remove(&job.id);
        match state.jobs.iter_mut().find(|existing| existing.id == job.id) {
            Some(existing) => *existing = job,
            None => state.jobs.push(job),
        }
    }

    /// Apply a partial update to a tracked job. Returns `false` if it is not tracked.
    pub fn update_job(&self, id: &str, update: JobUpdate) -> bool {
        let mut state = self.state.lock();
        match state.jobs.iter_mut().find(|job| job.id == id) {
            Some(job) => {
                update.apply(job);
                true
            }
            None => false,
        }
    }

    /// Dismiss a job locally. The server is not told, and any in-flight poll
    /// for it will be discarded when it lands.
    pub fn remove_job(&self, id: &str) {
        let mut state = self.state.lock();
        state.jobs.retain(|job| job.id != id);
        state.dismissed.insert(id.to_string());
    }

    /// Replace local state with the server's job list (dismissed ids excluded).
    pub async fn fetch_jobs(&self) -> ApiResult<Vec<Job>> {
        let jobs = self.source.list_jobs().await?;
        let mut state = self.state.lock();
        let TrackerState {
            dismissed, chains, ..
        } = &mut *state;
        dismissed.retain(|id| chains.contains_key(id) || jobs.iter().any(|job| &job.id == id));
        let visible: Vec<Job> = jobs
            .into_iter()
            .filter(|job| !dismissed.contains(&job.id))
            .collect();
        info!(
            "fetched {} jobs ({} active)",
            visible.len(),
            visible.iter().filter(|job| job.is_active()).count()
        );
        state.jobs = visible.clone();
        Ok(visible)
    }

    /// Fetch one job, merge it, and schedule the next poll while it is still active.
    ///
    /// A failed poll is logged and ends that job's polling chain.
    pub async fn poll_job(self: &Arc<Self>, id: &str) {
        *self.state.lock().chains.entry(id.to_string()).or_insert(0) += 1;
        self.run_chain(id).await;
    }

    /// Start polling every currently active job.
    pub fn poll_active_jobs(self: &Arc<Self>) {
        for job in self.active_jobs() {
            let tracker = Arc::clone(self);
            tokio::spawn(async move { tracker.poll_job(&job.id).await });
        }
    }

    async fn run_chain(self: &Arc<Self>, id: &str) {
        if self.poll_once(id).await {
            self.schedule_poll(id.to_string());
        } else {
            self.end_chain(id);
        }
    }

    /// One request and merge. Returns `true` when another poll is due.
    async fn poll_once(&self, id: &str) -> bool {
        let dismissed = self.state.lock().dismissed.contains(id);
        if dismissed || self.shutdown_token.is_cancelled() {
            return false;
        }

        let job = match self.source.get_job(id).await {
            Ok(job) => job,
            Err(e) => {
                warn!("poll for job {} failed, polling stopped: {}", id, e);
                return false;
            }
        };

        if self.shutdown_token.is_cancelled() {
            return false;
        }

        let status = job.status;
        {
            let mut state = self.state.lock();
            if state.dismissed.contains(id) {
                debug!("discarding poll result for dismissed job {}", id);
                return false;
            }
            match state.jobs.iter_mut().find(|existing| existing.id == id) {
                Some(existing) => *existing = job,
                None => state.jobs.push(job),
            }
        }

        if status.is_terminal() {
            info!("job {} reached terminal status {:?}", id, status);
            return false;
        }

        debug!("job {} still {:?}, next poll in {:?}", id, status, self.poll_interval);
        true
    }

    fn end_chain(&self, id: &str) {
        let mut state = self.state.lock();
        if let Some(count) = state.chains.get_mut(id) {
            *count -= 1;
            if *count == 0 {
                state.chains.remove(id);
            }
        }
    }

    fn schedule_poll(self: &Arc<Self>, id: String) {
        let tracker = Arc::clone(self);
        let shutdown_token = self.shutdown_token.clone();
        let delay = self.poll_interval;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_token.cancelled() => {
                    debug!("scheduled poll for job {} cancelled", id);
                    tracker.end_chain(&id);
                    return;
                }
            }
            Self::chain_boxed(tracker, id).await;
        });
    }

    fn chain_boxed(tracker: Arc<Self>, id: String) -> BoxFuture<'static, ()> {
        async move { tracker.run_chain(&id).await }.boxed()
    }

    /// Stop every scheduled poll; in-flight requests finish but are discarded.
    ///
    /// Scheduled polls hold their own handle on the tracker, so dropping the
    /// caller's `Arc` does not stop them. This is the only way to.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }
}
