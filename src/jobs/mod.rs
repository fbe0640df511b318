//! # Job Tracker
//!
//! Registry of in-flight external video-generation jobs. Each tracked job is
//! driven by its own watcher task polling the backend at the provider's fixed
//! cadence, with one immediate out-of-band poll at registration so the first
//! status appears without waiting a full tick. A job reaches a terminal state
//! at most once; its watcher is cancelled at that point and never
//! rescheduled. A stall or failure in one job's polling never blocks or
//! cancels another's.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::backend::BackendClient;
use crate::notify::{Notification, NotificationSink};
use crate::providers::{JobStatus, Provider};

/// Error message for the hard polling deadline.
pub const TIMEOUT_ERROR: &str = "Generation timed out";
/// Error message when a completed job's result cannot be materialized.
const UNFETCHABLE_ERROR: &str = "The finished clip could not be retrieved";
/// Fallback when the provider reports failure without a message.
const GENERIC_FAILURE: &str = "Generation failed";

/// Caller-supplied context carried on a job for the duration of tracking.
#[derive(Debug, Clone, Default)]
pub struct JobMetadata {
    /// Record the generated clip belongs to, if any; drives the completion
    /// hand-off into the record cache.
    pub record_id: Option<String>,
    pub title: Option<String>,
}

/// A tracked generation job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub provider: Provider,
    pub status: JobStatus,
    /// Advisory percentage; provider-reported, not enforced monotonic.
    pub progress: u8,
    pub result_url: Option<String>,
    pub error: Option<String>,
    pub poll_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub metadata: JobMetadata,
}

/// Receives each job exactly once when it completes successfully.
#[async_trait]
pub trait JobCompletionHandler: Send + Sync {
    async fn job_completed(&self, job: &Job);
}

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("job '{id}' is already being tracked")]
    AlreadyActive { id: String },
}

enum PollOutcome {
    Continue,
    Stop,
}

/// Tracks zero or more concurrently active generation jobs.
#[derive(Clone)]
pub struct JobTracker {
    backend: Arc<BackendClient>,
    notifier: Arc<dyn NotificationSink>,
    completion: Option<Arc<dyn JobCompletionHandler>>,
    state: Arc<Mutex<TrackerState>>,
    shutdown: CancellationToken,
    max_attempts_override: Option<u32>,
}

#[derive(Default)]
struct TrackerState {
    jobs: HashMap<String, Job>,
    watchers: HashMap<String, CancellationToken>,
    /// Jobs whose one-shot result fetch has been issued.
    fetching: HashSet<String>,
}

impl JobTracker {
    pub fn new(backend: Arc<BackendClient>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            backend,
            notifier,
            completion: None,
            state: Arc::new(Mutex::new(TrackerState::default())),
            shutdown: CancellationToken::new(),
            max_attempts_override: None,
        }
    }

    /// Registers the hand-off invoked once per successfully completed job.
    pub fn with_completion_handler(mut self, handler: Arc<dyn JobCompletionHandler>) -> Self {
        self.completion = Some(handler);
        self
    }

    /// Override the provider attempt ceiling (primarily for tests).
    #[allow(dead_code)]
    pub fn with_max_poll_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts_override = Some(max_attempts);
        self
    }

    /// Begins tracking a provider job.
    ///
    /// Registers the job in its provider's initial status, spawns the watcher
    /// at the provider's fixed cadence, and issues an immediate poll before
    /// the first tick. A job id that is already actively tracked is rejected;
    /// a terminal leftover under the same id is replaced.
    #[instrument(skip_all, fields(provider = provider.slug()))]
    pub fn start_tracking<S: Into<String>>(
        &self,
        job_id: S,
        provider: Provider,
        metadata: JobMetadata,
    ) -> Result<(), TrackError> {
        let job_id = job_id.into();
        let token = {
            let mut state = self.state.lock().unwrap();
            if state
                .jobs
                .get(&job_id)
                .is_some_and(|job| job.status.is_active())
            {
                return Err(TrackError::AlreadyActive { id: job_id });
            }

            let job = Job {
                id: job_id.clone(),
                provider,
                status: provider.initial_status(),
                progress: 0,
                result_url: None,
                error: None,
                poll_attempts: 0,
                created_at: Utc::now(),
                metadata,
            };
            let token = self.shutdown.child_token();
            state.jobs.insert(job_id.clone(), job);
            state.fetching.remove(&job_id);
            if let Some(previous) = state.watchers.insert(job_id.clone(), token.clone()) {
                previous.cancel();
            }
            set_active_gauge(&state);
            token
        };

        counter!("jobs_tracked_total", "provider" => provider.slug()).increment(1);
        info!(job_id = %job_id, "tracking generation job");

        let tracker = self.clone();
        let id = job_id;
        tokio::spawn(async move {
            tracker.watch(id, provider, token).await;
        });
        Ok(())
    }

    /// Per-job watcher: one immediate poll, then the provider cadence until a
    /// terminal transition or cancellation.
    async fn watch(&self, job_id: String, provider: Provider, token: CancellationToken) {
        if matches!(self.poll(&job_id, provider).await, PollOutcome::Stop) {
            return;
        }
        let interval = provider.poll_interval();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = sleep(interval) => {
                    if matches!(self.poll(&job_id, provider).await, PollOutcome::Stop) {
                        break;
                    }
                }
            }
        }
    }

    /// One poll cycle for a job.
    ///
    /// Transport failures are skipped silently and retried on the next tick.
    /// The attempt ceiling is a hard deadline: exceeding it converts the job
    /// to `failed` deterministically. Responses for jobs that were removed or
    /// timed out while the request was in flight are ignored.
    async fn poll(&self, job_id: &str, provider: Provider) -> PollOutcome {
        let deadline_exceeded = {
            let mut state = self.state.lock().unwrap();
            let Some(job) = state.jobs.get_mut(job_id) else {
                return PollOutcome::Stop;
            };
            if job.status.is_terminal() {
                return PollOutcome::Stop;
            }
            job.poll_attempts += 1;
            if job.poll_attempts > self.max_poll_attempts(provider) {
                job.poll_attempts = 0;
                true
            } else {
                false
            }
        };
        if deadline_exceeded {
            counter!("job_deadline_exceeded_total", "provider" => provider.slug()).increment(1);
            self.finish_job(job_id, JobStatus::Failed, None, Some(TIMEOUT_ERROR.to_string()))
                .await;
            return PollOutcome::Stop;
        }

        counter!("job_polls_total", "provider" => provider.slug()).increment(1);
        let response = match self.backend.job_status(provider, job_id).await {
            Ok(response) => response,
            Err(err) => {
                debug!(job_id, error = %err, "status poll failed; retrying on next tick");
                counter!("job_poll_errors_total", "provider" => provider.slug()).increment(1);
                return PollOutcome::Continue;
            }
        };

        let status = match provider.normalize_status(&response.status) {
            Ok(status) => status,
            Err(err) => {
                warn!(job_id, error = %err, "skipping poll with unrecognized status");
                return PollOutcome::Continue;
            }
        };

        match status {
            JobStatus::Completed => {
                {
                    let mut state = self.state.lock().unwrap();
                    let Some(job) = state.jobs.get(job_id) else {
                        return PollOutcome::Stop;
                    };
                    if job.status.is_terminal() {
                        return PollOutcome::Stop;
                    }
                    // One-shot result fetch, no matter how many stale polls
                    // observe `completed`.
                    if !state.fetching.insert(job_id.to_string()) {
                        return PollOutcome::Stop;
                    }
                }
                match self.backend.fetch_result(provider, job_id).await {
                    Ok(result) => {
                        self.finish_job(
                            job_id,
                            JobStatus::Completed,
                            Some(result.result_url),
                            None,
                        )
                        .await;
                    }
                    Err(err) => {
                        // A completed-but-unfetchable job is failed, not retried.
                        warn!(job_id, error = %err, "result fetch for completed job failed");
                        self.finish_job(
                            job_id,
                            JobStatus::Failed,
                            None,
                            Some(UNFETCHABLE_ERROR.to_string()),
                        )
                        .await;
                    }
                }
                PollOutcome::Stop
            }
            JobStatus::Failed => {
                let error = response
                    .error
                    .unwrap_or_else(|| GENERIC_FAILURE.to_string());
                self.finish_job(job_id, JobStatus::Failed, None, Some(error))
                    .await;
                PollOutcome::Stop
            }
            active => {
                let mut state = self.state.lock().unwrap();
                if let Some(job) = state.jobs.get_mut(job_id)
                    && job.status.is_active()
                {
                    job.status = active;
                    if let Some(progress) = response.progress {
                        job.progress = progress;
                    }
                }
                PollOutcome::Continue
            }
        }
    }

    /// Applies the terminal transition for a job, exactly once: updates the
    /// registry entry, cancels the watcher, notifies, and runs the completion
    /// hand-off for successes.
    async fn finish_job(
        &self,
        job_id: &str,
        status: JobStatus,
        result_url: Option<String>,
        error: Option<String>,
    ) {
        debug_assert!(status.is_terminal());
        let finished = {
            let mut state = self.state.lock().unwrap();
            let Some(job) = state.jobs.get_mut(job_id) else {
                return;
            };
            if job.status.is_terminal() {
                return;
            }
            job.status = status;
            job.result_url = result_url;
            job.error = error;
            if status == JobStatus::Completed {
                job.progress = 100;
            }
            let snapshot = job.clone();
            if let Some(token) = state.watchers.remove(job_id) {
                token.cancel();
            }
            set_active_gauge(&state);
            snapshot
        };

        if finished.status == JobStatus::Completed {
            counter!("jobs_completed_total", "provider" => finished.provider.slug()).increment(1);
            info!(job_id, provider = finished.provider.slug(), "generation job completed");
            self.notifier.notify(
                Notification::success("Video ready", "Your clip has finished rendering.")
                    .with_related_id(finished.id.clone()),
            );
            if let Some(handler) = &self.completion {
                handler.job_completed(&finished).await;
            }
        } else {
            counter!("jobs_failed_total", "provider" => finished.provider.slug()).increment(1);
            let detail = finished
                .error
                .clone()
                .unwrap_or_else(|| GENERIC_FAILURE.to_string());
            warn!(job_id, provider = finished.provider.slug(), error = %detail, "generation job failed");
            self.notifier.notify(
                Notification::error("Video generation failed", detail)
                    .with_related_id(finished.id.clone()),
            );
        }
    }

    /// Current view of a tracked job.
    pub fn job_status(&self, job_id: &str) -> Option<Job> {
        self.state.lock().unwrap().jobs.get(job_id).cloned()
    }

    /// Jobs still being polled, oldest first.
    pub fn active_jobs(&self) -> Vec<Job> {
        let state = self.state.lock().unwrap();
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| job.status.is_active())
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    /// Jobs that reached a terminal state and have not been cleared yet.
    pub fn completed_jobs(&self) -> Vec<Job> {
        let state = self.state.lock().unwrap();
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| job.status.is_terminal())
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    pub fn is_any_job_processing(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .jobs
            .values()
            .any(|job| job.status.is_active())
    }

    /// Removes a terminal job from the registry once the UI has consumed it.
    /// Idempotent; active jobs are left alone.
    pub fn clear_completed_job(&self, job_id: &str) {
        let mut state = self.state.lock().unwrap();
        let is_terminal = state
            .jobs
            .get(job_id)
            .is_some_and(|job| job.status.is_terminal());
        if is_terminal {
            state.jobs.remove(job_id);
            state.fetching.remove(job_id);
            debug!(job_id, "cleared completed job");
        }
    }

    /// Cancels every watcher. The cancellation contract on teardown: no
    /// registered interval survives this call.
    pub fn shutdown(&self) {
        info!("Shutting down job tracker");
        self.shutdown.cancel();
        let mut state = self.state.lock().unwrap();
        for (job_id, token) in state.watchers.drain() {
            debug!(job_id, "cancelling job watcher");
            token.cancel();
        }
        set_active_gauge(&state);
    }

    fn max_poll_attempts(&self, provider: Provider) -> u32 {
        self.max_attempts_override
            .unwrap_or_else(|| provider.max_poll_attempts())
    }
}

fn set_active_gauge(state: &TrackerState) {
    let active = state
        .jobs
        .values()
        .filter(|job| job.status.is_active())
        .count();
    gauge!("active_jobs_gauge").set(active as f64);
}
