//! # Record Cache & Reconciler
//!
//! Per-workspace cache of schedulable content records with optimistic local
//! mutation and periodic authoritative reconciliation. The cache is the
//! single writer; UI layers read snapshots. Two code paths are kept deliberately
//! separate because their failure policies differ: optimistic mutations
//! (create rolls back, update/delete do not) and the reconciliation pass
//! (last-writer-wins replacement plus a diff step for one-time transition
//! notifications).

pub mod model;
pub mod validate;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use rand::Rng;
use tokio::time::{Duration as TokioDuration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::backend::{BackendClient, ConnectionStatus};
use crate::config::ReconcilerConfig;
use crate::error::BackendError;
use crate::notify::{Notification, NotificationSink};

pub use model::{Platform, Record, RecordStatus};
pub use validate::validate_for_publish;

/// Reconciling cache of the records belonging to one workspace at a time.
#[derive(Clone)]
pub struct ListReconciler {
    backend: Arc<BackendClient>,
    notifier: Arc<dyn NotificationSink>,
    config: ReconcilerConfig,
    state: Arc<Mutex<CacheState>>,
}

#[derive(Default)]
struct CacheState {
    workspace_id: Option<String>,
    records: Vec<Record>,
    connection: Option<ConnectionStatus>,
    loaded: bool,
    /// Record ids already notified for a terminal transition. Append-only for
    /// the lifetime of the process so repeated passes never re-alert.
    notified: HashSet<String>,
}

impl ListReconciler {
    pub fn new(
        backend: Arc<BackendClient>,
        notifier: Arc<dyn NotificationSink>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            backend,
            notifier,
            config,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    /// Loads the record list and connection summary for a workspace.
    ///
    /// Idempotent cache-warm guard: without `force`, a workspace that is
    /// already loaded is a no-op. Switching workspaces always replaces the
    /// cache. Overlapping calls are safe; the last completed fetch wins.
    #[instrument(skip(self))]
    pub async fn load(&self, workspace_id: &str, force: bool) -> Result<(), BackendError> {
        {
            let state = self.state.lock().unwrap();
            if !force && state.loaded && state.workspace_id.as_deref() == Some(workspace_id) {
                debug!(workspace_id, "record cache already warm");
                return Ok(());
            }
        }

        let records = self.backend.list_records(workspace_id).await?;
        // The connection summary is auxiliary; a failure here degrades the
        // view but must not fail the load.
        let connection = match self.backend.connection_status(workspace_id).await {
            Ok(summary) => Some(summary),
            Err(err) => {
                warn!(workspace_id, error = %err, "connection summary unavailable");
                None
            }
        };

        let mut state = self.state.lock().unwrap();
        state.workspace_id = Some(workspace_id.to_string());
        state.records = records;
        state.connection = connection;
        state.loaded = true;
        gauge!("record_cache_size_gauge").set(state.records.len() as f64);
        info!(
            workspace_id,
            records = state.records.len(),
            "record cache loaded"
        );
        Ok(())
    }

    /// Optimistically prepends a record and issues the remote create.
    ///
    /// On remote failure the optimistic entry is rolled back and a
    /// recoverable failure is reported through the sink.
    pub async fn add_record(&self, record: Record) {
        let optimistic_id = record.id.clone();
        {
            let mut state = self.state.lock().unwrap();
            state.records.insert(0, record.clone());
            gauge!("record_cache_size_gauge").set(state.records.len() as f64);
        }

        match self.backend.create_record(&record).await {
            Ok(created) => {
                let mut state = self.state.lock().unwrap();
                if let Some(entry) = state.records.iter_mut().find(|r| r.id == optimistic_id) {
                    *entry = created;
                }
            }
            Err(err) => {
                warn!(record_id = %optimistic_id, error = %err, "record create failed; rolling back");
                {
                    let mut state = self.state.lock().unwrap();
                    state.records.retain(|r| r.id != optimistic_id);
                    gauge!("record_cache_size_gauge").set(state.records.len() as f64);
                }
                counter!("record_mutation_failures_total", "op" => "create").increment(1);
                self.notifier.notify(
                    Notification::error(
                        "Post creation failed",
                        "The post could not be saved and was removed from your list.",
                    )
                    .with_related_id(optimistic_id),
                );
            }
        }
    }

    /// Batched create. Remote calls run in parallel; partial failure rolls
    /// back only the failed entries and the outcome is reported as an
    /// aggregate count, never as a total failure unless nothing succeeded.
    pub async fn add_records(&self, records: Vec<Record>) {
        if records.is_empty() {
            return;
        }
        let total = records.len();
        {
            let mut state = self.state.lock().unwrap();
            for record in records.iter().rev() {
                state.records.insert(0, record.clone());
            }
            gauge!("record_cache_size_gauge").set(state.records.len() as f64);
        }

        let mut handles = Vec::with_capacity(total);
        for record in records {
            let backend = Arc::clone(&self.backend);
            handles.push(tokio::spawn(async move {
                let outcome = backend.create_record(&record).await;
                (record.id, outcome)
            }));
        }

        let mut succeeded = 0usize;
        let mut failed_ids = Vec::new();
        for handle in handles {
            match handle.await {
                Ok((optimistic_id, Ok(created))) => {
                    succeeded += 1;
                    let mut state = self.state.lock().unwrap();
                    if let Some(entry) = state.records.iter_mut().find(|r| r.id == optimistic_id) {
                        *entry = created;
                    }
                }
                Ok((optimistic_id, Err(err))) => {
                    warn!(record_id = %optimistic_id, error = %err, "batched create failed");
                    failed_ids.push(optimistic_id);
                }
                Err(err) => {
                    error!(error = %err, "batched create task aborted");
                }
            }
        }

        if !failed_ids.is_empty() {
            let mut state = self.state.lock().unwrap();
            state.records.retain(|r| !failed_ids.contains(&r.id));
            gauge!("record_cache_size_gauge").set(state.records.len() as f64);
        }

        let notification = if succeeded == total {
            Notification::success("Posts added", format!("Added {total} posts."))
        } else if succeeded > 0 {
            Notification::warning(
                "Some posts failed",
                format!("Added {succeeded} of {total} posts; the rest were rolled back."),
            )
        } else {
            Notification::error("Posts not added", format!("All {total} posts failed to save."))
        };
        self.notifier.notify(notification);
    }

    /// Optimistically replaces the cached entry and issues the remote update.
    ///
    /// Deliberately no rollback on failure: reverting would flicker the UI,
    /// and the next reconciliation pass corrects any divergence.
    pub async fn update_record(&self, record: Record) {
        let record_id = record.id.clone();
        {
            let mut state = self.state.lock().unwrap();
            if let Some(entry) = state.records.iter_mut().find(|r| r.id == record_id) {
                *entry = record.clone();
            }
        }

        if let Err(err) = self.backend.update_record(&record).await {
            warn!(record_id = %record_id, error = %err, "record update failed");
            counter!("record_mutation_failures_total", "op" => "update").increment(1);
            self.notifier.notify(
                Notification::error(
                    "Post update failed",
                    "The change could not be saved and may revert on the next refresh.",
                )
                .with_related_id(record_id),
            );
        }
    }

    /// Optimistically removes the record and issues the remote delete.
    /// Same no-rollback policy as [`Self::update_record`].
    pub async fn delete_record(&self, record_id: &str) {
        {
            let mut state = self.state.lock().unwrap();
            state.records.retain(|r| r.id != record_id);
            gauge!("record_cache_size_gauge").set(state.records.len() as f64);
        }

        if let Err(err) = self.backend.delete_record(record_id).await {
            warn!(record_id, error = %err, "record delete failed");
            counter!("record_mutation_failures_total", "op" => "delete").increment(1);
            self.notifier.notify(
                Notification::error(
                    "Post deletion failed",
                    "The post could not be deleted remotely and may reappear on the next refresh.",
                )
                .with_related_id(record_id.to_string()),
            );
        }
    }

    /// Publishes a record to its target platforms.
    ///
    /// Validation runs before any remote call. Zero platform successes leave
    /// the record untouched; at least one success is treated as a completed
    /// lifecycle transition: the record is removed locally, per-platform
    /// failures are reported alongside the success, and the cache is
    /// force-reloaded to pick up authoritative state.
    #[instrument(skip(self, record), fields(record_id = %record.id))]
    pub async fn publish(&self, record: &Record) {
        if let Err(err) = validate_for_publish(record, Utc::now()) {
            counter!("publish_rejected_total").increment(1);
            self.notifier.notify(
                Notification::error("Cannot publish", err.to_string())
                    .with_related_id(record.id.clone()),
            );
            return;
        }

        let response = match self.backend.publish_record(&record.id).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "publish request failed");
                self.notifier.notify(
                    Notification::error(
                        "Publishing failed",
                        "The publish request did not reach the backend; the post was left untouched.",
                    )
                    .with_related_id(record.id.clone()),
                );
                return;
            }
        };

        let total = response.per_platform_results.len();
        let succeeded = response
            .per_platform_results
            .iter()
            .filter(|r| r.success)
            .count();

        if succeeded == 0 {
            counter!("publish_failed_total").increment(1);
            let platforms: Vec<&str> = response
                .per_platform_results
                .iter()
                .map(|r| r.platform.as_str())
                .collect();
            self.notifier.notify(
                Notification::error(
                    "Publishing failed",
                    format!("All platforms rejected the post: {}.", platforms.join(", ")),
                )
                .with_related_id(record.id.clone()),
            );
            return;
        }

        {
            let mut state = self.state.lock().unwrap();
            state.records.retain(|r| r.id != record.id);
            gauge!("record_cache_size_gauge").set(state.records.len() as f64);
        }
        counter!("publish_succeeded_total").increment(1);
        self.notifier.notify(
            Notification::success(
                "Post published",
                format!("Published to {succeeded}/{total} platforms."),
            )
            .with_related_id(record.id.clone()),
        );
        for failure in response.per_platform_results.iter().filter(|r| !r.success) {
            self.notifier.notify(
                Notification::warning(
                    format!("Publish failed on {}", failure.platform),
                    failure
                        .error
                        .clone()
                        .unwrap_or_else(|| "The platform rejected the post.".to_string()),
                )
                .with_related_id(record.id.clone()),
            );
        }

        let workspace_id = record.workspace_id.clone();
        if let Err(err) = self.load(&workspace_id, true).await {
            warn!(workspace_id, error = %err, "post-publish reload failed");
        }
    }

    /// One reconciliation pass: fetch the authoritative list, diff it against
    /// the cache for externally driven terminal transitions, then replace the
    /// cache wholesale (last writer wins; optimistic edits since the previous
    /// pass are discarded in favor of authoritative state).
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<(), BackendError> {
        let Some(workspace_id) = self.state.lock().unwrap().workspace_id.clone() else {
            return Ok(());
        };

        let fresh = self.backend.list_records(&workspace_id).await?;
        counter!("reconcile_passes_total").increment(1);

        let notifications = {
            let mut guard = self.state.lock().unwrap();
            // The workspace may have switched while the fetch was in flight;
            // a stale refresh must not clobber the new workspace's cache.
            if guard.workspace_id.as_deref() != Some(workspace_id.as_str()) {
                debug!(workspace_id, "discarding stale reconciliation fetch");
                return Ok(());
            }
            let state = &mut *guard;
            let notifications = diff_transitions(&state.records, &fresh, &mut state.notified);
            state.records = fresh;
            gauge!("record_cache_size_gauge").set(state.records.len() as f64);
            notifications
        };

        for notification in notifications {
            self.notifier.notify(notification);
        }
        Ok(())
    }

    /// Runs periodic reconciliation until the shutdown token fires. Each tick
    /// gets a fresh jitter so fleets of engines do not refresh in lockstep.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_seconds = self.config.interval_seconds,
            "Starting record reconciler"
        );

        loop {
            let delay = TokioDuration::from_secs(
                self.config.interval_seconds + sample_jitter_seconds(&self.config),
            );
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Record reconciler shutdown requested");
                    break;
                }
                _ = sleep(delay) => {
                    let started = Instant::now();
                    if let Err(err) = self.reconcile().await {
                        error!(error = %err, retryable = err.is_retryable(), "Reconciliation pass failed");
                    }
                    histogram!("reconcile_pass_duration_ms")
                        .record(started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Record reconciler stopped");
    }

    /// Copies a completed generation result onto the matching cached record.
    /// Local-only; the authoritative copy is updated by whoever owns the
    /// record's persistence upstream.
    pub fn attach_result_url(&self, record_id: &str, url: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state.records.iter_mut().find(|r| r.id == record_id) {
            record.media_url = Some(url.to_string());
            record.updated_at = Utc::now();
            debug!(record_id, "attached generation result to record");
        }
    }

    /// Snapshot of the current cache, newest first as maintained.
    pub fn records(&self) -> Vec<Record> {
        self.state.lock().unwrap().records.clone()
    }

    pub fn connection_status(&self) -> Option<ConnectionStatus> {
        self.state.lock().unwrap().connection.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().unwrap().loaded
    }

    pub fn workspace_id(&self) -> Option<String> {
        self.state.lock().unwrap().workspace_id.clone()
    }
}

/// Diffs the cached list against a fresh authoritative list and produces the
/// one-time transition notifications.
///
/// A cached `scheduled` record that is absent from the fresh list is inferred
/// to have been published externally; one whose fresh counterpart is `failed`
/// carries the failure detail forward. Ids already in `notified` are skipped
/// and every emitted id is recorded there.
fn diff_transitions(
    cached: &[Record],
    fresh: &[Record],
    notified: &mut HashSet<String>,
) -> Vec<Notification> {
    let fresh_by_id: HashMap<&str, &Record> =
        fresh.iter().map(|r| (r.id.as_str(), r)).collect();

    let mut notifications = Vec::new();
    for record in cached
        .iter()
        .filter(|r| r.status == RecordStatus::Scheduled)
    {
        match fresh_by_id.get(record.id.as_str()) {
            None => {
                if notified.insert(record.id.clone()) {
                    counter!("reconcile_transitions_total", "kind" => "published").increment(1);
                    notifications.push(
                        Notification::success("Post published", "Your scheduled post went live.")
                            .with_related_id(record.id.clone()),
                    );
                }
            }
            Some(current) if current.status == RecordStatus::Failed => {
                if notified.insert(record.id.clone()) {
                    counter!("reconcile_transitions_total", "kind" => "failed").increment(1);
                    notifications.push(
                        Notification::error(
                            "Scheduled post failed",
                            current
                                .error
                                .clone()
                                .unwrap_or_else(|| "The post could not be published.".to_string()),
                        )
                        .with_related_id(record.id.clone()),
                    );
                }
            }
            Some(_) => {}
        }
    }
    notifications
}

fn sample_jitter_seconds(config: &ReconcilerConfig) -> u64 {
    let mut rng = rand::thread_rng();
    compute_jitter_seconds(config, &mut rng)
}

fn compute_jitter_seconds<R: Rng + ?Sized>(config: &ReconcilerConfig, rng: &mut R) -> u64 {
    let max = config.jitter_pct_max.max(0.0);
    if max == 0.0 {
        return 0;
    }
    let jitter_pct = rng.gen_range(0.0..=max);
    (config.interval_seconds as f64 * jitter_pct).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduled(id: &str) -> Record {
        let mut record = Record::draft("ws-1", "content", vec![Platform::Twitter]);
        record.id = id.to_string();
        record.status = RecordStatus::Scheduled;
        record
    }

    #[test]
    fn disappearance_of_a_scheduled_record_reads_as_published() {
        let mut notified = HashSet::new();
        let cached = vec![scheduled("p1")];

        let notifications = diff_transitions(&cached, &[], &mut notified);
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].related_id.as_deref(), Some("p1"));
        assert_eq!(notifications[0].title, "Post published");
        assert!(notified.contains("p1"));
    }

    #[test]
    fn failed_counterpart_carries_the_backend_detail() {
        let mut notified = HashSet::new();
        let cached = vec![scheduled("p1")];
        let mut failed = scheduled("p1");
        failed.status = RecordStatus::Failed;
        failed.error = Some("token expired".to_string());

        let notifications = diff_transitions(&cached, &[failed], &mut notified);
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].message, "token expired");
    }

    #[test]
    fn notified_ids_never_fire_twice() {
        let mut notified = HashSet::new();
        let cached = vec![scheduled("p1")];

        assert_eq!(diff_transitions(&cached, &[], &mut notified).len(), 1);
        // A synthetic record with the same id reappearing and disappearing
        // again must stay silent.
        assert_eq!(diff_transitions(&cached, &[], &mut notified).len(), 0);
    }

    #[test]
    fn non_scheduled_records_are_ignored_by_the_diff() {
        let mut notified = HashSet::new();
        let mut draft = scheduled("p2");
        draft.status = RecordStatus::Draft;

        let notifications = diff_transitions(&[draft], &[], &mut notified);
        assert!(notifications.is_empty());
        assert!(notified.is_empty());
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = ReconcilerConfig {
            interval_seconds: 900,
            jitter_pct_max: 0.1,
        };
        let mut rng = rand::rngs::mock::StepRng::new(0, 1);
        for _ in 0..50 {
            let jitter = compute_jitter_seconds(&config, &mut rng);
            assert!(jitter <= 90);
        }
    }

    #[test]
    fn jitter_zero_when_bound_zero() {
        let config = ReconcilerConfig {
            interval_seconds: 900,
            jitter_pct_max: 0.0,
        };
        let mut rng = rand::rngs::mock::StepRng::new(0, 1);
        assert_eq!(compute_jitter_seconds(&config, &mut rng), 0);
    }
}
