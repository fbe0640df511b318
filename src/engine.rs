//! # Engine Composition
//!
//! Wires the backend client, job tracker, and record reconciler together and
//! owns the background-loop lifecycle. Every recurring timer registered here
//! has a matching cancellation path on shutdown.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::BackendClient;
use crate::config::AppConfig;
use crate::error::BackendError;
use crate::jobs::{Job, JobCompletionHandler, JobTracker};
use crate::notify::NotificationSink;
use crate::records::ListReconciler;

/// Copies a completed job's result URL onto the record it belongs to.
/// Plain value hand-off; the tracker and the reconciler share no state.
struct MediaHandoff {
    reconciler: ListReconciler,
}

#[async_trait]
impl JobCompletionHandler for MediaHandoff {
    async fn job_completed(&self, job: &Job) {
        if let (Some(record_id), Some(url)) = (&job.metadata.record_id, &job.result_url) {
            self.reconciler.attach_result_url(record_id, url);
        }
    }
}

/// The assembled sync engine.
pub struct Engine {
    pub tracker: JobTracker,
    pub reconciler: ListReconciler,
    shutdown: CancellationToken,
}

impl Engine {
    /// Builds the engine from configuration and a notification sink.
    pub fn new(
        config: &AppConfig,
        notifier: Arc<dyn NotificationSink>,
    ) -> Result<Self, BackendError> {
        let backend = Arc::new(BackendClient::new(&config.backend)?);
        let reconciler = ListReconciler::new(
            Arc::clone(&backend),
            Arc::clone(&notifier),
            config.reconciler.clone(),
        );
        let tracker = JobTracker::new(backend, notifier).with_completion_handler(Arc::new(
            MediaHandoff {
                reconciler: reconciler.clone(),
            },
        ));

        Ok(Self {
            tracker,
            reconciler,
            shutdown: CancellationToken::new(),
        })
    }

    /// Token cancelled when [`Self::stop`] runs; loops spawned by
    /// [`Self::run`] observe it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Loads the configured workspace and runs the reconciliation loop until
    /// the shutdown token fires, then tears down every job watcher.
    pub async fn run(&self, config: &AppConfig) -> Result<(), BackendError> {
        if let Some(workspace_id) = &config.workspace_id {
            if let Err(err) = self.reconciler.load(workspace_id, false).await {
                // A cold start against an unreachable backend is recoverable;
                // the reconcile loop keeps retrying on its own cadence.
                warn!(workspace_id, error = %err, "initial workspace load failed");
            }
        } else {
            info!("no workspace configured; reconciler idle until one is loaded");
        }

        let loop_handle = tokio::spawn(
            self.reconciler
                .clone()
                .run(self.shutdown.child_token()),
        );

        self.shutdown.cancelled().await;
        self.tracker.shutdown();
        let _ = loop_handle.await;
        info!("engine stopped");
        Ok(())
    }

    /// Requests shutdown of everything [`Self::run`] started.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

/// Runs the engine until ctrl-c.
pub async fn run_until_interrupted(
    config: AppConfig,
    notifier: Arc<dyn NotificationSink>,
) -> Result<(), BackendError> {
    let engine = Engine::new(&config, notifier)?;

    let interrupt = engine.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; shutting down");
            interrupt.cancel();
        }
    });

    engine.run(&config).await
}
