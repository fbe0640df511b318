//! Generation provider registry
//!
//! The two external video-generation backends, their polling cadence, and the
//! mapping from each provider's native status vocabulary to the shared
//! [`JobStatus`] enumeration. Native statuses are validated here, at the
//! boundary; nothing downstream inspects raw provider strings.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Normalized status of a tracked generation job.
///
/// Superset across both providers; each provider only ever produces a subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Processing,
    Pending,
    Completed,
    Failed,
}

impl JobStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::InProgress => "in_progress",
            JobStatus::Processing => "processing",
            JobStatus::Pending => "pending",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// A job in a terminal state never transitions again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub const fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The external generation backends.
///
/// `Avatar` renders presenter clips and reports quickly; `Scene` renders full
/// cinematic clips on a slower cadence. Both ceilings amount to the same
/// eight-minute hard deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Avatar,
    Scene,
}

pub const ALL_PROVIDERS: &[Provider] = &[Provider::Avatar, Provider::Scene];

impl Provider {
    /// Canonical slug used in backend URLs and log fields.
    pub const fn slug(self) -> &'static str {
        match self {
            Provider::Avatar => "avatar",
            Provider::Scene => "scene",
        }
    }

    /// Fixed polling cadence for jobs on this provider.
    pub const fn poll_interval(self) -> Duration {
        match self {
            Provider::Avatar => Duration::from_secs(5),
            Provider::Scene => Duration::from_secs(10),
        }
    }

    /// Poll-attempt ceiling; exceeding it converts the job to a deterministic
    /// timeout failure.
    pub const fn max_poll_attempts(self) -> u32 {
        match self {
            Provider::Avatar => 96,
            Provider::Scene => 48,
        }
    }

    /// Status a freshly registered job starts in, before the first poll.
    pub const fn initial_status(self) -> JobStatus {
        match self {
            Provider::Avatar => JobStatus::Pending,
            Provider::Scene => JobStatus::Queued,
        }
    }

    /// Maps a provider-native status string onto the shared enumeration.
    ///
    /// Unrecognized strings are a malformed-response condition, not a job
    /// state; callers skip the poll and retry on the next tick.
    pub fn normalize_status(self, raw: &str) -> Result<JobStatus, NormalizeError> {
        let normalized = match (self, raw) {
            (Provider::Avatar, "pending") => JobStatus::Pending,
            (Provider::Avatar, "waiting") => JobStatus::Queued,
            (Provider::Avatar, "processing") => JobStatus::Processing,
            (Provider::Avatar, "completed") => JobStatus::Completed,
            (Provider::Avatar, "failed" | "error") => JobStatus::Failed,
            (Provider::Scene, "queued") => JobStatus::Queued,
            (Provider::Scene, "in_progress" | "running") => JobStatus::InProgress,
            (Provider::Scene, "completed" | "succeeded") => JobStatus::Completed,
            (Provider::Scene, "failed") => JobStatus::Failed,
            _ => {
                return Err(NormalizeError::UnknownStatus {
                    provider: self.slug(),
                    status: raw.to_string(),
                });
            }
        };
        Ok(normalized)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("provider '{provider}' returned unrecognized status '{status}'")]
    UnknownStatus {
        provider: &'static str,
        status: String,
    },
}
