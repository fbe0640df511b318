//! # Error Handling
//!
//! Failure taxonomy for the sync core. Transport and upstream failures are
//! recoverable and retried by the polling loops; validation failures are
//! rejected synchronously before any remote call; partial failures are
//! aggregated and reported per item, never escalated to total failure unless
//! nothing succeeded.

use thiserror::Error;

/// Maximum number of upstream body bytes retained in error messages.
const BODY_SNIPPET_LIMIT: usize = 256;

/// Failure talking to the Backend API collaborator.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Network-level failure: connect, timeout, TLS. Always retryable.
    #[error("request to backend failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("backend returned {status} for {endpoint}: {body_snippet}")]
    UpstreamStatus {
        status: u16,
        endpoint: String,
        body_snippet: String,
    },

    /// The backend answered 2xx but the body did not match the expected shape.
    #[error("failed to decode backend response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid backend base url '{value}': {source}")]
    InvalidBaseUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to construct http client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

impl BackendError {
    /// Whether the next scheduled attempt may succeed without intervention.
    ///
    /// Transport failures and 5xx/429 responses are transient; everything
    /// else is permanent for the purposes of the polling loops.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Transport(_) => true,
            BackendError::UpstreamStatus { status, .. } => *status >= 500 || *status == 429,
            BackendError::Decode { .. }
            | BackendError::InvalidBaseUrl { .. }
            | BackendError::ClientBuild(_) => false,
        }
    }

    pub(crate) fn upstream(status: u16, endpoint: &str, body: &str) -> Self {
        let body_snippet = if body.len() > BODY_SNIPPET_LIMIT {
            let mut end = BODY_SNIPPET_LIMIT;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}…", &body[..end])
        } else {
            body.to_string()
        };
        BackendError::UpstreamStatus {
            status,
            endpoint: endpoint.to_string(),
            body_snippet,
        }
    }
}

/// Pre-publish validation failure. Rejected before any remote call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("post content is empty")]
    EmptyContent,

    #[error("no target platforms selected")]
    NoPlatforms,

    #[error("content exceeds the {limit}-character limit for {platform}")]
    ContentTooLong { platform: &'static str, limit: usize },

    #[error("scheduled time is in the past")]
    ScheduleInPast,
}
