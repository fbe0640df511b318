//! Record model shared between the cache, the backend client, and the UI
//! projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Domain lifecycle state of a record. The backend is authoritative; local
/// values are optimistic and may be superseded on the next refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Draft,
    Scheduled,
    Published,
    Failed,
}

impl RecordStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Draft => "draft",
            RecordStatus::Scheduled => "scheduled",
            RecordStatus::Published => "published",
            RecordStatus::Failed => "failed",
        }
    }
}

/// Target platforms a record can be published to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    Facebook,
    Instagram,
    Linkedin,
}

impl Platform {
    pub const fn as_str(self) -> &'static str {
        match self {
            Platform::Twitter => "twitter",
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
            Platform::Linkedin => "linkedin",
        }
    }

    /// Character ceiling the platform enforces on post bodies.
    pub const fn max_content_chars(self) -> usize {
        match self {
            Platform::Twitter => 280,
            Platform::Facebook => 63_206,
            Platform::Instagram => 2_200,
            Platform::Linkedin => 3_000,
        }
    }
}

/// A schedulable content item, cached locally and reconciled against the
/// backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub workspace_id: String,
    pub status: RecordStatus,
    pub content: String,
    pub platforms: Vec<Platform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Failure detail reported by the backend when `status` is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Creates a draft record with a locally assigned id. The backend may
    /// replace the id on create; callers reconcile via the create response.
    pub fn draft<W: Into<String>, C: Into<String>>(
        workspace_id: W,
        content: C,
        platforms: Vec<Platform>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            workspace_id: workspace_id.into(),
            status: RecordStatus::Draft,
            content: content.into(),
            platforms,
            media_url: None,
            scheduled_at: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}
