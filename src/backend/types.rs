//! Wire types for the Backend API.
//!
//! The backend speaks camelCase JSON; everything here renames accordingly.

use serde::{Deserialize, Serialize};

/// Response of `GET /jobs/{provider}/{id}/status`.
///
/// `status` is the provider-native vocabulary and is normalized by
/// [`crate::providers::Provider::normalize_status`] before anything else
/// looks at it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub status: String,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Response of `POST /jobs/{provider}/{id}/fetch-result`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResultResponse {
    pub result_url: String,
}

/// Response of `POST /records/{id}/publish`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub per_platform_results: Vec<PlatformPublishResult>,
}

/// Outcome of publishing to a single target platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformPublishResult {
    pub platform: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Response of `GET /connection-status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub workspace_id: String,
    pub platforms: Vec<PlatformConnection>,
}

/// Connection state of a single platform account within a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConnection {
    pub platform: String,
    pub connected: bool,
    #[serde(default)]
    pub username: Option<String>,
}
