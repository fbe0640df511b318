//! Configuration loading for the Content OS sync engine.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `CONTENTOS_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Application configuration derived from `CONTENTOS_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Workspace whose records the engine loads and reconciles. Optional: an
    /// embedder may select the workspace at runtime instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
}

/// Backend API collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct BackendConfig {
    #[serde(default = "default_backend_base_url")]
    pub base_url: String,
    /// Bearer token from the authentication capability; attached verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default = "default_backend_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Reconciliation-pass cadence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ReconcilerConfig {
    #[serde(default = "default_reconcile_interval_seconds")]
    pub interval_seconds: u64,
    /// Upper bound of the per-tick jitter as a fraction of the interval.
    #[serde(default = "default_reconcile_jitter_pct_max")]
    pub jitter_pct_max: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            workspace_id: None,
            backend: BackendConfig::default(),
            reconciler: ReconcilerConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_base_url(),
            auth_token: None,
            request_timeout_ms: default_backend_request_timeout_ms(),
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_reconcile_interval_seconds(),
            jitter_pct_max: default_reconcile_jitter_pct_max(),
        }
    }
}

impl AppConfig {
    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.backend.auth_token.is_some() {
            config.backend.auth_token = Some("[REDACTED]".to_string());
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if a setting is out of
    /// bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.backend.base_url).map_err(|source| ConfigError::InvalidBackendUrl {
            value: self.backend.base_url.clone(),
            source,
        })?;

        if self.backend.request_timeout_ms < 100 || self.backend.request_timeout_ms > 600_000 {
            return Err(ConfigError::InvalidRequestTimeout {
                value: self.backend.request_timeout_ms,
            });
        }

        self.reconciler.validate()?;
        Ok(())
    }
}

impl ReconcilerConfig {
    /// Validate reconciler configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_seconds < 60 || self.interval_seconds > 86_400 {
            return Err(ConfigError::InvalidReconcileInterval {
                value: self.interval_seconds,
            });
        }
        if !(0.0..=1.0).contains(&self.jitter_pct_max) {
            return Err(ConfigError::InvalidReconcileJitter {
                value: self.jitter_pct_max,
            });
        }
        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_backend_base_url() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_backend_request_timeout_ms() -> u64 {
    30_000
}

fn default_reconcile_interval_seconds() -> u64 {
    900 // 15 minutes
}

fn default_reconcile_jitter_pct_max() -> f64 {
    0.1 // 10% maximum jitter
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid backend base url '{value}': {source}")]
    InvalidBackendUrl {
        value: String,
        source: url::ParseError,
    },
    #[error("backend request timeout must be between 100 and 600000 ms, got {value}")]
    InvalidRequestTimeout { value: u64 },
    #[error("reconcile interval must be between 60 and 86400 seconds, got {value}")]
    InvalidReconcileInterval { value: u64 },
    #[error("reconcile jitter must be between 0.0 and 1.0, got {value}")]
    InvalidReconcileJitter { value: f64 },
}

/// Loads configuration using layered `.env` files and `CONTENTOS_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates the configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix("CONTENTOS_") {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_format);
        let workspace_id = layered.remove("WORKSPACE_ID").and_then(|value| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        });

        let backend = BackendConfig {
            base_url: layered
                .remove("BACKEND_BASE_URL")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(default_backend_base_url),
            auth_token: layered.remove("BACKEND_AUTH_TOKEN").filter(|v| !v.is_empty()),
            request_timeout_ms: layered
                .remove("BACKEND_REQUEST_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_backend_request_timeout_ms),
        };

        let reconciler = ReconcilerConfig {
            interval_seconds: layered
                .remove("RECONCILE_INTERVAL_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_reconcile_interval_seconds),
            jitter_pct_max: layered
                .remove("RECONCILE_JITTER_PCT_MAX")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_reconcile_jitter_pct_max),
        };

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            workspace_id,
            backend,
            reconciler,
        };

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("CONTENTOS_PROFILE")
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix("CONTENTOS_") {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
