//! # Content OS Sync Engine
//!
//! Client-side synchronization core for the Content OS platform: tracks
//! long-running external video-generation jobs and maintains an optimistic,
//! periodically reconciled cache of schedulable content records against the
//! backend's authoritative state.

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod notify;
pub mod providers;
pub mod records;
pub mod telemetry;
