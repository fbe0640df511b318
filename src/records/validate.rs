//! Pre-publish validation.
//!
//! Every rule here runs synchronously before any remote call; a rejected
//! record is reported immediately and the backend never sees the request.

use chrono::{DateTime, Utc};

use crate::error::PublishError;

use super::model::Record;

pub fn validate_for_publish(record: &Record, now: DateTime<Utc>) -> Result<(), PublishError> {
    if record.content.trim().is_empty() {
        return Err(PublishError::EmptyContent);
    }

    if record.platforms.is_empty() {
        return Err(PublishError::NoPlatforms);
    }

    let content_chars = record.content.chars().count();
    for platform in &record.platforms {
        if content_chars > platform.max_content_chars() {
            return Err(PublishError::ContentTooLong {
                platform: platform.as_str(),
                limit: platform.max_content_chars(),
            });
        }
    }

    if let Some(scheduled_at) = record.scheduled_at
        && scheduled_at < now
    {
        return Err(PublishError::ScheduleInPast);
    }

    Ok(())
}
