//! Data models for the scheduled-email subsystem.

use chrono::{DateTime, Utc};
use html_inline::ImageStats;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle state of a scheduled email job.
///
/// `pending → processing → {sent, failed}` driven by the dispatcher;
/// `pending → cancelled` by explicit user action. `sent`, `failed`, and
/// `cancelled` carry a `processed_at` timestamp and are never left again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Statuses the dispatcher never transitions out of.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Sent | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Sent => write!(f, "sent"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Scheduled email job stored in the database.
///
/// `to_email` is the canonical JSON array text written at the lifecycle-API
/// boundary; [`ScheduledEmailJob::recipients`] still coerces legacy shapes
/// (bare address, double-encoded JSON) when older rows surface.
#[derive(Debug, Clone, FromRow)]
pub struct ScheduledEmailJob {
    pub id: i64,
    pub user_id: i64,
    pub to_email: String,
    pub subject: String,
    pub html_content: String,
    pub from_email: String,
    pub from_name: Option<String>,
    pub scheduled_for: DateTime<Utc>,
    pub status: JobStatus,
    pub titulo_principal: Option<String>,
    pub subtitulo: Option<String>,
    pub contenido: Option<String>,
    pub template_id: Option<i64>,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl ScheduledEmailJob {
    /// Recipient list in canonical order.
    pub fn recipients(&self) -> Vec<String> {
        crate::recipients::normalize(&self.to_email)
    }
}

/// Insert payload for a new job. Recipients are already normalized.
#[derive(Debug, Clone)]
pub struct NewScheduledEmail {
    pub user_id: i64,
    pub to_email: Vec<String>,
    pub subject: String,
    pub html_content: String,
    pub from_email: String,
    pub from_name: Option<String>,
    pub scheduled_for: DateTime<Utc>,
    pub titulo_principal: Option<String>,
    pub subtitulo: Option<String>,
    pub contenido: Option<String>,
    pub template_id: Option<i64>,
    pub image_url: Option<String>,
}

/// Result of one transport invocation, used for the API response of an
/// immediate send and to populate the history log.
#[derive(Debug, Clone, Serialize)]
pub struct EmailSendOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub stats: ImageStats,
}

/// Append-only record of one send attempt, immediate or deferred.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EmailHistoryRecord {
    pub id: String,
    pub user_id: i64,
    pub scheduled_email_id: Option<i64>,
    pub to_email: String,
    pub subject: String,
    pub from_email: String,
    pub from_name: Option<String>,
    pub success: bool,
    pub message: String,
    pub message_id: Option<String>,
    pub images_base64: i64,
    pub images_url: i64,
    pub payload_kb: i64,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for one history row.
#[derive(Debug, Clone)]
pub struct NewHistoryRecord {
    pub user_id: i64,
    pub scheduled_email_id: Option<i64>,
    pub to_email: Vec<String>,
    pub subject: String,
    pub from_email: String,
    pub from_name: Option<String>,
    pub outcome: EmailSendOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Sent.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn status_display_matches_serde() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Sent,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            let display = status.to_string();
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", display));
        }
    }
}
