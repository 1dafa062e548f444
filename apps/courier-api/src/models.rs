//! Request and response DTOs for the Courier API.

use chrono::{DateTime, Utc};
use courier_core::recipients::RecipientsInput;
use courier_core::{JobStatus, ScheduledEmailJob};
use serde::{Deserialize, Serialize};

/// Request to schedule a deferred email.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleEmailRequest {
    /// Array, JSON-encoded array string, or single bare address.
    pub to_email: RecipientsInput,
    pub subject: String,
    pub html_content: String,
    #[serde(default)]
    pub from_email: Option<String>,
    #[serde(default)]
    pub from_name: Option<String>,
    pub scheduled_for: DateTime<Utc>,
    #[serde(default)]
    pub titulo_principal: Option<String>,
    #[serde(default)]
    pub subtitulo: Option<String>,
    #[serde(default)]
    pub contenido: Option<String>,
    #[serde(default)]
    pub template_id: Option<i64>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Partial update of a still-pending scheduled email.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EditEmailRequest {
    #[serde(default)]
    pub to_email: Option<RecipientsInput>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub html_content: Option<String>,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub titulo_principal: Option<String>,
    #[serde(default)]
    pub subtitulo: Option<String>,
    #[serde(default)]
    pub contenido: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Request for an immediate transactional send.
#[derive(Debug, Clone, Deserialize)]
pub struct SendEmailRequest {
    pub to_email: RecipientsInput,
    pub subject: String,
    pub html_content: String,
    #[serde(default)]
    pub from_email: Option<String>,
    #[serde(default)]
    pub from_name: Option<String>,
}

/// Scheduled email as returned by the API: recipients decoded to an array.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledEmailResponse {
    pub id: i64,
    pub user_id: i64,
    pub to_email: Vec<String>,
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

impl From<ScheduledEmailJob> for ScheduledEmailResponse {
    fn from(job: ScheduledEmailJob) -> Self {
        let to_email = job.recipients();
        Self {
            id: job.id,
            user_id: job.user_id,
            to_email,
            subject: job.subject,
            html_content: job.html_content,
            from_email: job.from_email,
            from_name: job.from_name,
            scheduled_for: job.scheduled_for,
            status: job.status,
            titulo_principal: job.titulo_principal,
            subtitulo: job.subtitulo,
            contenido: job.contenido,
            template_id: job.template_id,
            image_url: job.image_url,
            created_at: job.created_at,
            updated_at: job.updated_at,
            processed_at: job.processed_at,
            error_message: job.error_message,
        }
    }
}

/// Query parameters for listing scheduled emails.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// Query parameters for listing send history.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// Clamp a requested page size into a sane range.
pub fn page_limit(requested: Option<i64>) -> i64 {
    requested.unwrap_or(50).clamp(1, 100)
}
