//! Job store queries.
//!
//! Every mutation of a job's status or schedule is a conditional update
//! scoped to the expected current status. That predicate is the only
//! concurrency control in the system: a cancel racing the dispatcher's
//! claim, or two overlapping poll cycles racing each other, resolve to
//! exactly one winner at the database.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::model::{
    EmailHistoryRecord, JobStatus, NewHistoryRecord, NewScheduledEmail, ScheduledEmailJob,
};
use crate::recipients;

const JOB_COLUMNS: &str = "id, user_id, to_email, subject, html_content, from_email, from_name, \
     scheduled_for, status, titulo_principal, subtitulo, contenido, template_id, image_url, \
     created_at, updated_at, processed_at, error_message";

/// Uniform RFC 3339 encoding (fixed fraction width, `Z` suffix) so TEXT
/// comparison in SQL agrees with chronological order.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    tracing::info!("Running database migrations...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scheduled_emails (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            to_email TEXT NOT NULL,
            subject TEXT NOT NULL,
            html_content TEXT NOT NULL,
            from_email TEXT NOT NULL,
            from_name TEXT,
            scheduled_for TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            titulo_principal TEXT,
            subtitulo TEXT,
            contenido TEXT,
            template_id INTEGER,
            image_url TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            processed_at TEXT,
            error_message TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // The dispatcher's poll predicate.
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_scheduled_emails_due
        ON scheduled_emails(status, scheduled_for)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS email_history (
            id TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            scheduled_email_id INTEGER,
            to_email TEXT NOT NULL,
            subject TEXT NOT NULL,
            from_email TEXT NOT NULL,
            from_name TEXT,
            success INTEGER NOT NULL,
            message TEXT NOT NULL,
            message_id TEXT,
            images_base64 INTEGER NOT NULL DEFAULT 0,
            images_url INTEGER NOT NULL DEFAULT 0,
            payload_kb INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_email_history_user
        ON email_history(user_id, created_at)
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Migrations complete");
    Ok(())
}

/// Insert a new job with status `pending` and return the stored row.
pub async fn insert_job(
    pool: &SqlitePool,
    new: &NewScheduledEmail,
) -> Result<ScheduledEmailJob, sqlx::Error> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO scheduled_emails
            (user_id, to_email, subject, html_content, from_email, from_name, scheduled_for,
             status, titulo_principal, subtitulo, contenido, template_id, image_url,
             created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(new.user_id)
    .bind(recipients::to_storage(&new.to_email))
    .bind(&new.subject)
    .bind(&new.html_content)
    .bind(&new.from_email)
    .bind(&new.from_name)
    .bind(ts(new.scheduled_for))
    .bind(&new.titulo_principal)
    .bind(&new.subtitulo)
    .bind(&new.contenido)
    .bind(new.template_id)
    .bind(&new.image_url)
    .bind(ts(now))
    .bind(ts(now))
    .execute(pool)
    .await?;

    let id = result.last_insert_rowid();

    sqlx::query_as(&format!(
        "SELECT {} FROM scheduled_emails WHERE id = ?",
        JOB_COLUMNS
    ))
    .bind(id)
    .fetch_one(pool)
    .await
}

/// Jobs eligible for dispatch: pending and due, earliest first.
pub async fn find_due(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<ScheduledEmailJob>, sqlx::Error> {
    sqlx::query_as(&format!(
        r#"
        SELECT {} FROM scheduled_emails
        WHERE status = 'pending' AND scheduled_for <= ?
        ORDER BY scheduled_for ASC, id ASC
        LIMIT ?
        "#,
        JOB_COLUMNS
    ))
    .bind(ts(now))
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Conditional status transition. Returns false when the row was not in
/// `expected` status (someone else won the race); nothing is written then.
pub async fn update_status(
    pool: &SqlitePool,
    id: i64,
    expected: JobStatus,
    new: JobStatus,
    processed_at: Option<DateTime<Utc>>,
    error_message: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE scheduled_emails
        SET status = ?, processed_at = ?, error_message = ?, updated_at = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(new)
    .bind(processed_at.map(ts))
    .bind(error_message)
    .bind(ts(Utc::now()))
    .bind(id)
    .bind(expected)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Fetch one job, optionally scoped to an owner.
pub async fn get_job(
    pool: &SqlitePool,
    id: i64,
    owner: Option<i64>,
) -> Result<Option<ScheduledEmailJob>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {} FROM scheduled_emails WHERE id = ? AND (? IS NULL OR user_id = ?)",
        JOB_COLUMNS
    ))
    .bind(id)
    .bind(owner)
    .bind(owner)
    .fetch_optional(pool)
    .await
}

/// Owner-scoped listing, newest schedule first, optionally filtered by
/// status.
pub async fn list_jobs(
    pool: &SqlitePool,
    owner: i64,
    status: Option<JobStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<ScheduledEmailJob>, sqlx::Error> {
    let status = status.map(|s| s.to_string());
    sqlx::query_as(&format!(
        r#"
        SELECT {} FROM scheduled_emails
        WHERE user_id = ? AND (? IS NULL OR status = ?)
        ORDER BY scheduled_for DESC, id DESC
        LIMIT ? OFFSET ?
        "#,
        JOB_COLUMNS
    ))
    .bind(owner)
    .bind(&status)
    .bind(&status)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

/// Partial update, legal only while the job is still pending. The
/// `status = 'pending'` predicate also keeps `scheduled_for` immutable once
/// the job has left that state.
#[derive(Debug, Clone, Default)]
pub struct JobEdit {
    pub to_email: Option<Vec<String>>,
    pub subject: Option<String>,
    pub html_content: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub titulo_principal: Option<String>,
    pub subtitulo: Option<String>,
    pub contenido: Option<String>,
    pub image_url: Option<String>,
}

pub async fn edit_job(
    pool: &SqlitePool,
    id: i64,
    owner: i64,
    edit: &JobEdit,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE scheduled_emails
        SET to_email = COALESCE(?, to_email),
            subject = COALESCE(?, subject),
            html_content = COALESCE(?, html_content),
            scheduled_for = COALESCE(?, scheduled_for),
            titulo_principal = COALESCE(?, titulo_principal),
            subtitulo = COALESCE(?, subtitulo),
            contenido = COALESCE(?, contenido),
            image_url = COALESCE(?, image_url),
            updated_at = ?
        WHERE id = ? AND user_id = ? AND status = 'pending'
        "#,
    )
    .bind(edit.to_email.as_deref().map(recipients::to_storage))
    .bind(&edit.subject)
    .bind(&edit.html_content)
    .bind(edit.scheduled_for.map(ts))
    .bind(&edit.titulo_principal)
    .bind(&edit.subtitulo)
    .bind(&edit.contenido)
    .bind(&edit.image_url)
    .bind(ts(Utc::now()))
    .bind(id)
    .bind(owner)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Cancel while still pending. Returns false when the job was already
/// claimed or terminal.
pub async fn cancel_job(
    pool: &SqlitePool,
    id: i64,
    owner: i64,
) -> Result<bool, sqlx::Error> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        UPDATE scheduled_emails
        SET status = 'cancelled', processed_at = ?, updated_at = ?
        WHERE id = ? AND user_id = ? AND status = 'pending'
        "#,
    )
    .bind(ts(now))
    .bind(ts(now))
    .bind(id)
    .bind(owner)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Flip `processing` rows untouched since `cutoff` back to `pending`.
/// Covers a dispatcher that died mid-send; at-least-once delivery applies.
pub async fn reclaim_stale(
    pool: &SqlitePool,
    cutoff: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE scheduled_emails
        SET status = 'pending', updated_at = ?
        WHERE status = 'processing' AND updated_at < ?
        "#,
    )
    .bind(ts(Utc::now()))
    .bind(ts(cutoff))
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Append one send attempt to the write-once history log.
pub async fn append_history(
    pool: &SqlitePool,
    record: &NewHistoryRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO email_history
            (id, user_id, scheduled_email_id, to_email, subject, from_email, from_name,
             success, message, message_id, images_base64, images_url, payload_kb, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(record.user_id)
    .bind(record.scheduled_email_id)
    .bind(recipients::to_storage(&record.to_email))
    .bind(&record.subject)
    .bind(&record.from_email)
    .bind(&record.from_name)
    .bind(record.outcome.success)
    .bind(&record.outcome.message)
    .bind(&record.outcome.message_id)
    .bind(record.outcome.stats.base64_inlined as i64)
    .bind(record.outcome.stats.remote_inlined as i64)
    .bind(record.outcome.stats.payload_kb as i64)
    .bind(ts(Utc::now()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Owner-scoped history, newest first.
pub async fn list_history(
    pool: &SqlitePool,
    owner: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<EmailHistoryRecord>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT id, user_id, scheduled_email_id, to_email, subject, from_email, from_name,
               success, message, message_id, images_base64, images_url, payload_kb, created_at
        FROM email_history
        WHERE user_id = ?
        ORDER BY created_at DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(owner)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}
