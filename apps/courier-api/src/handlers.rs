//! HTTP handlers for the Courier API.
//!
//! These are thin: validation at the boundary, then the store or the shared
//! send path in `courier-core`. Every status mutation below goes through a
//! conditional update, so a handler racing the dispatcher resolves at the
//! database, not here.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use courier_core::store::{self, JobEdit};
use courier_core::{render_and_send, EmailSendOutcome, NewHistoryRecord, NewScheduledEmail};
use email_gateway::sender_address;

use crate::error::ApiError;
use crate::extract::AuthUser;
use crate::models::*;
use crate::state::AppState;

/// Health check endpoint
pub async fn health() -> &'static str {
    "OK"
}

/// Schedule a deferred email. The recipient payload is normalized here, at
/// the boundary, so the dispatcher only ever sees the canonical encoding.
pub async fn schedule_email(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<ScheduleEmailRequest>,
) -> Result<Json<ScheduledEmailResponse>, ApiError> {
    let recipients = req.to_email.normalize();
    if recipients.is_empty() {
        return Err(ApiError::InvalidRequest(
            "At least one recipient is required".into(),
        ));
    }
    if req.subject.trim().is_empty() {
        return Err(ApiError::InvalidRequest("Subject is required".into()));
    }
    if req.html_content.trim().is_empty() {
        return Err(ApiError::InvalidRequest("HTML content is required".into()));
    }
    // Server clock, not client clock.
    if req.scheduled_for <= Utc::now() {
        return Err(ApiError::InvalidRequest(
            "scheduled_for must be in the future".into(),
        ));
    }

    let new = NewScheduledEmail {
        user_id,
        to_email: recipients,
        subject: req.subject,
        html_content: req.html_content,
        from_email: req
            .from_email
            .unwrap_or_else(|| state.gateway.default_from.clone()),
        from_name: req.from_name,
        scheduled_for: req.scheduled_for,
        titulo_principal: req.titulo_principal,
        subtitulo: req.subtitulo,
        contenido: req.contenido,
        template_id: req.template_id,
        image_url: req.image_url,
    };

    let job = store::insert_job(&state.db, &new).await?;
    tracing::info!(job_id = job.id, user_id, scheduled_for = %job.scheduled_for, "Scheduled email created");

    Ok(Json(job.into()))
}

/// List scheduled emails for the caller, optionally filtered by status.
pub async fn list_scheduled(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<ScheduledEmailResponse>>, ApiError> {
    let jobs = store::list_jobs(
        &state.db,
        user_id,
        query.status,
        page_limit(query.limit),
        query.offset.unwrap_or(0).max(0),
    )
    .await?;

    Ok(Json(jobs.into_iter().map(Into::into).collect()))
}

/// Get one scheduled email by id.
pub async fn get_scheduled(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ScheduledEmailResponse>, ApiError> {
    let job = store::get_job(&state.db, id, Some(user_id))
        .await?
        .ok_or(ApiError::NotFound(id))?;

    Ok(Json(job.into()))
}

/// Edit a still-pending scheduled email. Rejected once the dispatcher has
/// claimed it or it reached a terminal status.
pub async fn edit_scheduled(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<EditEmailRequest>,
) -> Result<Json<ScheduledEmailResponse>, ApiError> {
    let to_email = match &req.to_email {
        Some(input) => {
            let recipients = input.normalize();
            if recipients.is_empty() {
                return Err(ApiError::InvalidRequest(
                    "At least one recipient is required".into(),
                ));
            }
            Some(recipients)
        }
        None => None,
    };

    if let Some(subject) = &req.subject {
        if subject.trim().is_empty() {
            return Err(ApiError::InvalidRequest("Subject cannot be empty".into()));
        }
    }
    if let Some(scheduled_for) = req.scheduled_for {
        if scheduled_for <= Utc::now() {
            return Err(ApiError::InvalidRequest(
                "scheduled_for must be in the future".into(),
            ));
        }
    }

    let edit = JobEdit {
        to_email,
        subject: req.subject,
        html_content: req.html_content,
        scheduled_for: req.scheduled_for,
        titulo_principal: req.titulo_principal,
        subtitulo: req.subtitulo,
        contenido: req.contenido,
        image_url: req.image_url,
    };

    let updated = store::edit_job(&state.db, id, user_id, &edit).await?;
    if !updated {
        return Err(edit_conflict(&state, id, user_id, "edited").await?);
    }

    let job = store::get_job(&state.db, id, Some(user_id))
        .await?
        .ok_or(ApiError::NotFound(id))?;
    tracing::info!(job_id = id, user_id, "Scheduled email edited");

    Ok(Json(job.into()))
}

/// Cancel a still-pending scheduled email. Cancelling a claimed or terminal
/// job is a reported conflict, not a silent no-op.
pub async fn cancel_scheduled(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ScheduledEmailResponse>, ApiError> {
    let cancelled = store::cancel_job(&state.db, id, user_id).await?;
    if !cancelled {
        return Err(edit_conflict(&state, id, user_id, "cancelled").await?);
    }

    let job = store::get_job(&state.db, id, Some(user_id))
        .await?
        .ok_or(ApiError::NotFound(id))?;
    tracing::info!(job_id = id, user_id, "Scheduled email cancelled");

    Ok(Json(job.into()))
}

/// A conditional update matched no row: either the job does not exist for
/// this owner, or it is no longer pending.
async fn edit_conflict(
    state: &AppState,
    id: i64,
    user_id: i64,
    action: &str,
) -> Result<ApiError, ApiError> {
    Ok(match store::get_job(&state.db, id, Some(user_id)).await? {
        None => ApiError::NotFound(id),
        Some(job) => ApiError::Conflict(format!(
            "Scheduled email {} is {} and can no longer be {}",
            id, job.status, action
        )),
    })
}

/// Immediate transactional send. The attempt is appended to the history log
/// whether or not the transport accepts it.
pub async fn send_email(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<SendEmailRequest>,
) -> Result<Json<EmailSendOutcome>, ApiError> {
    let recipients = req.to_email.normalize();
    if recipients.is_empty() {
        return Err(ApiError::InvalidRequest(
            "At least one recipient is required".into(),
        ));
    }
    if req.subject.trim().is_empty() {
        return Err(ApiError::InvalidRequest("Subject is required".into()));
    }
    if req.html_content.trim().is_empty() {
        return Err(ApiError::InvalidRequest("HTML content is required".into()));
    }

    let from_email = req
        .from_email
        .unwrap_or_else(|| state.gateway.default_from.clone());
    let from = sender_address(&from_email, req.from_name.as_deref());

    let outcome = render_and_send(
        state.transport.as_ref(),
        &state.http,
        from,
        recipients.clone(),
        &req.subject,
        &req.html_content,
    )
    .await;

    store::append_history(
        &state.db,
        &NewHistoryRecord {
            user_id,
            scheduled_email_id: None,
            to_email: recipients,
            subject: req.subject,
            from_email,
            from_name: req.from_name,
            outcome: outcome.clone(),
        },
    )
    .await?;

    Ok(Json(outcome))
}

/// List send history for the caller, newest first.
pub async fn list_history(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<courier_core::EmailHistoryRecord>>, ApiError> {
    let records = store::list_history(
        &state.db,
        user_id,
        page_limit(query.limit),
        query.offset.unwrap_or(0).max(0),
    )
    .await?;

    Ok(Json(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Duration;
    use email_gateway::{GatewayConfig, MockTransport};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use sqlx::sqlite::SqlitePoolOptions;
    use tower::ServiceExt;

    async fn test_state(transport: Arc<MockTransport>) -> Arc<AppState> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        store::run_migrations(&pool).await.unwrap();
        Arc::new(AppState::with_parts(
            pool,
            transport,
            GatewayConfig::default(),
        ))
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-user-id", "7")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .header("x-user-id", "7")
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn schedule_body(to: Value) -> Value {
        json!({
            "to_email": to,
            "subject": "Hello",
            "html_content": "<p>hi</p>",
            "scheduled_for": Utc::now() + Duration::minutes(5),
        })
    }

    #[tokio::test]
    async fn missing_identity_is_unauthorized() {
        let state = test_state(Arc::new(MockTransport::new())).await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/emails/schedule")
            .header("content-type", "application/json")
            .body(Body::from(schedule_body(json!(["a@x.com"])).to_string()))
            .unwrap();

        let response = crate::app_router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn schedule_rejects_past_dates() {
        let state = test_state(Arc::new(MockTransport::new())).await;
        let mut body = schedule_body(json!(["a@x.com"]));
        body["scheduled_for"] = json!(Utc::now() - Duration::minutes(5));

        let response = crate::app_router(state)
            .oneshot(post("/api/emails/schedule", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let error = json_body(response).await;
        assert!(error["error"].as_str().unwrap().contains("future"));
    }

    #[tokio::test]
    async fn schedule_rejects_empty_recipients() {
        let state = test_state(Arc::new(MockTransport::new())).await;
        let response = crate::app_router(state)
            .oneshot(post("/api/emails/schedule", schedule_body(json!([]))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn schedule_normalizes_string_encoded_recipients() {
        let state = test_state(Arc::new(MockTransport::new())).await;
        let body = schedule_body(json!("[\"a@x.com\",\"b@x.com\"]"));

        let response = crate::app_router(state)
            .oneshot(post("/api/emails/schedule", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let created = json_body(response).await;
        assert_eq!(created["status"], "pending");
        assert_eq!(created["to_email"], json!(["a@x.com", "b@x.com"]));
    }

    #[tokio::test]
    async fn cancel_twice_reports_conflict() {
        let state = test_state(Arc::new(MockTransport::new())).await;
        let router = crate::app_router(state);

        let created = json_body(
            router
                .clone()
                .oneshot(post("/api/emails/schedule", schedule_body(json!(["a@x.com"]))))
                .await
                .unwrap(),
        )
        .await;
        let id = created["id"].as_i64().unwrap();

        let first = router
            .clone()
            .oneshot(post(&format!("/api/emails/scheduled/{}/cancel", id), json!({})))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(json_body(first).await["status"], "cancelled");

        let second = router
            .oneshot(post(&format!("/api/emails/scheduled/{}/cancel", id), json!({})))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn edit_after_cancel_reports_conflict() {
        let state = test_state(Arc::new(MockTransport::new())).await;
        let router = crate::app_router(state);

        let created = json_body(
            router
                .clone()
                .oneshot(post("/api/emails/schedule", schedule_body(json!(["a@x.com"]))))
                .await
                .unwrap(),
        )
        .await;
        let id = created["id"].as_i64().unwrap();

        router
            .clone()
            .oneshot(post(&format!("/api/emails/scheduled/{}/cancel", id), json!({})))
            .await
            .unwrap();

        let edit = Request::builder()
            .method("PUT")
            .uri(format!("/api/emails/scheduled/{}", id))
            .header("content-type", "application/json")
            .header("x-user-id", "7")
            .body(Body::from(json!({"subject": "new"}).to_string()))
            .unwrap();

        let response = router.oneshot(edit).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let state = test_state(Arc::new(MockTransport::new())).await;
        let router = crate::app_router(state);

        for _ in 0..2 {
            router
                .clone()
                .oneshot(post("/api/emails/schedule", schedule_body(json!(["a@x.com"]))))
                .await
                .unwrap();
        }
        let created = json_body(
            router
                .clone()
                .oneshot(post("/api/emails/schedule", schedule_body(json!(["a@x.com"]))))
                .await
                .unwrap(),
        )
        .await;
        let id = created["id"].as_i64().unwrap();
        router
            .clone()
            .oneshot(post(&format!("/api/emails/scheduled/{}/cancel", id), json!({})))
            .await
            .unwrap();

        let pending = json_body(
            router
                .clone()
                .oneshot(get("/api/emails/scheduled?status=pending"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(pending.as_array().unwrap().len(), 2);

        let cancelled = json_body(
            router
                .oneshot(get("/api/emails/scheduled?status=cancelled"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(cancelled.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_unknown_job_is_not_found() {
        let state = test_state(Arc::new(MockTransport::new())).await;
        let response = crate::app_router(state)
            .oneshot(get("/api/emails/scheduled/9999"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn immediate_send_records_history() {
        let transport = Arc::new(MockTransport::new());
        let state = test_state(transport.clone()).await;
        let router = crate::app_router(state);

        let body = json!({
            "to_email": ["a@x.com"],
            "subject": "Now",
            "html_content": "<p>now</p>",
        });
        let response = router
            .clone()
            .oneshot(post("/api/emails/send", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let outcome = json_body(response).await;
        assert_eq!(outcome["success"], true);
        assert!(outcome["message_id"].as_str().unwrap().starts_with("mock-"));
        assert_eq!(transport.sent().len(), 1);

        let history = json_body(
            router.oneshot(get("/api/emails/history")).await.unwrap(),
        )
        .await;
        let records = history.as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["success"], true);
        assert_eq!(records[0]["scheduled_email_id"], Value::Null);
    }

    #[tokio::test]
    async fn failed_immediate_send_is_reported_and_logged() {
        let transport = Arc::new(MockTransport::failing_all());
        let state = test_state(transport).await;
        let router = crate::app_router(state);

        let body = json!({
            "to_email": ["a@x.com"],
            "subject": "Now",
            "html_content": "<p>now</p>",
        });
        let response = router
            .clone()
            .oneshot(post("/api/emails/send", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let outcome = json_body(response).await;
        assert_eq!(outcome["success"], false);
        assert!(outcome["message"].as_str().unwrap().contains("unreachable"));

        let history = json_body(
            router.oneshot(get("/api/emails/history")).await.unwrap(),
        )
        .await;
        assert_eq!(history.as_array().unwrap()[0]["success"], false);
    }
}
