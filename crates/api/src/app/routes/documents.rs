use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use facteur_core::DocumentId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/:id/send", post(send))
        .route("/:id/send/cancel", post(cancel_send))
        .route("/:id/schedule", post(schedule))
        .route("/:id/download-record", post(download_record))
        .route("/:id/communications", get(communications))
}

/// Start an immediate send; the mail leaves after the grace window unless
/// cancelled. 202 because nothing terminal has happened yet.
pub async fn send(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::SendRequest>,
) -> axum::response::Response {
    let document_id: DocumentId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid document id"),
    };

    let (draft, is_resend) = body.into_draft();
    if let Err(e) = services.start_send(document_id, draft, is_resend).await {
        return errors::send_error_to_response(e);
    }

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "status": "pending",
            "grace_seconds": services.grace().as_secs(),
        })),
    )
        .into_response()
}

/// Cancel the document's pending send. Returns the draft for re-editing when
/// the window was still open; 409 when the mail already went out.
pub async fn cancel_send(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let document_id: DocumentId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid document id"),
    };

    match services.cancel_send(document_id) {
        Ok(Some(draft)) => (
            StatusCode::OK,
            Json(serde_json::json!({ "cancelled": true, "draft": draft })),
        )
            .into_response(),
        Ok(None) => errors::json_error(
            StatusCode::CONFLICT,
            "already_sent",
            "the grace window had already expired",
        ),
        Err(facteur_core::DomainError::NotFound) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            "no pending send for this document",
        ),
        Err(e) => errors::domain_error_to_response(e),
    }
}

/// Record that the document's PDF was downloaded locally (no email involved).
pub async fn download_record(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let document_id: DocumentId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid document id"),
    };

    match services.record_download(document_id).await {
        Ok(event_id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "event_id": event_id.to_string() })),
        )
            .into_response(),
        Err(e) => errors::send_error_to_response(e),
    }
}

pub async fn schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::ScheduleRequest>,
) -> axum::response::Response {
    let document_id: DocumentId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid document id"),
    };

    let scheduled_at = match chrono::DateTime::parse_from_rfc3339(&body.scheduled_at) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(_) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_scheduled_at",
                "scheduled_at must be RFC3339",
            )
        }
    };

    let (draft, is_resend) = body.draft.into_draft();
    match services
        .schedule_send(document_id, draft, scheduled_at, is_resend)
        .await
    {
        Ok(event_id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "event_id": event_id.to_string(),
                "scheduled_at": scheduled_at,
            })),
        )
            .into_response(),
        Err(e) => errors::send_error_to_response(e),
    }
}

/// The document's communication history, most recent first.
pub async fn communications(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let document_id: DocumentId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid document id"),
    };

    let document = match services.document(document_id).await {
        Ok(Some(d)) => d,
        Ok(None) => return errors::json_error(StatusCode::NOT_FOUND, "not_found", "document not found"),
        Err(e) => return errors::store_error_to_response(e),
    };

    Json(serde_json::json!({
        "document_id": document.id.to_string(),
        "number": document.number,
        "status": document.status,
        "entries": dto::communication_entries(&document.log),
    }))
    .into_response()
}
