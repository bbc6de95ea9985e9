use std::sync::Arc;

use axum::{
    extract::Extension, http::StatusCode, response::IntoResponse, routing::post, Json, Router,
};

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/process-scheduled", post(process_scheduled))
}

/// Run one reconciliation pass over due scheduled sends.
///
/// Safe to invoke from an external scheduler and manually at the same time;
/// a pass that finds nothing due reports zeros.
pub async fn process_scheduled(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.process_scheduled().await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
