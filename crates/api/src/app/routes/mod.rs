use axum::Router;

pub mod cron;
pub mod documents;
pub mod system;

/// Router for all application endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/api/documents", documents::router())
        .nest("/api/cron", cron::router())
}
