//! API route definitions.

mod audiobooks;
mod health;
mod queue;

use axum::Router;

use crate::api::server::AppState;

/// Assemble all route groups under `/api`.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/audiobooks", audiobooks::router())
        .nest("/queue", queue::router())
        .nest("/health", health::router())
}
