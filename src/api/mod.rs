//! HTTP surface: the webhook endpoint and the liveness probe

pub mod health;
pub mod webhook;

use axum::{Router, routing};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::SharedState;

pub use health::health;
pub use webhook::handle_webhook;

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", routing::post(handle_webhook))
        .route("/health", routing::get(health))
        .route("/health/", routing::get(health))
        .layer(TraceLayer::new_for_http())
        // A panicking delivery becomes a 500 instead of taking the connection down
        .layer(CatchPanicLayer::new())
        .with_state(state)
}
