use axum::http::StatusCode;

/// GET /health/ - liveness probe, no side effects
pub async fn health() -> (StatusCode, &'static str) {
    (StatusCode::OK, "rhobot - healthy")
}
