//! Liveness and readiness probes, served on their own listener.

use axum::{Router, http::StatusCode, routing::get};

pub fn build_probe_router() -> Router {
    Router::new()
        .route("/liveness", get(liveness))
        .route("/readiness", get(readiness))
}

async fn liveness() -> StatusCode {
    StatusCode::OK
}

async fn readiness() -> StatusCode {
    StatusCode::OK
}
