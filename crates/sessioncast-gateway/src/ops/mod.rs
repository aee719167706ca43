//! Operational HTTP endpoints.
//!
//! - `/healthz` : liveness
//! - `/readyz`  : readiness (503 when draining)
//! - `/metrics` : Prometheus text format

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use crate::service::SessionCast;

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn readyz(State(cast): State<SessionCast>) -> impl IntoResponse {
    if cast.is_draining() {
        (StatusCode::SERVICE_UNAVAILABLE, "draining")
    } else {
        (StatusCode::OK, "ready")
    }
}

pub async fn metrics(State(cast): State<SessionCast>) -> Response {
    let active = cast.connection_count() as u64;
    let draining = u64::from(cast.is_draining());
    let body = cast.metrics().render(&[
        ("sessioncast_connections_active", active),
        ("sessioncast_draining", draining),
    ]);

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}
