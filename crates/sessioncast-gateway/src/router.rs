//! Axum router wiring: ops endpoints plus the broadcast upgrade route.

use axum::{routing::get, Router};

use sessioncast_core::error::Result;

use crate::{ops, service::SessionCast};

pub fn build_router(cast: &SessionCast) -> Result<Router> {
    let ops = Router::new()
        .route("/healthz", get(ops::healthz))
        .route("/readyz", get(ops::readyz))
        .route("/metrics", get(ops::metrics))
        .with_state(cast.clone());
    cast.attach(ops)
}
