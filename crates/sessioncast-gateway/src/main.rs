//! SessionCast gateway binary.
//!
//! - WebSocket endpoint (default `/v1/ws`) pushing `{topic, payload}` frames
//! - Ops endpoints: /healthz, /readyz, /metrics
//! - Graceful shutdown closes every live connection

use std::net::SocketAddr;
use std::process::ExitCode;

use tracing_subscriber::{fmt, EnvFilter};

use sessioncast_core::error::{Result, SessionCastError};
use sessioncast_gateway::{config, router, BroadcastSettings, SessionCast};

#[tokio::main]
async fn main() -> ExitCode {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = e.kind().as_str(), error = %e, "cannot start gateway");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let path = config::config_path();
    let mut cfg = config::load_from_file(&path)?;
    cfg.apply_port_override(std::env::var("PORT").ok().as_deref())?;

    let listen: SocketAddr = cfg.gateway.listen.parse().map_err(|e| {
        SessionCastError::BadRequest(format!("gateway.listen must be a valid SocketAddr: {e}"))
    })?;

    let cast = SessionCast::new(BroadcastSettings::from(&cfg));
    let app = router::build_router(&cast)?;

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| SessionCastError::Internal(format!("bind {listen} failed: {e}")))?;
    tracing::info!(%listen, config = %path, "sessioncast-gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(cast.shutdown_on(shutdown_signal()))
        .await
        .map_err(|e| SessionCastError::Internal(format!("server failed: {e}")))?;

    tracing::info!("sessioncast-gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("signal received, starting graceful shutdown");
}
