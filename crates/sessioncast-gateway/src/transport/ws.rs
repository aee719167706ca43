//! WebSocket transport adapter.
//!
//! Responsibilities:
//! - Upgrade HTTP -> WS on the configured path
//! - Reject bad handshakes before any connection exists
//! - One session task per socket: outbound writer, inbound liveness,
//!   ping + idle timeout, server-initiated close
//! - Every socket write is bounded: a close request or a peer that stops
//!   reading ends it, so a stalled client's socket is still released
//! - Unregister exactly once when the socket ends, whatever the cause

use std::sync::Arc;

use axum::{
    extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
    extract::ws::rejection::WebSocketUpgradeRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, sleep_until, timeout, Duration, Instant, MissedTickBehavior};
use tracing::Instrument;

use sessioncast_core::error::SessionCastError;

use crate::realtime::{Admission, CloseObserver, Connection};
use crate::service::SessionCast;

const CLOSED_BY_SERVER: &str = "closed by server";
const IDLE_TIMEOUT: &str = "idle timeout";
const WRITE_STALLED: &str = "write stalled";
const WRITE_FAILED: &str = "write failed";

/// Upper bound for the farewell Close frame on a socket that may be stuck.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

type WsSink = SplitSink<WebSocket, Message>;

/// Mount the upgrade route onto a host router.
pub(crate) fn mount<S>(router: Router<S>, cast: SessionCast) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let path = cast.settings().ws_path.clone();
    router.route(
        &path,
        get(move |upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>| {
            ws_upgrade(cast.clone(), upgrade)
        }),
    )
}

fn reject(cast: &SessionCast, reason: &'static str, err: &SessionCastError) {
    cast.metrics().handshake_rejections.inc(&[("reason", reason)]);
    tracing::warn!(code = err.kind().as_str(), %err, reason, "upgrade rejected");
}

async fn ws_upgrade(
    cast: SessionCast,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let upgrade = match upgrade {
        Ok(u) => u,
        Err(rejection) => {
            reject(&cast, "malformed", &SessionCastError::Handshake(rejection.body_text()));
            return rejection.into_response();
        }
    };

    if cast.is_draining() {
        reject(&cast, "draining", &SessionCastError::Handshake("server is shutting down".into()));
        return (StatusCode::SERVICE_UNAVAILABLE, "draining").into_response();
    }

    // early refusal only; `register` enforces the limit atomically
    let max = cast.settings().max_connections;
    if max > 0 && cast.connection_count() >= max {
        reject(
            &cast,
            "capacity",
            &SessionCastError::Handshake(format!("connection limit {max} reached")),
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    }

    cast.metrics().ws_upgrades.inc(&[]);
    upgrade
        .on_failed_upgrade(|e| {
            tracing::warn!(code = "HANDSHAKE", error = %e, "upgrade failed after response");
        })
        .on_upgrade(move |socket| run_session(cast, socket))
}

/// One socket write that gives up on a close request or a peer that stops
/// reading for `stall`.
async fn write_bounded(
    ws_tx: &mut WsSink,
    conn: &Connection,
    msg: Message,
    stall: Duration,
) -> std::result::Result<(), &'static str> {
    tokio::select! {
        biased;
        _ = conn.close_requested() => Err(CLOSED_BY_SERVER),
        sent = ws_tx.send(msg) => sent.map_err(|_| WRITE_FAILED),
        _ = sleep(stall) => Err(WRITE_STALLED),
    }
}

async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &'static str) {
    let frame = CloseFrame { code, reason: reason.into() };
    let _ = timeout(CLOSE_GRACE, ws_tx.send(Message::Close(Some(frame)))).await;
}

async fn run_session(cast: SessionCast, socket: WebSocket) {
    let settings = cast.settings().clone();
    let registry = cast.registry();

    let (out_tx, mut out_rx) = mpsc::channel::<Message>(settings.queue_capacity);
    let conn = registry.allocate(out_tx);
    let span = tracing::info_span!("ws_conn", conn = %conn.id());

    async move {
        let (mut ws_tx, mut ws_rx) = socket.split();

        let refused = match registry.register(conn.clone()) {
            Admission::Registered => None,
            Admission::Closed => Some(("draining", close_code::AWAY, "server shutting down")),
            Admission::AtCapacity => Some(("capacity", close_code::AGAIN, "connection limit reached")),
            Admission::Duplicate | Admission::NotConnecting => {
                Some(("registry", close_code::ERROR, "registration failed"))
            }
        };
        if let Some((label, code, text)) = refused {
            reject(&cast, label, &SessionCastError::Handshake(text.to_string()));
            send_close(&mut ws_tx, code, text).await;
            return;
        }

        let _observer = CloseObserver::new(Arc::clone(&registry), conn.id());
        tracing::info!("connection open");

        let stall = settings.idle_timeout;
        let mut ping_tick = interval_at(Instant::now() + settings.ping_interval, settings.ping_interval);
        ping_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_activity = Instant::now();

        let reason = loop {
            tokio::select! {
                biased;

                _ = conn.close_requested() => break CLOSED_BY_SERVER,

                // outbound writer
                maybe_out = out_rx.recv() => {
                    let Some(msg) = maybe_out else { break "outbound queue dropped" };
                    if let Err(r) = write_bounded(&mut ws_tx, &conn, msg, stall).await {
                        break r;
                    }
                }

                // inbound: only liveness matters; tungstenite answers pings itself
                incoming = ws_rx.next() => {
                    match incoming {
                        Some(Ok(Message::Close(_))) => break "client close",
                        Some(Ok(_)) => last_activity = Instant::now(),
                        Some(Err(e)) => {
                            tracing::debug!(error = %e, "read failed");
                            break "read failed";
                        }
                        None => break "stream ended",
                    }
                }

                _ = ping_tick.tick() => {
                    if let Err(r) = write_bounded(&mut ws_tx, &conn, Message::Ping(Vec::new()), stall).await {
                        break r;
                    }
                }

                _ = sleep_until(last_activity + settings.idle_timeout) => break IDLE_TIMEOUT,
            }
        };

        match reason {
            CLOSED_BY_SERVER => send_close(&mut ws_tx, close_code::AWAY, "server closing connection").await,
            IDLE_TIMEOUT => send_close(&mut ws_tx, close_code::POLICY, "idle timeout").await,
            _ => {}
        }

        // release the socket before reporting, then the observer unregisters
        drop(ws_tx);
        drop(ws_rx);
        cast.metrics().connections_closed.inc(&[("reason", reason)]);
        tracing::info!(reason, "connection closed");
    }
    .instrument(span)
    .await
}
