use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::Message;
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::timeout;

use sessioncast_core::error::{Result, SessionCastError};
use sessioncast_core::Event;

use crate::obs::BroadcastMetrics;
use crate::realtime::registry::{ConnId, Connection, ConnectionRegistry};

/// Outcome of one publish. Informational only: callers do not retry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub pruned: usize,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.pruned
    }
}

/// Fan-out engine: one event, every live connection, independently.
pub struct BroadcastHub {
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<BroadcastMetrics>,
}

impl BroadcastHub {
    pub fn new(registry: Arc<ConnectionRegistry>, metrics: Arc<BroadcastMetrics>) -> Self {
        Self { registry, metrics }
    }

    /// Queue the event on every connection without waiting.
    ///
    /// A closed or full queue counts as a failed send: that connection is
    /// closed and pruned. Only an unencodable event is an error.
    pub fn publish(&self, event: &Event) -> Result<DeliveryReport> {
        let started = Instant::now();
        let frame = event.to_frame()?;
        let mut report = DeliveryReport::default();

        for conn in self.registry.snapshot() {
            match conn.sender().try_send(Message::Text(frame.clone())) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.prune(conn.id(), "outbound queue full");
                    report.pruned += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    self.prune(conn.id(), "outbound queue closed");
                    report.pruned += 1;
                }
            }
        }

        self.record(event, report, started);
        Ok(report)
    }

    /// Wait up to `per_conn` for queue space on each connection, concurrently.
    pub async fn publish_with_timeout(
        &self,
        event: &Event,
        per_conn: Duration,
    ) -> Result<DeliveryReport> {
        let started = Instant::now();
        let frame = event.to_frame()?;
        let mut report = DeliveryReport::default();

        let mut sends: FuturesUnordered<_> = self
            .registry
            .snapshot()
            .into_iter()
            .map(|conn: Connection| {
                let msg = Message::Text(frame.clone());
                async move {
                    let outcome = match timeout(per_conn, conn.sender().send(msg)).await {
                        Ok(Ok(())) => None,
                        Ok(Err(_)) => Some("outbound queue closed"),
                        Err(_) => Some("send timed out"),
                    };
                    (conn.id(), outcome)
                }
            })
            .collect();

        while let Some((id, failure)) = sends.next().await {
            match failure {
                None => report.delivered += 1,
                Some(reason) => {
                    self.prune(id, reason);
                    report.pruned += 1;
                }
            }
        }

        self.record(event, report, started);
        Ok(report)
    }

    fn prune(&self, id: ConnId, reason: &str) {
        let err = SessionCastError::Delivery(reason.to_string());
        let removed = self.registry.close(id);
        tracing::warn!(conn = %id, code = err.kind().as_str(), %err, removed, "pruning connection");
    }

    fn record(&self, event: &Event, report: DeliveryReport, started: Instant) {
        self.metrics.record_published(event.topic());
        self.metrics.deliveries.add(&[("outcome", "delivered")], report.delivered as u64);
        self.metrics.deliveries.add(&[("outcome", "pruned")], report.pruned as u64);
        self.metrics.publish_duration.observe(started.elapsed());
        tracing::debug!(
            topic = event.topic(),
            delivered = report.delivered,
            pruned = report.pruned,
            "event published"
        );
    }
}
