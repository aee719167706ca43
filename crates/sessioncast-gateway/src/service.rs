//! `SessionCast`: the composition root of the broadcast layer.
//!
//! The hosting application builds one instance, attaches it to its axum
//! router once, and calls `publish` whenever session data changes.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use serde::Serialize;

use sessioncast_core::error::{Result, SessionCastError};
use sessioncast_core::Event;

use crate::config::BroadcastSettings;
use crate::obs::BroadcastMetrics;
use crate::realtime::{BroadcastHub, ConnectionRegistry, DeliveryReport};
use crate::transport;

#[derive(Clone)]
pub struct SessionCast {
    inner: Arc<Inner>,
}

struct Inner {
    settings: BroadcastSettings,
    registry: Arc<ConnectionRegistry>,
    hub: BroadcastHub,
    metrics: Arc<BroadcastMetrics>,
    attached: AtomicBool,
    draining: AtomicBool,
}

impl SessionCast {
    pub fn new(settings: BroadcastSettings) -> Self {
        let registry = Arc::new(ConnectionRegistry::with_limit(settings.max_connections));
        let metrics = Arc::new(BroadcastMetrics::default());
        let hub = BroadcastHub::new(Arc::clone(&registry), Arc::clone(&metrics));
        Self {
            inner: Arc::new(Inner {
                settings,
                registry,
                hub,
                metrics,
                attached: AtomicBool::new(false),
                draining: AtomicBool::new(false),
            }),
        }
    }

    /// Mount the WebSocket route on `router`. Allowed once per instance.
    pub fn attach<S>(&self, router: Router<S>) -> Result<Router<S>>
    where
        S: Clone + Send + Sync + 'static,
    {
        if self
            .inner
            .attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::error!("attach called twice on the same SessionCast");
            return Err(SessionCastError::DoubleAttach);
        }
        tracing::info!(path = %self.inner.settings.ws_path, "broadcast transport attached");
        Ok(transport::ws::mount(router, self.clone()))
    }

    /// Announce a change to every live client.
    pub fn publish<T>(&self, topic: &str, payload: &T) -> Result<DeliveryReport>
    where
        T: Serialize + ?Sized,
    {
        let event = Event::new(topic, payload)?;
        self.publish_event(&event)
    }

    pub fn publish_event(&self, event: &Event) -> Result<DeliveryReport> {
        self.inner.hub.publish(event)
    }

    /// Like `publish`, but waits up to `per_conn` for a slow client's queue
    /// to drain before giving up on it.
    pub async fn publish_with_timeout<T>(
        &self,
        topic: &str,
        payload: &T,
        per_conn: Duration,
    ) -> Result<DeliveryReport>
    where
        T: Serialize + ?Sized,
    {
        let event = Event::new(topic, payload)?;
        self.inner.hub.publish_with_timeout(&event, per_conn).await
    }

    pub fn connection_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Refuse new upgrades, close every live connection, clear the registry.
    /// Returns how many connections were closed.
    pub fn shutdown(&self) -> usize {
        let first = !self.inner.draining.swap(true, Ordering::AcqRel);
        let closed = self.inner.registry.close_all();
        if first {
            tracing::info!(closed, "broadcast layer shut down");
        }
        closed
    }

    /// Wait for `signal`, then shut down. Meant for `with_graceful_shutdown`.
    pub fn shutdown_on<F>(&self, signal: F) -> impl Future<Output = ()> + Send + 'static
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cast = self.clone();
        async move {
            signal.await;
            cast.shutdown();
        }
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> &BroadcastMetrics {
        &self.inner.metrics
    }

    pub(crate) fn settings(&self) -> &BroadcastSettings {
        &self.inner.settings
    }

    pub(crate) fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.inner.registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn second_attach_is_fatal() {
        let cast = SessionCast::new(BroadcastSettings::default());
        let router: Router = Router::new();
        let router = cast.attach(router).expect("first attach");
        let err = cast.attach(router).expect_err("second attach");
        assert!(matches!(err, SessionCastError::DoubleAttach));
        assert!(err.is_fatal());
    }

    #[test]
    fn clones_share_the_attach_flag() {
        let cast = SessionCast::new(BroadcastSettings::default());
        let other = cast.clone();
        let _ = cast.attach(Router::<()>::new()).expect("attach");
        assert!(other.attach(Router::<()>::new()).is_err());
    }

    #[test]
    fn publish_without_clients_reports_nothing() {
        let cast = SessionCast::new(BroadcastSettings::default());
        let report = cast
            .publish("session-update", &json!({"id": "S1", "room": "R2"}))
            .expect("publish");
        assert_eq!(report, DeliveryReport::default());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let cast = SessionCast::new(BroadcastSettings::default());
        assert_eq!(cast.shutdown(), 0);
        assert!(cast.is_draining());
        assert_eq!(cast.shutdown(), 0);
    }
}
