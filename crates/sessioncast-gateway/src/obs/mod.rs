//! Lightweight in-process metrics.
//!
//! Prometheus-compatible text exposition built on atomics and `DashMap`,
//! rendered by the `/metrics` handler.

pub mod metrics;

pub use metrics::BroadcastMetrics;
