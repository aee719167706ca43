//! SessionCast gateway library entry.
//!
//! Realtime broadcast layer for the session catalog: the registry of live
//! WebSocket clients, the fan-out hub, the axum transport adapter, and the
//! `SessionCast` facade that ties them together. Consumed by the binary
//! (`main.rs`) and by hosting applications that own their own router.

pub mod config;
pub mod obs;
pub mod ops;
pub mod realtime;
pub mod router;
pub mod service;
pub mod transport;

pub use config::BroadcastSettings;
pub use realtime::DeliveryReport;
pub use service::SessionCast;
