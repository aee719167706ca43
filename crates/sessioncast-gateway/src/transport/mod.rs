//! Transport layer (WebSocket).
//!
//! Bridges axum's HTTP upgrade onto registry-tracked connections.

pub mod ws;
