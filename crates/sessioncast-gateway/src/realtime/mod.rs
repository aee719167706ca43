//! Realtime broadcast core.
//!
//! `ConnectionRegistry` tracks who is reachable, `BroadcastHub` fans events
//! out to them. Both are owned by one `SessionCast` instance.

pub mod hub;
pub mod registry;

pub use hub::{BroadcastHub, DeliveryReport};
pub use registry::{Admission, CloseObserver, ConnId, ConnState, Connection, ConnectionRegistry};
