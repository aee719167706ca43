//! Outbound protocol.
//!
//! A single lane: every delivered message is one text frame holding a JSON
//! envelope `{"topic": ..., "payload": ...}`. No client-to-server protocol
//! exists.

pub mod event;
