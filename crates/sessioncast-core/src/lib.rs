//! SessionCast core: transport-agnostic event primitives and error types.
//!
//! This crate defines the outbound wire envelope and the error surface shared
//! by the gateway and by anything that produces events. It carries no
//! transport or runtime dependencies.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. All fallible paths
//! surface as `SessionCastError`/`Result`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{ErrorKind, Result, SessionCastError};
pub use protocol::event::{Envelope, Event};
