//! Top-level facade crate for SessionCast.
//!
//! Re-exports the core types and the gateway library so hosting applications
//! can depend on a single crate.

pub mod core {
    pub use sessioncast_core::*;
}

pub mod gateway {
    pub use sessioncast_gateway::*;
}

pub use sessioncast_gateway::SessionCast;
