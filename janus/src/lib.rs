#![allow(ambiguous_glob_reexports)]

//! Janus aggregate crate that re-exports the main components for
//! downstream users.

pub use janus_broker as broker;
pub use janus_config as config;
pub use janus_core as core;
pub use janus_events as events;
pub use janus_ib as ib;
pub use janus_oms as oms;
pub use janus_registry as registry;
pub use janus_rpc as rpc;
pub use janus_webull as webull;

/// Convenience prelude to pull commonly used items into scope.
pub mod prelude {
    pub use janus_broker::*;
    pub use janus_config::*;
    pub use janus_core::*;
    pub use janus_events::*;
    pub use janus_ib::*;
    pub use janus_oms::*;
    pub use janus_registry::*;
    pub use janus_rpc::*;
    pub use janus_webull::*;
}
