//! Server-side execution plane: event engine wiring, order routing,
//! harmony, and the RPC surface.

pub mod harmony;
pub mod router;
pub mod server;
pub mod service;

pub use harmony::run_harmony;
pub use router::{parse_order_command, OrderRouter, RouterError};
pub use server::{JanusServer, ServerCore};
pub use service::{wrap_registry_error, wrap_router_error, RpcHandler};
