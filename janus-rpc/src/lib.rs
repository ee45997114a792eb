//! Request/reply + publish/subscribe wire layer between the server and
//! terminal clients. Mirrors the two-socket model: one address answers
//! requests, a second streams tagged event snapshots with the timer event
//! doubling as the heartbeat.

pub mod client;
pub mod messages;
pub mod transport;

pub use client::{EventSubscription, RpcClient, RpcClientError};
pub use messages::{
    event_frames, BrokerEntry, HarmonySummary, PubFrame, RequestFrame, ResponseFrame, RpcError,
    RpcRequest, RpcResponse,
};
pub use transport::{spawn_publish_listener, spawn_request_listener, Publisher, RequestHandler};
