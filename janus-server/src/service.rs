//! RPC request dispatch and error wrapping.

use std::sync::Arc;

use async_trait::async_trait;

use janus_registry::RegistryError;
use janus_rpc::{RequestHandler, RpcError, RpcRequest, RpcResponse};

use crate::router::RouterError;
use crate::server::ServerCore;

/// Bridges the wire protocol onto [`ServerCore`] operations.
pub struct RpcHandler {
    core: Arc<ServerCore>,
}

impl RpcHandler {
    #[must_use]
    pub fn new(core: Arc<ServerCore>) -> Self {
        Self { core }
    }
}

#[async_trait]
impl RequestHandler for RpcHandler {
    async fn handle(&self, request: RpcRequest) -> RpcResponse {
        match request {
            RpcRequest::SendOrderIntent(intent) => {
                match self.core.send_order_intent(&intent).await {
                    Ok(vt_orderid) => RpcResponse::OrderId(vt_orderid),
                    Err(err) => RpcResponse::Error(wrap_router_error(&err)),
                }
            }
            RpcRequest::CancelOrder { vt_orderid } => {
                match self.core.cancel_order(&vt_orderid).await {
                    Ok(()) => RpcResponse::Ack(format!("cancel requested for {vt_orderid}")),
                    Err(err) => RpcResponse::Error(wrap_router_error(&err)),
                }
            }
            RpcRequest::Sync => RpcResponse::Ack(self.core.sync_all()),
            RpcRequest::Harmony => match self.core.harmony().await {
                Ok(summary) => RpcResponse::Harmony(summary),
                Err(err) => RpcResponse::Error(wrap_registry_error(&err)),
            },
            RpcRequest::SubscribeBars {
                symbols,
                account,
                rth,
            } => match self
                .core
                .subscribe_bars(&symbols, account.as_deref(), rth)
                .await
            {
                Ok(()) => RpcResponse::Ack(format!("bars subscribed: {}", symbols.join(", "))),
                Err(err) => RpcResponse::Error(wrap_router_error(&err)),
            },
            RpcRequest::UnsubscribeBars { symbols, account } => match self
                .core
                .unsubscribe_bars(&symbols, account.as_deref())
                .await
            {
                Ok(()) => RpcResponse::Ack(format!("bars unsubscribed: {}", symbols.join(", "))),
                Err(err) => RpcResponse::Error(wrap_router_error(&err)),
            },
            RpcRequest::BrokerList => RpcResponse::Brokers(self.core.broker_list()),
            RpcRequest::Exit => {
                self.core.request_exit();
                RpcResponse::Ack("Server is shutting down...".to_string())
            }
        }
    }
}

/// Map router failures onto the wire-level `{code, message}` shape.
#[must_use]
pub fn wrap_router_error(err: &RouterError) -> RpcError {
    let code = match err {
        RouterError::Registry(inner) => registry_code(inner),
        RouterError::Gateway(inner) => gateway_code(inner),
        RouterError::CapabilityUnsupported(_) => "CapabilityUnsupported",
        RouterError::InvalidIntent(_) | RouterError::UnknownAccount(_) => "InvalidIntent",
        RouterError::ShortNotAllowed(_) => "ShortNotAllowed",
    };
    RpcError::new(code, err.to_string())
}

#[must_use]
pub fn wrap_registry_error(err: &RegistryError) -> RpcError {
    RpcError::new(registry_code(err), err.to_string())
}

fn registry_code(err: &RegistryError) -> &'static str {
    match err {
        RegistryError::Miss(_) => "RegistryMiss",
        RegistryError::Ambiguous { .. } => "RegistryAmbiguous",
        RegistryError::Conflict(_) | RegistryError::Store(_) => "RegistryStoreError",
        RegistryError::Gateway(inner) => gateway_code(inner),
    }
}

fn gateway_code(err: &janus_broker::GatewayError) -> &'static str {
    if err.is_permanent() {
        "BrokerPermanent"
    } else if err.is_transient() {
        "BrokerTransient"
    } else {
        "BrokerRejected"
    }
}
