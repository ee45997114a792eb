//! Broker-agnostic traits used by the rest of the server.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use janus_core::{
    BarSubscribeRequest, CancelRequest, ContractDetails, ContractQuery, OrderRequest, OrderType,
    SubscribeRequest,
};

/// Convenience alias for gateway results.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Common error type returned by broker adapters.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport-level failures (socket, HTTP, timeouts at the wire).
    #[error("transport error: {0}")]
    Transport(String),
    /// Credentials rejected or missing; operator action required.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// The request is invalid for the target broker.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The broker responded with a business error.
    #[error("broker error: {0}")]
    Broker(String),
    /// A bounded wait elapsed without a completion.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The adapter has no live session.
    #[error("gateway not connected")]
    NotConnected,
}

impl GatewayError {
    /// Transient errors are recovered by the adapter's reconnect loop and
    /// only surface to order callers as a send-time failure.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout(_) | Self::NotConnected
        )
    }

    /// Permanent errors stop the relevant subsystem until an operator acts.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

/// Broker families the server can route to.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    Ib,
    Webull,
}

impl fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ib => f.write_str("ib"),
            Self::Webull => f.write_str("webull"),
        }
    }
}

/// Capability surface every broker adapter implements.
///
/// Universal preconditions: methods return promptly (no blocking network
/// I/O on the caller's thread); all side effects surface as events on the
/// bus; `connect` performs a first snapshot burst of account, positions,
/// open orders, and contracts.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Name under which this account's adapter is registered.
    fn alias(&self) -> &str;

    fn broker_kind(&self) -> BrokerKind;

    /// Whether the adapter currently holds a live session.
    fn connected(&self) -> bool;

    /// Order types the broker can express natively. The router rejects
    /// anything outside this set; nothing is silently downgraded.
    fn capabilities(&self) -> &'static [OrderType];

    fn supports(&self, order_type: OrderType) -> bool {
        self.capabilities().contains(&order_type)
    }

    async fn connect(&self) -> GatewayResult<()>;

    async fn close(&self);

    async fn subscribe(&self, req: SubscribeRequest) -> GatewayResult<()>;

    async fn unsubscribe(&self, req: SubscribeRequest) -> GatewayResult<()>;

    async fn subscribe_bars(&self, req: BarSubscribeRequest) -> GatewayResult<()>;

    async fn unsubscribe_bars(&self, req: BarSubscribeRequest) -> GatewayResult<()>;

    /// Dispatch an order. Emits a SUBMITTING order event before returning
    /// and returns the new `vt_orderid`.
    async fn send_order(&self, req: OrderRequest) -> GatewayResult<String>;

    async fn cancel_order(&self, req: CancelRequest) -> GatewayResult<()>;

    async fn query_account(&self) -> GatewayResult<()>;

    async fn query_position(&self) -> GatewayResult<()>;

    async fn query_open_orders(&self) -> GatewayResult<()>;

    /// Resolve contract metadata with a bounded timeout. A timeout yields
    /// an empty result, which registry callers treat as no match.
    async fn request_contract_details(
        &self,
        query: ContractQuery,
    ) -> GatewayResult<Vec<ContractDetails>>;

    /// Snapshot refresh across account, positions, and open orders.
    async fn sync_snapshots(&self) -> GatewayResult<()> {
        self.query_account().await?;
        self.query_position().await?;
        self.query_open_orders().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_permanent_are_disjoint() {
        let transient = [
            GatewayError::Transport("reset".into()),
            GatewayError::Timeout(Duration::from_secs(5)),
            GatewayError::NotConnected,
        ];
        for err in &transient {
            assert!(err.is_transient());
            assert!(!err.is_permanent());
        }
        let auth = GatewayError::Authentication("bad key".into());
        assert!(auth.is_permanent());
        assert!(!auth.is_transient());
    }

    #[test]
    fn broker_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&BrokerKind::Ib).unwrap(), "\"ib\"");
        assert_eq!(
            serde_json::to_string(&BrokerKind::Webull).unwrap(),
            "\"webull\""
        );
    }
}
