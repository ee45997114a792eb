//! Broker-agnostic order routing: OrderIntent → resolved broker order.

use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use janus_broker::{BrokerGateway, BrokerKind, GatewayError};
use janus_core::{
    Direction, Exchange, OrderIntent, OrderRequest, OrderSide, OrderType, TimeInForce,
};
use janus_oms::OmsCache;
use janus_registry::{
    auto_fill_ib_conid, auto_fill_webull_ticker, normalize, RegistryError, SymbolRegistry,
};

/// Routing failures surfaced synchronously to the caller.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("unknown account '{0}'")]
    UnknownAccount(String),
    #[error("invalid intent: {0}")]
    InvalidIntent(String),
    #[error("broker cannot express {0} orders")]
    CapabilityUnsupported(OrderType),
    #[error("short selling is not enabled for account '{0}'")]
    ShortNotAllowed(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Stateless pipeline over the registry and the OMS position view.
pub struct OrderRouter {
    registry: Arc<SymbolRegistry>,
    oms: Arc<OmsCache>,
}

impl OrderRouter {
    #[must_use]
    pub fn new(registry: Arc<SymbolRegistry>, oms: Arc<OmsCache>) -> Self {
        Self { registry, oms }
    }

    /// Validate, resolve, and dispatch one intent. Returns the new
    /// `vt_orderid`; every rejection carries a human-readable reason.
    pub async fn route(
        &self,
        gateway: &Arc<dyn BrokerGateway>,
        allow_short: bool,
        auto_fill: bool,
        intent: &OrderIntent,
    ) -> Result<String, RouterError> {
        let canonical = normalize(&intent.symbol);
        validate_intent(intent)?;

        // Gate unsupported order types before any broker lookup can fire.
        if !gateway.supports(intent.order_type) {
            return Err(RouterError::CapabilityUnsupported(intent.order_type));
        }

        self.resolve_broker_id(gateway, auto_fill, &canonical).await?;

        let direction = self.resolve_direction(
            &intent.account_alias,
            &canonical,
            intent.side,
            allow_short,
        )?;

        let request = OrderRequest {
            symbol: canonical,
            exchange: Exchange::Smart,
            direction,
            order_type: intent.order_type,
            volume: intent.qty,
            price: intent.limit_price,
            stop_price: intent.stop_price,
            tif: intent.tif,
        };
        debug!(
            account = %intent.account_alias,
            symbol = %request.symbol,
            ?direction,
            order_type = %request.order_type,
            "routing order"
        );
        Ok(gateway.send_order(request).await?)
    }

    async fn resolve_broker_id(
        &self,
        gateway: &Arc<dyn BrokerGateway>,
        auto_fill: bool,
        canonical: &str,
    ) -> Result<(), RouterError> {
        let entry = self.registry.lookup_by_canonical(canonical);
        let has_id = match (gateway.broker_kind(), &entry) {
            (BrokerKind::Ib, Some(entry)) => entry.ib_conid.is_some(),
            (BrokerKind::Webull, Some(entry)) => entry.webull_ticker.is_some(),
            (_, None) => false,
        };
        if has_id {
            return Ok(());
        }
        if !auto_fill {
            return Err(RegistryError::Miss(canonical.to_string()).into());
        }
        match gateway.broker_kind() {
            BrokerKind::Ib => {
                auto_fill_ib_conid(&self.registry, gateway.as_ref(), canonical).await?;
            }
            BrokerKind::Webull => {
                auto_fill_webull_ticker(&self.registry, gateway.as_ref(), canonical).await?;
            }
        }
        Ok(())
    }

    /// Short-sale policy. `sell` consults the current net position;
    /// explicit `short`/`cover` bypass the check.
    fn resolve_direction(
        &self,
        account_alias: &str,
        symbol: &str,
        side: OrderSide,
        allow_short: bool,
    ) -> Result<Direction, RouterError> {
        match side {
            OrderSide::Buy | OrderSide::Cover => Ok(Direction::Long),
            OrderSide::Short => Ok(Direction::Short),
            OrderSide::Sell => {
                let net = self.oms.net_position(account_alias, symbol);
                if net > Decimal::ZERO {
                    Ok(Direction::Long)
                } else if net < Decimal::ZERO {
                    Ok(Direction::Short)
                } else if allow_short {
                    Ok(Direction::Short)
                } else {
                    Err(RouterError::ShortNotAllowed(account_alias.to_string()))
                }
            }
        }
    }
}

fn validate_intent(intent: &OrderIntent) -> Result<(), RouterError> {
    if intent.qty <= Decimal::ZERO {
        return Err(RouterError::InvalidIntent("quantity must be positive".into()));
    }
    match intent.order_type {
        OrderType::Limit if intent.limit_price.is_none() => Err(RouterError::InvalidIntent(
            "limit order requires a price".into(),
        )),
        OrderType::Stop if intent.stop_price.is_none() => Err(RouterError::InvalidIntent(
            "stop order requires a stop price".into(),
        )),
        OrderType::StopLimit
            if intent.limit_price.is_none() || intent.stop_price.is_none() =>
        {
            Err(RouterError::InvalidIntent(
                "stop-limit order requires stop and limit prices".into(),
            ))
        }
        _ => Ok(()),
    }
}

/// Build an [`OrderIntent`] from terminal command vocabulary: no price
/// means market, a price means limit; `bstop`/`sstop` raise stops.
pub fn parse_order_command(
    action: &str,
    account_alias: &str,
    symbol: &str,
    qty: Decimal,
    price: Option<Decimal>,
    stop: Option<Decimal>,
) -> Result<OrderIntent, RouterError> {
    let side = match action {
        "buy" | "bstop" => OrderSide::Buy,
        "sell" | "sstop" => OrderSide::Sell,
        "short" => OrderSide::Short,
        "cover" => OrderSide::Cover,
        other => {
            return Err(RouterError::InvalidIntent(format!(
                "unknown order action '{other}'"
            )))
        }
    };
    let (order_type, limit_price, stop_price) = match action {
        "bstop" | "sstop" => {
            let stop = stop.ok_or_else(|| {
                RouterError::InvalidIntent("stop command requires a stop price".into())
            })?;
            match price {
                Some(limit) => (OrderType::StopLimit, Some(limit), Some(stop)),
                None => (OrderType::Stop, None, Some(stop)),
            }
        }
        _ => match price {
            Some(limit) => (OrderType::Limit, Some(limit), None),
            None => (OrderType::Market, None, None),
        },
    };
    Ok(OrderIntent {
        account_alias: account_alias.to_string(),
        symbol: normalize(symbol),
        side,
        order_type,
        qty,
        limit_price,
        stop_price,
        tif: TimeInForce::Gtc,
    })
}
