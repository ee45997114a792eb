//! Fundamental data types shared across the entire workspace.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Alias for price precision.
pub type Price = Decimal;
/// Alias for volume precision.
pub type Volume = Decimal;

/// Venues recognized by the server. `Smart` is the routing pseudo-exchange
/// used as the default for US equities.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Exchange {
    Smart,
    Nyse,
    Nasdaq,
    Arca,
    Amex,
    Idealpro,
    Otc,
}

impl Exchange {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Smart => "SMART",
            Self::Nyse => "NYSE",
            Self::Nasdaq => "NASDAQ",
            Self::Arca => "ARCA",
            Self::Amex => "AMEX",
            Self::Idealpro => "IDEALPRO",
            Self::Otc => "OTC",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "SMART" => Ok(Self::Smart),
            "NYSE" => Ok(Self::Nyse),
            "NASDAQ" => Ok(Self::Nasdaq),
            "ARCA" => Ok(Self::Arca),
            "AMEX" => Ok(Self::Amex),
            "IDEALPRO" => Ok(Self::Idealpro),
            "OTC" => Ok(Self::Otc),
            other => Err(format!("unknown exchange '{other}'")),
        }
    }
}

/// Direction of an order or position.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Returns the opposite direction.
    #[must_use]
    pub fn inverse(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }
}

/// Wire-level order action as typed by a terminal user. `Sell` is resolved
/// against the current position by the router; `Short`/`Cover` bypass that
/// check.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
    Short,
    Cover,
}

/// Order execution style.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Market => "MARKET",
            Self::Limit => "LIMIT",
            Self::Stop => "STOP",
            Self::StopLimit => "STOP_LIMIT",
        };
        f.write_str(label)
    }
}

/// Time-in-force constraint. The server default is good-til-cancelled.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeInForce {
    Day,
    #[default]
    Gtc,
}

/// Lifecycle status of an order as tracked by the OMS.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Submitting,
    NotTraded,
    PartTraded,
    AllTraded,
    Cancelled,
    Rejected,
}

impl Status {
    /// An order is active while the broker may still fill it.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Submitting | Self::NotTraded | Self::PartTraded)
    }

    /// Terminal statuses admit no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

/// Instrument families the registry distinguishes.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetClass {
    #[default]
    Equity,
    Etf,
    Fx,
    Commodity,
    Option,
}

impl AssetClass {
    /// ETFs trade exactly like common stock for lookup purposes.
    #[must_use]
    pub fn is_equity_like(self) -> bool {
        matches!(self, Self::Equity | Self::Etf)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equity => "EQUITY",
            Self::Etf => "ETF",
            Self::Fx => "FX",
            Self::Commodity => "COMMODITY",
            Self::Option => "OPTION",
        }
    }
}

impl FromStr for AssetClass {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "EQUITY" | "STOCK" | "STK" => Ok(Self::Equity),
            "ETF" => Ok(Self::Etf),
            "FX" | "CASH" => Ok(Self::Fx),
            "COMMODITY" | "CMDTY" => Ok(Self::Commodity),
            "OPTION" | "OPT" => Ok(Self::Option),
            other => Err(format!("unknown asset class '{other}'")),
        }
    }
}

/// Option greeks attached to a tick when the instrument is an option.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct OptionGreeks {
    pub implied_vol: Option<f64>,
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub vega: Option<f64>,
    pub theta: Option<f64>,
}

/// Latest market data snapshot for one instrument. Built incrementally from
/// partial broker callbacks, so every field except the identity is optional.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct TickData {
    pub symbol: String,
    #[serde(default)]
    pub exchange: Option<Exchange>,
    pub last: Option<Price>,
    pub bid: Option<Price>,
    pub ask: Option<Price>,
    pub bid_size: Option<Volume>,
    pub ask_size: Option<Volume>,
    pub volume: Option<Volume>,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub extra: Option<OptionGreeks>,
}

impl TickData {
    #[must_use]
    pub fn vt_symbol(&self) -> String {
        vt_symbol(&self.symbol, self.exchange.unwrap_or(Exchange::Smart))
    }
}

/// Immutable order snapshot dispatched through the event bus. Updates are
/// produced as fresh values; a dispatched order is never mutated in place.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OrderData {
    pub account_alias: String,
    pub orderid: String,
    pub symbol: String,
    pub exchange: Exchange,
    pub direction: Direction,
    pub order_type: OrderType,
    pub volume: Volume,
    pub price: Option<Price>,
    pub stop_price: Option<Price>,
    pub traded: Volume,
    pub status: Status,
    pub tif: TimeInForce,
    pub timestamp: DateTime<Utc>,
}

impl OrderData {
    #[must_use]
    pub fn vt_orderid(&self) -> String {
        format!("{}.{}", self.account_alias, self.orderid)
    }

    #[must_use]
    pub fn vt_symbol(&self) -> String {
        vt_symbol(&self.symbol, self.exchange)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// A single fill. Append-only; fills never retract.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TradeData {
    pub account_alias: String,
    pub tradeid: String,
    pub orderid: String,
    pub symbol: String,
    pub exchange: Exchange,
    pub direction: Direction,
    pub price: Price,
    pub volume: Volume,
    pub timestamp: DateTime<Utc>,
}

impl TradeData {
    #[must_use]
    pub fn vt_tradeid(&self) -> String {
        format!("{}.{}", self.account_alias, self.tradeid)
    }

    #[must_use]
    pub fn vt_orderid(&self) -> String {
        format!("{}.{}", self.account_alias, self.orderid)
    }
}

/// Identity of a position row in the OMS cache.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct PositionKey {
    pub account_alias: String,
    pub symbol: String,
    pub direction: Direction,
}

/// Broker-reported position snapshot. The server stores the last push; it
/// never derives positions from fills.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PositionData {
    pub account_alias: String,
    pub symbol: String,
    pub direction: Direction,
    pub volume: Volume,
    pub price: Price,
    pub pnl: Price,
    pub frozen: Volume,
}

impl PositionData {
    #[must_use]
    pub fn key(&self) -> PositionKey {
        PositionKey {
            account_alias: self.account_alias.clone(),
            symbol: self.symbol.clone(),
            direction: self.direction,
        }
    }
}

/// Broker-reported account balance snapshot.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AccountData {
    pub account_alias: String,
    pub balance: Price,
    pub available: Price,
    pub currency: String,
}

impl AccountData {
    /// Balance committed to margin or open orders.
    #[must_use]
    pub fn frozen(&self) -> Price {
        self.balance - self.available
    }
}

/// Tradable instrument metadata, produced at connect time and on demand.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ContractData {
    pub symbol: String,
    pub exchange: Exchange,
    pub product: AssetClass,
    pub min_volume: Volume,
    pub price_tick: Price,
    pub currency: String,
}

impl ContractData {
    #[must_use]
    pub fn vt_symbol(&self) -> String {
        vt_symbol(&self.symbol, self.exchange)
    }
}

/// Severity of a log event published on the bus.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Operator-facing log line forwarded to RPC subscribers.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct LogData {
    pub msg: String,
    pub level: LogLevel,
    pub source: String,
}

/// Market data subscription descriptor.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct SubscribeRequest {
    pub symbol: String,
    pub exchange: Exchange,
}

impl SubscribeRequest {
    #[must_use]
    pub fn vt_symbol(&self) -> String {
        vt_symbol(&self.symbol, self.exchange)
    }
}

/// Bar (OHLC) stream subscription descriptor.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct BarSubscribeRequest {
    pub symbol: String,
    pub exchange: Exchange,
    /// Restrict aggregation to regular trading hours.
    pub use_rth: bool,
}

impl BarSubscribeRequest {
    #[must_use]
    pub fn vt_symbol(&self) -> String {
        vt_symbol(&self.symbol, self.exchange)
    }
}

/// Adapter-facing order placement parameters, produced by the router after
/// symbol resolution and policy checks.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub exchange: Exchange,
    pub direction: Direction,
    pub order_type: OrderType,
    pub volume: Volume,
    pub price: Option<Price>,
    pub stop_price: Option<Price>,
    pub tif: TimeInForce,
}

impl OrderRequest {
    /// Materialize the local order snapshot an adapter caches and emits
    /// before the network send.
    #[must_use]
    pub fn create_order_data(&self, account_alias: &str, orderid: String) -> OrderData {
        OrderData {
            account_alias: account_alias.to_string(),
            orderid,
            symbol: self.symbol.clone(),
            exchange: self.exchange,
            direction: self.direction,
            order_type: self.order_type,
            volume: self.volume,
            price: self.price,
            stop_price: self.stop_price,
            traded: Volume::ZERO,
            status: Status::Submitting,
            tif: self.tif,
            timestamp: Utc::now(),
        }
    }
}

/// Order cancellation parameters.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CancelRequest {
    pub orderid: String,
    pub symbol: String,
    pub exchange: Exchange,
}

/// Wire-level order input accepted by the RPC surface before routing.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OrderIntent {
    pub account_alias: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub qty: Volume,
    pub limit_price: Option<Price>,
    pub stop_price: Option<Price>,
    #[serde(default)]
    pub tif: TimeInForce,
}

/// Contract details lookup filter. The default filter is the US equity
/// shape: SMART-routed, USD.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ContractQuery {
    pub symbol: String,
    pub exchange: Exchange,
    pub currency: String,
    pub asset_class: AssetClass,
}

impl ContractQuery {
    /// US + SMART + USD equity filter.
    #[must_use]
    pub fn equity(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: Exchange::Smart,
            currency: "USD".to_string(),
            asset_class: AssetClass::Equity,
        }
    }
}

/// One match returned by a broker contract-details request.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ContractDetails {
    pub conid: i64,
    pub symbol: String,
    pub exchange: Exchange,
    pub currency: String,
    pub asset_class: AssetClass,
    pub description: Option<String>,
    pub min_volume: Volume,
    pub price_tick: Price,
}

impl ContractDetails {
    /// Convert a details row into the canonical contract entity.
    #[must_use]
    pub fn to_contract(&self) -> ContractData {
        ContractData {
            symbol: self.symbol.clone(),
            exchange: self.exchange,
            product: self.asset_class,
            min_volume: self.min_volume,
            price_tick: self.price_tick,
            currency: self.currency.clone(),
        }
    }
}

/// Internal routing key: `"{symbol}.{exchange}"`.
#[must_use]
pub fn vt_symbol(symbol: &str, exchange: Exchange) -> String {
    format!("{symbol}.{exchange}")
}

/// Split a `vt_orderid` into `(account_alias, broker_orderid)`.
#[must_use]
pub fn split_vt_orderid(vt_orderid: &str) -> Option<(&str, &str)> {
    vt_orderid.split_once('.')
}
