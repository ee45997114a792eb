//! JSON message protocol spoken over the length-delimited broker socket.
//!
//! Loosely typed broker payloads become tagged variants at this boundary;
//! nothing outside the adapter touches raw frames.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Informational error codes that signal a market-data farm came (back)
/// online. They are not failures; the adapter replays its subscriptions.
pub const DATA_FARM_CODES: [i64; 3] = [2104, 2106, 2158];

/// Partial tick fields delivered by the broker.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TickField {
    Last,
    Bid,
    Ask,
    BidSize,
    AskSize,
    Volume,
    LastTimestamp,
}

/// Client → broker messages.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Outbound {
    #[serde(rename_all = "camelCase")]
    StartApi { client_id: i64 },
    #[serde(rename_all = "camelCase")]
    ReqMktData {
        req_id: i64,
        conid: i64,
        symbol: String,
        exchange: String,
        currency: String,
    },
    #[serde(rename_all = "camelCase")]
    CancelMktData { req_id: i64 },
    #[serde(rename_all = "camelCase")]
    ReqRealTimeBars {
        req_id: i64,
        conid: i64,
        use_rth: bool,
    },
    #[serde(rename_all = "camelCase")]
    CancelRealTimeBars { req_id: i64 },
    #[serde(rename_all = "camelCase")]
    PlaceOrder {
        order_id: i64,
        conid: i64,
        symbol: String,
        exchange: String,
        action: String,
        order_type: String,
        total_quantity: Decimal,
        lmt_price: Option<Decimal>,
        aux_price: Option<Decimal>,
        tif: String,
    },
    #[serde(rename_all = "camelCase")]
    CancelOrder { order_id: i64 },
    #[serde(rename_all = "camelCase")]
    ReqContractDetails {
        req_id: i64,
        symbol: String,
        sec_type: String,
        exchange: String,
        currency: String,
    },
    ReqAccountSummary,
    ReqPositions,
    ReqOpenOrders,
}

/// Broker → client messages.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Inbound {
    #[serde(rename_all = "camelCase")]
    TickPrice {
        req_id: i64,
        field: TickField,
        price: Decimal,
    },
    #[serde(rename_all = "camelCase")]
    TickSize {
        req_id: i64,
        field: TickField,
        size: Decimal,
    },
    #[serde(rename_all = "camelCase")]
    TickString {
        req_id: i64,
        field: TickField,
        value: String,
    },
    #[serde(rename_all = "camelCase")]
    TickOptionComputation {
        req_id: i64,
        implied_vol: Option<f64>,
        delta: Option<f64>,
        gamma: Option<f64>,
        vega: Option<f64>,
        theta: Option<f64>,
    },
    #[serde(rename_all = "camelCase")]
    OrderStatus {
        order_id: i64,
        status: String,
        filled: Decimal,
    },
    #[serde(rename_all = "camelCase")]
    OpenOrder {
        order_id: i64,
        conid: i64,
        symbol: String,
        exchange: String,
        action: String,
        order_type: String,
        total_quantity: Decimal,
        lmt_price: Option<Decimal>,
        aux_price: Option<Decimal>,
        tif: String,
    },
    #[serde(rename_all = "camelCase")]
    ExecDetails {
        exec_id: String,
        order_id: i64,
        conid: i64,
        symbol: String,
        side: String,
        price: Decimal,
        shares: Decimal,
        time_ms: i64,
    },
    #[serde(rename_all = "camelCase")]
    ContractDetailsRow {
        req_id: i64,
        conid: i64,
        symbol: String,
        sec_type: String,
        exchange: String,
        currency: String,
        long_name: Option<String>,
        min_tick: Decimal,
        min_size: Decimal,
    },
    #[serde(rename_all = "camelCase")]
    ContractDetailsEnd { req_id: i64 },
    #[serde(rename_all = "camelCase")]
    AccountSummary {
        account: String,
        net_liquidation: Decimal,
        available_funds: Decimal,
        currency: String,
    },
    #[serde(rename_all = "camelCase")]
    PositionRow {
        account: String,
        conid: i64,
        symbol: String,
        position: Decimal,
        avg_cost: Decimal,
        unrealized_pnl: Decimal,
    },
    PositionEnd,
    #[serde(rename_all = "camelCase")]
    ErrorMsg {
        req_id: i64,
        code: i64,
        message: String,
    },
}
