//! Wire-level request/reply and publisher payloads.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use janus_core::OrderIntent;
use janus_events::{topic, Event};

/// Request methods exposed to terminal clients.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum RpcRequest {
    SendOrderIntent(OrderIntent),
    CancelOrder {
        vt_orderid: String,
    },
    Sync,
    Harmony,
    SubscribeBars {
        symbols: Vec<String>,
        #[serde(default)]
        account: Option<String>,
        #[serde(default)]
        rth: bool,
    },
    UnsubscribeBars {
        symbols: Vec<String>,
        #[serde(default)]
        account: Option<String>,
    },
    BrokerList,
    Exit,
}

/// Reply payloads; every core error is wrapped as `{code, message}`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "result", content = "value", rename_all = "snake_case")]
pub enum RpcResponse {
    OrderId(String),
    Ack(String),
    Harmony(HarmonySummary),
    Brokers(Vec<BrokerEntry>),
    Error(RpcError),
}

/// Outcome of one harmony run.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct HarmonySummary {
    pub filled: u32,
    pub skipped_ambiguous: u32,
    pub skipped_no_match: u32,
    pub errors: u32,
}

impl fmt::Display for HarmonySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "filled: {}, skipped: {}, errors: {}",
            self.filled,
            self.skipped_ambiguous + self.skipped_no_match,
            self.errors
        )
    }
}

/// One configured account in `broker list` output.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BrokerEntry {
    pub alias: String,
    pub broker: String,
    pub connected: bool,
    pub default: bool,
}

/// Serialized core error.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
}

impl RpcError {
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Request envelope carrying a correlation id.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RequestFrame {
    pub id: u64,
    pub request: RpcRequest,
}

/// Response envelope echoing the correlation id.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ResponseFrame {
    pub id: u64,
    pub response: RpcResponse,
}

/// One published event: topic plus a serialized entity snapshot.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PubFrame {
    pub topic: String,
    pub payload: Value,
}

/// Fan one bus event out into its base topic and per-key suffixed topic.
#[must_use]
pub fn event_frames(event: &Event) -> Vec<PubFrame> {
    fn frame(topic: impl Into<String>, payload: Value) -> PubFrame {
        PubFrame {
            topic: topic.into(),
            payload,
        }
    }

    match event {
        Event::Tick(tick) => {
            let payload = serde_json::to_value(tick).unwrap_or(Value::Null);
            vec![
                frame(topic::EVENT_TICK, payload.clone()),
                frame(format!("{}.{}", topic::EVENT_TICK, tick.vt_symbol()), payload),
            ]
        }
        Event::Order(order) => {
            let payload = serde_json::to_value(order).unwrap_or(Value::Null);
            vec![
                frame(topic::EVENT_ORDER, payload.clone()),
                frame(
                    format!("{}.{}", topic::EVENT_ORDER, order.vt_orderid()),
                    payload,
                ),
            ]
        }
        Event::Trade(trade) => {
            let payload = serde_json::to_value(trade).unwrap_or(Value::Null);
            vec![
                frame(topic::EVENT_TRADE, payload.clone()),
                frame(format!("{}.{}", topic::EVENT_TRADE, trade.symbol), payload),
            ]
        }
        Event::Position(position) => {
            let payload = serde_json::to_value(position).unwrap_or(Value::Null);
            vec![
                frame(topic::EVENT_POSITION, payload.clone()),
                frame(
                    format!("{}.{}", topic::EVENT_POSITION, position.symbol),
                    payload,
                ),
            ]
        }
        Event::Account(account) => {
            let payload = serde_json::to_value(account).unwrap_or(Value::Null);
            vec![
                frame(topic::EVENT_ACCOUNT, payload.clone()),
                frame(
                    format!("{}.{}", topic::EVENT_ACCOUNT, account.account_alias),
                    payload,
                ),
            ]
        }
        Event::Contract(contract) => {
            let payload = serde_json::to_value(contract).unwrap_or(Value::Null);
            vec![
                frame(topic::EVENT_CONTRACT, payload.clone()),
                frame(
                    format!("{}.{}", topic::EVENT_CONTRACT, contract.vt_symbol()),
                    payload,
                ),
            ]
        }
        Event::Log(log) => {
            let payload = serde_json::to_value(log).unwrap_or(Value::Null);
            vec![frame(topic::EVENT_LOG, payload)]
        }
        Event::Timer(at) => {
            let payload = serde_json::to_value(at).unwrap_or(Value::Null);
            vec![frame(topic::EVENT_TIMER, payload)]
        }
    }
}
