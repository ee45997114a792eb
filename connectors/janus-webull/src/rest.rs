//! Blocking HTTP trade API.
//!
//! The broker SDK is synchronous; every call here blocks and is therefore
//! dispatched through the worker pool by the gateway, never run on the
//! event-bus worker or an async task directly.

use std::time::Duration;

use reqwest::blocking::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use janus_broker::{GatewayError, GatewayResult};

/// Parsed account balance snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct BalanceInfo {
    pub balance: Decimal,
    pub available: Decimal,
    pub currency: String,
}

/// Parsed position row. Quantity is signed; negative means short.
#[derive(Clone, Debug, PartialEq)]
pub struct PositionInfo {
    pub ticker: String,
    pub quantity: Decimal,
    pub avg_cost: Decimal,
    pub unrealized_pnl: Decimal,
}

/// Parsed open-order row.
#[derive(Clone, Debug, PartialEq)]
pub struct OpenOrderInfo {
    pub order_id: String,
    pub client_order_id: Option<String>,
    pub ticker: String,
    pub side: String,
    pub order_type: String,
    pub quantity: Decimal,
    pub filled_qty: Decimal,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub tif: String,
    pub status: String,
}

/// Order placement payload in broker vocabulary.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct PlaceOrder {
    pub client_order_id: String,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub quantity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<String>,
    pub time_in_force: String,
}

/// Acknowledgement for a placed order.
#[derive(Clone, Debug, PartialEq)]
pub struct PlacedAck {
    pub order_id: String,
}

/// Instrument search hit.
#[derive(Clone, Debug, PartialEq)]
pub struct InstrumentInfo {
    pub ticker: String,
    pub name: Option<String>,
}

/// Synchronous trade API surface. The HTTP client implements it; tests
/// inject stubs the same way the upstream SDK client is injected.
pub trait WebullTradeApi: Send + Sync {
    fn account_balance(&self) -> GatewayResult<BalanceInfo>;

    fn positions(&self) -> GatewayResult<Vec<PositionInfo>>;

    fn open_orders(&self) -> GatewayResult<Vec<OpenOrderInfo>>;

    fn place_order(&self, order: PlaceOrder) -> GatewayResult<PlacedAck>;

    fn cancel_order(&self, order_id: &str) -> GatewayResult<()>;

    fn lookup_instrument(&self, ticker: &str) -> GatewayResult<Vec<InstrumentInfo>>;
}

/// HTTP client settings.
#[derive(Clone, Debug)]
pub struct WebullHttpConfig {
    pub base_url: String,
    pub app_key: String,
    pub app_secret: String,
    pub account_id: String,
    pub timeout: Duration,
}

/// Thin wrapper over the broker's REST endpoints.
pub struct WebullHttpClient {
    http: Client,
    config: WebullHttpConfig,
}

impl WebullHttpClient {
    pub fn new(config: WebullHttpConfig) -> GatewayResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn get<T>(&self, path: &str) -> GatewayResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .http
            .get(self.url(path))
            .query(&[("account_id", self.config.account_id.as_str())])
            .header("x-app-key", &self.config.app_key)
            .header("x-app-secret", &self.config.app_secret)
            .send()
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        Self::decode(response)
    }

    fn post<B, T>(&self, path: &str, body: &B) -> GatewayResult<T>
    where
        B: Serialize,
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .http
            .post(self.url(path))
            .query(&[("account_id", self.config.account_id.as_str())])
            .header("x-app-key", &self.config.app_key)
            .header("x-app-secret", &self.config.app_secret)
            .json(body)
            .send()
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        Self::decode(response)
    }

    fn decode<T>(response: reqwest::blocking::Response) -> GatewayResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(GatewayError::Authentication(format!(
                "broker returned {status}"
            )));
        }
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(GatewayError::Broker(format!("{status}: {text}")));
        }
        response
            .json::<T>()
            .map_err(|err| GatewayError::Serialization(err.to_string()))
    }
}

#[derive(Deserialize)]
struct BalancePayload {
    total_net_liquidation_value: Decimal,
    total_cash_balance: Decimal,
    #[serde(default = "default_currency")]
    currency: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    #[serde(default)]
    data: Vec<T>,
}

#[derive(Deserialize, Default)]
struct PositionPayload {
    ticker: TickerPayload,
    position: Decimal,
    #[serde(rename = "costPrice")]
    cost_price: Decimal,
    #[serde(rename = "unrealizedProfitLoss", default)]
    unrealized_pnl: Decimal,
}

#[derive(Deserialize, Default)]
struct TickerPayload {
    symbol: String,
}

#[derive(Deserialize, Default)]
struct OpenOrderPayload {
    #[serde(rename = "orderId")]
    order_id: String,
    #[serde(rename = "clientOrderId", default)]
    client_order_id: Option<String>,
    symbol: String,
    side: String,
    #[serde(rename = "orderType")]
    order_type: String,
    quantity: Decimal,
    #[serde(rename = "filledQty", default)]
    filled_qty: Decimal,
    #[serde(rename = "limitPrice", default)]
    limit_price: Option<Decimal>,
    #[serde(rename = "stopPrice", default)]
    stop_price: Option<Decimal>,
    #[serde(rename = "timeInForce", default = "default_tif")]
    tif: String,
    #[serde(default)]
    status: String,
}

fn default_tif() -> String {
    "GTC".to_string()
}

#[derive(Deserialize, Default)]
struct PlacedPayload {
    #[serde(rename = "orderId")]
    order_id: String,
}

#[derive(Deserialize, Default)]
struct InstrumentPayload {
    symbol: String,
    #[serde(default)]
    name: Option<String>,
}

impl WebullTradeApi for WebullHttpClient {
    fn account_balance(&self) -> GatewayResult<BalanceInfo> {
        let payload: BalancePayload = self.get("/openapi/account/balance")?;
        Ok(BalanceInfo {
            balance: payload.total_net_liquidation_value,
            available: payload.total_cash_balance,
            currency: payload.currency,
        })
    }

    fn positions(&self) -> GatewayResult<Vec<PositionInfo>> {
        let payload: DataEnvelope<PositionPayload> = self.get("/openapi/account/positions")?;
        Ok(payload
            .data
            .into_iter()
            .map(|row| PositionInfo {
                ticker: row.ticker.symbol,
                quantity: row.position,
                avg_cost: row.cost_price,
                unrealized_pnl: row.unrealized_pnl,
            })
            .collect())
    }

    fn open_orders(&self) -> GatewayResult<Vec<OpenOrderInfo>> {
        let payload: DataEnvelope<OpenOrderPayload> = self.get("/openapi/trade/orders/open")?;
        Ok(payload
            .data
            .into_iter()
            .map(|row| OpenOrderInfo {
                order_id: row.order_id,
                client_order_id: row.client_order_id,
                ticker: row.symbol,
                side: row.side,
                order_type: row.order_type,
                quantity: row.quantity,
                filled_qty: row.filled_qty,
                limit_price: row.limit_price,
                stop_price: row.stop_price,
                tif: row.tif,
                status: row.status,
            })
            .collect())
    }

    fn place_order(&self, order: PlaceOrder) -> GatewayResult<PlacedAck> {
        let payload: DataEnvelope<PlacedPayload> =
            self.post("/openapi/trade/orders/place", &order)?;
        let first = payload
            .data
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Broker("place order returned no order id".into()))?;
        Ok(PlacedAck {
            order_id: first.order_id,
        })
    }

    fn cancel_order(&self, order_id: &str) -> GatewayResult<()> {
        let _: serde_json::Value = self.post(
            "/openapi/trade/orders/cancel",
            &serde_json::json!({ "order_id": order_id }),
        )?;
        Ok(())
    }

    fn lookup_instrument(&self, ticker: &str) -> GatewayResult<Vec<InstrumentInfo>> {
        let payload: DataEnvelope<InstrumentPayload> =
            self.get(&format!("/openapi/instrument/search?symbol={ticker}"))?;
        Ok(payload
            .data
            .into_iter()
            .map(|row| InstrumentInfo {
                ticker: row.symbol,
                name: row.name,
            })
            .collect())
    }
}
