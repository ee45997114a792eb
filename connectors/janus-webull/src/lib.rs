//! Broker-A adapter: synchronous HTTP SDK driven from a worker pool, plus
//! a per-account trade-events streaming thread.
//!
//! Gateway methods never block the caller's thread on HTTP; every SDK call
//! goes through `spawn_blocking`. Stream callbacks clone the cached order,
//! apply the delta, store the new value, and emit the clone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::warn;
use uuid::Uuid;

use janus_broker::{BrokerGateway, BrokerKind, GatewayError, GatewayResult};
use janus_core::{
    AccountData, BarSubscribeRequest, CancelRequest, ContractData, ContractDetails, ContractQuery,
    Direction, Exchange, LogLevel, OrderData, OrderRequest, OrderType, PositionData, Status,
    SubscribeRequest, TimeInForce, Volume,
};
use janus_events::EventSender;
use janus_registry::SymbolRegistry;

mod rest;
mod trade_events;

pub use rest::{
    BalanceInfo, InstrumentInfo, OpenOrderInfo, PlaceOrder, PlacedAck, PositionInfo,
    WebullHttpClient, WebullHttpConfig, WebullTradeApi,
};
pub use trade_events::{
    control_decision, OrderEventPayload, ReconnectConfig, ReconnectPolicy, StreamDecision,
    StreamMessage,
};

const CAPABILITIES: &[OrderType] = &[
    OrderType::Market,
    OrderType::Limit,
    OrderType::Stop,
    OrderType::StopLimit,
];

/// Adapter settings for one broker-A account.
#[derive(Clone, Debug)]
pub struct WebullConfig {
    pub account_id: String,
    /// Trade-events stream endpoint; `None` disables streaming.
    pub stream_url: Option<String>,
    /// Snapshot refresh coalescing window.
    pub refresh_debounce: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for WebullConfig {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            stream_url: None,
            refresh_debounce: Duration::from_millis(1_500),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Coalesces refresh triggers into one scheduled refresh per window.
pub struct RefreshDebouncer {
    window: Duration,
    deadline: Mutex<Option<Instant>>,
}

impl RefreshDebouncer {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: Mutex::new(None),
        }
    }

    /// Returns true when the caller should schedule a refresh; triggers
    /// inside an armed window are absorbed.
    pub fn arm(&self, now: Instant) -> bool {
        let mut deadline = self.deadline.lock().unwrap();
        match *deadline {
            Some(armed_until) if now < armed_until => false,
            _ => {
                *deadline = Some(now + self.window);
                true
            }
        }
    }

    pub fn disarm(&self) {
        *self.deadline.lock().unwrap() = None;
    }
}

/// Gateway handle shared across server threads.
pub struct WebullGateway {
    alias: String,
    config: WebullConfig,
    api: Arc<dyn WebullTradeApi>,
    registry: Arc<SymbolRegistry>,
    events: EventSender,
    orders: Mutex<HashMap<String, OrderData>>,
    client_to_broker: Mutex<HashMap<String, String>>,
    connected: AtomicBool,
    debouncer: RefreshDebouncer,
    runtime: Mutex<Option<tokio::runtime::Handle>>,
    stream: Mutex<Option<trade_events::TradeEventsHandle>>,
    self_ref: Weak<WebullGateway>,
}

impl WebullGateway {
    pub fn new(
        alias: impl Into<String>,
        config: WebullConfig,
        api: Arc<dyn WebullTradeApi>,
        registry: Arc<SymbolRegistry>,
        events: EventSender,
    ) -> Arc<Self> {
        let alias = alias.into();
        let debounce = config.refresh_debounce;
        Arc::new_cyclic(|weak| Self {
            alias,
            config,
            api,
            registry,
            events,
            orders: Mutex::new(HashMap::new()),
            client_to_broker: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(false),
            debouncer: RefreshDebouncer::new(debounce),
            runtime: Mutex::new(None),
            stream: Mutex::new(None),
            self_ref: weak.clone(),
        })
    }

    fn log(&self, level: LogLevel, msg: impl Into<String>) {
        self.events.emit_log(&self.alias, level, msg);
    }

    async fn run_blocking<T, F>(&self, call: F) -> GatewayResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn WebullTradeApi) -> GatewayResult<T> + Send + 'static,
    {
        let api = Arc::clone(&self.api);
        tokio::task::spawn_blocking(move || call(api.as_ref()))
            .await
            .map_err(|err| GatewayError::Transport(format!("worker pool failure: {err}")))?
    }

    fn canonical_symbol(&self, ticker: &str) -> String {
        self.registry
            .lookup_by_webull_ticker(ticker)
            .map(|entry| entry.canonical_symbol.clone())
            .unwrap_or_else(|| janus_registry::normalize(ticker))
    }

    /// Stream callback: filter, resolve the order id, merge the delta into
    /// the cached order, emit the new snapshot.
    pub fn handle_trade_event(&self, payload: OrderEventPayload) {
        if payload.account_id != self.config.account_id {
            return;
        }
        if payload.event_type.as_deref().is_some_and(|t| t != "ORDER") {
            return;
        }
        if payload
            .subscribe_type
            .as_deref()
            .is_some_and(|t| t != "ORDER_STATUS_CHANGED")
        {
            return;
        }

        let orderid = {
            let map = self.client_to_broker.lock().unwrap();
            resolve_order_id(&payload, &map)
        };
        let Some(orderid) = orderid else {
            self.log(LogLevel::Warning, "trade event without any order id; dropped");
            return;
        };

        let updated = {
            let mut orders = self.orders.lock().unwrap();
            let next = match orders.get(&orderid) {
                Some(existing) => {
                    if existing.status.is_terminal() {
                        return;
                    }
                    let mut next = existing.clone();
                    next.traded = payload.filled_qty;
                    next.status = map_webull_status(
                        payload.order_status.as_deref(),
                        payload.scene_type.as_deref(),
                        payload.filled_qty,
                        next.volume,
                        existing.status,
                    );
                    if let Some(price) = payload.limit_price {
                        next.price = Some(price);
                    }
                    if let Some(stop) = payload.stop_price {
                        next.stop_price = Some(stop);
                    }
                    next
                }
                None => self.order_from_event(&orderid, &payload),
            };
            orders.insert(orderid, next.clone());
            next
        };
        self.events.emit_order(updated);

        if matches!(
            payload.scene_type.as_deref(),
            Some("FILLED" | "FINAL_FILLED" | "CANCEL_SUCCESS")
        ) {
            self.schedule_refresh();
        }
    }

    fn order_from_event(&self, orderid: &str, payload: &OrderEventPayload) -> OrderData {
        let order_type = payload
            .order_type
            .as_deref()
            .and_then(order_type_from_wire)
            .unwrap_or(OrderType::Limit);
        // Stop-style orders quote their trigger as the working price.
        let price = payload.limit_price.or(payload.stop_price);
        OrderData {
            account_alias: self.alias.clone(),
            orderid: orderid.to_string(),
            symbol: self.canonical_symbol(&payload.symbol),
            exchange: Exchange::Smart,
            direction: side_to_direction(&payload.side).unwrap_or(Direction::Long),
            order_type,
            volume: payload.quantity,
            price,
            stop_price: payload.stop_price,
            traded: payload.filled_qty,
            status: map_webull_status(
                payload.order_status.as_deref(),
                payload.scene_type.as_deref(),
                payload.filled_qty,
                payload.quantity,
                Status::NotTraded,
            ),
            tif: TimeInForce::Gtc,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Coalesced snapshot refresh after fills and cancels.
    fn schedule_refresh(&self) {
        let handle = match self.runtime.lock().unwrap().clone() {
            Some(handle) => handle,
            None => return,
        };
        if !self.debouncer.arm(Instant::now()) {
            return;
        }
        let weak = self.self_ref.clone();
        let window = self.config.refresh_debounce;
        handle.spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(gateway) = weak.upgrade() {
                gateway.debouncer.disarm();
                if let Err(err) = gateway.sync_snapshots().await {
                    warn!(alias = %gateway.alias, error = %err, "debounced refresh failed");
                }
            }
        });
    }
}

#[async_trait]
impl BrokerGateway for WebullGateway {
    fn alias(&self) -> &str {
        &self.alias
    }

    fn broker_kind(&self) -> BrokerKind {
        BrokerKind::Webull
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn capabilities(&self) -> &'static [OrderType] {
        CAPABILITIES
    }

    async fn connect(&self) -> GatewayResult<()> {
        *self.runtime.lock().unwrap() = Some(tokio::runtime::Handle::current());
        self.sync_snapshots().await?;

        for entry in self.registry.list_entries() {
            if entry.webull_ticker.is_some() {
                self.events.emit_contract(ContractData {
                    symbol: entry.canonical_symbol.clone(),
                    exchange: Exchange::Smart,
                    product: entry.asset_class,
                    min_volume: Volume::ONE,
                    price_tick: Decimal::new(1, 2),
                    currency: entry.currency.clone(),
                });
            }
        }

        if let Some(url) = &self.config.stream_url {
            let weak = self.self_ref.clone();
            let callback: trade_events::OrderEventCallback = Arc::new(move |payload| {
                if let Some(gateway) = weak.upgrade() {
                    gateway.handle_trade_event(payload);
                }
            });
            let handle = trade_events::spawn_worker(
                self.alias.clone(),
                url.clone(),
                self.config.account_id.clone(),
                self.events.clone(),
                callback,
                self.config.reconnect.clone(),
            );
            *self.stream.lock().unwrap() = Some(handle);
        } else {
            self.log(LogLevel::Info, "trade events disabled by config");
        }

        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let handle = self.stream.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = tokio::task::spawn_blocking(move || handle.stop()).await;
        }
    }

    async fn subscribe(&self, req: SubscribeRequest) -> GatewayResult<()> {
        self.log(
            LogLevel::Info,
            format!("market data for {} comes from the streaming broker", req.symbol),
        );
        Ok(())
    }

    async fn unsubscribe(&self, _req: SubscribeRequest) -> GatewayResult<()> {
        Ok(())
    }

    async fn subscribe_bars(&self, req: BarSubscribeRequest) -> GatewayResult<()> {
        self.log(
            LogLevel::Info,
            format!("bar streaming for {} is not available on this broker", req.symbol),
        );
        Ok(())
    }

    async fn unsubscribe_bars(&self, _req: BarSubscribeRequest) -> GatewayResult<()> {
        Ok(())
    }

    async fn send_order(&self, req: OrderRequest) -> GatewayResult<String> {
        match req.order_type {
            OrderType::Limit if req.price.is_none() => {
                return Err(GatewayError::InvalidRequest("limit order needs a price".into()));
            }
            OrderType::Stop if req.stop_price.is_none() => {
                return Err(GatewayError::InvalidRequest(
                    "stop order needs a stop price".into(),
                ));
            }
            OrderType::StopLimit if req.price.is_none() || req.stop_price.is_none() => {
                return Err(GatewayError::InvalidRequest(
                    "stop-limit order needs both prices".into(),
                ));
            }
            _ => {}
        }
        let ticker = self
            .registry
            .lookup_by_canonical(&req.symbol)
            .and_then(|entry| entry.webull_ticker.clone())
            .ok_or_else(|| {
                GatewayError::InvalidRequest(format!("no broker ticker for '{}'", req.symbol))
            })?;

        let client_order_id = Uuid::new_v4().simple().to_string();
        let payload = PlaceOrder {
            client_order_id: client_order_id.clone(),
            symbol: ticker,
            side: direction_to_side(req.direction).to_string(),
            order_type: order_type_to_wire(req.order_type).to_string(),
            quantity: req.volume.to_string(),
            limit_price: req.price.map(|price| price.to_string()),
            stop_price: req.stop_price.map(|price| price.to_string()),
            time_in_force: tif_to_wire(req.tif).to_string(),
        };
        let ack = self.run_blocking(move |api| api.place_order(payload)).await?;

        self.client_to_broker
            .lock()
            .unwrap()
            .insert(client_order_id, ack.order_id.clone());
        let order = req.create_order_data(&self.alias, ack.order_id);
        let vt_orderid = order.vt_orderid();
        self.orders
            .lock()
            .unwrap()
            .insert(order.orderid.clone(), order.clone());
        self.events.emit_order(order);
        Ok(vt_orderid)
    }

    async fn cancel_order(&self, req: CancelRequest) -> GatewayResult<()> {
        let order_id = req.orderid.clone();
        self.run_blocking(move |api| api.cancel_order(&order_id)).await
    }

    async fn query_account(&self) -> GatewayResult<()> {
        let balance = self.run_blocking(|api| api.account_balance()).await?;
        self.events.emit_account(AccountData {
            account_alias: self.alias.clone(),
            balance: balance.balance,
            available: balance.available,
            currency: balance.currency,
        });
        Ok(())
    }

    async fn query_position(&self) -> GatewayResult<()> {
        let positions = self.run_blocking(|api| api.positions()).await?;
        for row in positions {
            let direction = if row.quantity < Decimal::ZERO {
                Direction::Short
            } else {
                Direction::Long
            };
            self.events.emit_position(PositionData {
                account_alias: self.alias.clone(),
                symbol: self.canonical_symbol(&row.ticker),
                direction,
                volume: row.quantity.abs(),
                price: row.avg_cost,
                pnl: row.unrealized_pnl,
                frozen: Volume::ZERO,
            });
        }
        Ok(())
    }

    async fn query_open_orders(&self) -> GatewayResult<()> {
        let rows = self.run_blocking(|api| api.open_orders()).await?;
        for row in rows {
            if let Some(client_id) = &row.client_order_id {
                self.client_to_broker
                    .lock()
                    .unwrap()
                    .insert(client_id.clone(), row.order_id.clone());
            }
            let order = OrderData {
                account_alias: self.alias.clone(),
                orderid: row.order_id.clone(),
                symbol: self.canonical_symbol(&row.ticker),
                exchange: Exchange::Smart,
                direction: side_to_direction(&row.side).unwrap_or(Direction::Long),
                order_type: order_type_from_wire(&row.order_type).unwrap_or(OrderType::Limit),
                volume: row.quantity,
                price: row.limit_price,
                stop_price: row.stop_price,
                traded: row.filled_qty,
                status: map_webull_status(
                    Some(&row.status),
                    None,
                    row.filled_qty,
                    row.quantity,
                    Status::NotTraded,
                ),
                tif: tif_from_wire(&row.tif).unwrap_or_default(),
                timestamp: chrono::Utc::now(),
            };
            self.orders
                .lock()
                .unwrap()
                .insert(order.orderid.clone(), order.clone());
            self.events.emit_order(order);
        }
        Ok(())
    }

    async fn request_contract_details(
        &self,
        query: ContractQuery,
    ) -> GatewayResult<Vec<ContractDetails>> {
        let symbol = query.symbol.clone();
        let hits = self
            .run_blocking(move |api| api.lookup_instrument(&symbol))
            .await?;
        Ok(hits
            .into_iter()
            .map(|hit| ContractDetails {
                // This broker keys instruments by ticker; there is no
                // numeric contract id to carry.
                conid: 0,
                symbol: hit.ticker,
                exchange: Exchange::Smart,
                currency: query.currency.clone(),
                asset_class: query.asset_class,
                description: hit.name,
                min_volume: Volume::ONE,
                price_tick: Decimal::new(1, 2),
            })
            .collect())
    }
}

/// Order-id resolution priority: payload `order_id`, then the map captured
/// at placement, then the raw `client_order_id`.
#[must_use]
pub fn resolve_order_id(
    payload: &OrderEventPayload,
    client_to_broker: &HashMap<String, String>,
) -> Option<String> {
    if let Some(order_id) = payload.order_id.as_deref().filter(|id| !id.is_empty()) {
        return Some(order_id.to_string());
    }
    let client_id = payload
        .client_order_id
        .as_deref()
        .filter(|id| !id.is_empty())?;
    if let Some(order_id) = client_to_broker.get(client_id) {
        return Some(order_id.clone());
    }
    Some(client_id.to_string())
}

/// Status mapping: the explicit `order_status` wins; `scene_type` is the
/// fallback. A submitted order with partial fills already counts as
/// part-traded.
#[must_use]
pub fn map_webull_status(
    order_status: Option<&str>,
    scene_type: Option<&str>,
    filled: Decimal,
    volume: Decimal,
    current: Status,
) -> Status {
    if let Some(status) = order_status {
        match status {
            "SUBMITTED" => {
                return if filled > Decimal::ZERO {
                    Status::PartTraded
                } else {
                    Status::NotTraded
                };
            }
            "FILLED" => {
                return if filled < volume {
                    Status::PartTraded
                } else {
                    Status::AllTraded
                };
            }
            "CANCELLED" => return Status::Cancelled,
            "FAILED" => return Status::Rejected,
            _ => {}
        }
    }
    if let Some(scene) = scene_type {
        match scene {
            "FILLED" => return Status::PartTraded,
            "FINAL_FILLED" => return Status::AllTraded,
            "PLACE_FAILED" | "MODIFY_FAILED" | "CANCEL_FAILED" => return Status::Rejected,
            "CANCEL_SUCCESS" => return Status::Cancelled,
            "MODIFY_SUCCESS" => return current,
            _ => {}
        }
    }
    current
}

pub(crate) fn direction_to_side(direction: Direction) -> &'static str {
    match direction {
        Direction::Long => "BUY",
        Direction::Short => "SELL",
    }
}

pub(crate) fn side_to_direction(side: &str) -> Option<Direction> {
    match side {
        "BUY" => Some(Direction::Long),
        "SELL" => Some(Direction::Short),
        _ => None,
    }
}

pub(crate) fn order_type_to_wire(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Market => "MARKET",
        OrderType::Limit => "LIMIT",
        OrderType::Stop => "STOP_LOSS",
        OrderType::StopLimit => "STOP_LOSS_LIMIT",
    }
}

pub(crate) fn order_type_from_wire(label: &str) -> Option<OrderType> {
    match label {
        "MARKET" => Some(OrderType::Market),
        "LIMIT" => Some(OrderType::Limit),
        "STOP_LOSS" => Some(OrderType::Stop),
        "STOP_LOSS_LIMIT" => Some(OrderType::StopLimit),
        _ => None,
    }
}

pub(crate) fn tif_to_wire(tif: TimeInForce) -> &'static str {
    match tif {
        TimeInForce::Day => "DAY",
        TimeInForce::Gtc => "GTC",
    }
}

pub(crate) fn tif_from_wire(label: &str) -> Option<TimeInForce> {
    match label {
        "DAY" => Some(TimeInForce::Day),
        "GTC" => Some(TimeInForce::Gtc),
        _ => None,
    }
}
