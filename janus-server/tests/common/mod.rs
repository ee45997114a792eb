#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;

use janus_broker::{BrokerGateway, BrokerKind, GatewayResult};
use janus_core::{
    AssetClass, BarSubscribeRequest, CancelRequest, ContractDetails, ContractQuery, Exchange,
    OrderRequest, OrderType, Status, SubscribeRequest, TradeData, Volume,
};
use janus_events::EventSender;
use janus_registry::normalize;

const ALL_TYPES: &[OrderType] = &[
    OrderType::Market,
    OrderType::Limit,
    OrderType::Stop,
    OrderType::StopLimit,
];

/// Scriptable in-memory gateway for router and harmony tests.
pub struct MockGateway {
    alias: String,
    kind: BrokerKind,
    caps: &'static [OrderType],
    pub connected: AtomicBool,
    details: Mutex<HashMap<String, Vec<ContractDetails>>>,
    pub detail_requests: AtomicI64,
    pub placed: Mutex<Vec<OrderRequest>>,
    pub cancelled: Mutex<Vec<CancelRequest>>,
    next_id: AtomicI64,
    events: Option<EventSender>,
    fill_on_send: bool,
}

impl MockGateway {
    pub fn new(alias: &str, kind: BrokerKind) -> Self {
        Self {
            alias: alias.to_string(),
            kind,
            caps: ALL_TYPES,
            connected: AtomicBool::new(true),
            details: Mutex::new(HashMap::new()),
            detail_requests: AtomicI64::new(0),
            placed: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
            events: None,
            fill_on_send: false,
        }
    }

    pub fn with_caps(mut self, caps: &'static [OrderType]) -> Self {
        self.caps = caps;
        self
    }

    pub fn with_details(self, symbol: &str, details: Vec<ContractDetails>) -> Self {
        self.details
            .lock()
            .unwrap()
            .insert(normalize(symbol), details);
        self
    }

    /// Emit a full submit → accept → fill order walk on every send.
    pub fn with_fill_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self.fill_on_send = true;
        self
    }

    pub fn disconnected(self) -> Self {
        self.connected.store(false, Ordering::SeqCst);
        self
    }
}

pub fn detail(conid: i64, symbol: &str) -> ContractDetails {
    ContractDetails {
        conid,
        symbol: symbol.to_string(),
        exchange: Exchange::Smart,
        currency: "USD".into(),
        asset_class: AssetClass::Equity,
        description: Some(format!("{symbol} common stock")),
        min_volume: Volume::ONE,
        price_tick: Decimal::new(1, 2),
    }
}

#[async_trait]
impl BrokerGateway for MockGateway {
    fn alias(&self) -> &str {
        &self.alias
    }

    fn broker_kind(&self) -> BrokerKind {
        self.kind
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn capabilities(&self) -> &'static [OrderType] {
        self.caps
    }

    async fn connect(&self) -> GatewayResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn subscribe(&self, _req: SubscribeRequest) -> GatewayResult<()> {
        Ok(())
    }

    async fn unsubscribe(&self, _req: SubscribeRequest) -> GatewayResult<()> {
        Ok(())
    }

    async fn subscribe_bars(&self, _req: BarSubscribeRequest) -> GatewayResult<()> {
        Ok(())
    }

    async fn unsubscribe_bars(&self, _req: BarSubscribeRequest) -> GatewayResult<()> {
        Ok(())
    }

    async fn send_order(&self, req: OrderRequest) -> GatewayResult<String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let order = req.create_order_data(&self.alias, id.to_string());
        let vt_orderid = order.vt_orderid();
        self.placed.lock().unwrap().push(req);

        if self.fill_on_send {
            if let Some(events) = &self.events {
                events.emit_order(order.clone());
                let mut accepted = order.clone();
                accepted.status = Status::NotTraded;
                events.emit_order(accepted);
                let mut filled = order.clone();
                filled.status = Status::AllTraded;
                filled.traded = filled.volume;
                events.emit_order(filled.clone());
                events.emit_trade(TradeData {
                    account_alias: self.alias.clone(),
                    tradeid: format!("t{id}"),
                    orderid: id.to_string(),
                    symbol: filled.symbol.clone(),
                    exchange: filled.exchange,
                    direction: filled.direction,
                    price: filled.price.unwrap_or_default(),
                    volume: filled.volume,
                    timestamp: chrono::Utc::now(),
                });
            }
        }
        Ok(vt_orderid)
    }

    async fn cancel_order(&self, req: CancelRequest) -> GatewayResult<()> {
        self.cancelled.lock().unwrap().push(req);
        Ok(())
    }

    async fn query_account(&self) -> GatewayResult<()> {
        Ok(())
    }

    async fn query_position(&self) -> GatewayResult<()> {
        Ok(())
    }

    async fn query_open_orders(&self) -> GatewayResult<()> {
        Ok(())
    }

    async fn request_contract_details(
        &self,
        query: ContractQuery,
    ) -> GatewayResult<Vec<ContractDetails>> {
        self.detail_requests.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .details
            .lock()
            .unwrap()
            .get(&normalize(&query.symbol))
            .cloned()
            .unwrap_or_default())
    }
}
