//! State owned by the dedicated I/O thread.
//!
//! Every socket read and write happens here. Gateway methods on other
//! threads enqueue [`Command`]s; completions travel back over oneshot
//! channels. Callbacks translate wire frames into immutable event payloads
//! and hand them straight to the bus.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use janus_core::{
    AccountData, AssetClass, BarSubscribeRequest, ContractDetails, ContractQuery, Direction,
    Exchange, LogLevel, OrderData, PositionData, Status, SubscribeRequest, TickData, TimeInForce,
    TradeData, Volume,
};
use janus_events::EventSender;
use janus_registry::SymbolRegistry;

use crate::protocol::{Inbound, Outbound, TickField, DATA_FARM_CODES};
use crate::IbConfig;

type Writer = SplitSink<Framed<TcpStream, LengthDelimitedCodec>, Bytes>;

/// Requests posted onto the I/O loop from other threads.
pub(crate) enum Command {
    Connect {
        reply: Option<oneshot::Sender<Result<(), String>>>,
    },
    Close,
    Subscribe(SubscribeRequest),
    Unsubscribe(SubscribeRequest),
    SubscribeBars(BarSubscribeRequest),
    UnsubscribeBars(BarSubscribeRequest),
    PlaceOrder { order: OrderData, conid: i64 },
    CancelOrder { orderid: i64 },
    QueryAccount,
    QueryPositions,
    QueryOpenOrders,
    ContractDetails {
        query: ContractQuery,
        reply: oneshot::Sender<Vec<ContractDetails>>,
    },
    CheckHealth,
}

enum LoopInput {
    Frame(Inbound),
    Disconnected,
}

struct PendingDetails {
    buffer: Vec<ContractDetails>,
    reply: oneshot::Sender<Vec<ContractDetails>>,
}

pub(crate) struct IbSession {
    alias: String,
    config: IbConfig,
    registry: Arc<SymbolRegistry>,
    events: EventSender,
    connected: Arc<AtomicBool>,

    writer: Option<Writer>,
    reader_task: Option<JoinHandle<()>>,
    inbound_tx: Option<mpsc::UnboundedSender<LoopInput>>,

    next_req_id: i64,
    pending: HashMap<i64, PendingDetails>,
    ticks: HashMap<i64, TickData>,
    tick_products: HashMap<i64, AssetClass>,
    req_by_symbol: HashMap<String, i64>,
    subscribed: HashMap<String, SubscribeRequest>,
    bars: HashMap<String, (BarSubscribeRequest, i64)>,
    orders: HashMap<String, OrderData>,
    unknown_statuses: HashSet<String>,
}

impl IbSession {
    pub(crate) fn new(
        alias: String,
        config: IbConfig,
        registry: Arc<SymbolRegistry>,
        events: EventSender,
        connected: Arc<AtomicBool>,
    ) -> Self {
        Self {
            alias,
            config,
            registry,
            events,
            connected,
            writer: None,
            reader_task: None,
            inbound_tx: None,
            next_req_id: 1,
            pending: HashMap::new(),
            ticks: HashMap::new(),
            tick_products: HashMap::new(),
            req_by_symbol: HashMap::new(),
            subscribed: HashMap::new(),
            bars: HashMap::new(),
            orders: HashMap::new(),
            unknown_statuses: HashSet::new(),
        }
    }

    /// The set of market-data subscriptions that must be replayed after a
    /// reconnect. Exactly the live set: no duplicates, no extras.
    pub(crate) fn resubscribe_set(&self) -> Vec<SubscribeRequest> {
        self.subscribed.values().cloned().collect()
    }

    fn next_req_id(&mut self) -> i64 {
        let id = self.next_req_id;
        self.next_req_id += 1;
        id
    }

    fn log(&self, level: LogLevel, msg: impl Into<String>) {
        self.events.emit_log(&self.alias, level, msg);
    }

    async fn send_msg(&mut self, msg: &Outbound) -> bool {
        let payload = match serde_json::to_vec(msg) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed to encode outbound frame");
                return false;
            }
        };
        let Some(writer) = self.writer.as_mut() else {
            return false;
        };
        if let Err(err) = writer.send(Bytes::from(payload)).await {
            warn!(error = %err, "socket write failed; marking session disconnected");
            self.mark_disconnected();
            return false;
        }
        true
    }

    fn mark_disconnected(&mut self) {
        self.writer = None;
        self.connected.store(false, Ordering::SeqCst);
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        // Outstanding completions cannot finish on a dead socket.
        for (_, pending) in self.pending.drain() {
            let _ = pending.reply.send(Vec::new());
        }
    }

    async fn try_connect(&mut self) -> Result<(), String> {
        if self.writer.is_some() {
            return Ok(());
        }
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|err| format!("connect to {addr} failed: {err}"))?;
        let framed = Framed::new(stream, LengthDelimitedCodec::new());
        let (writer, mut reader) = framed.split();
        self.writer = Some(writer);

        let inbound_tx = self
            .inbound_tx
            .clone()
            .expect("inbound channel installed before connect");
        self.reader_task = Some(tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(bytes) => match serde_json::from_slice::<Inbound>(&bytes) {
                        Ok(msg) => {
                            if inbound_tx.send(LoopInput::Frame(msg)).is_err() {
                                return;
                            }
                        }
                        Err(err) => debug!(error = %err, "dropping undecodable frame"),
                    },
                    Err(_) => break,
                }
            }
            let _ = inbound_tx.send(LoopInput::Disconnected);
        }));

        self.connected.store(true, Ordering::SeqCst);
        let client_id = self.config.client_id;
        self.send_msg(&Outbound::StartApi { client_id }).await;
        info!(alias = %self.alias, %addr, "broker session established");
        self.log(LogLevel::Info, format!("connected to {addr}"));

        self.snapshot_burst().await;
        self.replay_subscriptions().await;
        Ok(())
    }

    /// First burst after connect: account, positions, open orders, and the
    /// contracts already known to the registry.
    async fn snapshot_burst(&mut self) {
        self.send_msg(&Outbound::ReqAccountSummary).await;
        self.send_msg(&Outbound::ReqPositions).await;
        self.send_msg(&Outbound::ReqOpenOrders).await;
        for entry in self.registry.list_entries() {
            if entry.ib_conid.is_some() {
                self.events.emit_contract(janus_core::ContractData {
                    symbol: entry.canonical_symbol.clone(),
                    exchange: Exchange::Smart,
                    product: entry.asset_class,
                    min_volume: Volume::ONE,
                    price_tick: Decimal::new(1, 2),
                    currency: entry.currency.clone(),
                });
            }
        }
    }

    async fn replay_subscriptions(&mut self) {
        for req in self.resubscribe_set() {
            self.start_market_data(&req).await;
        }
        let bars: Vec<BarSubscribeRequest> =
            self.bars.values().map(|(req, _)| req.clone()).collect();
        for req in bars {
            self.start_bars(&req).await;
        }
    }

    async fn start_market_data(&mut self, req: &SubscribeRequest) {
        let Some(entry) = self.registry.lookup_by_canonical(&req.symbol) else {
            self.log(
                LogLevel::Warning,
                format!("subscribe skipped: '{}' not in registry", req.symbol),
            );
            return;
        };
        let Some(conid) = entry.ib_conid else {
            self.log(
                LogLevel::Warning,
                format!("subscribe skipped: '{}' has no conid", req.symbol),
            );
            return;
        };
        let req_id = self.next_req_id();
        let vt_symbol = req.vt_symbol();
        self.ticks.insert(
            req_id,
            TickData {
                symbol: entry.canonical_symbol.clone(),
                exchange: Some(req.exchange),
                ..TickData::default()
            },
        );
        self.tick_products.insert(req_id, entry.asset_class);
        self.req_by_symbol.insert(vt_symbol, req_id);
        self.send_msg(&Outbound::ReqMktData {
            req_id,
            conid,
            symbol: entry.canonical_symbol.clone(),
            exchange: req.exchange.as_str().to_string(),
            currency: entry.currency.clone(),
        })
        .await;
    }

    async fn start_bars(&mut self, req: &BarSubscribeRequest) {
        let Some(conid) = self
            .registry
            .lookup_by_canonical(&req.symbol)
            .and_then(|entry| entry.ib_conid)
        else {
            self.log(
                LogLevel::Warning,
                format!("bars skipped: '{}' has no conid", req.symbol),
            );
            return;
        };
        let req_id = self.next_req_id();
        self.bars.insert(req.vt_symbol(), (req.clone(), req_id));
        self.send_msg(&Outbound::ReqRealTimeBars {
            req_id,
            conid,
            use_rth: req.use_rth,
        })
        .await;
    }

    pub(crate) async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect { reply } => {
                let result = self.try_connect().await;
                if let Err(err) = &result {
                    self.log(LogLevel::Warning, err.clone());
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            Command::Close => {
                self.mark_disconnected();
                return false;
            }
            Command::Subscribe(req) => {
                let vt_symbol = req.vt_symbol();
                if self.subscribed.insert(vt_symbol, req.clone()).is_none()
                    && self.writer.is_some()
                {
                    self.start_market_data(&req).await;
                }
            }
            Command::Unsubscribe(req) => {
                let vt_symbol = req.vt_symbol();
                self.subscribed.remove(&vt_symbol);
                if let Some(req_id) = self.req_by_symbol.remove(&vt_symbol) {
                    // The tick cache slot is intentionally retained.
                    self.send_msg(&Outbound::CancelMktData { req_id }).await;
                }
            }
            Command::SubscribeBars(req) => {
                if self.writer.is_some() {
                    self.start_bars(&req).await;
                } else {
                    self.bars.insert(req.vt_symbol(), (req, 0));
                }
            }
            Command::UnsubscribeBars(req) => {
                if let Some((_, req_id)) = self.bars.remove(&req.vt_symbol()) {
                    if req_id > 0 {
                        self.send_msg(&Outbound::CancelRealTimeBars { req_id }).await;
                    }
                }
            }
            Command::PlaceOrder { order, conid } => {
                self.place_order(order, conid).await;
            }
            Command::CancelOrder { orderid } => {
                self.send_msg(&Outbound::CancelOrder { order_id: orderid }).await;
            }
            Command::QueryAccount => {
                self.send_msg(&Outbound::ReqAccountSummary).await;
            }
            Command::QueryPositions => {
                self.send_msg(&Outbound::ReqPositions).await;
            }
            Command::QueryOpenOrders => {
                self.send_msg(&Outbound::ReqOpenOrders).await;
            }
            Command::ContractDetails { query, reply } => {
                self.request_contract_details(query, reply).await;
            }
            Command::CheckHealth => {
                if self.writer.is_none() {
                    debug!(alias = %self.alias, "health check found dead session; reconnecting");
                    if let Err(err) = self.try_connect().await {
                        self.log(LogLevel::Warning, format!("reconnect failed: {err}"));
                    }
                }
            }
        }
        true
    }

    async fn place_order(&mut self, order: OrderData, conid: i64) {
        let order_id = order.orderid.parse::<i64>().unwrap_or_default();
        let msg = Outbound::PlaceOrder {
            order_id,
            conid,
            symbol: order.symbol.clone(),
            exchange: order.exchange.as_str().to_string(),
            action: direction_to_action(order.direction).to_string(),
            order_type: order_type_to_wire(order.order_type).to_string(),
            total_quantity: order.volume,
            lmt_price: order.price,
            aux_price: order.stop_price,
            tif: tif_to_wire(order.tif).to_string(),
        };
        self.orders.insert(order.orderid.clone(), order.clone());
        if !self.send_msg(&msg).await {
            let mut rejected = order;
            rejected.status = Status::Rejected;
            self.orders
                .insert(rejected.orderid.clone(), rejected.clone());
            self.log(
                LogLevel::Warning,
                format!("order {} rejected: session not connected", rejected.vt_orderid()),
            );
            self.events.emit_order(rejected);
        }
    }

    async fn request_contract_details(
        &mut self,
        query: ContractQuery,
        reply: oneshot::Sender<Vec<ContractDetails>>,
    ) {
        let req_id = self.next_req_id();
        let msg = Outbound::ReqContractDetails {
            req_id,
            symbol: query.symbol.clone(),
            sec_type: sec_type_to_wire(query.asset_class).to_string(),
            exchange: query.exchange.as_str().to_string(),
            currency: query.currency.clone(),
        };
        self.pending.insert(
            req_id,
            PendingDetails {
                buffer: Vec::new(),
                reply,
            },
        );
        if !self.send_msg(&msg).await {
            if let Some(pending) = self.pending.remove(&req_id) {
                let _ = pending.reply.send(Vec::new());
            }
        }
    }

    async fn handle_input(&mut self, input: LoopInput) {
        match input {
            LoopInput::Disconnected => {
                warn!(alias = %self.alias, "broker socket closed");
                self.log(LogLevel::Warning, "broker socket closed");
                self.mark_disconnected();
            }
            LoopInput::Frame(msg) => self.handle_inbound(msg).await,
        }
    }

    pub(crate) async fn handle_inbound(&mut self, msg: Inbound) {
        match msg {
            Inbound::TickPrice { req_id, field, price } => {
                let product = self
                    .tick_products
                    .get(&req_id)
                    .copied()
                    .unwrap_or_default();
                if let Some(tick) = self.ticks.get_mut(&req_id) {
                    merge_tick_price(tick, field, price, product);
                    self.events.emit_tick(tick.clone());
                }
            }
            Inbound::TickSize { req_id, field, size } => {
                if let Some(tick) = self.ticks.get_mut(&req_id) {
                    merge_tick_size(tick, field, size);
                    self.events.emit_tick(tick.clone());
                }
            }
            Inbound::TickString { req_id, field, value } => {
                if let Some(tick) = self.ticks.get_mut(&req_id) {
                    if merge_tick_string(tick, field, &value) {
                        self.events.emit_tick(tick.clone());
                    }
                }
            }
            Inbound::TickOptionComputation {
                req_id,
                implied_vol,
                delta,
                gamma,
                vega,
                theta,
            } => {
                if let Some(tick) = self.ticks.get_mut(&req_id) {
                    tick.extra = Some(janus_core::OptionGreeks {
                        implied_vol,
                        delta,
                        gamma,
                        vega,
                        theta,
                    });
                    self.events.emit_tick(tick.clone());
                }
            }
            Inbound::OrderStatus { order_id, status, filled } => {
                if let Some(updated) = self.apply_order_status(order_id, &status, filled) {
                    self.events.emit_order(updated);
                }
            }
            Inbound::OpenOrder {
                order_id,
                conid,
                symbol,
                exchange,
                action,
                order_type,
                total_quantity,
                lmt_price,
                aux_price,
                tif,
            } => {
                if let Some(updated) = self.apply_open_order(
                    order_id,
                    conid,
                    &symbol,
                    &exchange,
                    &action,
                    &order_type,
                    total_quantity,
                    lmt_price,
                    aux_price,
                    &tif,
                ) {
                    self.events.emit_order(updated);
                }
            }
            Inbound::ExecDetails {
                exec_id,
                order_id,
                conid,
                symbol,
                side,
                price,
                shares,
                time_ms,
            } => {
                let symbol = self
                    .registry
                    .lookup_by_ib_conid(conid)
                    .map(|entry| entry.canonical_symbol.clone())
                    .unwrap_or(symbol);
                let timestamp = chrono::DateTime::from_timestamp_millis(time_ms)
                    .unwrap_or_else(Utc::now);
                self.events.emit_trade(TradeData {
                    account_alias: self.alias.clone(),
                    tradeid: exec_id,
                    orderid: order_id.to_string(),
                    symbol,
                    exchange: Exchange::Smart,
                    direction: if side == "SLD" {
                        Direction::Short
                    } else {
                        Direction::Long
                    },
                    price,
                    volume: shares,
                    timestamp,
                });
            }
            Inbound::ContractDetailsRow {
                req_id,
                conid,
                symbol,
                sec_type,
                exchange,
                currency,
                long_name,
                min_tick,
                min_size,
            } => {
                if let Some(pending) = self.pending.get_mut(&req_id) {
                    pending.buffer.push(ContractDetails {
                        conid,
                        symbol,
                        exchange: exchange.parse().unwrap_or(Exchange::Smart),
                        currency,
                        asset_class: sec_type.parse().unwrap_or_default(),
                        description: long_name,
                        min_volume: min_size,
                        price_tick: min_tick,
                    });
                }
            }
            Inbound::ContractDetailsEnd { req_id } => {
                if let Some(pending) = self.pending.remove(&req_id) {
                    let _ = pending.reply.send(pending.buffer);
                }
            }
            Inbound::AccountSummary {
                account: _,
                net_liquidation,
                available_funds,
                currency,
            } => {
                self.events.emit_account(AccountData {
                    account_alias: self.alias.clone(),
                    balance: net_liquidation,
                    available: available_funds,
                    currency,
                });
            }
            Inbound::PositionRow {
                account: _,
                conid,
                symbol,
                position,
                avg_cost,
                unrealized_pnl,
            } => {
                let symbol = self
                    .registry
                    .lookup_by_ib_conid(conid)
                    .map(|entry| entry.canonical_symbol.clone())
                    .unwrap_or(symbol);
                let direction = if position < Decimal::ZERO {
                    Direction::Short
                } else {
                    Direction::Long
                };
                self.events.emit_position(PositionData {
                    account_alias: self.alias.clone(),
                    symbol,
                    direction,
                    volume: position.abs(),
                    price: avg_cost,
                    pnl: unrealized_pnl,
                    frozen: Volume::ZERO,
                });
            }
            Inbound::PositionEnd => {}
            Inbound::ErrorMsg { req_id, code, message } => {
                self.handle_error(req_id, code, message).await;
            }
        }
    }

    async fn handle_error(&mut self, req_id: i64, code: i64, message: String) {
        if DATA_FARM_CODES.contains(&code) {
            info!(alias = %self.alias, code, "data farm ready; replaying subscriptions");
            self.replay_subscriptions().await;
            return;
        }
        if let Some(pending) = self.pending.remove(&req_id) {
            warn!(alias = %self.alias, req_id, code, %message, "request failed");
            let _ = pending.reply.send(Vec::new());
            return;
        }
        self.log(LogLevel::Warning, format!("broker error {code}: {message}"));
    }

    fn apply_order_status(
        &mut self,
        order_id: i64,
        status_label: &str,
        filled: Decimal,
    ) -> Option<OrderData> {
        let key = order_id.to_string();
        let current = self.orders.get(&key)?;
        if current.status.is_terminal() {
            return None;
        }
        let mut updated = current.clone();
        updated.traded = filled;
        match map_order_status(status_label, filled, updated.volume) {
            Some(status) => updated.status = status,
            None => {
                if self.unknown_statuses.insert(status_label.to_string()) {
                    warn!(
                        alias = %self.alias,
                        status = status_label,
                        "unmapped order status; leaving status unchanged"
                    );
                }
            }
        }
        if updated == *current {
            return None;
        }
        self.orders.insert(key, updated.clone());
        Some(updated)
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_open_order(
        &mut self,
        order_id: i64,
        conid: i64,
        symbol: &str,
        exchange: &str,
        action: &str,
        order_type: &str,
        total_quantity: Decimal,
        lmt_price: Option<Decimal>,
        aux_price: Option<Decimal>,
        tif: &str,
    ) -> Option<OrderData> {
        let key = order_id.to_string();
        match self.orders.get(&key) {
            Some(current) => {
                if current.status.is_terminal() {
                    return None;
                }
                let mut updated = current.clone();
                if let Ok(parsed) = exchange.parse() {
                    updated.exchange = parsed;
                }
                updated.price = lmt_price.or(current.price);
                updated.stop_price = aux_price.or(current.stop_price);
                if let Some(parsed) = tif_from_wire(tif) {
                    updated.tif = parsed;
                }
                if updated == *current {
                    return None;
                }
                self.orders.insert(key, updated.clone());
                Some(updated)
            }
            None => {
                // An order this session did not place (e.g. the open-order
                // burst after connect); seed the cache from the broker view.
                let symbol = self
                    .registry
                    .lookup_by_ib_conid(conid)
                    .map(|entry| entry.canonical_symbol.clone())
                    .unwrap_or_else(|| symbol.to_string());
                let order = OrderData {
                    account_alias: self.alias.clone(),
                    orderid: key.clone(),
                    symbol,
                    exchange: exchange.parse().unwrap_or(Exchange::Smart),
                    direction: action_to_direction(action)?,
                    order_type: order_type_from_wire(order_type)?,
                    volume: total_quantity,
                    price: lmt_price,
                    stop_price: aux_price,
                    traded: Volume::ZERO,
                    status: Status::NotTraded,
                    tif: tif_from_wire(tif).unwrap_or_default(),
                    timestamp: Utc::now(),
                };
                self.orders.insert(key, order.clone());
                Some(order)
            }
        }
    }
}

/// Drive the session until [`Command::Close`] or channel shutdown.
pub(crate) async fn run(mut session: IbSession, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
    session.inbound_tx = Some(inbound_tx);
    loop {
        tokio::select! {
            command = cmd_rx.recv() => {
                match command {
                    None => break,
                    Some(command) => {
                        if !session.handle_command(command).await {
                            break;
                        }
                    }
                }
            }
            Some(input) = inbound_rx.recv() => {
                session.handle_input(input).await;
            }
        }
    }
    session.mark_disconnected();
}

/// Broker order-status labels → OMS statuses. Unknown labels map to `None`
/// and must not transition the order.
pub(crate) fn map_order_status(label: &str, filled: Decimal, volume: Decimal) -> Option<Status> {
    match label {
        "Submitted" | "PreSubmitted" => Some(Status::NotTraded),
        "Filled" => Some(if filled < volume {
            Status::PartTraded
        } else {
            Status::AllTraded
        }),
        "Cancelled" | "ApiCancelled" => Some(Status::Cancelled),
        "Inactive" => Some(Status::Rejected),
        _ => None,
    }
}

pub(crate) fn order_type_to_wire(order_type: janus_core::OrderType) -> &'static str {
    match order_type {
        janus_core::OrderType::Market => "MKT",
        janus_core::OrderType::Limit => "LMT",
        janus_core::OrderType::Stop => "STP",
        janus_core::OrderType::StopLimit => "STP LMT",
    }
}

pub(crate) fn order_type_from_wire(label: &str) -> Option<janus_core::OrderType> {
    match label {
        "MKT" => Some(janus_core::OrderType::Market),
        "LMT" => Some(janus_core::OrderType::Limit),
        "STP" => Some(janus_core::OrderType::Stop),
        "STP LMT" => Some(janus_core::OrderType::StopLimit),
        _ => None,
    }
}

pub(crate) fn direction_to_action(direction: Direction) -> &'static str {
    match direction {
        Direction::Long => "BUY",
        Direction::Short => "SELL",
    }
}

pub(crate) fn action_to_direction(action: &str) -> Option<Direction> {
    match action {
        "BUY" => Some(Direction::Long),
        "SELL" => Some(Direction::Short),
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

pub(crate) fn sec_type_to_wire(asset_class: AssetClass) -> &'static str {
    match asset_class {
        AssetClass::Equity | AssetClass::Etf => "STK",
        AssetClass::Fx => "CASH",
        AssetClass::Commodity => "CMDTY",
        AssetClass::Option => "OPT",
    }
}

/// Merge one price field into the cached tick. FX and commodity feeds carry
/// no trade prints, so the mid synthesizes their `last`.
pub(crate) fn merge_tick_price(
    tick: &mut TickData,
    field: TickField,
    price: Decimal,
    product: AssetClass,
) {
    match field {
        TickField::Last => tick.last = Some(price),
        TickField::Bid => tick.bid = Some(price),
        TickField::Ask => tick.ask = Some(price),
        _ => return,
    }
    if matches!(product, AssetClass::Fx | AssetClass::Commodity) {
        if let (Some(bid), Some(ask)) = (tick.bid, tick.ask) {
            tick.last = Some((bid + ask) / Decimal::TWO);
        }
    }
    if tick.timestamp.is_none() {
        tick.timestamp = Some(Utc::now());
    }
}

pub(crate) fn merge_tick_size(tick: &mut TickData, field: TickField, size: Decimal) {
    match field {
        TickField::BidSize => tick.bid_size = Some(size),
        TickField::AskSize => tick.ask_size = Some(size),
        TickField::Volume => tick.volume = Some(size),
        _ => {}
    }
}

/// Returns whether the merge changed the tick.
pub(crate) fn merge_tick_string(tick: &mut TickData, field: TickField, value: &str) -> bool {
    if field != TickField::LastTimestamp {
        return false;
    }
    let Ok(epoch) = value.parse::<i64>() else {
        return false;
    };
    match chrono::DateTime::from_timestamp(epoch, 0) {
        Some(ts) => {
            tick.timestamp = Some(ts);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use janus_core::OrderType;

    #[test]
    fn status_mapping_follows_the_documented_table() {
        let ten = Decimal::from(10);
        assert_eq!(
            map_order_status("Submitted", Decimal::ZERO, ten),
            Some(Status::NotTraded)
        );
        assert_eq!(
            map_order_status("PreSubmitted", Decimal::ZERO, ten),
            Some(Status::NotTraded)
        );
        assert_eq!(
            map_order_status("Filled", Decimal::from(4), ten),
            Some(Status::PartTraded)
        );
        assert_eq!(
            map_order_status("Filled", ten, ten),
            Some(Status::AllTraded)
        );
        assert_eq!(
            map_order_status("Cancelled", Decimal::ZERO, ten),
            Some(Status::Cancelled)
        );
        assert_eq!(
            map_order_status("ApiCancelled", Decimal::ZERO, ten),
            Some(Status::Cancelled)
        );
        assert_eq!(
            map_order_status("Inactive", Decimal::ZERO, ten),
            Some(Status::Rejected)
        );
        assert_eq!(map_order_status("PendingSubmit", Decimal::ZERO, ten), None);
    }

    #[test]
    fn order_type_wire_mapping_round_trips() {
        for order_type in [
            OrderType::Market,
            OrderType::Limit,
            OrderType::Stop,
            OrderType::StopLimit,
        ] {
            let wire = order_type_to_wire(order_type);
            assert_eq!(order_type_from_wire(wire), Some(order_type));
        }
    }

    #[test]
    fn tick_price_merge_preserves_unrelated_fields() {
        let mut tick = TickData {
            symbol: "AAPL".into(),
            exchange: Some(Exchange::Smart),
            ..TickData::default()
        };
        merge_tick_price(&mut tick, TickField::Bid, Decimal::from(150), AssetClass::Equity);
        merge_tick_size(&mut tick, TickField::BidSize, Decimal::from(300));
        merge_tick_price(&mut tick, TickField::Ask, Decimal::new(15_010, 2), AssetClass::Equity);

        assert_eq!(tick.bid, Some(Decimal::from(150)));
        assert_eq!(tick.bid_size, Some(Decimal::from(300)));
        assert_eq!(tick.ask, Some(Decimal::new(15_010, 2)));
        // No trade print yet, and equities never synthesize one.
        assert_eq!(tick.last, None);
    }

    #[test]
    fn fx_tick_synthesizes_mid_price() {
        let mut tick = TickData {
            symbol: "EURUSD".into(),
            exchange: Some(Exchange::Idealpro),
            ..TickData::default()
        };
        merge_tick_price(&mut tick, TickField::Bid, Decimal::new(10_800, 4), AssetClass::Fx);
        assert_eq!(tick.last, None);
        merge_tick_price(&mut tick, TickField::Ask, Decimal::new(10_802, 4), AssetClass::Fx);
        assert_eq!(tick.last, Some(Decimal::new(10_801, 4)));
    }

    #[tokio::test]
    async fn resubscribe_set_tracks_live_subscriptions_exactly() {
        let registry = Arc::new(SymbolRegistry::new(Box::new(
            janus_registry::SqliteStore::open_in_memory().unwrap(),
        )));
        let bus = janus_events::EventBus::new();
        let mut session = IbSession::new(
            "ib_main".into(),
            IbConfig::default(),
            registry,
            bus.sender(),
            Arc::new(AtomicBool::new(false)),
        );

        for symbol in ["AAPL", "MSFT"] {
            session
                .handle_command(Command::Subscribe(SubscribeRequest {
                    symbol: symbol.into(),
                    exchange: Exchange::Smart,
                }))
                .await;
        }
        // A duplicate subscription must not widen the replay set.
        session
            .handle_command(Command::Subscribe(SubscribeRequest {
                symbol: "AAPL".into(),
                exchange: Exchange::Smart,
            }))
            .await;

        let mut replay: Vec<String> = session
            .resubscribe_set()
            .iter()
            .map(|req| req.symbol.clone())
            .collect();
        replay.sort();
        assert_eq!(replay, ["AAPL", "MSFT"]);

        session
            .handle_command(Command::Unsubscribe(SubscribeRequest {
                symbol: "MSFT".into(),
                exchange: Exchange::Smart,
            }))
            .await;
        let replay: Vec<String> = session
            .resubscribe_set()
            .iter()
            .map(|req| req.symbol.clone())
            .collect();
        assert_eq!(replay, ["AAPL"]);
    }

    #[test]
    fn last_timestamp_string_sets_tick_time() {
        let mut tick = TickData::default();
        assert!(merge_tick_string(&mut tick, TickField::LastTimestamp, "1700000000"));
        assert_eq!(
            tick.timestamp.unwrap(),
            chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap()
        );
        assert!(!merge_tick_string(&mut tick, TickField::LastTimestamp, "bogus"));
    }
}
