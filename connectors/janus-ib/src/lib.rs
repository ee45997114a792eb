//! Broker-B adapter: an async socket-protocol client.
//!
//! One dedicated OS thread runs a current-thread tokio runtime that owns
//! the socket. Gateway methods called from the server runtime enqueue
//! commands onto that loop; completions come back over oneshot channels
//! with bounded timeouts. All broker callbacks surface as bus events.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use janus_broker::{BrokerGateway, BrokerKind, GatewayError, GatewayResult};
use janus_core::{
    BarSubscribeRequest, CancelRequest, ContractDetails, ContractQuery, OrderRequest, OrderType,
    SubscribeRequest,
};
use janus_events::EventSender;
use janus_registry::SymbolRegistry;

mod protocol;
mod session;

pub use protocol::{Inbound, Outbound, TickField, DATA_FARM_CODES};

use session::Command;

/// Connection settings for one broker-B account.
#[derive(Clone, Debug)]
pub struct IbConfig {
    pub host: String,
    pub port: u16,
    pub client_id: i64,
    /// Bound on synchronous completions (contract details, connect).
    pub request_timeout: Duration,
    /// Health check cadence in timer ticks (one tick per second).
    pub health_check_ticks: u64,
}

impl Default for IbConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 7497,
            client_id: 1,
            request_timeout: Duration::from_secs(5),
            health_check_ticks: 10,
        }
    }
}

const CAPABILITIES: &[OrderType] = &[
    OrderType::Market,
    OrderType::Limit,
    OrderType::Stop,
    OrderType::StopLimit,
];

/// Gateway handle shared across server threads.
pub struct IbGateway {
    alias: String,
    config: IbConfig,
    registry: Arc<SymbolRegistry>,
    events: EventSender,
    cmd_tx: mpsc::UnboundedSender<Command>,
    connected: Arc<AtomicBool>,
    next_orderid: AtomicI64,
    timer_ticks: AtomicU64,
    io_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl IbGateway {
    pub fn new(
        alias: impl Into<String>,
        config: IbConfig,
        registry: Arc<SymbolRegistry>,
        events: EventSender,
    ) -> Arc<Self> {
        let alias = alias.into();
        let connected = Arc::new(AtomicBool::new(false));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let session = session::IbSession::new(
            alias.clone(),
            config.clone(),
            Arc::clone(&registry),
            events.clone(),
            Arc::clone(&connected),
        );
        let thread = std::thread::Builder::new()
            .name(format!("janus-ib-{alias}"))
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build broker io runtime");
                runtime.block_on(session::run(session, cmd_rx));
            })
            .expect("failed to spawn broker io thread");

        Arc::new(Self {
            alias,
            config,
            registry,
            events,
            cmd_tx,
            connected,
            next_orderid: AtomicI64::new(1),
            timer_ticks: AtomicU64::new(0),
            io_thread: Mutex::new(Some(thread)),
        })
    }

    fn post(&self, command: Command) -> GatewayResult<()> {
        self.cmd_tx
            .send(command)
            .map_err(|_| GatewayError::NotConnected)
    }

    /// Timer subscriber hook: every `health_check_ticks` ticks the I/O loop
    /// verifies connection health and reconnects if needed.
    pub fn on_timer(&self) {
        let ticks = self.timer_ticks.fetch_add(1, Ordering::Relaxed) + 1;
        if ticks % self.config.health_check_ticks == 0 {
            let _ = self.post(Command::CheckHealth);
        }
    }
}

#[async_trait]
impl BrokerGateway for IbGateway {
    fn alias(&self) -> &str {
        &self.alias
    }

    fn broker_kind(&self) -> BrokerKind {
        BrokerKind::Ib
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn capabilities(&self) -> &'static [OrderType] {
        CAPABILITIES
    }

    async fn connect(&self) -> GatewayResult<()> {
        let (tx, rx) = oneshot::channel();
        self.post(Command::Connect { reply: Some(tx) })?;
        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Err(_) => Err(GatewayError::Timeout(self.config.request_timeout)),
            Ok(Err(_)) => Err(GatewayError::Transport("io loop terminated".into())),
            Ok(Ok(Err(msg))) => Err(GatewayError::Transport(msg)),
            Ok(Ok(Ok(()))) => Ok(()),
        }
    }

    async fn close(&self) {
        let _ = self.post(Command::Close);
        let handle = self.io_thread.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }
    }

    async fn subscribe(&self, req: SubscribeRequest) -> GatewayResult<()> {
        self.post(Command::Subscribe(req))
    }

    async fn unsubscribe(&self, req: SubscribeRequest) -> GatewayResult<()> {
        self.post(Command::Unsubscribe(req))
    }

    async fn subscribe_bars(&self, req: BarSubscribeRequest) -> GatewayResult<()> {
        self.post(Command::SubscribeBars(req))
    }

    async fn unsubscribe_bars(&self, req: BarSubscribeRequest) -> GatewayResult<()> {
        self.post(Command::UnsubscribeBars(req))
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
        if !self.connected() {
            return Err(GatewayError::NotConnected);
        }
        let conid = self
            .registry
            .lookup_by_canonical(&req.symbol)
            .and_then(|entry| entry.ib_conid)
            .ok_or_else(|| {
                GatewayError::InvalidRequest(format!("no broker conid for '{}'", req.symbol))
            })?;

        let orderid = self.next_orderid.fetch_add(1, Ordering::SeqCst);
        let order = req.create_order_data(&self.alias, orderid.to_string());
        let vt_orderid = order.vt_orderid();
        // SUBMITTING snapshot goes out before the network send is scheduled.
        self.events.emit_order(order.clone());
        self.post(Command::PlaceOrder { order, conid })?;
        Ok(vt_orderid)
    }

    async fn cancel_order(&self, req: CancelRequest) -> GatewayResult<()> {
        let orderid = req.orderid.parse::<i64>().map_err(|_| {
            GatewayError::InvalidRequest(format!("malformed broker order id '{}'", req.orderid))
        })?;
        self.post(Command::CancelOrder { orderid })
    }

    async fn query_account(&self) -> GatewayResult<()> {
        self.post(Command::QueryAccount)
    }

    async fn query_position(&self) -> GatewayResult<()> {
        self.post(Command::QueryPositions)
    }

    async fn query_open_orders(&self) -> GatewayResult<()> {
        self.post(Command::QueryOpenOrders)
    }

    async fn request_contract_details(
        &self,
        query: ContractQuery,
    ) -> GatewayResult<Vec<ContractDetails>> {
        let (tx, rx) = oneshot::channel();
        self.post(Command::ContractDetails { query, reply: tx })?;
        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(details)) => Ok(details),
            // Timeout and session teardown both resolve as "no results";
            // the registry treats that as an unresolved lookup.
            Ok(Err(_)) | Err(_) => {
                warn!(alias = %self.alias, "contract details request yielded no completion");
                Ok(Vec::new())
            }
        }
    }
}
