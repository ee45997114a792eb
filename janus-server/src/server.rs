//! Server assembly: adapters, event bus, OMS, registry, RPC listeners.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use janus_broker::{BrokerGateway, BrokerKind};
use janus_config::{AccountConfig, AppConfig, MarketDataConfig, RpcConfig};
use janus_core::{
    split_vt_orderid, BarSubscribeRequest, CancelRequest, Exchange, OrderIntent, SubscribeRequest,
};
use janus_events::{EventBus, EventKind};
use janus_ib::{IbConfig, IbGateway};
use janus_oms::OmsCache;
use janus_registry::{normalize, RegistryError, SqliteStore, SymbolRegistry};
use janus_rpc::{
    event_frames, spawn_publish_listener, spawn_request_listener, BrokerEntry, HarmonySummary,
    Publisher,
};
use janus_webull::{WebullConfig, WebullGateway, WebullHttpClient, WebullHttpConfig};

use crate::harmony::run_harmony;
use crate::router::{OrderRouter, RouterError};
use crate::service::RpcHandler;

/// Request-facing server state: everything the RPC surface needs, without
/// the bus lifecycle. Owned behind an `Arc` by listeners and the runner.
pub struct ServerCore {
    accounts: HashMap<String, AccountConfig>,
    adapters: HashMap<String, Arc<dyn BrokerGateway>>,
    default_alias: Option<String>,
    default_use_rth: bool,
    registry: Arc<SymbolRegistry>,
    oms: Arc<OmsCache>,
    router: OrderRouter,
    stop: Notify,
}

impl ServerCore {
    #[must_use]
    pub fn new(
        accounts: HashMap<String, AccountConfig>,
        adapters: HashMap<String, Arc<dyn BrokerGateway>>,
        default_alias: Option<String>,
        default_use_rth: bool,
        registry: Arc<SymbolRegistry>,
        oms: Arc<OmsCache>,
    ) -> Self {
        let router = OrderRouter::new(Arc::clone(&registry), Arc::clone(&oms));
        Self {
            accounts,
            adapters,
            default_alias,
            default_use_rth,
            registry,
            oms,
            router,
            stop: Notify::new(),
        }
    }

    fn gateway(&self, alias: &str) -> Result<&Arc<dyn BrokerGateway>, RouterError> {
        self.adapters
            .get(alias)
            .ok_or_else(|| RouterError::UnknownAccount(alias.to_string()))
    }

    fn resolve_alias(&self, requested: Option<&str>) -> Result<String, RouterError> {
        requested
            .map(str::to_string)
            .or_else(|| self.default_alias.clone())
            .ok_or_else(|| RouterError::UnknownAccount("no default account".into()))
    }

    pub async fn send_order_intent(&self, intent: &OrderIntent) -> Result<String, RouterError> {
        let gateway = self.gateway(&intent.account_alias)?;
        let account = self
            .accounts
            .get(&intent.account_alias)
            .ok_or_else(|| RouterError::UnknownAccount(intent.account_alias.clone()))?;
        self.router
            .route(gateway, account.allow_short, account.auto_fill, intent)
            .await
    }

    pub async fn cancel_order(&self, vt_orderid: &str) -> Result<(), RouterError> {
        let (alias, orderid) = split_vt_orderid(vt_orderid).ok_or_else(|| {
            RouterError::InvalidIntent(format!("malformed vt_orderid '{vt_orderid}'"))
        })?;
        let gateway = self.gateway(alias)?;
        let cached = self.oms.get_order(vt_orderid);
        let request = CancelRequest {
            orderid: orderid.to_string(),
            symbol: cached
                .as_ref()
                .map(|order| order.symbol.clone())
                .unwrap_or_default(),
            exchange: cached
                .map(|order| order.exchange)
                .unwrap_or(Exchange::Smart),
        };
        Ok(gateway.cancel_order(request).await?)
    }

    /// Kick a snapshot refresh on every connected adapter and return
    /// immediately; authoritative state arrives through the event path.
    pub fn sync_all(&self) -> String {
        for (alias, gateway) in &self.adapters {
            if !gateway.connected() {
                continue;
            }
            let alias = alias.clone();
            let gateway = Arc::clone(gateway);
            tokio::spawn(async move {
                if let Err(err) = gateway.sync_snapshots().await {
                    warn!(%alias, error = %err, "snapshot refresh failed");
                }
            });
        }
        "Sync request sent to all gateways.".to_string()
    }

    pub async fn harmony(&self) -> Result<HarmonySummary, RegistryError> {
        let gateways: Vec<Arc<dyn BrokerGateway>> = self.adapters.values().cloned().collect();
        run_harmony(&self.registry, &gateways).await
    }

    pub async fn subscribe_bars(
        &self,
        symbols: &[String],
        account: Option<&str>,
        use_rth: bool,
    ) -> Result<(), RouterError> {
        let alias = self.resolve_alias(account)?;
        let gateway = self.gateway(&alias)?;
        let use_rth = use_rth || self.default_use_rth;
        for symbol in symbols {
            gateway
                .subscribe_bars(BarSubscribeRequest {
                    symbol: normalize(symbol),
                    exchange: Exchange::Smart,
                    use_rth,
                })
                .await?;
        }
        Ok(())
    }

    pub async fn unsubscribe_bars(
        &self,
        symbols: &[String],
        account: Option<&str>,
    ) -> Result<(), RouterError> {
        let alias = self.resolve_alias(account)?;
        let gateway = self.gateway(&alias)?;
        for symbol in symbols {
            gateway
                .unsubscribe_bars(BarSubscribeRequest {
                    symbol: normalize(symbol),
                    exchange: Exchange::Smart,
                    use_rth: false,
                })
                .await?;
        }
        Ok(())
    }

    #[must_use]
    pub fn broker_list(&self) -> Vec<BrokerEntry> {
        let mut entries: Vec<BrokerEntry> = self
            .adapters
            .iter()
            .map(|(alias, gateway)| BrokerEntry {
                alias: alias.clone(),
                broker: gateway.broker_kind().to_string(),
                connected: gateway.connected(),
                default: self.default_alias.as_deref() == Some(alias.as_str()),
            })
            .collect();
        entries.sort_by(|a, b| a.alias.cmp(&b.alias));
        entries
    }

    /// Remote shutdown request; the runner observes the notification.
    pub fn request_exit(&self) {
        self.stop.notify_one();
    }
}

/// Long-lived server process owning the bus and the RPC listeners.
pub struct JanusServer {
    rpc: RpcConfig,
    market_data: MarketDataConfig,
    bus: EventBus,
    core: Arc<ServerCore>,
    publisher: Publisher,
    listeners: Vec<JoinHandle<()>>,
}

impl JanusServer {
    /// Assemble the server. Fails hard when the registry store is
    /// unreachable; there is no degraded mode.
    pub fn build(config: AppConfig) -> Result<Self> {
        let store =
            SqliteStore::open(&config.registry.db_path).context("open registry store")?;
        let registry = Arc::new(SymbolRegistry::new(Box::new(store)));
        let loaded = registry.load().context("load symbol registry")?;
        info!(symbols = loaded, "symbol registry loaded");

        let bus = EventBus::new();
        let oms = OmsCache::new();
        oms.attach(&bus);

        let publisher = Publisher::new(1024);
        let fanout = publisher.clone();
        bus.subscribe_all(move |event| {
            for frame in event_frames(event) {
                fanout.publish(frame);
            }
        });

        let mut adapters: HashMap<String, Arc<dyn BrokerGateway>> = HashMap::new();
        let mut accounts = HashMap::new();
        for account in &config.accounts {
            let gateway = build_gateway(account, &config, &registry, &bus)?;
            adapters.insert(account.alias.clone(), gateway);
            accounts.insert(account.alias.clone(), account.clone());
        }
        let default_alias = config.default_account().map(|account| account.alias.clone());

        let core = Arc::new(ServerCore::new(
            accounts,
            adapters,
            default_alias,
            config.market_data.use_rth,
            registry,
            oms,
        ));
        Ok(Self {
            rpc: config.rpc,
            market_data: config.market_data,
            bus,
            core,
            publisher,
            listeners: Vec::new(),
        })
    }

    #[must_use]
    pub fn core(&self) -> Arc<ServerCore> {
        Arc::clone(&self.core)
    }

    /// Connect adapters, serve RPC, and block until shutdown.
    pub async fn run(&mut self) -> Result<()> {
        self.bus.start();

        for (alias, gateway) in &self.core.adapters {
            match gateway.connect().await {
                Ok(()) => info!(%alias, "gateway connected"),
                Err(err) => warn!(%alias, error = %err, "gateway connect failed"),
            }
        }

        for symbol in &self.market_data.default_symbols {
            for gateway in self.core.adapters.values() {
                if gateway.broker_kind() == BrokerKind::Ib {
                    let request = SubscribeRequest {
                        symbol: normalize(symbol),
                        exchange: Exchange::Smart,
                    };
                    if let Err(err) = gateway.subscribe(request).await {
                        warn!(%symbol, error = %err, "default subscription failed");
                    }
                }
            }
        }

        let rep = TcpListener::bind(&self.rpc.rep_address)
            .await
            .with_context(|| format!("bind rpc listener on {}", self.rpc.rep_address))?;
        let publish = TcpListener::bind(&self.rpc.pub_address)
            .await
            .with_context(|| format!("bind publish listener on {}", self.rpc.pub_address))?;
        info!(
            rep = %self.rpc.rep_address,
            publish = %self.rpc.pub_address,
            "janus server ready"
        );
        self.listeners.push(spawn_request_listener(
            rep,
            Arc::new(RpcHandler::new(Arc::clone(&self.core))),
        ));
        self.listeners
            .push(spawn_publish_listener(publish, self.publisher.clone()));

        tokio::select! {
            _ = self.core.stop.notified() => info!("shutdown requested over rpc"),
            _ = tokio::signal::ctrl_c() => info!("interrupt received"),
        }
        self.shutdown().await;
        Ok(())
    }

    /// Ordered teardown: stop accepting RPC, drain the bus, close adapters.
    pub async fn shutdown(&mut self) {
        for listener in self.listeners.drain(..) {
            listener.abort();
        }
        self.bus.stop();
        for (alias, gateway) in &self.core.adapters {
            gateway.close().await;
            info!(%alias, "gateway closed");
        }
    }
}

fn build_gateway(
    account: &AccountConfig,
    config: &AppConfig,
    registry: &Arc<SymbolRegistry>,
    bus: &EventBus,
) -> Result<Arc<dyn BrokerGateway>> {
    let gateway: Arc<dyn BrokerGateway> = match account.broker {
        BrokerKind::Ib => {
            let ib_config = IbConfig {
                host: account
                    .host
                    .clone()
                    .unwrap_or_else(|| "127.0.0.1".to_string()),
                port: account.port.unwrap_or(7497),
                client_id: account.client_id.unwrap_or(1),
                request_timeout: Duration::from_secs(5),
                health_check_ticks: config.reconnect.interval_seconds.max(1),
            };
            let gateway = IbGateway::new(
                account.alias.as_str(),
                ib_config,
                Arc::clone(registry),
                bus.sender(),
            );
            let timer_hook = Arc::clone(&gateway);
            bus.subscribe(EventKind::Timer, move |_| timer_hook.on_timer());
            gateway
        }
        BrokerKind::Webull => {
            let http = WebullHttpClient::new(WebullHttpConfig {
                base_url: account
                    .host
                    .clone()
                    .unwrap_or_else(|| "https://api.webull.com".to_string()),
                app_key: account.credentials.app_key.clone(),
                app_secret: account.credentials.app_secret.clone(),
                account_id: account.credentials.account_id.clone(),
                timeout: Duration::from_secs(10),
            })
            .map_err(|err| anyhow::anyhow!("webull http client: {err}"))?;

            let stream_url = account
                .trade_events
                .as_ref()
                .filter(|settings| settings.enable)
                .and_then(|settings| settings.host.as_ref().map(|host| (host, settings)))
                .map(|(host, settings)| match &settings.region_id {
                    Some(region) => format!("wss://{host}/trade-events?region={region}"),
                    None => format!("wss://{host}/trade-events"),
                });

            WebullGateway::new(
                account.alias.as_str(),
                WebullConfig {
                    account_id: account.credentials.account_id.clone(),
                    stream_url,
                    refresh_debounce: Duration::from_millis(config.refresh_debounce_ms),
                    reconnect: Default::default(),
                },
                Arc::new(http),
                Arc::clone(registry),
                bus.sender(),
            )
        }
    };
    Ok(gateway)
}
