//! Routing pipeline scenarios against scripted gateways.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;

use common::{detail, MockGateway};
use janus_broker::{BrokerGateway, BrokerKind};
use janus_core::{
    Direction, Exchange, OrderIntent, OrderSide, OrderType, PositionData, Status, TimeInForce,
    Volume,
};
use janus_events::{Event, EventBus};
use janus_oms::OmsCache;
use janus_registry::{EnsureFields, RegistryError, SqliteStore, SymbolRegistry};
use janus_server::{OrderRouter, RouterError};

struct Rig {
    registry: Arc<SymbolRegistry>,
    oms: Arc<OmsCache>,
    router: OrderRouter,
    bus: EventBus,
}

fn rig() -> Rig {
    let store = SqliteStore::open_in_memory().unwrap();
    store.apply_schema().unwrap();
    let registry = Arc::new(SymbolRegistry::new(Box::new(store)));
    let mut bus = EventBus::new();
    let oms = OmsCache::new();
    oms.attach(&bus);
    bus.start();
    let router = OrderRouter::new(Arc::clone(&registry), Arc::clone(&oms));
    Rig {
        registry,
        oms,
        router,
        bus,
    }
}

fn seed(rig: &Rig, symbol: &str, fields: EnsureFields) {
    rig.registry.ensure(symbol, fields).unwrap();
}

fn conid(value: i64) -> EnsureFields {
    EnsureFields {
        ib_conid: Some(value),
        ..EnsureFields::default()
    }
}

fn ticker(value: &str) -> EnsureFields {
    EnsureFields {
        webull_ticker: Some(value.into()),
        ..EnsureFields::default()
    }
}

fn intent(side: OrderSide, account: &str, symbol: &str, qty: i64, order_type: OrderType) -> OrderIntent {
    OrderIntent {
        account_alias: account.into(),
        symbol: symbol.into(),
        side,
        order_type,
        qty: Decimal::from(qty),
        limit_price: None,
        stop_price: None,
        tif: TimeInForce::Gtc,
    }
}

fn wait_until(deadline_ms: u64, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_millis(deadline_ms);
    while Instant::now() < deadline {
        if check() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("condition never became true");
}

#[tokio::test]
async fn happy_limit_buy_fills_and_clears_the_active_set() {
    let mut rig = rig();
    seed(&rig, "AAPL", conid(265_598));
    let mock = Arc::new(
        MockGateway::new("ib_main", BrokerKind::Ib).with_fill_events(rig.bus.sender()),
    );
    let gateway: Arc<dyn BrokerGateway> = mock.clone();

    let mut buy = intent(OrderSide::Buy, "ib_main", "AAPL", 10, OrderType::Limit);
    buy.limit_price = Some(Decimal::from(150));

    let vt_orderid = rig.router.route(&gateway, false, true, &buy).await.unwrap();
    assert_eq!(vt_orderid, "ib_main.1");

    let oms = Arc::clone(&rig.oms);
    wait_until(2_000, move || {
        oms.get_order("ib_main.1")
            .is_some_and(|order| order.status == Status::AllTraded)
    });
    assert!(rig.oms.get_active_orders().is_empty());
    let trades = rig.oms.get_all_trades();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].price, Decimal::from(150));
    assert_eq!(trades[0].volume, Volume::from(10));
    rig.bus.stop();
}

#[tokio::test]
async fn ambiguous_auto_fill_rejects_and_writes_nothing() {
    let mut rig = rig();
    let mock = Arc::new(
        MockGateway::new("ib_main", BrokerKind::Ib)
            .with_details("ACME", vec![detail(1, "ACME"), detail(2, "ACME")]),
    );
    let gateway: Arc<dyn BrokerGateway> = mock.clone();

    let err = rig
        .router
        .route(
            &gateway,
            false,
            true,
            &intent(OrderSide::Buy, "ib_main", "ACME", 1, OrderType::Market),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RouterError::Registry(RegistryError::Ambiguous { matches: 2, .. })
    ));
    assert!(rig.registry.lookup_by_canonical("ACME").is_none());
    assert!(mock.placed.lock().unwrap().is_empty());
    rig.bus.stop();
}

#[tokio::test]
async fn capability_gate_rejects_before_any_lookup() {
    let mut rig = rig();
    seed(&rig, "MSFT", conid(272_093));
    let mock = Arc::new(
        MockGateway::new("ib_main", BrokerKind::Ib)
            .with_caps(&[OrderType::Market, OrderType::Limit]),
    );
    let gateway: Arc<dyn BrokerGateway> = mock.clone();

    let mut stop_limit = intent(OrderSide::Buy, "ib_main", "MSFT", 100, OrderType::StopLimit);
    stop_limit.stop_price = Some(Decimal::from(300));
    stop_limit.limit_price = Some(Decimal::from(301));

    let err = rig
        .router
        .route(&gateway, false, true, &stop_limit)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RouterError::CapabilityUnsupported(OrderType::StopLimit)
    ));
    assert!(mock.placed.lock().unwrap().is_empty());
    assert_eq!(
        mock.detail_requests.load(Ordering::SeqCst),
        0,
        "gate must fire before any broker lookup"
    );
    rig.bus.stop();
}

#[tokio::test]
async fn sell_with_zero_position_opens_short_when_allowed() {
    let mut rig = rig();
    seed(&rig, "TSLA", ticker("TSLA"));
    let mock = Arc::new(MockGateway::new("wb_live", BrokerKind::Webull));
    let gateway: Arc<dyn BrokerGateway> = mock.clone();

    rig.router
        .route(
            &gateway,
            true,
            true,
            &intent(OrderSide::Sell, "wb_live", "TSLA", 5, OrderType::Market),
        )
        .await
        .unwrap();
    let placed = mock.placed.lock().unwrap();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].direction, Direction::Short);
    rig.bus.stop();
}

#[tokio::test]
async fn sell_with_zero_position_is_rejected_without_short_permission() {
    let mut rig = rig();
    seed(&rig, "TSLA", ticker("TSLA"));
    let gateway: Arc<dyn BrokerGateway> =
        Arc::new(MockGateway::new("wb_live", BrokerKind::Webull));

    let err = rig
        .router
        .route(
            &gateway,
            false,
            true,
            &intent(OrderSide::Sell, "wb_live", "TSLA", 5, OrderType::Market),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::ShortNotAllowed(_)));
    rig.bus.stop();
}

#[tokio::test]
async fn sell_against_long_position_reduces_the_long() {
    let mut rig = rig();
    seed(&rig, "AAPL", ticker("AAPL"));
    rig.oms.process_event(&Event::Position(PositionData {
        account_alias: "wb_live".into(),
        symbol: "AAPL".into(),
        direction: Direction::Long,
        volume: Volume::from(10),
        price: Decimal::from(100),
        pnl: Decimal::ZERO,
        frozen: Volume::ZERO,
    }));
    let mock = Arc::new(MockGateway::new("wb_live", BrokerKind::Webull));
    let gateway: Arc<dyn BrokerGateway> = mock.clone();

    rig.router
        .route(
            &gateway,
            false,
            true,
            &intent(OrderSide::Sell, "wb_live", "AAPL", 5, OrderType::Market),
        )
        .await
        .unwrap();
    assert_eq!(mock.placed.lock().unwrap()[0].direction, Direction::Long);
    rig.bus.stop();
}

#[tokio::test]
async fn sell_against_short_position_adds_to_the_short() {
    let mut rig = rig();
    seed(&rig, "GME", ticker("GME"));
    rig.oms.process_event(&Event::Position(PositionData {
        account_alias: "wb_live".into(),
        symbol: "GME".into(),
        direction: Direction::Short,
        volume: Volume::from(4),
        price: Decimal::from(20),
        pnl: Decimal::ZERO,
        frozen: Volume::ZERO,
    }));
    let mock = Arc::new(MockGateway::new("wb_live", BrokerKind::Webull));
    let gateway: Arc<dyn BrokerGateway> = mock.clone();

    rig.router
        .route(
            &gateway,
            false,
            true,
            &intent(OrderSide::Sell, "wb_live", "GME", 2, OrderType::Market),
        )
        .await
        .unwrap();
    assert_eq!(mock.placed.lock().unwrap()[0].direction, Direction::Short);
    rig.bus.stop();
}

#[tokio::test]
async fn explicit_short_and_cover_bypass_the_position_check() {
    let mut rig = rig();
    seed(&rig, "NVDA", ticker("NVDA"));
    let mock = Arc::new(MockGateway::new("wb_live", BrokerKind::Webull));
    let gateway: Arc<dyn BrokerGateway> = mock.clone();

    rig.router
        .route(
            &gateway,
            false,
            true,
            &intent(OrderSide::Short, "wb_live", "NVDA", 3, OrderType::Market),
        )
        .await
        .unwrap();
    rig.router
        .route(
            &gateway,
            false,
            true,
            &intent(OrderSide::Cover, "wb_live", "NVDA", 3, OrderType::Market),
        )
        .await
        .unwrap();

    let placed = mock.placed.lock().unwrap();
    assert_eq!(placed[0].direction, Direction::Short);
    assert_eq!(placed[1].direction, Direction::Long);
    rig.bus.stop();
}

#[tokio::test]
async fn missing_broker_id_without_auto_fill_is_a_registry_miss() {
    let mut rig = rig();
    // Entry exists but carries no conid for the streaming broker.
    seed(&rig, "IBM", ticker("IBM"));
    let gateway: Arc<dyn BrokerGateway> = Arc::new(MockGateway::new("ib_main", BrokerKind::Ib));

    let err = rig
        .router
        .route(
            &gateway,
            false,
            false,
            &intent(OrderSide::Buy, "ib_main", "IBM", 1, OrderType::Market),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::Registry(RegistryError::Miss(_))));
    rig.bus.stop();
}

#[tokio::test]
async fn limit_intent_without_price_is_invalid() {
    let mut rig = rig();
    let gateway: Arc<dyn BrokerGateway> = Arc::new(MockGateway::new("ib_main", BrokerKind::Ib));
    let err = rig
        .router
        .route(
            &gateway,
            false,
            true,
            &intent(OrderSide::Buy, "ib_main", "AAPL", 1, OrderType::Limit),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::InvalidIntent(_)));
    rig.bus.stop();
}

#[tokio::test]
async fn composed_requests_are_canonicalized_to_smart_routing() {
    let mut rig = rig();
    seed(&rig, "AAPL", conid(265_598));
    let mock = Arc::new(MockGateway::new("ib_main", BrokerKind::Ib));
    let gateway: Arc<dyn BrokerGateway> = mock.clone();

    rig.router
        .route(
            &gateway,
            false,
            true,
            &intent(OrderSide::Buy, "ib_main", " aapl ", 1, OrderType::Market),
        )
        .await
        .unwrap();
    let placed = mock.placed.lock().unwrap();
    assert_eq!(placed[0].symbol, "AAPL");
    assert_eq!(placed[0].exchange, Exchange::Smart);
    rig.bus.stop();
}
