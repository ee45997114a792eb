//! Streaming worker test against a scripted websocket server.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};

use janus_broker::BrokerGateway;
use janus_core::{LogLevel, Status};
use janus_events::{Event, EventBus};
use janus_registry::{EnsureFields, SqliteStore, SymbolRegistry};
use janus_webull::{
    BalanceInfo, InstrumentInfo, OpenOrderInfo, PlaceOrder, PlacedAck, PositionInfo,
    WebullConfig, WebullGateway, WebullTradeApi,
};

struct QuietApi;

impl WebullTradeApi for QuietApi {
    fn account_balance(&self) -> janus_broker::GatewayResult<BalanceInfo> {
        Ok(BalanceInfo {
            balance: Decimal::ZERO,
            available: Decimal::ZERO,
            currency: "USD".into(),
        })
    }

    fn positions(&self) -> janus_broker::GatewayResult<Vec<PositionInfo>> {
        Ok(Vec::new())
    }

    fn open_orders(&self) -> janus_broker::GatewayResult<Vec<OpenOrderInfo>> {
        Ok(Vec::new())
    }

    fn place_order(&self, _order: PlaceOrder) -> janus_broker::GatewayResult<PlacedAck> {
        Err(janus_broker::GatewayError::Broker("not under test".into()))
    }

    fn cancel_order(&self, _order_id: &str) -> janus_broker::GatewayResult<()> {
        Ok(())
    }

    fn lookup_instrument(
        &self,
        _ticker: &str,
    ) -> janus_broker::GatewayResult<Vec<InstrumentInfo>> {
        Ok(Vec::new())
    }
}

async fn run_fake_stream(listener: TcpListener) {
    let (stream, _) = listener.accept().await.expect("accept");
    let mut ws = accept_async(stream).await.expect("handshake");

    // First client frame is the subscribe action.
    let subscribe = ws.next().await.expect("subscribe frame").expect("ws frame");
    let text = subscribe.into_text().expect("text frame");
    assert!(text.contains("\"action\":\"subscribe\""));

    let frames = [
        r#"{"type":"subscribe_success"}"#.to_string(),
        r#"{"type":"ping"}"#.to_string(),
        r#"{
            "type": "order",
            "event_type": "ORDER",
            "subscribe_type": "ORDER_STATUS_CHANGED",
            "account_id": "acct1",
            "order_id": "o77",
            "symbol": "AAPL",
            "side": "BUY",
            "quantity": "10",
            "filled_qty": "4",
            "order_type": "LIMIT",
            "limit_price": "150",
            "order_status": "SUBMITTED",
            "scene_type": "FILLED"
        }"#
        .to_string(),
        r#"{"type":"auth_error","message":"token expired"}"#.to_string(),
    ];
    for frame in frames {
        ws.send(Message::Text(frame)).await.expect("send frame");
    }
    // Leave the socket open; the worker stops itself on the auth error.
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_updates_orders_and_stops_on_auth_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(run_fake_stream(listener));

    let store = SqliteStore::open_in_memory().unwrap();
    store.apply_schema().unwrap();
    let registry = Arc::new(SymbolRegistry::new(Box::new(store)));
    registry
        .ensure(
            "AAPL",
            EnsureFields {
                webull_ticker: Some("AAPL".into()),
                ..EnsureFields::default()
            },
        )
        .unwrap();

    let mut bus = EventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.subscribe_all(move |event| sink.lock().unwrap().push(event.clone()));
    bus.start();

    let gateway = WebullGateway::new(
        "wb_live",
        WebullConfig {
            account_id: "acct1".into(),
            stream_url: Some(format!("ws://127.0.0.1:{port}")),
            ..WebullConfig::default()
        },
        Arc::new(QuietApi),
        registry,
        bus.sender(),
    );
    gateway.connect().await.expect("connect");

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        {
            let events = seen.lock().unwrap();
            let order_seen = events.iter().any(|event| {
                matches!(event, Event::Order(order)
                    if order.vt_orderid() == "wb_live.o77"
                        && order.status == Status::PartTraded
                        && order.traded == Decimal::from(4))
            });
            let stopped = events.iter().any(|event| {
                matches!(event, Event::Log(log)
                    if log.level == LogLevel::Error && log.msg.contains("auth error"))
            });
            if order_seen && stopped {
                break;
            }
        }
        assert!(
            Instant::now() < deadline,
            "stream events never reached the bus"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    gateway.close().await;
    bus.stop();
}
