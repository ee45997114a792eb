//! Trade-events streaming worker.
//!
//! One daemon thread per account drives the broker's event stream. Control
//! frames walk a small state machine: auth failures and connection-cap
//! errors stop the worker for good, expired subscriptions reconnect with
//! exponential backoff and jitter, and order payloads are handed to the
//! gateway callback.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::Rng;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

use janus_core::LogLevel;
use janus_events::EventSender;

/// Order-event payload carried by the stream.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct OrderEventPayload {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub subscribe_type: Option<String>,
    pub account_id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: String,
    pub quantity: Decimal,
    #[serde(default)]
    pub filled_qty: Decimal,
    #[serde(default)]
    pub order_type: Option<String>,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub order_status: Option<String>,
    #[serde(default)]
    pub scene_type: Option<String>,
}

/// Frames delivered by the stream.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    SubscribeSuccess,
    Ping,
    AuthError {
        #[serde(default)]
        message: String,
    },
    NumOfConnExceed,
    SubscribeExpired,
    Order(OrderEventPayload),
}

/// What the worker does with a control frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamDecision {
    Continue,
    Reconnect,
    Stop,
}

/// Pure state-machine step: one frame in, one decision out.
#[must_use]
pub fn control_decision(msg: &StreamMessage) -> StreamDecision {
    match msg {
        StreamMessage::SubscribeSuccess | StreamMessage::Ping | StreamMessage::Order(_) => {
            StreamDecision::Continue
        }
        StreamMessage::SubscribeExpired => StreamDecision::Reconnect,
        StreamMessage::AuthError { .. } | StreamMessage::NumOfConnExceed => StreamDecision::Stop,
    }
}

/// Configuration for reconnection backoff.
#[derive(Clone, Debug)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_factor: f64,
    /// 0 means unlimited attempts.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(64),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }
}

/// Exponential backoff with jitter, reset on a healthy subscription.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        let current_delay = config.initial_delay;
        Self {
            config,
            current_delay,
            attempt_count: 0,
        }
    }

    /// Next wait before reconnecting, or `None` once attempts run out.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts > 0 && self.attempt_count >= self.config.max_attempts {
            return None;
        }
        self.attempt_count += 1;
        let delay = self.apply_jitter(self.current_delay);
        let scaled = self.current_delay.as_millis() as f64 * self.config.multiplier;
        let capped = (scaled as u128).min(self.config.max_delay.as_millis());
        self.current_delay = Duration::from_millis(capped as u64);
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }
        let base = duration.as_millis() as f64;
        let spread = base * self.config.jitter_factor;
        let jitter: f64 = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_millis((base + jitter).max(1.0) as u64)
    }
}

/// Running stream worker; dropping the handle does not stop the thread,
/// [`TradeEventsHandle::stop`] does.
pub(crate) struct TradeEventsHandle {
    stop_tx: watch::Sender<bool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl TradeEventsHandle {
    pub(crate) fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

pub(crate) type OrderEventCallback = Arc<dyn Fn(OrderEventPayload) + Send + Sync>;

/// Spawn the per-account streaming thread.
pub(crate) fn spawn_worker(
    alias: String,
    url: String,
    account_id: String,
    events: EventSender,
    callback: OrderEventCallback,
    reconnect: ReconnectConfig,
) -> TradeEventsHandle {
    let (stop_tx, stop_rx) = watch::channel(false);
    let thread = std::thread::Builder::new()
        .name(format!("janus-webull-events-{alias}"))
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build trade events runtime");
            runtime.block_on(run_stream(
                alias, url, account_id, events, callback, reconnect, stop_rx,
            ));
        })
        .expect("failed to spawn trade events thread");
    TradeEventsHandle {
        stop_tx,
        thread: Some(thread),
    }
}

async fn run_stream(
    alias: String,
    url: String,
    account_id: String,
    events: EventSender,
    callback: OrderEventCallback,
    reconnect: ReconnectConfig,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut policy = ReconnectPolicy::new(reconnect);
    loop {
        if *stop_rx.borrow() {
            return;
        }
        match connect_async(&url).await {
            Err(err) => {
                warn!(alias = %alias, error = %err, "trade events connect failed");
            }
            Ok((mut ws, _)) => {
                let subscribe =
                    serde_json::json!({ "action": "subscribe", "account_id": account_id });
                if ws.send(Message::Text(subscribe.to_string())).await.is_ok() {
                    info!(alias = %alias, "trade events stream connected");
                    let mut reconnect_stream = true;
                    loop {
                        tokio::select! {
                            _ = stop_rx.changed() => {
                                let _ = ws.close(None).await;
                                return;
                            }
                            frame = ws.next() => match frame {
                                None | Some(Err(_)) => break,
                                Some(Ok(Message::Text(text))) => {
                                    let msg = match serde_json::from_str::<StreamMessage>(&text) {
                                        Ok(msg) => msg,
                                        Err(err) => {
                                            warn!(alias = %alias, error = %err, "undecodable stream frame");
                                            continue;
                                        }
                                    };
                                    match control_decision(&msg) {
                                        StreamDecision::Continue => match msg {
                                            StreamMessage::SubscribeSuccess => {
                                                policy.reset();
                                                events.emit_log(
                                                    &alias,
                                                    LogLevel::Info,
                                                    "trade events subscribed",
                                                );
                                            }
                                            StreamMessage::Order(payload) => callback(payload),
                                            _ => {}
                                        },
                                        StreamDecision::Reconnect => {
                                            events.emit_log(
                                                &alias,
                                                LogLevel::Warning,
                                                "trade events subscription expired; reconnecting",
                                            );
                                            break;
                                        }
                                        StreamDecision::Stop => {
                                            let reason = match msg {
                                                StreamMessage::AuthError { message } => {
                                                    format!("trade events auth error: {message}")
                                                }
                                                _ => "trade events connection cap exceeded".into(),
                                            };
                                            events.emit_log(&alias, LogLevel::Error, reason);
                                            reconnect_stream = false;
                                            break;
                                        }
                                    }
                                }
                                Some(Ok(Message::Ping(payload))) => {
                                    let _ = ws.send(Message::Pong(payload)).await;
                                }
                                Some(Ok(_)) => {}
                            }
                        }
                    }
                    if !reconnect_stream {
                        return;
                    }
                }
            }
        }
        match policy.next_delay() {
            None => {
                events.emit_log(
                    &alias,
                    LogLevel::Error,
                    "trade events reconnect attempts exhausted",
                );
                return;
            }
            Some(delay) => {
                tokio::select! {
                    _ = stop_rx.changed() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
