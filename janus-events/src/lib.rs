//! Single-queue event dispatch between broker adapters and server-side
//! subscribers.
//!
//! Adapters enqueue immutable snapshots from their own threads; one worker
//! drains the queue in enqueue order and fans out to type-keyed and generic
//! subscribers. A timer thread feeds periodic [`Event::Timer`] events used
//! for reconnect health checks and RPC heartbeats.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use janus_core::{
    AccountData, ContractData, LogData, LogLevel, OrderData, PositionData, TickData, TradeData,
};

/// Topic strings used by the RPC publisher.
pub mod topic {
    /// Timer / heartbeat event type.
    pub const EVENT_TIMER: &str = "eTimer";
    /// Tick data event type (with optional vt_symbol suffix).
    pub const EVENT_TICK: &str = "eTick";
    /// Trade data event type.
    pub const EVENT_TRADE: &str = "eTrade";
    /// Order data event type.
    pub const EVENT_ORDER: &str = "eOrder";
    /// Position data event type.
    pub const EVENT_POSITION: &str = "ePosition";
    /// Account data event type.
    pub const EVENT_ACCOUNT: &str = "eAccount";
    /// Contract data event type.
    pub const EVENT_CONTRACT: &str = "eContract";
    /// Log event type.
    pub const EVENT_LOG: &str = "eLog";
}

/// Typed event payload dispatched by the bus. Payloads are immutable by
/// contract: subscribers receive shared references and must clone to keep.
#[derive(Clone, Debug)]
pub enum Event {
    Tick(TickData),
    Trade(TradeData),
    Order(OrderData),
    Position(PositionData),
    Account(AccountData),
    Contract(ContractData),
    Log(LogData),
    Timer(DateTime<Utc>),
}

impl Event {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Tick(_) => EventKind::Tick,
            Self::Trade(_) => EventKind::Trade,
            Self::Order(_) => EventKind::Order,
            Self::Position(_) => EventKind::Position,
            Self::Account(_) => EventKind::Account,
            Self::Contract(_) => EventKind::Contract,
            Self::Log(_) => EventKind::Log,
            Self::Timer(_) => EventKind::Timer,
        }
    }
}

/// Discriminant used for subscriber registration.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EventKind {
    Tick,
    Trade,
    Order,
    Position,
    Account,
    Contract,
    Log,
    Timer,
}

type Handler = Box<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
struct HandlerTable {
    by_kind: HashMap<EventKind, Vec<Handler>>,
    generic: Vec<Handler>,
}

struct QueueState {
    deque: VecDeque<Event>,
    tick_count: usize,
    stopped: bool,
    high_water_warned: bool,
}

struct Shared {
    queue: Mutex<QueueState>,
    available: Condvar,
    tick_capacity: usize,
    warn_depth: usize,
}

/// Clonable producer handle. Enqueue never blocks the caller: the queue is
/// unbounded for every kind except TICK, which has a bounded budget with
/// drop-oldest overflow.
#[derive(Clone)]
pub struct EventSender {
    shared: Arc<Shared>,
}

impl EventSender {
    pub fn send(&self, event: Event) {
        let mut state = self.shared.queue.lock().unwrap();
        if state.stopped {
            return;
        }
        if matches!(event, Event::Tick(_)) {
            if state.tick_count >= self.shared.tick_capacity {
                if let Some(pos) = state
                    .deque
                    .iter()
                    .position(|queued| matches!(queued, Event::Tick(_)))
                {
                    state.deque.remove(pos);
                    state.tick_count -= 1;
                }
            }
            state.tick_count += 1;
        }
        state.deque.push_back(event);
        let depth = state.deque.len();
        if depth > self.shared.warn_depth && !state.high_water_warned {
            state.high_water_warned = true;
            warn!(depth, "event queue past high-water mark; consumers are lagging");
        } else if depth < self.shared.warn_depth / 2 {
            state.high_water_warned = false;
        }
        drop(state);
        self.shared.available.notify_one();
    }

    pub fn emit_tick(&self, tick: TickData) {
        self.send(Event::Tick(tick));
    }

    pub fn emit_trade(&self, trade: TradeData) {
        self.send(Event::Trade(trade));
    }

    pub fn emit_order(&self, order: OrderData) {
        self.send(Event::Order(order));
    }

    pub fn emit_position(&self, position: PositionData) {
        self.send(Event::Position(position));
    }

    pub fn emit_account(&self, account: AccountData) {
        self.send(Event::Account(account));
    }

    pub fn emit_contract(&self, contract: ContractData) {
        self.send(Event::Contract(contract));
    }

    pub fn emit_log(&self, source: &str, level: LogLevel, msg: impl Into<String>) {
        self.send(Event::Log(LogData {
            msg: msg.into(),
            level,
            source: source.to_string(),
        }));
    }
}

/// Queue, worker, and timer lifecycle.
pub struct EventBus {
    shared: Arc<Shared>,
    handlers: Arc<RwLock<HandlerTable>>,
    timer_interval: Duration,
    timer_stop: Arc<(Mutex<bool>, Condvar)>,
    worker: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
}

impl EventBus {
    pub const DEFAULT_TICK_CAPACITY: usize = 4096;
    const WARN_DEPTH: usize = 10_000;

    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(Self::DEFAULT_TICK_CAPACITY, Duration::from_secs(1))
    }

    #[must_use]
    pub fn with_settings(tick_capacity: usize, timer_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(QueueState {
                    deque: VecDeque::new(),
                    tick_count: 0,
                    stopped: false,
                    high_water_warned: false,
                }),
                available: Condvar::new(),
                tick_capacity,
                warn_depth: Self::WARN_DEPTH,
            }),
            handlers: Arc::new(RwLock::new(HandlerTable::default())),
            timer_interval,
            timer_stop: Arc::new((Mutex::new(false), Condvar::new())),
            worker: None,
            timer: None,
        }
    }

    /// Producer handle for adapters and internal sources.
    #[must_use]
    pub fn sender(&self) -> EventSender {
        EventSender {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Register a handler for one event kind.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap()
            .by_kind
            .entry(kind)
            .or_default()
            .push(Box::new(handler));
    }

    /// Register a handler invoked for every event.
    pub fn subscribe_all<F>(&self, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.handlers.write().unwrap().generic.push(Box::new(handler));
    }

    /// Spawn the dispatch worker and the timer source.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let handlers = Arc::clone(&self.handlers);
        self.worker = Some(
            std::thread::Builder::new()
                .name("janus-event-bus".into())
                .spawn(move || Self::run_worker(&shared, &handlers))
                .expect("failed to spawn event bus worker"),
        );

        let sender = self.sender();
        let stop = Arc::clone(&self.timer_stop);
        let interval = self.timer_interval;
        self.timer = Some(
            std::thread::Builder::new()
                .name("janus-event-timer".into())
                .spawn(move || {
                    let (lock, cvar) = &*stop;
                    let mut stopped = lock.lock().unwrap();
                    loop {
                        let (guard, timeout) = cvar.wait_timeout(stopped, interval).unwrap();
                        stopped = guard;
                        if *stopped {
                            break;
                        }
                        if timeout.timed_out() {
                            sender.send(Event::Timer(Utc::now()));
                        }
                    }
                })
                .expect("failed to spawn event bus timer"),
        );
    }

    fn run_worker(shared: &Shared, handlers: &RwLock<HandlerTable>) {
        loop {
            let event = {
                let mut state = shared.queue.lock().unwrap();
                loop {
                    if let Some(event) = state.deque.pop_front() {
                        if matches!(event, Event::Tick(_)) {
                            state.tick_count -= 1;
                        }
                        break Some(event);
                    }
                    if state.stopped {
                        break None;
                    }
                    state = shared.available.wait(state).unwrap();
                }
            };
            let Some(event) = event else {
                return;
            };
            let table = handlers.read().unwrap();
            if let Some(list) = table.by_kind.get(&event.kind()) {
                for handler in list {
                    handler(&event);
                }
            }
            for handler in &table.generic {
                handler(&event);
            }
        }
    }

    /// Drain queued events, then join the worker and timer. Safe to call
    /// more than once. Adapters must be closed only after this returns so
    /// nothing dispatches into torn-down subscribers.
    pub fn stop(&mut self) {
        {
            let (lock, cvar) = &*self.timer_stop;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        }
        if let Some(timer) = self.timer.take() {
            let _ = timer.join();
        }
        {
            let mut state = self.shared.queue.lock().unwrap();
            state.stopped = true;
        }
        self.shared.available.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tick(symbol: &str, last: i64) -> Event {
        Event::Tick(TickData {
            symbol: symbol.into(),
            last: Some(Decimal::from(last)),
            ..TickData::default()
        })
    }

    fn log(msg: &str) -> Event {
        Event::Log(LogData {
            msg: msg.into(),
            level: LogLevel::Info,
            source: "test".into(),
        })
    }

    #[test]
    fn dispatch_preserves_enqueue_order_across_kinds() {
        let mut bus = EventBus::with_settings(16, Duration::from_secs(3600));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe_all(move |event| {
            let label = match event {
                Event::Tick(t) => format!("tick:{}", t.symbol),
                Event::Log(l) => format!("log:{}", l.msg),
                _ => "other".into(),
            };
            sink.lock().unwrap().push(label);
        });

        let sender = bus.sender();
        sender.send(tick("AAPL", 1));
        sender.send(log("first"));
        sender.send(tick("MSFT", 2));
        bus.start();
        bus.stop();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec!["tick:AAPL", "log:first", "tick:MSFT"]);
    }

    #[test]
    fn tick_overflow_drops_oldest_tick_only() {
        let mut bus = EventBus::with_settings(2, Duration::from_secs(3600));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe_all(move |event| {
            let label = match event {
                Event::Tick(t) => format!("tick:{}", t.symbol),
                Event::Log(l) => format!("log:{}", l.msg),
                _ => "other".into(),
            };
            sink.lock().unwrap().push(label);
        });

        let sender = bus.sender();
        sender.send(tick("A", 1));
        sender.send(log("keep"));
        sender.send(tick("B", 2));
        // Past the tick budget: oldest tick (A) is dropped, the log survives.
        sender.send(tick("C", 3));
        bus.start();
        bus.stop();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec!["log:keep", "tick:B", "tick:C"]);
    }

    #[test]
    fn typed_subscription_only_sees_its_kind() {
        let mut bus = EventBus::with_settings(16, Duration::from_secs(3600));
        let orders = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&orders);
        bus.subscribe(EventKind::Log, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let sender = bus.sender();
        sender.send(tick("AAPL", 1));
        sender.send(log("one"));
        sender.send(log("two"));
        bus.start();
        bus.stop();

        assert_eq!(orders.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn timer_fires_at_configured_cadence() {
        let mut bus = EventBus::with_settings(16, Duration::from_millis(5));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        bus.subscribe(EventKind::Timer, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.start();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while fired.load(Ordering::SeqCst) < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        bus.stop();
        assert!(fired.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn stop_drains_pending_events_before_join() {
        let mut bus = EventBus::with_settings(16, Duration::from_secs(3600));
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        bus.subscribe(EventKind::Log, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.start();
        let sender = bus.sender();
        for i in 0..100 {
            sender.send(log(&format!("m{i}")));
        }
        bus.stop();
        assert_eq!(count.load(Ordering::SeqCst), 100);
    }
}
