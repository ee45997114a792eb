//! Authoritative in-memory state cache fed by the event bus.
//!
//! The cache is written only by the event-bus worker and read through
//! synchronous snapshots. It never calls back into adapters. An order is
//! present in the active set iff its terminal status has not yet arrived.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rust_decimal::Decimal;

use janus_core::{AccountData, ContractData, OrderData, PositionData, PositionKey, TradeData};
use janus_events::{Event, EventBus, EventKind};

#[derive(Default)]
struct OmsInner {
    orders: HashMap<String, OrderData>,
    active_orders: HashMap<String, OrderData>,
    trades: HashMap<String, TradeData>,
    positions: HashMap<PositionKey, PositionData>,
    accounts: HashMap<String, AccountData>,
    contracts: HashMap<String, ContractData>,
}

/// Order/trade/position/account/contract cache.
#[derive(Default)]
pub struct OmsCache {
    inner: RwLock<OmsInner>,
}

impl OmsCache {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribe this cache to every event kind it tracks. Ticks are left
    /// to market-data consumers; the OMS only owns trading state.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) {
        for kind in [
            EventKind::Order,
            EventKind::Trade,
            EventKind::Position,
            EventKind::Account,
            EventKind::Contract,
        ] {
            let oms = Arc::clone(self);
            bus.subscribe(kind, move |event| oms.process_event(event));
        }
    }

    /// Apply one event. Invoked by the bus worker only.
    pub fn process_event(&self, event: &Event) {
        match event {
            Event::Order(order) => self.process_order(order),
            Event::Trade(trade) => self.process_trade(trade),
            Event::Position(position) => self.process_position(position),
            Event::Account(account) => self.process_account(account),
            Event::Contract(contract) => self.process_contract(contract),
            _ => {}
        }
    }

    fn process_order(&self, order: &OrderData) {
        let vt_orderid = order.vt_orderid();
        let mut inner = self.inner.write().unwrap();
        inner.orders.insert(vt_orderid.clone(), order.clone());
        if order.is_active() {
            inner.active_orders.insert(vt_orderid, order.clone());
        } else {
            inner.active_orders.remove(&vt_orderid);
        }
    }

    fn process_trade(&self, trade: &TradeData) {
        let mut inner = self.inner.write().unwrap();
        inner.trades.insert(trade.vt_tradeid(), trade.clone());
    }

    fn process_position(&self, position: &PositionData) {
        let mut inner = self.inner.write().unwrap();
        let key = position.key();
        if position.volume.is_zero() {
            inner.positions.remove(&key);
        } else {
            inner.positions.insert(key, position.clone());
        }
    }

    fn process_account(&self, account: &AccountData) {
        let mut inner = self.inner.write().unwrap();
        inner
            .accounts
            .insert(account.account_alias.clone(), account.clone());
    }

    fn process_contract(&self, contract: &ContractData) {
        let mut inner = self.inner.write().unwrap();
        inner
            .contracts
            .insert(contract.vt_symbol(), contract.clone());
    }

    #[must_use]
    pub fn get_order(&self, vt_orderid: &str) -> Option<OrderData> {
        self.inner.read().unwrap().orders.get(vt_orderid).cloned()
    }

    #[must_use]
    pub fn get_all_orders(&self) -> Vec<OrderData> {
        self.inner.read().unwrap().orders.values().cloned().collect()
    }

    #[must_use]
    pub fn get_active_orders(&self) -> Vec<OrderData> {
        self.inner
            .read()
            .unwrap()
            .active_orders
            .values()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn is_order_active(&self, vt_orderid: &str) -> bool {
        self.inner
            .read()
            .unwrap()
            .active_orders
            .contains_key(vt_orderid)
    }

    #[must_use]
    pub fn get_all_trades(&self) -> Vec<TradeData> {
        self.inner.read().unwrap().trades.values().cloned().collect()
    }

    #[must_use]
    pub fn get_position(&self, key: &PositionKey) -> Option<PositionData> {
        self.inner.read().unwrap().positions.get(key).cloned()
    }

    #[must_use]
    pub fn get_all_positions(&self) -> Vec<PositionData> {
        self.inner
            .read()
            .unwrap()
            .positions
            .values()
            .cloned()
            .collect()
    }

    /// Net exposure for one symbol in one account: long volume minus short
    /// volume. Used by the router's short-sale policy.
    #[must_use]
    pub fn net_position(&self, account_alias: &str, symbol: &str) -> Decimal {
        let inner = self.inner.read().unwrap();
        inner
            .positions
            .values()
            .filter(|pos| pos.account_alias == account_alias && pos.symbol == symbol)
            .map(|pos| match pos.direction {
                janus_core::Direction::Long => pos.volume,
                janus_core::Direction::Short => -pos.volume,
            })
            .sum()
    }

    #[must_use]
    pub fn get_account(&self, account_alias: &str) -> Option<AccountData> {
        self.inner.read().unwrap().accounts.get(account_alias).cloned()
    }

    #[must_use]
    pub fn get_all_accounts(&self) -> Vec<AccountData> {
        self.inner
            .read()
            .unwrap()
            .accounts
            .values()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn get_contract(&self, vt_symbol: &str) -> Option<ContractData> {
        self.inner.read().unwrap().contracts.get(vt_symbol).cloned()
    }

    #[must_use]
    pub fn get_all_contracts(&self) -> Vec<ContractData> {
        self.inner
            .read()
            .unwrap()
            .contracts
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use janus_core::{Direction, Exchange, OrderType, Price, Status, TimeInForce, Volume};

    fn order(orderid: &str, status: Status, traded: i64) -> OrderData {
        OrderData {
            account_alias: "ib_main".into(),
            orderid: orderid.into(),
            symbol: "AAPL".into(),
            exchange: Exchange::Smart,
            direction: Direction::Long,
            order_type: OrderType::Limit,
            volume: Volume::from(10),
            price: Some(Price::from(150)),
            stop_price: None,
            traded: Volume::from(traded),
            status,
            tif: TimeInForce::Gtc,
            timestamp: Utc::now(),
        }
    }

    fn position(symbol: &str, direction: Direction, volume: i64) -> PositionData {
        PositionData {
            account_alias: "wb_live".into(),
            symbol: symbol.into(),
            direction,
            volume: Volume::from(volume),
            price: Price::from(100),
            pnl: Price::ZERO,
            frozen: Volume::ZERO,
        }
    }

    #[test]
    fn order_is_active_until_terminal_status_arrives() {
        let oms = OmsCache::new();
        oms.process_event(&Event::Order(order("1", Status::Submitting, 0)));
        assert!(oms.is_order_active("ib_main.1"));

        oms.process_event(&Event::Order(order("1", Status::NotTraded, 0)));
        oms.process_event(&Event::Order(order("1", Status::PartTraded, 4)));
        assert!(oms.is_order_active("ib_main.1"));
        assert_eq!(oms.get_active_orders().len(), 1);

        oms.process_event(&Event::Order(order("1", Status::AllTraded, 10)));
        assert!(!oms.is_order_active("ib_main.1"));
        assert!(oms.get_active_orders().is_empty());
        // The terminal snapshot stays queryable.
        assert_eq!(oms.get_order("ib_main.1").unwrap().status, Status::AllTraded);
    }

    #[test]
    fn zero_volume_positions_are_evicted() {
        let oms = OmsCache::new();
        oms.process_event(&Event::Position(position("TSLA", Direction::Short, 5)));
        assert_eq!(oms.get_all_positions().len(), 1);
        assert_eq!(oms.net_position("wb_live", "TSLA"), Decimal::from(-5));

        oms.process_event(&Event::Position(position("TSLA", Direction::Short, 0)));
        assert!(oms.get_all_positions().is_empty());
        assert_eq!(oms.net_position("wb_live", "TSLA"), Decimal::ZERO);
    }

    #[test]
    fn net_position_offsets_long_and_short_rows() {
        let oms = OmsCache::new();
        oms.process_event(&Event::Position(position("AAPL", Direction::Long, 10)));
        oms.process_event(&Event::Position(position("AAPL", Direction::Short, 4)));
        assert_eq!(oms.net_position("wb_live", "AAPL"), Decimal::from(6));
        assert_eq!(oms.net_position("other", "AAPL"), Decimal::ZERO);
    }

    #[test]
    fn accounts_and_trades_are_keyed_snapshots() {
        let oms = OmsCache::new();
        oms.process_event(&Event::Account(AccountData {
            account_alias: "wb_live".into(),
            balance: Price::from(1000),
            available: Price::from(400),
            currency: "USD".into(),
        }));
        oms.process_event(&Event::Trade(TradeData {
            account_alias: "ib_main".into(),
            tradeid: "t1".into(),
            orderid: "1".into(),
            symbol: "AAPL".into(),
            exchange: Exchange::Smart,
            direction: Direction::Long,
            price: Price::from(150),
            volume: Volume::from(10),
            timestamp: Utc::now(),
        }));

        assert_eq!(
            oms.get_account("wb_live").unwrap().frozen(),
            Price::from(600)
        );
        assert_eq!(oms.get_all_trades().len(), 1);
    }
}
