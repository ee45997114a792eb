//! Harmony backfill runs against scripted gateways and stores.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{detail, MockGateway};
use janus_broker::{BrokerGateway, BrokerKind};
use janus_core::AssetClass;
use janus_registry::{
    NewSymbolEntry, RegistryError, RegistryStore, SqliteStore, StoreError, SymbolEntry,
    SymbolRegistry,
};
use janus_server::run_harmony;

/// Delegates to sqlite but fails conid writes after a budget, emulating a
/// store outage mid-run.
struct FailingStore {
    inner: SqliteStore,
    conid_writes_allowed: usize,
    conid_writes: AtomicUsize,
}

impl FailingStore {
    fn new(inner: SqliteStore, conid_writes_allowed: usize) -> Self {
        Self {
            inner,
            conid_writes_allowed,
            conid_writes: AtomicUsize::new(0),
        }
    }
}

impl RegistryStore for FailingStore {
    fn load_all(&self) -> Result<Vec<SymbolEntry>, StoreError> {
        self.inner.load_all()
    }

    fn insert(&self, entry: &NewSymbolEntry) -> Result<i64, StoreError> {
        self.inner.insert(entry)
    }

    fn set_ib_conid(&self, canonical: &str, conid: i64) -> Result<(), StoreError> {
        let used = self.conid_writes.fetch_add(1, Ordering::SeqCst);
        if used >= self.conid_writes_allowed {
            return Err(StoreError::Unavailable("registry store went away".into()));
        }
        self.inner.set_ib_conid(canonical, conid)
    }

    fn set_webull_ticker(&self, canonical: &str, ticker: &str) -> Result<(), StoreError> {
        self.inner.set_webull_ticker(canonical, ticker)
    }

    fn set_description(&self, canonical: &str, description: &str) -> Result<(), StoreError> {
        self.inner.set_description(canonical, description)
    }
}

fn seeded_store(symbols: &[&str]) -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();
    store.apply_schema().unwrap();
    for symbol in symbols {
        store
            .insert(&NewSymbolEntry {
                canonical_symbol: (*symbol).to_string(),
                asset_class: AssetClass::Equity,
                currency: "USD".into(),
                ib_conid: None,
                webull_ticker: None,
                description: None,
            })
            .unwrap();
    }
    store
}

#[tokio::test]
async fn harmony_fills_counts_and_skips() {
    let store = seeded_store(&["AAA", "BBB", "CCC"]);
    // DDD already has its conid and must not be touched.
    store
        .insert(&NewSymbolEntry {
            canonical_symbol: "DDD".into(),
            asset_class: AssetClass::Equity,
            currency: "USD".into(),
            ib_conid: Some(44),
            webull_ticker: None,
            description: None,
        })
        .unwrap();
    let registry = SymbolRegistry::new(Box::new(store));
    registry.load().unwrap();

    let mock = Arc::new(
        MockGateway::new("ib_main", BrokerKind::Ib)
            .with_details("AAA", vec![detail(1, "AAA")])
            .with_details("BBB", vec![detail(2, "BBB"), detail(3, "BBB")])
            .with_details("CCC", Vec::new()),
    );
    let gateways: Vec<Arc<dyn BrokerGateway>> = vec![mock.clone()];

    let summary = run_harmony(&registry, &gateways).await.unwrap();
    assert_eq!(summary.filled, 1);
    assert_eq!(summary.skipped_ambiguous, 1);
    assert_eq!(summary.skipped_no_match, 1);
    assert_eq!(summary.errors, 0);

    assert_eq!(registry.lookup_by_canonical("AAA").unwrap().ib_conid, Some(1));
    assert_eq!(registry.lookup_by_canonical("BBB").unwrap().ib_conid, None);
    assert_eq!(registry.lookup_by_canonical("DDD").unwrap().ib_conid, Some(44));
    // Only the three incomplete symbols were looked up.
    assert_eq!(mock.detail_requests.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn harmony_aborts_on_store_failure_keeping_committed_writes() {
    let store = FailingStore::new(seeded_store(&["AAA", "BBB", "CCC"]), 2);
    let registry = SymbolRegistry::new(Box::new(store));
    registry.load().unwrap();

    let mock = Arc::new(
        MockGateway::new("ib_main", BrokerKind::Ib)
            .with_details("AAA", vec![detail(1, "AAA")])
            .with_details("BBB", vec![detail(2, "BBB")])
            .with_details("CCC", vec![detail(3, "CCC")]),
    );
    let gateways: Vec<Arc<dyn BrokerGateway>> = vec![mock];

    let err = run_harmony(&registry, &gateways).await.unwrap_err();
    assert!(matches!(err, RegistryError::Store(_)));

    // The first two commits survive the abort; nothing after them does.
    assert_eq!(registry.lookup_by_canonical("AAA").unwrap().ib_conid, Some(1));
    assert_eq!(registry.lookup_by_canonical("BBB").unwrap().ib_conid, Some(2));
    assert_eq!(registry.lookup_by_canonical("CCC").unwrap().ib_conid, None);
}

#[tokio::test]
async fn harmony_skips_disconnected_brokers() {
    let registry = SymbolRegistry::new(Box::new(seeded_store(&["AAA"])));
    registry.load().unwrap();

    let mock = Arc::new(
        MockGateway::new("ib_main", BrokerKind::Ib)
            .with_details("AAA", vec![detail(1, "AAA")])
            .disconnected(),
    );
    let gateways: Vec<Arc<dyn BrokerGateway>> = vec![mock.clone()];

    let summary = run_harmony(&registry, &gateways).await.unwrap();
    assert_eq!(summary.filled, 0);
    assert_eq!(mock.detail_requests.load(Ordering::SeqCst), 0);
    assert_eq!(registry.lookup_by_canonical("AAA").unwrap().ib_conid, None);
}

#[tokio::test]
async fn harmony_runs_once_per_broker_kind() {
    let registry = SymbolRegistry::new(Box::new(seeded_store(&["AAA"])));
    registry.load().unwrap();

    let first = Arc::new(
        MockGateway::new("ib_main", BrokerKind::Ib).with_details("AAA", vec![detail(1, "AAA")]),
    );
    let second = Arc::new(
        MockGateway::new("ib_backup", BrokerKind::Ib).with_details("AAA", vec![detail(1, "AAA")]),
    );
    let gateways: Vec<Arc<dyn BrokerGateway>> = vec![first.clone(), second.clone()];

    let summary = run_harmony(&registry, &gateways).await.unwrap();
    assert_eq!(summary.filled, 1);
    let total = first.detail_requests.load(Ordering::SeqCst)
        + second.detail_requests.load(Ordering::SeqCst);
    assert_eq!(total, 1, "one lookup per kind, not per account");
}

#[tokio::test]
async fn harmony_ignores_non_equity_entries() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.apply_schema().unwrap();
    store
        .insert(&NewSymbolEntry {
            canonical_symbol: "EURUSD".into(),
            asset_class: AssetClass::Fx,
            currency: "USD".into(),
            ib_conid: None,
            webull_ticker: None,
            description: None,
        })
        .unwrap();
    let registry = SymbolRegistry::new(Box::new(store));
    registry.load().unwrap();

    let mock = Arc::new(MockGateway::new("ib_main", BrokerKind::Ib));
    let gateways: Vec<Arc<dyn BrokerGateway>> = vec![mock.clone()];

    let summary = run_harmony(&registry, &gateways).await.unwrap();
    assert_eq!(summary.filled, 0);
    assert_eq!(summary.skipped_no_match, 0);
    assert_eq!(mock.detail_requests.load(Ordering::SeqCst), 0);
}
