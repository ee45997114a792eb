//! Single source of truth for canonical ↔ broker symbol mappings.
//!
//! The registry is backed by a relational store and fronted by an in-memory
//! index loaded at startup. Reads are lock-free over an immutable snapshot;
//! the single writer clones the index and swaps it in. Broker ids are only
//! ever *filled in* — an existing binding is never overwritten.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;
use tracing::warn;

use janus_broker::{BrokerGateway, GatewayError};
use janus_core::{AssetClass, ContractQuery};

mod store;

pub use store::{RegistryStore, SqliteStore, SCHEMA_SQL};

/// One row of the registry.
#[derive(Clone, Debug, PartialEq)]
pub struct SymbolEntry {
    pub id: i64,
    pub canonical_symbol: String,
    pub asset_class: AssetClass,
    pub currency: String,
    pub ib_conid: Option<i64>,
    pub webull_ticker: Option<String>,
    pub description: Option<String>,
}

/// Insert payload for a new registry row.
#[derive(Clone, Debug)]
pub struct NewSymbolEntry {
    pub canonical_symbol: String,
    pub asset_class: AssetClass,
    pub currency: String,
    pub ib_conid: Option<i64>,
    pub webull_ticker: Option<String>,
    pub description: Option<String>,
}

/// Fields accepted by [`SymbolRegistry::ensure`]. Broker ids fill missing
/// slots only; `description` is first-value-wins.
#[derive(Clone, Debug)]
pub struct EnsureFields {
    pub asset_class: AssetClass,
    pub currency: String,
    pub ib_conid: Option<i64>,
    pub webull_ticker: Option<String>,
    pub description: Option<String>,
}

impl Default for EnsureFields {
    fn default() -> Self {
        Self {
            asset_class: AssetClass::Equity,
            currency: "USD".to_string(),
            ib_conid: None,
            webull_ticker: None,
            description: None,
        }
    }
}

/// Persistence-layer failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot be reached; startup fails hard on this.
    #[error("registry store unavailable: {0}")]
    Unavailable(String),
    /// A UNIQUE constraint was violated.
    #[error("registry constraint violated: {0}")]
    Conflict(String),
    /// Any other query failure.
    #[error("registry query failed: {0}")]
    Query(String),
}

/// Registry-level error taxonomy surfaced to routers and harmony.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Unknown canonical symbol (or zero auto-fill matches).
    #[error("no registry match for '{0}'")]
    Miss(String),
    /// Auto-fill returned more than one candidate; nothing is written.
    #[error("ambiguous contract match for '{symbol}' ({matches} candidates)")]
    Ambiguous { symbol: String, matches: usize },
    /// A broker id is already bound to a different canonical symbol.
    #[error("conflicting registry binding: {0}")]
    Conflict(String),
    /// Persistence failed; any in-flight batch aborts.
    #[error("registry store error: {0}")]
    Store(String),
    /// The broker lookup itself failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl From<StoreError> for RegistryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => Self::Conflict(msg),
            other => Self::Store(other.to_string()),
        }
    }
}

/// Canonical form used before all lookups and writes: trimmed, uppercased.
#[must_use]
pub fn normalize(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

#[derive(Default)]
struct RegistryIndex {
    by_canonical: HashMap<String, Arc<SymbolEntry>>,
    by_ib_conid: HashMap<i64, String>,
    by_webull_ticker: HashMap<String, String>,
}

impl RegistryIndex {
    fn insert(&mut self, entry: Arc<SymbolEntry>) {
        if let Some(conid) = entry.ib_conid {
            self.by_ib_conid.insert(conid, entry.canonical_symbol.clone());
        }
        if let Some(ticker) = &entry.webull_ticker {
            self.by_webull_ticker
                .insert(ticker.clone(), entry.canonical_symbol.clone());
        }
        self.by_canonical
            .insert(entry.canonical_symbol.clone(), entry);
    }

    fn clone_contents(&self) -> Self {
        Self {
            by_canonical: self.by_canonical.clone(),
            by_ib_conid: self.by_ib_conid.clone(),
            by_webull_ticker: self.by_webull_ticker.clone(),
        }
    }
}

/// In-memory cache over the registry store.
pub struct SymbolRegistry {
    store: Box<dyn RegistryStore>,
    index: RwLock<Arc<RegistryIndex>>,
    // Writer exclusivity; readers never take this.
    write_guard: Mutex<()>,
}

impl SymbolRegistry {
    #[must_use]
    pub fn new(store: Box<dyn RegistryStore>) -> Self {
        Self {
            store,
            index: RwLock::new(Arc::new(RegistryIndex::default())),
            write_guard: Mutex::new(()),
        }
    }

    /// Populate the cache from the store. Startup fails hard when the
    /// store is unavailable; there is no degraded mode.
    pub fn load(&self) -> Result<usize, RegistryError> {
        let entries = self.store.load_all()?;
        let mut index = RegistryIndex::default();
        for mut entry in entries {
            entry.canonical_symbol = normalize(&entry.canonical_symbol);
            entry.webull_ticker = entry.webull_ticker.as_deref().map(normalize);
            index.insert(Arc::new(entry));
        }
        let count = index.by_canonical.len();
        *self.index.write().unwrap() = Arc::new(index);
        Ok(count)
    }

    fn snapshot(&self) -> Arc<RegistryIndex> {
        Arc::clone(&self.index.read().unwrap())
    }

    #[must_use]
    pub fn lookup_by_canonical(&self, symbol: &str) -> Option<Arc<SymbolEntry>> {
        self.snapshot().by_canonical.get(&normalize(symbol)).cloned()
    }

    #[must_use]
    pub fn lookup_by_ib_conid(&self, conid: i64) -> Option<Arc<SymbolEntry>> {
        let snapshot = self.snapshot();
        let canonical = snapshot.by_ib_conid.get(&conid)?;
        snapshot.by_canonical.get(canonical).cloned()
    }

    #[must_use]
    pub fn lookup_by_webull_ticker(&self, ticker: &str) -> Option<Arc<SymbolEntry>> {
        let snapshot = self.snapshot();
        let canonical = snapshot.by_webull_ticker.get(&normalize(ticker))?;
        snapshot.by_canonical.get(canonical).cloned()
    }

    /// All entries in the current snapshot, for harmony iteration.
    #[must_use]
    pub fn list_entries(&self) -> Vec<Arc<SymbolEntry>> {
        self.snapshot().by_canonical.values().cloned().collect()
    }

    /// Write-through upsert that only fills missing broker-id fields.
    /// Conflicts on unique bindings are errors, never silently ignored.
    pub fn ensure(
        &self,
        symbol: &str,
        fields: EnsureFields,
    ) -> Result<Arc<SymbolEntry>, RegistryError> {
        let canonical = normalize(symbol);
        let ticker = fields.webull_ticker.as_deref().map(normalize);
        let _writer = self.write_guard.lock().unwrap();
        let snapshot = self.snapshot();

        match snapshot.by_canonical.get(&canonical) {
            None => {
                self.check_unbound(&snapshot, &canonical, fields.ib_conid, ticker.as_deref())?;
                let new_entry = NewSymbolEntry {
                    canonical_symbol: canonical.clone(),
                    asset_class: fields.asset_class,
                    currency: fields.currency.clone(),
                    ib_conid: fields.ib_conid,
                    webull_ticker: ticker.clone(),
                    description: fields.description.clone(),
                };
                let id = self.store.insert(&new_entry)?;
                let entry = Arc::new(SymbolEntry {
                    id,
                    canonical_symbol: canonical,
                    asset_class: fields.asset_class,
                    currency: fields.currency,
                    ib_conid: fields.ib_conid,
                    webull_ticker: ticker,
                    description: fields.description,
                });
                self.swap_in(&snapshot, Arc::clone(&entry));
                Ok(entry)
            }
            Some(existing) => {
                let mut updated = (**existing).clone();
                let mut changed = false;

                if let Some(conid) = fields.ib_conid {
                    match updated.ib_conid {
                        Some(current) if current == conid => {}
                        Some(current) => {
                            warn!(
                                symbol = %updated.canonical_symbol,
                                current,
                                requested = conid,
                                "ib conid mismatch; keeping registry value"
                            );
                        }
                        None => {
                            self.check_unbound(&snapshot, &canonical, Some(conid), None)?;
                            self.store.set_ib_conid(&canonical, conid)?;
                            updated.ib_conid = Some(conid);
                            changed = true;
                        }
                    }
                }

                if let Some(new_ticker) = ticker {
                    match &updated.webull_ticker {
                        Some(current) if *current == new_ticker => {}
                        Some(current) => {
                            warn!(
                                symbol = %updated.canonical_symbol,
                                current = %current,
                                requested = %new_ticker,
                                "webull ticker mismatch; keeping registry value"
                            );
                        }
                        None => {
                            self.check_unbound(&snapshot, &canonical, None, Some(&new_ticker))?;
                            self.store.set_webull_ticker(&canonical, &new_ticker)?;
                            updated.webull_ticker = Some(new_ticker);
                            changed = true;
                        }
                    }
                }

                if let (Some(description), None) = (&fields.description, &updated.description) {
                    self.store.set_description(&canonical, description)?;
                    updated.description = Some(description.clone());
                    changed = true;
                }

                if changed {
                    let entry = Arc::new(updated);
                    self.swap_in(&snapshot, Arc::clone(&entry));
                    Ok(entry)
                } else {
                    Ok(Arc::clone(existing))
                }
            }
        }
    }

    fn check_unbound(
        &self,
        snapshot: &RegistryIndex,
        canonical: &str,
        conid: Option<i64>,
        ticker: Option<&str>,
    ) -> Result<(), RegistryError> {
        if let Some(conid) = conid {
            if let Some(owner) = snapshot.by_ib_conid.get(&conid) {
                if owner != canonical {
                    return Err(RegistryError::Conflict(format!(
                        "ib conid {conid} is already bound to '{owner}'"
                    )));
                }
            }
        }
        if let Some(ticker) = ticker {
            if let Some(owner) = snapshot.by_webull_ticker.get(ticker) {
                if owner != canonical {
                    return Err(RegistryError::Conflict(format!(
                        "webull ticker '{ticker}' is already bound to '{owner}'"
                    )));
                }
            }
        }
        Ok(())
    }

    fn swap_in(&self, snapshot: &RegistryIndex, entry: Arc<SymbolEntry>) {
        let mut next = snapshot.clone_contents();
        next.insert(entry);
        *self.index.write().unwrap() = Arc::new(next);
    }
}

/// Resolve a missing broker-B conid by querying contract details with the
/// default equity filter. Exactly one match stores the conid; zero or many
/// matches write nothing and surface as miss/ambiguous.
pub async fn auto_fill_ib_conid(
    registry: &SymbolRegistry,
    gateway: &dyn BrokerGateway,
    symbol: &str,
) -> Result<i64, RegistryError> {
    let canonical = normalize(symbol);
    let details = gateway
        .request_contract_details(ContractQuery::equity(canonical.clone()))
        .await?;
    match details.len() {
        0 => Err(RegistryError::Miss(canonical)),
        1 => {
            let detail = &details[0];
            registry.ensure(
                &canonical,
                EnsureFields {
                    asset_class: detail.asset_class,
                    currency: detail.currency.clone(),
                    ib_conid: Some(detail.conid),
                    description: detail.description.clone(),
                    ..EnsureFields::default()
                },
            )?;
            Ok(detail.conid)
        }
        matches => Err(RegistryError::Ambiguous {
            symbol: canonical,
            matches,
        }),
    }
}

/// Broker-A variant of auto-fill: ticker-only resolution.
pub async fn auto_fill_webull_ticker(
    registry: &SymbolRegistry,
    gateway: &dyn BrokerGateway,
    symbol: &str,
) -> Result<String, RegistryError> {
    let canonical = normalize(symbol);
    let details = gateway
        .request_contract_details(ContractQuery::equity(canonical.clone()))
        .await?;
    match details.len() {
        0 => Err(RegistryError::Miss(canonical)),
        1 => {
            let detail = &details[0];
            let ticker = normalize(&detail.symbol);
            registry.ensure(
                &canonical,
                EnsureFields {
                    asset_class: detail.asset_class,
                    currency: detail.currency.clone(),
                    webull_ticker: Some(ticker.clone()),
                    description: detail.description.clone(),
                    ..EnsureFields::default()
                },
            )?;
            Ok(ticker)
        }
        matches => Err(RegistryError::Ambiguous {
            symbol: canonical,
            matches,
        }),
    }
}
