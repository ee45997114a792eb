//! One-shot registry backfill across connected brokers.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use janus_broker::{BrokerGateway, BrokerKind};
use janus_registry::{
    auto_fill_ib_conid, auto_fill_webull_ticker, RegistryError, SymbolRegistry,
};
use janus_rpc::HarmonySummary;

/// For each *connected* broker kind, attempt auto-fill for every canonical
/// symbol missing that broker's id. A store write error aborts the whole
/// run; writes committed before the abort remain in place.
pub async fn run_harmony(
    registry: &SymbolRegistry,
    gateways: &[Arc<dyn BrokerGateway>],
) -> Result<HarmonySummary, RegistryError> {
    let mut by_kind: HashMap<BrokerKind, Arc<dyn BrokerGateway>> = HashMap::new();
    for gateway in gateways {
        if gateway.connected() {
            by_kind.entry(gateway.broker_kind()).or_insert_with(|| Arc::clone(gateway));
        }
    }

    let mut summary = HarmonySummary::default();
    let mut entries = registry.list_entries();
    entries.sort_by(|a, b| a.canonical_symbol.cmp(&b.canonical_symbol));

    for (kind, gateway) in &by_kind {
        for entry in &entries {
            if !entry.asset_class.is_equity_like() {
                continue;
            }
            let missing = match kind {
                BrokerKind::Ib => entry.ib_conid.is_none(),
                BrokerKind::Webull => entry.webull_ticker.is_none(),
            };
            if !missing {
                continue;
            }
            let result = match kind {
                BrokerKind::Ib => {
                    auto_fill_ib_conid(registry, gateway.as_ref(), &entry.canonical_symbol)
                        .await
                        .map(|_| ())
                }
                BrokerKind::Webull => {
                    auto_fill_webull_ticker(registry, gateway.as_ref(), &entry.canonical_symbol)
                        .await
                        .map(|_| ())
                }
            };
            match result {
                Ok(()) => summary.filled += 1,
                Err(RegistryError::Miss(symbol)) => {
                    info!(%symbol, %kind, "harmony: no match");
                    summary.skipped_no_match += 1;
                }
                Err(RegistryError::Ambiguous { symbol, matches }) => {
                    info!(%symbol, matches, %kind, "harmony: ambiguous, skipped");
                    summary.skipped_ambiguous += 1;
                }
                Err(err @ (RegistryError::Store(_) | RegistryError::Conflict(_))) => {
                    warn!(error = %err, "harmony aborted on store failure");
                    return Err(err);
                }
                Err(RegistryError::Gateway(err)) => {
                    warn!(symbol = %entry.canonical_symbol, error = %err, "harmony lookup failed");
                    summary.errors += 1;
                }
            }
        }
    }
    info!(
        filled = summary.filled,
        ambiguous = summary.skipped_ambiguous,
        no_match = summary.skipped_no_match,
        errors = summary.errors,
        "harmony finished"
    );
    Ok(summary)
}
