//! Layered configuration loading utilities.

use std::path::{Path, PathBuf};

use anyhow::Result;
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use janus_broker::BrokerKind;

/// Root application configuration deserialized from layered sources.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub market_data: MarketDataConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default = "default_refresh_debounce_ms")]
    pub refresh_debounce_ms: u64,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

impl AppConfig {
    /// The account marked as default, falling back to the first configured.
    #[must_use]
    pub fn default_account(&self) -> Option<&AccountConfig> {
        self.accounts
            .iter()
            .find(|account| account.default)
            .or_else(|| self.accounts.first())
    }
}

/// Symbol registry store settings.
#[derive(Clone, Debug, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_path")]
    pub db_path: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            db_path: default_registry_path(),
        }
    }
}

/// RPC listener addresses, mirroring the two-socket request/publish model.
#[derive(Clone, Debug, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rep_address")]
    pub rep_address: String,
    #[serde(default = "default_pub_address")]
    pub pub_address: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            rep_address: default_rep_address(),
            pub_address: default_pub_address(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Market data defaults applied at connect time.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MarketDataConfig {
    #[serde(default)]
    pub default_symbols: Vec<String>,
    #[serde(default)]
    pub use_rth: bool,
}

/// Connection health-check cadence for streaming adapters.
#[derive(Clone, Debug, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_interval_seconds")]
    pub interval_seconds: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_reconnect_interval_seconds(),
        }
    }
}

/// One brokerage account owned by the server.
#[derive(Clone, Debug, Deserialize)]
pub struct AccountConfig {
    pub broker: BrokerKind,
    pub alias: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Broker-B session client id.
    #[serde(default)]
    pub client_id: Option<i64>,
    #[serde(default)]
    pub allow_short: bool,
    #[serde(default)]
    pub locate_required: bool,
    /// Let the router resolve missing broker ids on demand.
    #[serde(default = "default_true")]
    pub auto_fill: bool,
    #[serde(default)]
    pub trade_events: Option<TradeEventsConfig>,
}

/// API credentials; empty strings are treated as absent.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub app_key: String,
    #[serde(default)]
    pub app_secret: String,
    #[serde(default)]
    pub account_id: String,
}

/// Broker-A trade-events streaming settings.
#[derive(Clone, Debug, Deserialize)]
pub struct TradeEventsConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub region_id: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("./data/janus.db")
}

fn default_rep_address() -> String {
    "127.0.0.1:2014".into()
}

fn default_pub_address() -> String {
    "127.0.0.1:4102".into()
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_reconnect_interval_seconds() -> u64 {
    10
}

fn default_refresh_debounce_ms() -> u64 {
    1_500
}

fn default_true() -> bool {
    true
}

/// Loads configuration by merging files and environment variables.
///
/// Sources (lowest to highest precedence):
/// 1. `config/default.toml`
/// 2. `config/{environment}.toml` (if `environment` is Some)
/// 3. `config/local.toml` (optional, ignored in git)
/// 4. Environment variables prefixed with `JANUS_`
pub fn load_config(env: Option<&str>) -> Result<AppConfig> {
    let base_path = Path::new("config");

    let mut builder =
        Config::builder().add_source(File::from(base_path.join("default.toml")).required(true));
    if let Some(env_name) = env {
        builder = builder
            .add_source(File::from(base_path.join(format!("{env_name}.toml"))).required(false));
    }

    builder = builder.add_source(File::from(base_path.join("local.toml")).required(false));

    builder = builder.add_source(
        Environment::with_prefix("JANUS")
            .separator("__")
            .ignore_empty(true),
    );

    let config = builder.build()?;
    config
        .try_deserialize()
        .map_err(|err: ConfigError| err.into())
}

/// Parse configuration from an in-memory TOML document.
pub fn parse_config(toml: &str) -> Result<AppConfig> {
    let config = Config::builder()
        .add_source(File::from_str(toml, FileFormat::Toml))
        .build()?;
    config
        .try_deserialize()
        .map_err(|err: ConfigError| err.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_sections_are_absent() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.rpc.rep_address, "127.0.0.1:2014");
        assert_eq!(cfg.rpc.pub_address, "127.0.0.1:4102");
        assert_eq!(cfg.reconnect.interval_seconds, 10);
        assert_eq!(cfg.refresh_debounce_ms, 1_500);
        assert!(cfg.accounts.is_empty());
    }

    #[test]
    fn accounts_parse_with_broker_kinds_and_flags() {
        let cfg = parse_config(
            r#"
            [[accounts]]
            broker = "ib"
            alias = "ib_main"
            host = "127.0.0.1"
            port = 7497
            client_id = 1

            [[accounts]]
            broker = "webull"
            alias = "wb_live"
            default = true
            allow_short = true

            [accounts.credentials]
            app_key = "k"
            app_secret = "s"
            account_id = "123"

            [accounts.trade_events]
            enable = true
            region_id = "us"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.accounts.len(), 2);
        assert_eq!(cfg.accounts[0].broker, BrokerKind::Ib);
        assert_eq!(cfg.accounts[0].port, Some(7497));
        assert!(!cfg.accounts[0].allow_short);

        let webull = &cfg.accounts[1];
        assert_eq!(webull.broker, BrokerKind::Webull);
        assert!(webull.allow_short);
        assert_eq!(webull.credentials.account_id, "123");
        let stream = webull.trade_events.as_ref().unwrap();
        assert!(stream.enable);
        assert_eq!(stream.region_id.as_deref(), Some("us"));

        assert_eq!(cfg.default_account().unwrap().alias, "wb_live");
    }
}
