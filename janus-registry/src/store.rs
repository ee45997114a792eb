//! SQLite persistence for the symbol registry.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, ErrorCode};

use crate::{NewSymbolEntry, StoreError, SymbolEntry};

/// Registry table layout. The schema is applied out-of-band by operators;
/// the server only ever reads and writes rows. Kept here so test fixtures
/// and provisioning tools agree on one definition.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS symbol_registry (
    id              INTEGER PRIMARY KEY,
    canonical_symbol TEXT NOT NULL UNIQUE,
    asset_class     TEXT NOT NULL DEFAULT 'EQUITY',
    currency        TEXT NOT NULL DEFAULT 'USD',
    ib_conid        INTEGER UNIQUE,
    webull_ticker   TEXT UNIQUE,
    description     TEXT
);
"#;

/// Storage operations the registry cache writes through. Split behind a
/// trait so tests can inject failing stores.
pub trait RegistryStore: Send + Sync {
    fn load_all(&self) -> Result<Vec<SymbolEntry>, StoreError>;

    fn insert(&self, entry: &NewSymbolEntry) -> Result<i64, StoreError>;

    fn set_ib_conid(&self, canonical: &str, conid: i64) -> Result<(), StoreError>;

    fn set_webull_ticker(&self, canonical: &str, ticker: &str) -> Result<(), StoreError>;

    fn set_description(&self, canonical: &str, description: &str) -> Result<(), StoreError>;
}

/// SQLite-backed implementation of [`RegistryStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(open_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store used by tests and local tooling. The caller is
    /// responsible for applying [`SCHEMA_SQL`].
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(open_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Apply the registry schema. Production deployments provision the
    /// table out-of-band; this exists for fixtures and tooling.
    pub fn apply_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA_SQL).map_err(map_error)
    }
}

impl RegistryStore for SqliteStore {
    fn load_all(&self) -> Result<Vec<SymbolEntry>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, canonical_symbol, asset_class, currency, ib_conid, webull_ticker, \
                 description FROM symbol_registry",
            )
            .map_err(map_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(RawEntry {
                    id: row.get(0)?,
                    canonical_symbol: row.get(1)?,
                    asset_class: row.get(2)?,
                    currency: row.get(3)?,
                    ib_conid: row.get(4)?,
                    webull_ticker: row.get(5)?,
                    description: row.get(6)?,
                })
            })
            .map_err(map_error)?;

        let mut entries = Vec::new();
        for row in rows {
            let raw = row.map_err(map_error)?;
            entries.push(raw.into_entry()?);
        }
        Ok(entries)
    }

    fn insert(&self, entry: &NewSymbolEntry) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO symbol_registry \
             (canonical_symbol, asset_class, currency, ib_conid, webull_ticker, description) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.canonical_symbol,
                entry.asset_class.as_str(),
                entry.currency,
                entry.ib_conid,
                entry.webull_ticker,
                entry.description,
            ],
        )
        .map_err(map_error)?;
        Ok(conn.last_insert_rowid())
    }

    fn set_ib_conid(&self, canonical: &str, conid: i64) -> Result<(), StoreError> {
        self.update_column("ib_conid", canonical, |conn, sql| {
            conn.execute(sql, params![conid, canonical]).map_err(map_error)
        })
    }

    fn set_webull_ticker(&self, canonical: &str, ticker: &str) -> Result<(), StoreError> {
        self.update_column("webull_ticker", canonical, |conn, sql| {
            conn.execute(sql, params![ticker, canonical]).map_err(map_error)
        })
    }

    fn set_description(&self, canonical: &str, description: &str) -> Result<(), StoreError> {
        self.update_column("description", canonical, |conn, sql| {
            conn.execute(sql, params![description, canonical])
                .map_err(map_error)
        })
    }
}

impl SqliteStore {
    fn update_column<F>(&self, column: &str, canonical: &str, run: F) -> Result<(), StoreError>
    where
        F: FnOnce(&Connection, &str) -> Result<usize, StoreError>,
    {
        let conn = self.conn.lock().unwrap();
        let sql = format!("UPDATE symbol_registry SET {column} = ?1 WHERE canonical_symbol = ?2");
        let changed = run(&conn, &sql)?;
        if changed == 0 {
            return Err(StoreError::Query(format!(
                "no registry row for '{canonical}'"
            )));
        }
        Ok(())
    }
}

struct RawEntry {
    id: i64,
    canonical_symbol: String,
    asset_class: String,
    currency: String,
    ib_conid: Option<i64>,
    webull_ticker: Option<String>,
    description: Option<String>,
}

impl RawEntry {
    fn into_entry(self) -> Result<SymbolEntry, StoreError> {
        let asset_class = self
            .asset_class
            .parse()
            .map_err(|err: String| StoreError::Query(err))?;
        Ok(SymbolEntry {
            id: self.id,
            canonical_symbol: self.canonical_symbol,
            asset_class,
            currency: self.currency,
            ib_conid: self.ib_conid,
            webull_ticker: self.webull_ticker,
            description: self.description,
        })
    }
}

fn open_error(err: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn map_error(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == ErrorCode::ConstraintViolation =>
        {
            StoreError::Conflict(err.to_string())
        }
        _ => StoreError::Query(err.to_string()),
    }
}
