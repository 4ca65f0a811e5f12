#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]

//! # Vigil-Store
//! Crash-safe embedded store for the Vigil risk-enforcement daemon.
//!
//! Holds the durable record of lockouts, daily realised P&L, trade history,
//! position/order snapshots, contract metadata, session boundaries and the
//! append-only enforcement log. Every component rebuilds its in-memory state
//! from here on startup; writes are small, frequent, and committed with full
//! fsync durability on the correctness-critical tables.

use chrono::{DateTime, NaiveDate, Utc};
use derive_more::Constructor;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, params};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};
use vigil_gateway::{
    id::{AccountId, ContractId, OrderId, PositionId, SymbolId, TradeId},
    types::{Contract, OrderSnapshot, PositionSnapshot},
};

/// All durable-store errors.
///
/// Constraint violations and corruption abort the daemon - state integrity is
/// non-negotiable.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },

    #[error("serialising enforcement details: {0}")]
    Details(#[from] serde_json::Error),
}

/// Lockout flavour, matching the rule catalog's enforcement outcomes.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LockoutKind {
    /// Fixed expiry, typically end-of-session.
    Hard,
    /// Timer-backed short lockout after a losing trade.
    Cooldown,
    /// Cleared only by explicit admin action.
    Permanent,
}

impl LockoutKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hard => "hard",
            Self::Cooldown => "cooldown",
            Self::Permanent => "permanent",
        }
    }

    fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "hard" => Ok(Self::Hard),
            "cooldown" => Ok(Self::Cooldown),
            "permanent" => Ok(Self::Permanent),
            other => Err(StoreError::Corrupt {
                table: "lockouts",
                detail: format!("unknown lockout kind: {other}"),
            }),
        }
    }
}

/// Durable lockout record. At most one row per account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Constructor)]
pub struct LockoutRecord {
    pub account_id: AccountId,
    pub reason: String,
    pub rule_id: String,
    pub kind: LockoutKind,
    pub locked_at: DateTime<Utc>,
    /// `None` marks a permanent lockout.
    pub until: Option<DateTime<Utc>>,
}

/// Durable trade-history row (the subset of a fill the daemon replays).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Constructor)]
pub struct TradeRecord {
    pub id: TradeId,
    pub account_id: AccountId,
    pub contract_id: ContractId,
    pub time: DateTime<Utc>,
    pub pnl: Option<Decimal>,
    pub voided: bool,
}

/// Append-only enforcement log record.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EnforcementRecord {
    pub time: DateTime<Utc>,
    pub account_id: AccountId,
    pub rule_id: String,
    pub action: String,
    pub reason: String,
    pub details: serde_json::Value,
    pub success: bool,
    pub execution_ms: i64,
}

/// Trade-history retention applied at startup.
const TRADE_RETENTION_DAYS: i64 = 7;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = FULL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS lockouts (
    account_id INTEGER PRIMARY KEY,
    reason     TEXT NOT NULL,
    rule_id    TEXT NOT NULL,
    kind       TEXT NOT NULL,
    locked_at  INTEGER NOT NULL,
    expires_at INTEGER
);

CREATE TABLE IF NOT EXISTS daily_pnl (
    account_id   INTEGER NOT NULL,
    date         TEXT NOT NULL,
    realized_pnl TEXT NOT NULL,
    PRIMARY KEY (account_id, date)
);
CREATE INDEX IF NOT EXISTS idx_daily_pnl_account_date ON daily_pnl (account_id, date);

CREATE TABLE IF NOT EXISTS trade_history (
    id          INTEGER PRIMARY KEY,
    account_id  INTEGER NOT NULL,
    ts          INTEGER NOT NULL,
    pnl         TEXT,
    contract_id TEXT NOT NULL,
    voided      INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_trade_history_account_ts ON trade_history (account_id, ts);

CREATE TABLE IF NOT EXISTS positions (
    id            INTEGER PRIMARY KEY,
    account_id    INTEGER NOT NULL,
    contract_id   TEXT NOT NULL,
    side          INTEGER NOT NULL,
    size          INTEGER NOT NULL,
    average_price TEXT NOT NULL,
    created_at    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS orders (
    id          INTEGER PRIMARY KEY,
    account_id  INTEGER NOT NULL,
    contract_id TEXT NOT NULL,
    type        INTEGER NOT NULL,
    side        INTEGER NOT NULL,
    size        INTEGER NOT NULL,
    limit_price TEXT,
    stop_price  TEXT,
    status      INTEGER NOT NULL,
    created_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_orders_account_status ON orders (account_id, status);

CREATE TABLE IF NOT EXISTS contract_cache (
    contract_id TEXT PRIMARY KEY,
    tick_size   TEXT NOT NULL,
    tick_value  TEXT NOT NULL,
    symbol_id   TEXT NOT NULL,
    name        TEXT NOT NULL,
    cached_at   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_contract_cache_symbol ON contract_cache (contract_id, symbol_id);

CREATE TABLE IF NOT EXISTS enforcement_log (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    ts           INTEGER NOT NULL,
    account_id   INTEGER NOT NULL,
    rule_id      TEXT NOT NULL,
    action       TEXT NOT NULL,
    reason       TEXT NOT NULL,
    details      TEXT NOT NULL,
    success      INTEGER NOT NULL,
    execution_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_enforcement_account_ts ON enforcement_log (account_id, ts);

CREATE TABLE IF NOT EXISTS session_state (
    account_id    INTEGER PRIMARY KEY,
    session_start INTEGER NOT NULL
);
"#;

/// Embedded relational store behind a single serialised connection.
///
/// Writes are short transactions; reads that need consistency across tables
/// take the same lock.
#[derive(Debug)]
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if absent) the store at `path`, apply the schema, and
    /// prune trade history beyond the retention window.
    pub fn open<P>(path: P) -> Result<Self, StoreError>
    where
        P: AsRef<Path>,
    {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        let store = Self {
            conn: Mutex::new(conn),
        };

        let cutoff = Utc::now() - chrono::Duration::days(TRADE_RETENTION_DAYS);
        let pruned = store.prune_trade_history(cutoff)?;
        if pruned > 0 {
            info!(pruned, "pruned trade history beyond retention window");
        }

        Ok(store)
    }

    // ---- lockouts ----

    pub fn upsert_lockout(&self, lockout: &LockoutRecord) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO lockouts (account_id, reason, rule_id, kind, locked_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                lockout.account_id.value(),
                lockout.reason,
                lockout.rule_id,
                lockout.kind.as_str(),
                lockout.locked_at.timestamp_millis(),
                lockout.until.map(|until| until.timestamp_millis()),
            ],
        )?;
        Ok(())
    }

    pub fn delete_lockout(&self, account: AccountId) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "DELETE FROM lockouts WHERE account_id = ?1",
            params![account.value()],
        )?;
        Ok(())
    }

    /// Load lockouts still active at `now` (permanent rows always qualify).
    pub fn load_active_lockouts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<LockoutRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut statement = conn.prepare(
            "SELECT account_id, reason, rule_id, kind, locked_at, expires_at
             FROM lockouts WHERE expires_at IS NULL OR expires_at > ?1",
        )?;

        let rows = statement.query_map(params![now.timestamp_millis()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, Option<i64>>(5)?,
            ))
        })?;

        let mut lockouts = Vec::new();
        for row in rows {
            let (account_id, reason, rule_id, kind, locked_at, until) = row?;
            lockouts.push(LockoutRecord {
                account_id: AccountId::new(account_id),
                reason,
                rule_id,
                kind: LockoutKind::parse(&kind)?,
                locked_at: millis_to_datetime(locked_at, "lockouts")?,
                until: until
                    .map(|millis| millis_to_datetime(millis, "lockouts"))
                    .transpose()?,
            });
        }
        Ok(lockouts)
    }

    // ---- daily pnl ----

    pub fn upsert_daily_pnl(
        &self,
        account: AccountId,
        date: NaiveDate,
        realized: Decimal,
    ) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO daily_pnl (account_id, date, realized_pnl) VALUES (?1, ?2, ?3)",
            params![account.value(), date.to_string(), realized.to_string()],
        )?;
        Ok(())
    }

    pub fn load_daily_pnl(
        &self,
        account: AccountId,
        date: NaiveDate,
    ) -> Result<Option<Decimal>, StoreError> {
        let conn = self.conn.lock();
        let mut statement =
            conn.prepare("SELECT realized_pnl FROM daily_pnl WHERE account_id = ?1 AND date = ?2")?;

        let mut rows = statement.query(params![account.value(), date.to_string()])?;
        match rows.next()? {
            Some(row) => {
                let text: String = row.get(0)?;
                Ok(Some(parse_decimal(&text, "daily_pnl")?))
            }
            None => Ok(None),
        }
    }

    // ---- trade history ----

    pub fn insert_trade(&self, trade: &TradeRecord) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO trade_history (id, account_id, ts, pnl, contract_id, voided)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                trade.id.0,
                trade.account_id.value(),
                trade.time.timestamp_millis(),
                trade.pnl.map(|pnl| pnl.to_string()),
                trade.contract_id.as_ref(),
                trade.voided,
            ],
        )?;
        Ok(())
    }

    /// Trades at or after `since`, oldest first.
    pub fn load_trades_since(&self, since: DateTime<Utc>) -> Result<Vec<TradeRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut statement = conn.prepare(
            "SELECT id, account_id, ts, pnl, contract_id, voided
             FROM trade_history WHERE ts >= ?1 ORDER BY ts ASC",
        )?;

        let rows = statement.query_map(params![since.timestamp_millis()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, bool>(5)?,
            ))
        })?;

        let mut trades = Vec::new();
        for row in rows {
            let (id, account_id, ts, pnl, contract_id, voided) = row?;
            trades.push(TradeRecord {
                id: TradeId::new(id),
                account_id: AccountId::new(account_id),
                contract_id: ContractId::new(contract_id.as_str()),
                time: millis_to_datetime(ts, "trade_history")?,
                pnl: pnl
                    .map(|text| parse_decimal(&text, "trade_history"))
                    .transpose()?,
                voided,
            });
        }
        Ok(trades)
    }

    pub fn prune_trade_history(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        let deleted = self.conn.lock().execute(
            "DELETE FROM trade_history WHERE ts < ?1",
            params![older_than.timestamp_millis()],
        )?;
        Ok(deleted)
    }

    // ---- positions & orders ----

    pub fn upsert_position(&self, position: &PositionSnapshot) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO positions
             (id, account_id, contract_id, side, size, average_price, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                position.id.0,
                position.account_id.value(),
                position.contract_id.as_ref(),
                u8::from(position.side),
                position.size,
                position.average_price.to_string(),
                position.creation_timestamp.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn delete_position(&self, position: PositionId) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute("DELETE FROM positions WHERE id = ?1", params![position.0])?;
        Ok(())
    }

    pub fn load_positions(&self) -> Result<Vec<PositionSnapshot>, StoreError> {
        let conn = self.conn.lock();
        let mut statement = conn.prepare(
            "SELECT id, account_id, contract_id, side, size, average_price, created_at
             FROM positions",
        )?;

        let rows = statement.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u8>(3)?,
                row.get::<_, u32>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;

        let mut positions = Vec::new();
        for row in rows {
            let (id, account_id, contract_id, side, size, average_price, created_at) = row?;
            positions.push(PositionSnapshot {
                id: PositionId::new(id),
                account_id: AccountId::new(account_id),
                contract_id: ContractId::new(contract_id.as_str()),
                side: side.try_into().map_err(|_| StoreError::Corrupt {
                    table: "positions",
                    detail: format!("unknown side code {side}"),
                })?,
                size,
                average_price: parse_decimal(&average_price, "positions")?,
                creation_timestamp: millis_to_datetime(created_at, "positions")?,
            });
        }
        Ok(positions)
    }

    pub fn upsert_order(&self, order: &OrderSnapshot) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO orders
             (id, account_id, contract_id, type, side, size, limit_price, stop_price, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                order.id.0,
                order.account_id.value(),
                order.contract_id.as_ref(),
                u8::from(order.kind),
                u8::from(order.side),
                order.size,
                order.limit_price.map(|price| price.to_string()),
                order.stop_price.map(|price| price.to_string()),
                u8::from(order.status),
                order.creation_timestamp.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn delete_order(&self, order: OrderId) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute("DELETE FROM orders WHERE id = ?1", params![order.0])?;
        Ok(())
    }

    pub fn load_orders(&self) -> Result<Vec<OrderSnapshot>, StoreError> {
        let conn = self.conn.lock();
        let mut statement = conn.prepare(
            "SELECT id, account_id, contract_id, type, side, size, limit_price, stop_price, status, created_at
             FROM orders",
        )?;

        let rows = statement.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u8>(3)?,
                row.get::<_, u8>(4)?,
                row.get::<_, u32>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, u8>(8)?,
                row.get::<_, i64>(9)?,
            ))
        })?;

        let mut orders = Vec::new();
        for row in rows {
            let (id, account_id, contract_id, kind, side, size, limit, stop, status, created_at) =
                row?;
            orders.push(OrderSnapshot {
                id: OrderId::new(id),
                account_id: AccountId::new(account_id),
                contract_id: ContractId::new(contract_id.as_str()),
                kind: kind.try_into().map_err(|_| StoreError::Corrupt {
                    table: "orders",
                    detail: format!("unknown order kind code {kind}"),
                })?,
                side: side.try_into().map_err(|_| StoreError::Corrupt {
                    table: "orders",
                    detail: format!("unknown order side code {side}"),
                })?,
                size,
                limit_price: limit
                    .map(|text| parse_decimal(&text, "orders"))
                    .transpose()?,
                stop_price: stop.map(|text| parse_decimal(&text, "orders")).transpose()?,
                status: status.try_into().map_err(|_| StoreError::Corrupt {
                    table: "orders",
                    detail: format!("unknown order status code {status}"),
                })?,
                creation_timestamp: millis_to_datetime(created_at, "orders")?,
            });
        }
        Ok(orders)
    }

    /// Replace both snapshot tables atomically with the provided state.
    pub fn replace_state_snapshot(
        &self,
        positions: &[PositionSnapshot],
        orders: &[OrderSnapshot],
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM positions", [])?;
        tx.execute("DELETE FROM orders", [])?;

        for position in positions {
            tx.execute(
                "INSERT INTO positions
                 (id, account_id, contract_id, side, size, average_price, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    position.id.0,
                    position.account_id.value(),
                    position.contract_id.as_ref(),
                    u8::from(position.side),
                    position.size,
                    position.average_price.to_string(),
                    position.creation_timestamp.timestamp_millis(),
                ],
            )?;
        }
        for order in orders {
            tx.execute(
                "INSERT INTO orders
                 (id, account_id, contract_id, type, side, size, limit_price, stop_price, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    order.id.0,
                    order.account_id.value(),
                    order.contract_id.as_ref(),
                    u8::from(order.kind),
                    u8::from(order.side),
                    order.size,
                    order.limit_price.map(|price| price.to_string()),
                    order.stop_price.map(|price| price.to_string()),
                    u8::from(order.status),
                    order.creation_timestamp.timestamp_millis(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    // ---- contract cache ----

    pub fn upsert_contract(
        &self,
        contract: &Contract,
        cached_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO contract_cache
             (contract_id, tick_size, tick_value, symbol_id, name, cached_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                contract.id.as_ref(),
                contract.tick_size.to_string(),
                contract.tick_value.to_string(),
                contract.symbol_id.as_ref(),
                contract.name,
                cached_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// Most recently cached contracts first, capped at `limit`.
    pub fn load_contracts(
        &self,
        limit: usize,
    ) -> Result<Vec<(Contract, DateTime<Utc>)>, StoreError> {
        let conn = self.conn.lock();
        let mut statement = conn.prepare(
            "SELECT contract_id, tick_size, tick_value, symbol_id, name, cached_at
             FROM contract_cache ORDER BY cached_at DESC LIMIT ?1",
        )?;

        let rows = statement.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut contracts = Vec::new();
        for row in rows {
            let (contract_id, tick_size, tick_value, symbol_id, name, cached_at) = row?;
            contracts.push((
                Contract {
                    id: ContractId::new(contract_id.as_str()),
                    symbol_id: SymbolId::new(symbol_id.as_str()),
                    tick_size: parse_decimal(&tick_size, "contract_cache")?,
                    tick_value: parse_decimal(&tick_value, "contract_cache")?,
                    name,
                },
                millis_to_datetime(cached_at, "contract_cache")?,
            ));
        }
        Ok(contracts)
    }

    // ---- enforcement log ----

    pub fn append_enforcement(&self, record: &EnforcementRecord) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO enforcement_log
             (ts, account_id, rule_id, action, reason, details, success, execution_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.time.timestamp_millis(),
                record.account_id.value(),
                record.rule_id,
                record.action,
                record.reason,
                serde_json::to_string(&record.details)?,
                record.success,
                record.execution_ms,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent enforcement records, newest first.
    pub fn recent_enforcements(&self, limit: usize) -> Result<Vec<EnforcementRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut statement = conn.prepare(
            "SELECT ts, account_id, rule_id, action, reason, details, success, execution_ms
             FROM enforcement_log ORDER BY id DESC LIMIT ?1",
        )?;

        let rows = statement.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, bool>(6)?,
                row.get::<_, i64>(7)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (ts, account_id, rule_id, action, reason, details, success, execution_ms) = row?;
            records.push(EnforcementRecord {
                time: millis_to_datetime(ts, "enforcement_log")?,
                account_id: AccountId::new(account_id),
                rule_id,
                action,
                reason,
                details: serde_json::from_str(&details).unwrap_or(serde_json::Value::Null),
                success,
                execution_ms,
            });
        }
        Ok(records)
    }

    // ---- session state ----

    pub fn upsert_session_start(
        &self,
        account: AccountId,
        start: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO session_state (account_id, session_start) VALUES (?1, ?2)",
            params![account.value(), start.timestamp_millis()],
        )?;
        Ok(())
    }

    pub fn load_session_starts(&self) -> Result<Vec<(AccountId, DateTime<Utc>)>, StoreError> {
        let conn = self.conn.lock();
        let mut statement = conn.prepare("SELECT account_id, session_start FROM session_state")?;

        let rows = statement.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut starts = Vec::new();
        for row in rows {
            let (account_id, start) = row?;
            starts.push((
                AccountId::new(account_id),
                millis_to_datetime(start, "session_state")?,
            ));
        }
        Ok(starts)
    }
}

fn parse_decimal(text: &str, table: &'static str) -> Result<Decimal, StoreError> {
    text.parse().map_err(|_| {
        warn!(table, text, "unparseable decimal in store");
        StoreError::Corrupt {
            table,
            detail: format!("unparseable decimal: {text}"),
        }
    })
}

fn millis_to_datetime(millis: i64, table: &'static str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis).ok_or(StoreError::Corrupt {
        table,
        detail: format!("timestamp out of range: {millis}"),
    })
}
