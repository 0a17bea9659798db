//! Persistence layer.
//!
//! SQLite-backed bookkeeping: a small key/value table carrying the last buy
//! of every account across cycles, and an append-only ledger written once per
//! completed withdrawal.
//!
//! A connection is opened per operation and closed again, so nothing is held
//! across the sleep between cycles.

use anyhow::{anyhow, Context, Result};
use rust_decimal::prelude::*;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::Connection;
use std::fmt;
use tracing::{debug, info};

const CREATE_BOOKKEEPING: &str = "CREATE TABLE IF NOT EXISTS bookkeeping (
    type VARCHAR(18) NOT NULL,
    account_id INTEGER NOT NULL,
    value_text VARCHAR(255),
    value_int INTEGER,
    value_real DOUBLE,
    PRIMARY KEY (type, account_id)
)";

const CREATE_LEDGER: &str = "CREATE TABLE IF NOT EXISTS ledger (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    account_id INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    invest DOUBLE NOT NULL,
    crypto_quantity DOUBLE NOT NULL,
    price DOUBLE NOT NULL
)";

const UPSERT_BOOKKEEPING: &str = "INSERT INTO bookkeeping (type, account_id, value_text, value_int, value_real)
    VALUES (?, ?, ?, ?, ?)
    ON CONFLICT (type, account_id) DO UPDATE SET
        value_text = excluded.value_text,
        value_int = excluded.value_int,
        value_real = excluded.value_real";

// ---------------------------------------------------------------------------
// Keys & values
// ---------------------------------------------------------------------------

/// Bookkeeping keys. Each account has at most one row per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookKey {
    LastBuyTimestamp,
    LastBuyInvest,
    LastBuyPrice,
}

impl BookKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookKey::LastBuyTimestamp => "last_buy_timestamp",
            BookKey::LastBuyInvest => "last_buy_invest",
            BookKey::LastBuyPrice => "last_buy_price",
        }
    }
}

impl fmt::Display for BookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bookkeeping value; each variant lives in its own column.
#[derive(Debug, Clone, PartialEq)]
pub enum BookValue {
    Text(String),
    Int(i64),
    Real(Decimal),
}

impl BookValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            BookValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<Decimal> {
        match self {
            BookValue::Real(v) => Some(*v),
            _ => None,
        }
    }
}

/// The last booked buy of an account. Every field is `None` if the account
/// never bought.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LastBuy {
    pub timestamp: Option<i64>,
    pub invest: Option<Decimal>,
    pub price: Option<Decimal>,
}

impl LastBuy {
    /// Whether all three values were found.
    pub fn is_booked(&self) -> bool {
        self.timestamp.is_some() && self.invest.is_some() && self.price.is_some()
    }

    /// Values with absent fields read as zero.
    pub fn or_zero(&self) -> (i64, Decimal, Decimal) {
        (
            self.timestamp.unwrap_or(0),
            self.invest.unwrap_or(Decimal::ZERO),
            self.price.unwrap_or(Decimal::ZERO),
        )
    }
}

/// One settled investment, written when a withdrawal completes.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub account_id: i64,
    /// Unix seconds of the buy this withdrawal settles.
    pub timestamp: i64,
    pub invest: Decimal,
    pub crypto_quantity: Decimal,
    pub price: Decimal,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BookkeepingStore {
    path: String,
    options: SqliteConnectOptions,
}

impl BookkeepingStore {
    /// Open (creating if missing) the database and make sure both tables exist.
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let store = Self {
            path: path.to_string(),
            options,
        };

        let mut conn = store.connect().await?;
        sqlx::query(CREATE_BOOKKEEPING)
            .execute(&mut conn)
            .await
            .context("Failed to create bookkeeping table")?;
        sqlx::query(CREATE_LEDGER)
            .execute(&mut conn)
            .await
            .context("Failed to create ledger table")?;
        conn.close().await?;

        info!(path, "Bookkeeping database ready");
        Ok(store)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    async fn connect(&self) -> Result<SqliteConnection> {
        SqliteConnection::connect_with(&self.options)
            .await
            .with_context(|| format!("Failed to open database {}", self.path))
    }

    /// Insert the value, or overwrite it if the key already exists.
    pub async fn upsert(&self, key: BookKey, account_id: i64, value: BookValue) -> Result<()> {
        let mut conn = self.connect().await?;
        upsert_on(&mut conn, key, account_id, &value).await?;
        conn.close().await?;

        debug!(key = %key, account_id, value = ?value, "Bookkeeping upserted");
        Ok(())
    }

    /// Record a buy. All three last-buy keys are written in one transaction,
    /// so a failure leaves the previous values untouched.
    pub async fn upsert_last_buy(
        &self,
        account_id: i64,
        timestamp: i64,
        invest: Decimal,
        price: Decimal,
    ) -> Result<()> {
        let mut conn = self.connect().await?;
        let mut tx = conn.begin().await.context("Failed to start transaction")?;
        upsert_on(&mut *tx, BookKey::LastBuyTimestamp, account_id, &BookValue::Int(timestamp)).await?;
        upsert_on(&mut *tx, BookKey::LastBuyInvest, account_id, &BookValue::Real(invest)).await?;
        upsert_on(&mut *tx, BookKey::LastBuyPrice, account_id, &BookValue::Real(price)).await?;
        tx.commit()
            .await
            .with_context(|| format!("Failed to commit last buy for account {account_id}"))?;
        conn.close().await?;

        debug!(account_id, timestamp, %invest, %price, "Last buy booked");
        Ok(())
    }

    /// Read a value. `None` if it was never written.
    pub async fn get(&self, key: BookKey, account_id: i64) -> Result<Option<BookValue>> {
        let mut conn = self.connect().await?;
        let row: Option<(Option<String>, Option<i64>, Option<f64>)> = sqlx::query_as(
            "SELECT value_text, value_int, value_real FROM bookkeeping WHERE type = ? AND account_id = ?",
        )
        .bind(key.as_str())
        .bind(account_id)
        .fetch_optional(&mut conn)
        .await
        .with_context(|| format!("Failed to read {key} for account {account_id}"))?;
        conn.close().await?;

        let value = match row {
            Some((Some(text), _, _)) => Some(BookValue::Text(text)),
            Some((None, Some(int), _)) => Some(BookValue::Int(int)),
            Some((None, None, Some(real))) => Some(BookValue::Real(from_real(real)?)),
            _ => None,
        };
        Ok(value)
    }

    /// Read the three last-buy values of an account.
    pub async fn last_buy(&self, account_id: i64) -> Result<LastBuy> {
        let timestamp = self.get(BookKey::LastBuyTimestamp, account_id).await?;
        let invest = self.get(BookKey::LastBuyInvest, account_id).await?;
        let price = self.get(BookKey::LastBuyPrice, account_id).await?;

        Ok(LastBuy {
            timestamp: timestamp.and_then(|v| v.as_int()),
            invest: invest.and_then(|v| v.as_real()),
            price: price.and_then(|v| v.as_real()),
        })
    }

    /// Append a ledger row. Never updates existing rows.
    pub async fn append_ledger(&self, entry: &LedgerEntry) -> Result<i64> {
        let mut conn = self.connect().await?;
        let result = sqlx::query(
            "INSERT INTO ledger (account_id, timestamp, invest, crypto_quantity, price) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(entry.account_id)
        .bind(entry.timestamp)
        .bind(to_real(entry.invest)?)
        .bind(to_real(entry.crypto_quantity)?)
        .bind(to_real(entry.price)?)
        .execute(&mut conn)
        .await
        .with_context(|| format!("Failed to append ledger row for account {}", entry.account_id))?;
        conn.close().await?;

        let id = result.last_insert_rowid();
        debug!(id, account_id = entry.account_id, "Ledger row appended");
        Ok(id)
    }

    /// All ledger rows of an account, oldest first.
    pub async fn ledger_entries(&self, account_id: i64) -> Result<Vec<LedgerEntry>> {
        let mut conn = self.connect().await?;
        let rows: Vec<(i64, i64, f64, f64, f64)> = sqlx::query_as(
            "SELECT account_id, timestamp, invest, crypto_quantity, price FROM ledger WHERE account_id = ? ORDER BY id",
        )
        .bind(account_id)
        .fetch_all(&mut conn)
        .await
        .with_context(|| format!("Failed to read ledger for account {account_id}"))?;
        conn.close().await?;

        rows.into_iter()
            .map(|(account_id, timestamp, invest, crypto_quantity, price)| {
                Ok(LedgerEntry {
                    account_id,
                    timestamp,
                    invest: from_real(invest)?,
                    crypto_quantity: from_real(crypto_quantity)?,
                    price: from_real(price)?,
                })
            })
            .collect()
    }

    pub async fn ledger_count(&self, account_id: i64) -> Result<i64> {
        let mut conn = self.connect().await?;
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ledger WHERE account_id = ?")
            .bind(account_id)
            .fetch_one(&mut conn)
            .await
            .context("Failed to count ledger rows")?;
        conn.close().await?;
        Ok(count)
    }
}

async fn upsert_on(
    conn: &mut SqliteConnection,
    key: BookKey,
    account_id: i64,
    value: &BookValue,
) -> Result<()> {
    let (text, int, real) = match value {
        BookValue::Text(v) => (Some(v.clone()), None, None),
        BookValue::Int(v) => (None, Some(*v), None),
        BookValue::Real(v) => (None, None, Some(to_real(*v)?)),
    };

    sqlx::query(UPSERT_BOOKKEEPING)
        .bind(key.as_str())
        .bind(account_id)
        .bind(text)
        .bind(int)
        .bind(real)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to upsert {key} for account {account_id}"))?;
    Ok(())
}

fn to_real(value: Decimal) -> Result<f64> {
    value
        .to_f64()
        .ok_or_else(|| anyhow!("{value} does not fit a REAL column"))
}

fn from_real(value: f64) -> Result<Decimal> {
    Decimal::from_f64(value).ok_or_else(|| anyhow!("stored value {value} is not a decimal"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
