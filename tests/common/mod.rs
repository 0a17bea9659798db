//! Shared fixtures for integration tests.
//!
//! `MockExchange` is a deterministic, in-memory `Exchange`: balances, price
//! and withdrawal quotes are set from test code, every call is recorded, and
//! individual operations can be forced to fail. Clones share state, so a test
//! keeps one handle while the scheduler owns another.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::Connection;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use piggybank::config::AppConfig;
use piggybank::exchange::{Exchange, OrderOptions, WithdrawalQuote};
use piggybank::notify::{ComposedEmail, MailTransport, Notifier};
use piggybank::types::Balance;

// ---------------------------------------------------------------------------
// Mock exchange
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Balance,
    Price,
    Buy,
    Quote,
    Withdraw,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Balance,
    AskPrice(String),
    MarketBuy {
        pair: String,
        volume: Decimal,
        options: OrderOptions,
    },
    Quote {
        asset: String,
        destination: String,
        amount: Decimal,
    },
    Withdraw {
        asset: String,
        destination: String,
        amount: Decimal,
    },
}

#[derive(Debug)]
struct MockState {
    balance: Balance,
    price: Decimal,
    quote: WithdrawalQuote,
    failing: HashSet<Op>,
    calls: Vec<Call>,
}

#[derive(Clone)]
pub struct MockExchange {
    state: Arc<Mutex<MockState>>,
}

impl MockExchange {
    pub fn new(balance: Balance) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                balance,
                price: dec!(45000.5),
                quote: WithdrawalQuote {
                    limit: dec!(0.015),
                    fee: dec!(0.0002),
                },
                failing: HashSet::new(),
                calls: Vec::new(),
            })),
        }
    }

    pub fn set_balance(&self, fiat: Decimal, crypto: Decimal) {
        self.state.lock().unwrap().balance = Balance::new(fiat, crypto);
    }

    pub fn set_price(&self, price: Decimal) {
        self.state.lock().unwrap().price = price;
    }

    pub fn set_quote(&self, limit: Decimal, fee: Decimal) {
        self.state.lock().unwrap().quote = WithdrawalQuote { limit, fee };
    }

    /// Make `op` fail until cleared.
    pub fn fail(&self, op: Op) {
        self.state.lock().unwrap().failing.insert(op);
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failing.clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn record(&self, op: Op, call: Call) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if state.failing.contains(&op) {
            return Err(anyhow!("simulated {op:?} failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn get_balance(&self) -> Result<Balance> {
        self.record(Op::Balance, Call::Balance)?;
        Ok(self.state.lock().unwrap().balance)
    }

    async fn get_ask_price(&self, pair: &str) -> Result<Decimal> {
        self.record(Op::Price, Call::AskPrice(pair.to_string()))?;
        Ok(self.state.lock().unwrap().price)
    }

    async fn submit_market_buy(
        &self,
        pair: &str,
        volume: Decimal,
        options: &OrderOptions,
    ) -> Result<Vec<String>> {
        self.record(
            Op::Buy,
            Call::MarketBuy {
                pair: pair.to_string(),
                volume,
                options: options.clone(),
            },
        )?;
        Ok(vec!["OABCDE-FGHIJ-KLMNOP".to_string()])
    }

    async fn get_withdrawal_quote(
        &self,
        asset: &str,
        destination: &str,
        amount: Decimal,
    ) -> Result<WithdrawalQuote> {
        self.record(
            Op::Quote,
            Call::Quote {
                asset: asset.to_string(),
                destination: destination.to_string(),
                amount,
            },
        )?;
        Ok(self.state.lock().unwrap().quote)
    }

    async fn submit_withdrawal(
        &self,
        asset: &str,
        destination: &str,
        amount: Decimal,
    ) -> Result<String> {
        self.record(
            Op::Withdraw,
            Call::Withdraw {
                asset: asset.to_string(),
                destination: destination.to_string(),
                amount,
            },
        )?;
        Ok("AGBSO6T-UFMTTQ-I7KGS6".to_string())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Recording mail transport
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<ComposedEmail>>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<ComposedEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl MailTransport for RecordingMailer {
    async fn send(&self, email: &ComposedEmail) -> Result<()> {
        if *self.failing.lock().unwrap() {
            return Err(anyhow!("simulated SMTP connection refused"));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn temp_file(prefix: &str, ext: &str) -> String {
    let mut p = std::env::temp_dir();
    p.push(format!("{prefix}_{}.{ext}", uuid::Uuid::new_v4()));
    p.to_string_lossy().to_string()
}

pub fn write_template() -> String {
    let path = temp_file("piggybank_template", "toml");
    std::fs::write(
        &path,
        r#"
subject_deposit = "Order placed"
message_deposit = "You deposited %eurodeposit% to buy %aproxbitcoinrcv% BTC at %bitcoinprice%, expires in %ordertimeout% min"
subject_withdraw = "Withdrawal sent"
message_withdraw = "%bitcoin% BTC (%sats% sats) sent to %addressdesc%, fee %fee%"
"#,
    )
    .unwrap();
    path
}

/// Config with two accounts (ids 1 and 2), thresholds 50 fiat / 0.01 crypto.
pub fn config(db_path: &str, template_path: &str, policy: &str) -> AppConfig {
    let src = format!(
        r#"
[agent]
name = "PIGGYBANK-TEST"
sleep_time_hours = 1

[database]
path = "{db_path}"

[smtp]
server = "smtp.example.com"
port = 465
username = "bot@example.com"
password_env = "PIGGYBANK_SMTP_PASSWORD"
sender_name = "PiggyBank"
sender_email = "bot@example.com"

[notifications]
template_path = "{template_path}"

[policy]
unbooked_withdrawal = "{policy}"

[[accounts]]
id = 1
description = "Savings"
api_key_env = "KRAKEN_KEY_1"
private_key_env = "KRAKEN_SECRET_1"
withdraw_address_desc = "Cold Storage"
min_fiat_to_buy = 50.0
min_crypto_to_withdraw = 0.01
send_notification_email = true
notification_email = "one@example.com"

[[accounts]]
id = 2
description = "Kids"
api_key_env = "KRAKEN_KEY_2"
private_key_env = "KRAKEN_SECRET_2"
withdraw_address_desc = "Hardware Wallet"
min_fiat_to_buy = 50.0
min_crypto_to_withdraw = 0.01
send_notification_email = false
"#
    );
    AppConfig::parse(&src).unwrap()
}

/// Install SQLite triggers that abort every write to `table` for one account.
pub async fn reject_writes(db_path: &str, table: &str, account_id: i64) {
    let options = SqliteConnectOptions::new().filename(db_path);
    let mut conn = SqliteConnection::connect_with(&options).await.unwrap();
    for event in ["INSERT", "UPDATE"] {
        let sql = format!(
            "CREATE TRIGGER reject_{table}_{event} BEFORE {event} ON {table} \
             WHEN NEW.account_id = {account_id} BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END"
        );
        sqlx::query(&sql).execute(&mut conn).await.unwrap();
    }
    conn.close().await.unwrap();
}

/// In-memory log sink for asserting on emitted events.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LogBuffer {
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

/// Route this thread's `tracing` events into a buffer until the guard drops.
pub fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    (logs, tracing::subscriber::set_default(subscriber))
}

pub fn notifier(template_path: &str, mailer: &RecordingMailer) -> Notifier {
    Notifier::new(
        template_path.to_string(),
        "PiggyBank <bot@example.com>".to_string(),
        Box::new(mailer.clone()),
    )
}
