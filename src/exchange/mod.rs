//! Exchange integrations.
//!
//! Defines the `Exchange` trait the engine trades through, and the Kraken
//! REST implementation used in production.

pub mod kraken;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::Balance;

/// Extra parameters sent with a market buy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderOptions {
    /// The order is cancelled by the exchange after this many minutes.
    pub expiry_minutes: i64,
    /// Some jurisdictions (Germany) require explicit trading agreement.
    pub trading_agreement: bool,
}

/// Fee and maximum amount the exchange will accept for a withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WithdrawalQuote {
    pub limit: Decimal,
    pub fee: Decimal,
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("exchange returned errors: {}", .0.join(", "))]
    Api(Vec<String>),
    #[error("unexpected response: {0}")]
    Malformed(String),
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Abstraction over a single exchange account.
///
/// One implementor instance is bound to one set of credentials.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Current fiat and crypto balance of the account.
    async fn get_balance(&self) -> anyhow::Result<Balance>;

    /// Best ask price for `pair`.
    async fn get_ask_price(&self, pair: &str) -> anyhow::Result<Decimal>;

    /// Submit a market buy of `volume` units of the base asset.
    /// Returns the exchange transaction ids.
    async fn submit_market_buy(
        &self,
        pair: &str,
        volume: Decimal,
        options: &OrderOptions,
    ) -> anyhow::Result<Vec<String>>;

    /// Ask the exchange what a withdrawal of `amount` would cost.
    async fn get_withdrawal_quote(
        &self,
        asset: &str,
        destination: &str,
        amount: Decimal,
    ) -> anyhow::Result<WithdrawalQuote>;

    /// Withdraw `amount` of `asset` to the named destination.
    /// Returns the exchange reference id.
    async fn submit_withdrawal(
        &self,
        asset: &str,
        destination: &str,
        amount: Decimal,
    ) -> anyhow::Result<String>;

    /// Exchange name for logging.
    fn name(&self) -> &str;
}
