//! Purchase executor.
//!
//! Spends an account's fiat balance on a market buy, books the buy so a
//! later withdrawal can settle it, and sends the deposit notification.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

use crate::config::{AccountConfig, MarketConfig};
use crate::exchange::{Exchange, OrderOptions};
use crate::notify::{Notifier, NotifyOutcome};
use crate::storage::BookkeepingStore;
use crate::types::{DepositInfo, TradeEvent};

/// Outcome of a completed purchase.
#[derive(Debug, Clone)]
pub struct PurchaseReport {
    pub order_ids: Vec<String>,
    pub deposit: DepositInfo,
    pub booked_at: i64,
    pub notification: NotifyOutcome,
}

/// Order size for a fiat amount at a given price.
///
/// Both operands are truncated to whole units before dividing, so
/// 123.9 at 45000.7 buys 123 / 45000.
pub fn buy_quantity(fiat: Decimal, price: Decimal) -> Result<Decimal> {
    let whole_price = price.trunc();
    if whole_price <= Decimal::ZERO {
        bail!("Cannot size an order at price {price}");
    }
    Ok(fiat.trunc() / whole_price)
}

pub struct Purchaser {
    market: MarketConfig,
    order_expiry_minutes: i64,
    store: BookkeepingStore,
    notifier: Arc<Notifier>,
}

impl Purchaser {
    pub fn new(
        market: MarketConfig,
        order_expiry_minutes: i64,
        store: BookkeepingStore,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            market,
            order_expiry_minutes,
            store,
            notifier,
        }
    }

    /// Buy crypto with `fiat_balance`.
    ///
    /// A failed price lookup or order submission aborts before anything is
    /// booked or sent.
    pub async fn execute(
        &self,
        exchange: &dyn Exchange,
        account: &AccountConfig,
        fiat_balance: Decimal,
    ) -> Result<PurchaseReport> {
        info!(account = %account.description, "Found fiat balance, checking price");

        let price = exchange
            .get_ask_price(&self.market.pair)
            .await
            .with_context(|| format!("Could not fetch {} price", self.market.pair))?;
        info!(pair = %self.market.pair, price = %price, "Current ask price");

        let quantity = buy_quantity(fiat_balance, price)?;
        let options = OrderOptions {
            expiry_minutes: self.order_expiry_minutes,
            trading_agreement: true,
        };

        info!(
            account = %account.description,
            fiat = format!("{fiat_balance:.2}"),
            quantity = format!("{quantity:.5}"),
            expiry_minutes = options.expiry_minutes,
            "Creating market buy order"
        );

        let order_ids = exchange
            .submit_market_buy(&self.market.pair, quantity, &options)
            .await
            .context("Could not place buy order")?;
        info!(txids = ?order_ids, "Order created");

        let booked_at = Utc::now().timestamp();
        self.store
            .upsert_last_buy(account.id, booked_at, fiat_balance, price)
            .await
            .context("Order placed but the buy could not be booked")?;

        let deposit = DepositInfo {
            fiat_deposit: fiat_balance,
            unit_price: price,
            approx_crypto: quantity,
            order_timeout_minutes: options.expiry_minutes,
        };
        let notification = self
            .notifier
            .notify(account, &TradeEvent::Deposit(deposit.clone()))
            .await;

        Ok(PurchaseReport {
            order_ids,
            deposit,
            booked_at,
            notification,
        })
    }
}
