//! Withdrawal executor.
//!
//! Moves an account's crypto off the exchange and settles the last booked
//! buy into the investment ledger.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{AccountConfig, UnbookedWithdrawal};
use crate::exchange::{Exchange, WithdrawalQuote};
use crate::notify::{Notifier, NotifyOutcome};
use crate::storage::{BookkeepingStore, LedgerEntry};
use crate::types::{TradeEvent, WithdrawInfo};

/// Outcome of a completed withdrawal.
#[derive(Debug, Clone)]
pub struct WithdrawalReport {
    pub reference: String,
    pub quote: WithdrawalQuote,
    pub ledger_entry: LedgerEntry,
    pub ledger_id: i64,
    pub notification: NotifyOutcome,
}

pub struct Withdrawer {
    asset: String,
    policy: UnbookedWithdrawal,
    store: BookkeepingStore,
    notifier: Arc<Notifier>,
}

impl Withdrawer {
    pub fn new(
        asset: String,
        policy: UnbookedWithdrawal,
        store: BookkeepingStore,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            asset,
            policy,
            store,
            notifier,
        }
    }

    /// Withdraw `crypto_balance` to the account's configured destination.
    ///
    /// The ledger row carries the last booked buy, not this withdrawal's
    /// amounts. Bookkeeping is left in place, so a second withdrawal before
    /// the next buy settles the same buy again.
    pub async fn execute(
        &self,
        exchange: &dyn Exchange,
        account: &AccountConfig,
        crypto_balance: Decimal,
    ) -> Result<WithdrawalReport> {
        let destination = &account.withdraw_address_desc;

        let last_buy = self
            .store
            .last_buy(account.id)
            .await
            .context("Could not read bookkeeping")?;
        if !last_buy.is_booked() {
            match self.policy {
                UnbookedWithdrawal::Reject => {
                    bail!("No buy booked for account {}, refusing to withdraw", account.id)
                }
                UnbookedWithdrawal::RecordZeroed => warn!(
                    account = %account.description,
                    "No buy booked for this account, ledger row will be zeroed"
                ),
            }
        }

        let quote = exchange
            .get_withdrawal_quote(&self.asset, destination, crypto_balance)
            .await
            .context("Could not get withdrawal quote")?;

        let reference = exchange
            .submit_withdrawal(&self.asset, destination, quote.limit)
            .await
            .context("Could not submit withdrawal")?;

        info!(
            account = %account.description,
            limit = format!("{:.5}", quote.limit),
            fee = format!("{:.5}", quote.fee),
            destination = %destination,
            refid = %reference,
            "Withdrawal submitted"
        );

        let (timestamp, invest, price) = last_buy.or_zero();
        let ledger_entry = LedgerEntry {
            account_id: account.id,
            timestamp,
            invest,
            crypto_quantity: quote.limit - quote.fee,
            price,
        };
        let ledger_id = self
            .store
            .append_ledger(&ledger_entry)
            .await
            .context("Withdrawal submitted but the ledger row could not be written")?;

        let withdraw = WithdrawInfo {
            balance: crypto_balance,
            fee: quote.fee,
            address_desc: destination.clone(),
        };
        let notification = self
            .notifier
            .notify(account, &TradeEvent::Withdraw(withdraw))
            .await;

        Ok(WithdrawalReport {
            reference,
            quote,
            ledger_entry,
            ledger_id,
            notification,
        })
    }
}
