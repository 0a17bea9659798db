//! Cycle scheduler.
//!
//! Walks the configured accounts strictly in order, one at a time, then
//! sleeps. Anything that goes wrong for one account is logged and the next
//! account is processed as usual.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::evaluator::Evaluator;
use super::purchase::Purchaser;
use super::withdrawal::Withdrawer;
use crate::config::{AccountConfig, AppConfig};
use crate::exchange::Exchange;
use crate::notify::Notifier;
use crate::storage::BookkeepingStore;
use crate::types::TradeAction;

/// An account together with the exchange client bound to its credentials.
pub struct ManagedAccount {
    pub config: AccountConfig,
    pub exchange: Box<dyn Exchange>,
}

/// Summary of one pass over all accounts.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub accounts: usize,
    pub buys: usize,
    pub withdrawals: usize,
    pub idle: usize,
    pub failed: usize,
    pub timestamp: DateTime<Utc>,
}

pub struct Scheduler {
    accounts: Vec<ManagedAccount>,
    purchaser: Purchaser,
    withdrawer: Withdrawer,
    sleep: Duration,
    cycle_count: u64,
}

impl Scheduler {
    pub fn new(
        cfg: &AppConfig,
        accounts: Vec<ManagedAccount>,
        store: BookkeepingStore,
        notifier: Notifier,
    ) -> Self {
        let notifier = Arc::new(notifier);
        Self {
            accounts,
            purchaser: Purchaser::new(
                cfg.market.clone(),
                cfg.agent.order_expiry_minutes(),
                store.clone(),
                notifier.clone(),
            ),
            withdrawer: Withdrawer::new(
                cfg.market.withdraw_asset.clone(),
                cfg.policy.unbooked_withdrawal,
                store,
                notifier,
            ),
            sleep: Duration::from_secs(cfg.agent.sleep_time_hours * 3600),
            cycle_count: 0,
        }
    }

    pub fn sleep_duration(&self) -> Duration {
        self.sleep
    }

    /// Run cycles forever, sleeping between them.
    pub async fn run(&mut self) {
        loop {
            let report = self.run_cycle().await;
            log_cycle_report(&report);

            info!(
                hours = self.sleep.as_secs() / 3600,
                "Going to sleep"
            );
            tokio::time::sleep(self.sleep).await;
        }
    }

    /// Process every account once.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycle_count += 1;
        let total = self.accounts.len();
        let mut report = CycleReport {
            cycle_number: self.cycle_count,
            accounts: total,
            buys: 0,
            withdrawals: 0,
            idle: 0,
            failed: 0,
            timestamp: Utc::now(),
        };

        for (index, account) in self.accounts.iter().enumerate() {
            info!(
                account = %account.config.description,
                "Checking balance of account [{}/{}]",
                index + 1,
                total
            );

            match self.process_account(account).await {
                Ok(TradeAction::Buy(_)) => report.buys += 1,
                Ok(TradeAction::Withdraw(_)) => report.withdrawals += 1,
                Ok(TradeAction::Idle) => report.idle += 1,
                Err(e) => {
                    error!(
                        account_id = account.config.id,
                        account = %account.config.description,
                        error = format!("{e:#}"),
                        "Account failed this cycle"
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }

    async fn process_account(&self, account: &ManagedAccount) -> Result<TradeAction> {
        let exchange = account.exchange.as_ref();
        let cfg = &account.config;

        let balance = exchange
            .get_balance()
            .await
            .context("Could not check balance")?;
        info!(
            account_id = cfg.id,
            account = %cfg.description,
            fiat = format!("{:.2}", balance.fiat),
            crypto = format!("{:.8}", balance.crypto),
            "Balance"
        );

        let action = Evaluator::evaluate(&balance, cfg);
        match action {
            TradeAction::Buy(fiat) => {
                self.purchaser
                    .execute(exchange, cfg, fiat)
                    .await
                    .context("Could not buy")?;
            }
            TradeAction::Withdraw(crypto) => {
                self.withdrawer
                    .execute(exchange, cfg, crypto)
                    .await
                    .context("Could not withdraw")?;
            }
            TradeAction::Idle => info!(account = %cfg.description, "Not enough balance found"),
        }
        Ok(action)
    }
}

/// Log a human-readable cycle summary.
pub fn log_cycle_report(report: &CycleReport) {
    info!(
        cycle = report.cycle_number,
        accounts = report.accounts,
        buys = report.buys,
        withdrawals = report.withdrawals,
        idle = report.idle,
        failed = report.failed,
        "Cycle complete"
    );
}
