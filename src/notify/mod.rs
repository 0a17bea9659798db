//! Notification emails.
//!
//! Every buy and withdrawal is reported to the account owner (if they opted
//! in) by rendering a user-editable template and handing the result to a
//! [`MailTransport`]. A failed notification is logged and never undoes or
//! retries the trade it reports.

pub mod smtp;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::prelude::*;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::AccountConfig;
use crate::types::{DepositInfo, NotificationKind, TradeEvent, WithdrawInfo};

#[cfg(test)]
use mockall::automock;

/// Smallest crypto unit per whole coin (satoshis per BTC).
const SATS_PER_COIN: i64 = 100_000_000;

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// Subject/message pairs for both event kinds, read from a TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EmailTemplate {
    pub subject_deposit: String,
    pub message_deposit: String,
    pub subject_withdraw: String,
    pub message_withdraw: String,
}

impl EmailTemplate {
    pub fn load(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read email template: {path}"))?;
        toml::from_str(&contents).with_context(|| format!("Failed to parse email template: {path}"))
    }

    /// `(subject, message)` for the given event kind.
    pub fn select(&self, kind: NotificationKind) -> (&str, &str) {
        match kind {
            NotificationKind::Deposit => (&self.subject_deposit, &self.message_deposit),
            NotificationKind::Withdraw => (&self.subject_withdraw, &self.message_withdraw),
        }
    }
}

// ---------------------------------------------------------------------------
// Composer
// ---------------------------------------------------------------------------

/// A fully rendered email, ready for a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Replace every known placeholder in `message`.
///
/// Placeholders belonging to the other event kind render as zero or empty.
pub fn render_message(message: &str, event: &TradeEvent, account_desc: &str) -> String {
    let no_deposit = DepositInfo::default();
    let no_withdraw = WithdrawInfo::default();
    let (deposit, withdraw) = match event {
        TradeEvent::Deposit(d) => (d, &no_withdraw),
        TradeEvent::Withdraw(w) => (&no_deposit, w),
    };

    let net = withdraw.net_amount();
    let sats = (net * Decimal::from(SATS_PER_COIN))
        .trunc()
        .to_i64()
        .unwrap_or_default();

    let replacements = [
        ("%eurodeposit%", format!("{:.2}", deposit.fiat_deposit)),
        ("%account%", account_desc.to_string()),
        ("%bitcoinprice%", format!("{:.2}", deposit.unit_price)),
        ("%aproxbitcoinrcv%", format!("{:.8}", deposit.approx_crypto)),
        ("%ordertimeout%", deposit.order_timeout_minutes.to_string()),
        ("%sats%", sats.to_string()),
        ("%bitcoin%", format!("{net:.8}")),
        ("%addressdesc%", withdraw.address_desc.clone()),
        ("%balance%", format!("{:.8}", withdraw.balance)),
        ("%fee%", format!("{:.8}", withdraw.fee)),
    ];

    replacements
        .iter()
        .fold(message.to_string(), |body, (token, value)| body.replace(token, value))
}

/// Build the email for `event` from `template`.
pub fn compose(
    template: &EmailTemplate,
    event: &TradeEvent,
    account: &AccountConfig,
    from_header: &str,
) -> ComposedEmail {
    let (subject, message) = template.select(event.kind());
    ComposedEmail {
        from: from_header.to_string(),
        to: account.notification_email.clone(),
        subject: subject.to_string(),
        body: render_message(message, event, &account.withdraw_address_desc),
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Delivers composed emails.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &ComposedEmail) -> Result<()>;
}

/// Result of one notification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// The account did not opt in.
    Disabled,
    Sent,
    Failed,
}

pub struct Notifier {
    template_path: String,
    from_header: String,
    transport: Box<dyn MailTransport>,
}

impl Notifier {
    pub fn new(template_path: String, from_header: String, transport: Box<dyn MailTransport>) -> Self {
        Self {
            template_path,
            from_header,
            transport,
        }
    }

    /// Notify the account owner about `event`. Never fails; errors are logged.
    pub async fn notify(&self, account: &AccountConfig, event: &TradeEvent) -> NotifyOutcome {
        if !account.send_notification_email {
            return NotifyOutcome::Disabled;
        }

        match self.try_notify(account, event).await {
            Ok(()) => {
                info!(
                    account = %account.description,
                    to = %account.notification_email,
                    kind = %event.kind(),
                    "Notification email sent"
                );
                NotifyOutcome::Sent
            }
            Err(e) => {
                warn!(
                    account = %account.description,
                    kind = %event.kind(),
                    error = format!("{e:#}"),
                    "Could not send notification email"
                );
                NotifyOutcome::Failed
            }
        }
    }

    async fn try_notify(&self, account: &AccountConfig, event: &TradeEvent) -> Result<()> {
        // Reloaded every time so the operator can edit it while running.
        let template = EmailTemplate::load(&self.template_path)?;
        let email = compose(&template, event, account, &self.from_header);
        self.transport.send(&email).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
