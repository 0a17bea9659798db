//! Shared types for the PIGGYBANK agent.
//!
//! Balances and trade events flow from the exchange binding through the
//! engine into storage and notifications, so they live here to keep those
//! modules free of circular references.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Balance
// ---------------------------------------------------------------------------

/// Fiat and crypto balance of one account, read fresh every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    pub fiat: Decimal,
    pub crypto: Decimal,
}

impl Balance {
    pub fn new(fiat: Decimal, crypto: Decimal) -> Self {
        Self { fiat, crypto }
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fiat {:.2} | crypto {:.8}", self.fiat, self.crypto)
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// What the evaluator decided to do with an account this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeAction {
    /// Spend this much fiat on a market buy.
    Buy(Decimal),
    /// Withdraw this much crypto.
    Withdraw(Decimal),
    Idle,
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeAction::Buy(amount) => write!(f, "BUY {amount:.2}"),
            TradeAction::Withdraw(amount) => write!(f, "WITHDRAW {amount:.8}"),
            TradeAction::Idle => write!(f, "IDLE"),
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A buy order that was just submitted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DepositInfo {
    /// Fiat put into the order.
    pub fiat_deposit: Decimal,
    /// Ask price the order was sized against.
    pub unit_price: Decimal,
    /// Approximate crypto the order buys.
    pub approx_crypto: Decimal,
    pub order_timeout_minutes: i64,
}

/// A withdrawal that was just submitted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WithdrawInfo {
    /// Crypto balance that triggered the withdrawal.
    pub balance: Decimal,
    pub fee: Decimal,
    pub address_desc: String,
}

impl WithdrawInfo {
    /// Crypto that actually leaves the exchange.
    pub fn net_amount(&self) -> Decimal {
        self.balance - self.fee
    }
}

/// Which pair of template strings a notification uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Deposit,
    Withdraw,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::Deposit => write!(f, "deposit"),
            NotificationKind::Withdraw => write!(f, "withdraw"),
        }
    }
}

/// A trading event to notify the account owner about.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeEvent {
    Deposit(DepositInfo),
    Withdraw(WithdrawInfo),
}

impl TradeEvent {
    pub fn kind(&self) -> NotificationKind {
        match self {
            TradeEvent::Deposit(_) => NotificationKind::Deposit,
            TradeEvent::Withdraw(_) => NotificationKind::Withdraw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balance_display() {
        let b = Balance::new(dec!(60), dec!(0.015));
        assert_eq!(b.to_string(), "fiat 60.00 | crypto 0.01500000");
    }

    #[test]
    fn test_withdraw_net_amount() {
        let w = WithdrawInfo {
            balance: dec!(0.015),
            fee: dec!(0.0002),
            address_desc: "Cold".into(),
        };
        assert_eq!(w.net_amount(), dec!(0.0148));
    }

    #[test]
    fn test_event_kind() {
        assert_eq!(TradeEvent::Deposit(DepositInfo::default()).kind(), NotificationKind::Deposit);
        assert_eq!(
            TradeEvent::Withdraw(WithdrawInfo::default()).kind(),
            NotificationKind::Withdraw
        );
        assert_eq!(NotificationKind::Withdraw.to_string(), "withdraw");
    }

    #[test]
    fn test_action_display() {
        assert_eq!(TradeAction::Buy(dec!(60)).to_string(), "BUY 60.00");
        assert_eq!(TradeAction::Withdraw(dec!(0.015)).to_string(), "WITHDRAW 0.01500000");
        assert_eq!(TradeAction::Idle.to_string(), "IDLE");
    }
}
