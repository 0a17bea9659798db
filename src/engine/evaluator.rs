//! Account evaluator: turns a balance snapshot into one action.

use rust_decimal::Decimal;

use crate::config::AccountConfig;
use crate::types::{Balance, TradeAction};

pub struct Evaluator;

impl Evaluator {
    /// Pick the action for an account.
    ///
    /// Buying is checked first: an account over both thresholds buys this
    /// cycle and can only withdraw in a later one.
    pub fn decide(
        fiat: Decimal,
        crypto: Decimal,
        fiat_threshold: Decimal,
        crypto_threshold: Decimal,
    ) -> TradeAction {
        if fiat >= fiat_threshold {
            TradeAction::Buy(fiat)
        } else if crypto >= crypto_threshold {
            TradeAction::Withdraw(crypto)
        } else {
            TradeAction::Idle
        }
    }

    pub fn evaluate(balance: &Balance, account: &AccountConfig) -> TradeAction {
        Self::decide(
            balance.fiat,
            balance.crypto,
            account.min_fiat_to_buy,
            account.min_crypto_to_withdraw,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_buy_when_fiat_over_threshold() {
        assert_eq!(
            Evaluator::decide(dec!(60), dec!(0), dec!(50), dec!(0.01)),
            TradeAction::Buy(dec!(60))
        );
    }

    #[test]
    fn test_threshold_is_inclusive() {
        assert_eq!(
            Evaluator::decide(dec!(50), dec!(0), dec!(50), dec!(0.01)),
            TradeAction::Buy(dec!(50))
        );
        assert_eq!(
            Evaluator::decide(dec!(0), dec!(0.01), dec!(50), dec!(0.01)),
            TradeAction::Withdraw(dec!(0.01))
        );
    }

    #[test]
    fn test_withdraw_when_only_crypto_over_threshold() {
        assert_eq!(
            Evaluator::decide(dec!(49.99), dec!(0.015), dec!(50), dec!(0.01)),
            TradeAction::Withdraw(dec!(0.015))
        );
    }

    #[test]
    fn test_idle_below_both() {
        assert_eq!(
            Evaluator::decide(dec!(10), dec!(0.001), dec!(50), dec!(0.01)),
            TradeAction::Idle
        );
    }

    #[test]
    fn test_buy_always_wins_when_both_qualify() {
        let fiats = [dec!(50), dec!(60), dec!(1000), dec!(123.9)];
        let cryptos = [dec!(0.01), dec!(0.015), dec!(2), dec!(100)];
        for fiat in fiats {
            for crypto in cryptos {
                let action = Evaluator::decide(fiat, crypto, dec!(50), dec!(0.01));
                assert_eq!(action, TradeAction::Buy(fiat), "fiat={fiat} crypto={crypto}");
            }
        }
    }
}
