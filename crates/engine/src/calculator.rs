//! Reward calculation
//!
//! Pure: a quote depends only on the source definition and the VIP
//! multiplier in force, never on stored state.

use rewards_core::{round_cashback, Error, Result, RewardQuote, RewardSource};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Quote the reward for completing `source`.
///
/// `vip_multiplier` is the multiplier of a live VIP membership, if any; it is
/// ignored for sources that VIP does not boost.
pub fn quote_reward(source: &RewardSource, vip_multiplier: Option<Decimal>) -> Result<RewardQuote> {
    validate_source(source)?;

    let mut factor = source.difficulty_multiplier();
    if let Some(vip) = vip_multiplier {
        if vip <= Decimal::ZERO {
            return Err(Error::InvalidSourceConfig(format!(
                "VIP multiplier must be positive, got {}",
                vip
            )));
        }
        if source.vip_boosted() {
            factor = factor
                .checked_mul(vip)
                .ok_or_else(|| out_of_range(source, "multiplier"))?;
        }
    }

    let base = source.base_reward();
    let points = base
        .points
        .checked_mul(factor)
        .and_then(|p| p.floor().to_i64())
        .ok_or_else(|| out_of_range(source, "points"))?;
    let cashback = base
        .cashback
        .checked_mul(factor)
        .map(round_cashback)
        .ok_or_else(|| out_of_range(source, "cashback"))?;

    Ok(RewardQuote::new(points, cashback))
}

fn out_of_range(source: &RewardSource, what: &str) -> Error {
    Error::InvalidSourceConfig(format!("{}: {} out of range", source.source_id(), what))
}

/// Reject source definitions that cannot produce a sane quote
pub fn validate_source(source: &RewardSource) -> Result<()> {
    match source {
        RewardSource::Game(c) | RewardSource::Challenge(c) | RewardSource::Deal(c) => {
            if c.id.trim().is_empty() {
                return Err(Error::InvalidSourceConfig("source id is empty".to_string()));
            }
            if c.base_points < 0 {
                return Err(Error::InvalidSourceConfig(format!(
                    "{}: base points {} is negative",
                    c.id, c.base_points
                )));
            }
            if c.base_cashback < Decimal::ZERO {
                return Err(Error::InvalidSourceConfig(format!(
                    "{}: base cashback {} is negative",
                    c.id, c.base_cashback
                )));
            }
            if c.max_points_per_day.is_some_and(|max| max < 0)
                || c.max_cashback_per_day.is_some_and(|max| max < Decimal::ZERO)
            {
                return Err(Error::InvalidSourceConfig(format!(
                    "{}: daily cap is negative",
                    c.id
                )));
            }
        }
        RewardSource::Receipt(r) => {
            if r.amount <= Decimal::ZERO {
                return Err(Error::InvalidSourceConfig(format!(
                    "receipt {}: amount {} is not positive",
                    r.receipt_id, r.amount
                )));
            }
            if r.cashback_rate < Decimal::ZERO || r.cashback_rate > Decimal::ONE {
                return Err(Error::InvalidSourceConfig(format!(
                    "receipt {}: cashback rate {} outside [0, 1]",
                    r.receipt_id, r.cashback_rate
                )));
            }
        }
        RewardSource::DailyLogin { streak } => {
            if *streak == 0 {
                return Err(Error::InvalidSourceConfig(
                    "daily login streak starts at 1".to_string(),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewards_core::{default_vip_multiplier, CatalogReward, Difficulty, ReceiptReward};

    fn game(points: i64, cashback: Decimal) -> RewardSource {
        RewardSource::Game(CatalogReward::new("g1", points, cashback))
    }

    #[test]
    fn test_base_quote() {
        let quote = quote_reward(&game(100, Decimal::new(50, 2)), None).unwrap();
        assert_eq!(quote, RewardQuote::new(100, Decimal::new(50, 2)));
    }

    #[test]
    fn test_vip_multiplier() {
        let quote =
            quote_reward(&game(100, Decimal::new(50, 2)), Some(default_vip_multiplier())).unwrap();
        assert_eq!(quote, RewardQuote::new(150, Decimal::new(75, 2)));
    }

    #[test]
    fn test_difficulty_and_vip_stack() {
        let source = RewardSource::Challenge(
            CatalogReward::new("c1", 100, Decimal::new(50, 2)).with_difficulty(Difficulty::Hard),
        );
        let quote = quote_reward(&source, Some(default_vip_multiplier())).unwrap();
        assert_eq!(quote, RewardQuote::new(300, Decimal::new(150, 2)));
    }

    #[test]
    fn test_points_floor_and_cashback_rounding() {
        let source = RewardSource::Game(
            CatalogReward::new("g2", 7, Decimal::new(5, 2)).with_difficulty(Difficulty::Medium),
        );
        // 7 * 1.5 = 10.5 -> 10; 0.05 * 1.5 = 0.075 -> 0.08
        let quote = quote_reward(&source, None).unwrap();
        assert_eq!(quote, RewardQuote::new(10, Decimal::new(8, 2)));
    }

    #[test]
    fn test_negative_base_is_rejected() {
        let err = quote_reward(&game(-1, Decimal::ZERO), None).unwrap_err();
        assert!(matches!(err, Error::InvalidSourceConfig(_)));

        let err = quote_reward(&game(10, Decimal::new(-1, 2)), None).unwrap_err();
        assert!(matches!(err, Error::InvalidSourceConfig(_)));
    }

    #[test]
    fn test_overflowing_quote_is_rejected() {
        let err = quote_reward(&game(1, Decimal::MAX), Some(default_vip_multiplier())).unwrap_err();
        assert!(matches!(err, Error::InvalidSourceConfig(_)));

        let err = quote_reward(&game(i64::MAX, Decimal::ZERO), Some(Decimal::new(2, 0))).unwrap_err();
        assert!(matches!(err, Error::InvalidSourceConfig(_)));

        // expert x3 times the largest multiplier overflows the factor itself
        let expert = RewardSource::Game(
            CatalogReward::new("g3", 1, Decimal::ZERO).with_difficulty(Difficulty::Expert),
        );
        let err = quote_reward(&expert, Some(Decimal::MAX)).unwrap_err();
        assert!(matches!(err, Error::InvalidSourceConfig(_)));
    }

    #[test]
    fn test_receipt_quote() {
        let source = RewardSource::Receipt(ReceiptReward {
            receipt_id: "r1".to_string(),
            store_name: "Market".to_string(),
            amount: Decimal::new(4250, 2),
            cashback_rate: Decimal::new(1, 2),
        });
        // 42.50 * 0.01 = 0.425 -> 0.43
        assert_eq!(
            quote_reward(&source, None).unwrap(),
            RewardQuote::new(42, Decimal::new(43, 2))
        );
        assert_eq!(
            quote_reward(&source, Some(default_vip_multiplier())).unwrap(),
            RewardQuote::new(63, Decimal::new(64, 2))
        );
    }

    #[test]
    fn test_daily_login_ignores_vip() {
        let source = RewardSource::DailyLogin { streak: 7 };
        let quote = quote_reward(&source, Some(default_vip_multiplier())).unwrap();
        assert_eq!(quote, RewardQuote::new(15, Decimal::new(15, 2)));

        let err = quote_reward(&RewardSource::DailyLogin { streak: 0 }, None).unwrap_err();
        assert!(matches!(err, Error::InvalidSourceConfig(_)));
    }
}
