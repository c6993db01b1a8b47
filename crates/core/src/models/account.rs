//! Account and wallet aggregates

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-user reward totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub user_id: i64,
    /// Spendable points
    pub total_points: i64,
    /// Cashback currently held (mirrors the wallet balance)
    pub total_cashback: Decimal,
    /// Lifetime cashback earned from rewards
    pub total_earnings: Decimal,
    /// Derived from the VIP membership window at read time
    #[serde(default)]
    pub is_vip_active: bool,
}

impl Account {
    pub fn empty(user_id: i64) -> Self {
        Self {
            user_id,
            total_points: 0,
            total_cashback: Decimal::ZERO,
            total_earnings: Decimal::ZERO,
            is_vip_active: false,
        }
    }
}

/// Cashback wallet, 1:1 with an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub user_id: i64,
    /// Total held, including funds still pending review
    pub balance: Decimal,
    /// Portion of `balance` not yet withdrawable
    pub pending_balance: Decimal,
    pub total_earned: Decimal,
    pub total_withdrawn: Decimal,
    pub minimum_withdrawal: Decimal,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Wallet {
    /// Withdrawable funds
    pub fn available(&self) -> Decimal {
        self.balance - self.pending_balance
    }

    pub fn is_consistent(&self) -> bool {
        self.balance >= Decimal::ZERO
            && self.pending_balance >= Decimal::ZERO
            && self.balance >= self.pending_balance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_excludes_pending() {
        let wallet = Wallet {
            user_id: 1,
            balance: Decimal::new(1500, 2),
            pending_balance: Decimal::new(250, 2),
            total_earned: Decimal::new(1250, 2),
            total_withdrawn: Decimal::ZERO,
            minimum_withdrawal: Decimal::new(10, 0),
            updated_at: None,
        };
        assert_eq!(wallet.available(), Decimal::new(1250, 2));
        assert!(wallet.is_consistent());
    }
}
