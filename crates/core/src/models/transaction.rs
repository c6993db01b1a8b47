//! Journal transaction models

use crate::errors::Error;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Direction of a journal entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Credit,
    Debit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Credit => "credit",
            TransactionType::Debit => "debit",
        }
    }
}

impl FromStr for TransactionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" => Ok(TransactionType::Credit),
            "debit" => Ok(TransactionType::Debit),
            other => Err(Error::InvalidData(format!("unknown transaction type '{}'", other))),
        }
    }
}

/// Settlement state; only `Pending` may change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (TransactionStatus::Pending, TransactionStatus::Completed)
                | (TransactionStatus::Pending, TransactionStatus::Failed)
        )
    }
}

impl FromStr for TransactionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(Error::InvalidData(format!("unknown transaction status '{}'", other))),
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused the wallet movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Reward,
    DailyReward,
    Receipt,
    PointsRedemption,
    Withdrawal,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Reward => "reward",
            TransactionKind::DailyReward => "daily_reward",
            TransactionKind::Receipt => "receipt",
            TransactionKind::PointsRedemption => "points_redemption",
            TransactionKind::Withdrawal => "withdrawal",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reward" => Ok(TransactionKind::Reward),
            "daily_reward" => Ok(TransactionKind::DailyReward),
            "receipt" => Ok(TransactionKind::Receipt),
            "points_redemption" => Ok(TransactionKind::PointsRedemption),
            "withdrawal" => Ok(TransactionKind::Withdrawal),
            other => Err(Error::InvalidData(format!("unknown transaction kind '{}'", other))),
        }
    }
}

/// Immutable journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: i64,
    pub user_id: i64,
    pub reference_id: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub kind: TransactionKind,
    /// Cashback moved, never negative
    pub amount: Decimal,
    /// Points moved; negative when points were spent
    pub points: i64,
    pub description: String,
    pub status: TransactionStatus,
    pub source_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Entry to be appended to the journal
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: i64,
    pub transaction_type: TransactionType,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub points: i64,
    pub description: String,
    pub status: TransactionStatus,
    pub source_id: Option<String>,
    pub idempotency_key: Option<String>,
}

impl NewTransaction {
    /// A completed credit of cashback and points
    pub fn credit(user_id: i64, kind: TransactionKind, amount: Decimal, points: i64) -> Self {
        Self {
            user_id,
            transaction_type: TransactionType::Credit,
            kind,
            amount,
            points,
            description: String::new(),
            status: TransactionStatus::Completed,
            source_id: None,
            idempotency_key: None,
        }
    }

    /// A pending withdrawal debit
    pub fn withdrawal(user_id: i64, amount: Decimal) -> Self {
        Self {
            user_id,
            transaction_type: TransactionType::Debit,
            kind: TransactionKind::Withdrawal,
            amount,
            points: 0,
            description: format!("Withdrawal of {}", amount),
            status: TransactionStatus::Pending,
            source_id: None,
            idempotency_key: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Filters for journal history queries
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub transaction_type: Option<TransactionType>,
    pub status: Option<TransactionStatus>,
    pub limit: u32,
    pub offset: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(TransactionStatus::Pending.can_transition_to(TransactionStatus::Completed));
        assert!(TransactionStatus::Pending.can_transition_to(TransactionStatus::Failed));
        assert!(!TransactionStatus::Completed.can_transition_to(TransactionStatus::Failed));
        assert!(!TransactionStatus::Failed.can_transition_to(TransactionStatus::Pending));
    }

    #[test]
    fn test_kind_parses_stored_text() {
        assert_eq!(
            "points_redemption".parse::<TransactionKind>().unwrap(),
            TransactionKind::PointsRedemption
        );
        assert!("refund".parse::<TransactionKind>().is_err());
    }
}
