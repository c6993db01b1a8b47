//! Error types and Result alias for the rewards engine

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for the rewards engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid source config: {0}")]
    InvalidSourceConfig(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("Insufficient pending funds: required {required}, pending {pending}")]
    InsufficientPendingFunds { required: Decimal, pending: Decimal },

    #[error("Insufficient points: required {required}, available {available}")]
    InsufficientPoints { required: i64, available: i64 },

    #[error("Withdrawal of {amount} is below the minimum of {minimum}")]
    BelowMinimumWithdrawal { amount: Decimal, minimum: Decimal },

    #[error("Daily reward already claimed for {0}")]
    AlreadyClaimed(NaiveDate),

    #[error("Source already used: {0}")]
    AlreadyUsed(String),

    #[error("Already processed: {0}")]
    AlreadyProcessed(String),

    #[error("Reward already applied for key {0}")]
    AlreadyApplied(String),

    #[error("Daily cap reached for source {source_id}")]
    DailyCapReached { source_id: String },

    #[error("Not eligible: {0}")]
    NotEligible(String),

    #[error("Invalid status transition for {reference_id}: {from} -> {to}")]
    InvalidStatusTransition {
        reference_id: String,
        from: String,
        to: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Ledger consistency failure: {0}")]
    ConsistencyFailure(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// Coarse classification used at the transport boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any mutation (bad input)
    Validation,
    /// A business rule refused the operation; nothing was written
    BusinessRule,
    /// Ledger and journal could not be kept in step
    Consistency,
    /// Unexpected storage failure outside a ledger write
    Storage,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidAmount(_) | Error::InvalidSourceConfig(_) | Error::InvalidData(_) => {
                ErrorKind::Validation
            }
            Error::InsufficientFunds { .. }
            | Error::InsufficientPendingFunds { .. }
            | Error::InsufficientPoints { .. }
            | Error::BelowMinimumWithdrawal { .. }
            | Error::AlreadyClaimed(_)
            | Error::AlreadyUsed(_)
            | Error::AlreadyProcessed(_)
            | Error::AlreadyApplied(_)
            | Error::DailyCapReached { .. }
            | Error::NotEligible(_)
            | Error::InvalidStatusTransition { .. }
            | Error::NotFound(_) => ErrorKind::BusinessRule,
            Error::ConsistencyFailure(_) => ErrorKind::Consistency,
            Error::DatabaseError(_) => ErrorKind::Storage,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidAmount(_) => "invalid_amount",
            Error::InvalidSourceConfig(_) => "invalid_source_config",
            Error::InsufficientFunds { .. } => "insufficient_funds",
            Error::InsufficientPendingFunds { .. } => "insufficient_pending_funds",
            Error::InsufficientPoints { .. } => "insufficient_points",
            Error::BelowMinimumWithdrawal { .. } => "below_minimum_withdrawal",
            Error::AlreadyClaimed(_) => "already_claimed",
            Error::AlreadyUsed(_) => "already_used",
            Error::AlreadyProcessed(_) => "already_processed",
            Error::AlreadyApplied(_) => "already_applied",
            Error::DailyCapReached { .. } => "daily_cap_reached",
            Error::NotEligible(_) => "not_eligible",
            Error::InvalidStatusTransition { .. } => "invalid_status_transition",
            Error::NotFound(_) => "not_found",
            Error::ConsistencyFailure(_) => "consistency_failure",
            Error::InvalidData(_) => "invalid_data",
            Error::DatabaseError(_) => "database_error",
        }
    }

    /// Idempotency guards that fired: the request was a duplicate
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            Error::AlreadyClaimed(_)
                | Error::AlreadyUsed(_)
                | Error::AlreadyProcessed(_)
                | Error::AlreadyApplied(_)
        )
    }
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidData(err.to_string())
    }
}
