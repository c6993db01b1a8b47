//! Shared type definitions: money conversions and calendar-day keys

use crate::errors::{Error, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Cashback precision (decimal places)
pub const CASHBACK_SCALE: u32 = 2;

/// Round a cashback value to 2 places, half away from zero
pub fn round_cashback(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(CASHBACK_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Validate a money amount for a ledger operation: strictly positive, at most 2 places
pub fn validate_amount(amount: Decimal) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(Error::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    if amount.normalize().scale() > CASHBACK_SCALE {
        return Err(Error::InvalidAmount(format!(
            "amount {} has more than {} decimal places",
            amount, CASHBACK_SCALE
        )));
    }
    Ok(amount)
}

/// Convert a cashback amount into integer cents for storage
pub fn to_cents(amount: Decimal) -> Result<i64> {
    let scaled = amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .ok_or_else(|| Error::InvalidAmount(format!("amount {} out of range", amount)))?;
    if !scaled.fract().is_zero() {
        return Err(Error::InvalidAmount(format!(
            "amount {} is not a whole number of cents",
            amount
        )));
    }
    scaled
        .to_i64()
        .ok_or_else(|| Error::InvalidAmount(format!("amount {} out of range", amount)))
}

/// Convert stored cents back into a 2-place decimal
pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, CASHBACK_SCALE)
}

/// Maps instants to calendar days in one fixed reference timezone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayBoundary {
    offset_secs: i32,
}

impl DayBoundary {
    /// Day boundaries at UTC midnight
    pub fn utc() -> Self {
        Self { offset_secs: 0 }
    }

    /// Day boundaries at midnight of a fixed UTC offset (east positive)
    pub fn with_offset_secs(offset_secs: i32) -> Result<Self> {
        FixedOffset::east_opt(offset_secs).ok_or_else(|| {
            Error::InvalidData(format!("day offset {}s is out of range", offset_secs))
        })?;
        Ok(Self { offset_secs })
    }

    pub fn offset_secs(&self) -> i32 {
        self.offset_secs
    }

    /// Calendar day that `instant` falls on in the reference timezone
    pub fn day_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        // offset validated in the constructor
        FixedOffset::east_opt(self.offset_secs)
            .map(|offset| instant.with_timezone(&offset).date_naive())
            .unwrap_or_else(|| instant.date_naive())
    }
}

impl Default for DayBoundary {
    fn default() -> Self {
        Self::utc()
    }
}

/// Day immediately before `day`
pub fn previous_day(day: NaiveDate) -> NaiveDate {
    day - Duration::days(1)
}
