//! Daily login reward records and streak state

use super::source::RewardQuote;
use super::transaction::Transaction;
use crate::types::round_cashback;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Points granted on every daily claim
pub const DAILY_BASE_POINTS: i64 = 10;
/// Extra points per completed 5-day block
pub const DAILY_POINTS_STEP: i64 = 5;
pub const DAILY_POINTS_STREAK_BLOCK: u32 = 5;
/// Extra cashback per completed 7-day block
pub const DAILY_CASHBACK_STREAK_BLOCK: u32 = 7;

/// Base cashback on every daily claim (0.10)
pub fn daily_base_cashback() -> Decimal {
    Decimal::new(10, 2)
}

/// Cashback step per completed week (0.05)
pub fn daily_cashback_step() -> Decimal {
    Decimal::new(5, 2)
}

/// Reward for the claim that brings the streak to `streak`
pub fn daily_reward_for_streak(streak: u32) -> RewardQuote {
    let points = DAILY_BASE_POINTS + i64::from(streak / DAILY_POINTS_STREAK_BLOCK) * DAILY_POINTS_STEP;
    let weeks = Decimal::from(streak / DAILY_CASHBACK_STREAK_BLOCK);
    let cashback = round_cashback(daily_base_cashback() + weeks * daily_cashback_step());
    RewardQuote::new(points, cashback)
}

/// One claimed day; unique per (user, date)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyRewardRecord {
    pub user_id: i64,
    pub reward_date: NaiveDate,
    pub points: i64,
    pub cashback: Decimal,
    /// Streak length reached by this claim
    pub streak: u32,
    pub claimed_at: DateTime<Utc>,
}

/// Persisted streak bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakState {
    pub user_id: i64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_claim_date: Option<NaiveDate>,
    pub total_claims: u32,
}

impl StreakState {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            current_streak: 0,
            longest_streak: 0,
            last_claim_date: None,
            total_claims: 0,
        }
    }
}

/// Result of a successful daily claim
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyClaim {
    pub record: DailyRewardRecord,
    pub streak: StreakState,
    pub transaction: Transaction,
}

/// Read-only view of where a user stands today
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakStatus {
    pub today: NaiveDate,
    /// Streak still alive (0 once a day has been missed)
    pub current_streak: u32,
    pub longest_streak: u32,
    pub claimed_today: bool,
    /// What the next claim would grant
    pub next_reward: RewardQuote,
}
