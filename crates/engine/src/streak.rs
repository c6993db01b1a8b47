//! Daily login streak transitions

use chrono::NaiveDate;
use rewards_core::{
    daily_reward_for_streak, previous_day, Error, Result, StreakState, StreakStatus,
};

/// State after claiming on `today`.
///
/// The chain continues only when the previous claim was yesterday. A day
/// before the last claim is refused so the chain never moves backwards.
pub fn advance(state: &StreakState, today: NaiveDate) -> Result<StreakState> {
    if let Some(last) = state.last_claim_date.filter(|last| today < *last) {
        return Err(Error::NotEligible(format!(
            "{} is before the last claim on {}",
            today, last
        )));
    }

    let current_streak = match state.last_claim_date {
        Some(last) if last == previous_day(today) => state.current_streak + 1,
        _ => 1,
    };

    Ok(StreakState {
        user_id: state.user_id,
        current_streak,
        longest_streak: state.longest_streak.max(current_streak),
        last_claim_date: Some(today),
        total_claims: state.total_claims + 1,
    })
}

/// Where the user stands on `today` without claiming
pub fn status(state: &StreakState, today: NaiveDate) -> StreakStatus {
    let claimed_today = state.last_claim_date == Some(today);
    let alive = claimed_today || state.last_claim_date == Some(previous_day(today));
    let current_streak = if alive { state.current_streak } else { 0 };

    // Already claimed: the next claim is tomorrow's, one link further
    let next_streak = if alive { state.current_streak + 1 } else { 1 };

    StreakStatus {
        today,
        current_streak,
        longest_streak: state.longest_streak,
        claimed_today,
        next_reward: daily_reward_for_streak(next_streak),
    }
}
