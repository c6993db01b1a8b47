//! Eligibility checks for catalog sources

use chrono::{DateTime, Utc};
use rewards_core::{Error, Result, RewardSource, UserProfile};

/// Check whether `profile` may complete `source` at `now`.
///
/// Rules run in a fixed order and the first failure is reported.
pub fn check_eligibility(
    source: &RewardSource,
    profile: &UserProfile,
    vip_active: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    let Some(rules) = source.eligibility() else {
        return Ok(());
    };

    if let Some(window) = rules.date_window {
        if window.starts_at.is_some_and(|start| now < start) {
            return Err(Error::NotEligible("source not yet available".to_string()));
        }
        if window.ends_at.is_some_and(|end| now > end) {
            return Err(Error::NotEligible("source expired".to_string()));
        }
    }

    if rules.vip_only && !vip_active {
        return Err(Error::NotEligible("VIP members only".to_string()));
    }

    if let Some(range) = rules.age_range {
        match profile.age {
            Some(age) if range.contains(age) => {}
            Some(_) => return Err(Error::NotEligible("age outside allowed range".to_string())),
            None => return Err(Error::NotEligible("age unknown".to_string())),
        }
    }

    if let Some(gender) = rules.gender {
        if profile.gender != Some(gender) {
            return Err(Error::NotEligible("gender requirement not met".to_string()));
        }
    }

    if rules.location_required && !profile.has_location() {
        return Err(Error::NotEligible("location required".to_string()));
    }

    Ok(())
}
