//! VIP membership models

use crate::errors::Error;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Standard VIP reward multiplier (1.5x)
pub fn default_vip_multiplier() -> Decimal {
    Decimal::new(15, 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VipStatus {
    Active,
    Expired,
    Cancelled,
    Pending,
    Suspended,
}

impl VipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VipStatus::Active => "active",
            VipStatus::Expired => "expired",
            VipStatus::Cancelled => "cancelled",
            VipStatus::Pending => "pending",
            VipStatus::Suspended => "suspended",
        }
    }
}

impl FromStr for VipStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(VipStatus::Active),
            "expired" => Ok(VipStatus::Expired),
            "cancelled" => Ok(VipStatus::Cancelled),
            "pending" => Ok(VipStatus::Pending),
            "suspended" => Ok(VipStatus::Suspended),
            other => Err(Error::InvalidData(format!("unknown VIP status '{}'", other))),
        }
    }
}

/// Audit mirror of rewards earned while VIP; never a source of truth
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VipUsage {
    pub total_points_earned: i64,
    pub total_cashback_earned: Decimal,
    pub rewards_count: i64,
    pub last_reward_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VipMembership {
    pub user_id: i64,
    pub status: VipStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub multiplier: Decimal,
    pub usage: VipUsage,
}

impl VipMembership {
    /// Active status and `now` inside the paid window
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == VipStatus::Active && self.start_date <= now && now <= self.end_date
    }

    /// Multiplier to quote with, if the membership is live
    pub fn active_multiplier(&self, now: DateTime<Utc>) -> Option<Decimal> {
        self.is_active(now).then_some(self.multiplier)
    }
}
