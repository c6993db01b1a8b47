//! Reward sources and quotes
//!
//! Every completable action is one `RewardSource` variant. The calculator,
//! eligibility rules and cap enforcement all read sources through the
//! accessors here instead of matching on the variant themselves.

use super::daily::daily_reward_for_streak;
use super::profile::Gender;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Source identifier used for the daily login reward
pub const DAILY_LOGIN_SOURCE_ID: &str = "daily_login";

/// Category of a reward source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Game,
    Challenge,
    Deal,
    Receipt,
    DailyLogin,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Game => "game",
            SourceKind::Challenge => "challenge",
            SourceKind::Deal => "deal",
            SourceKind::Receipt => "receipt",
            SourceKind::DailyLogin => "daily_login",
        }
    }
}

/// Difficulty tier and its reward multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Expert,
}

impl Difficulty {
    pub fn multiplier(&self) -> Decimal {
        match self {
            Difficulty::Easy => Decimal::ONE,
            Difficulty::Medium => Decimal::new(15, 1),
            Difficulty::Hard => Decimal::new(2, 0),
            Difficulty::Expert => Decimal::new(3, 0),
        }
    }
}

/// Inclusive age bounds; either side may be open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgeRange {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

impl AgeRange {
    pub fn contains(&self, age: u32) -> bool {
        self.min.map_or(true, |min| age >= min) && self.max.map_or(true, |max| age <= max)
    }
}

/// Availability window; either side may be open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateWindow {
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

/// Who may complete a source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eligibility {
    #[serde(default)]
    pub vip_only: bool,
    #[serde(default)]
    pub age_range: Option<AgeRange>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub location_required: bool,
    #[serde(default)]
    pub date_window: Option<DateWindow>,
}

/// Per-user, per-day ceiling for a repeatable source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCap {
    pub max_points: Option<i64>,
    pub max_cashback: Option<Decimal>,
}

/// Catalog definition shared by games, challenges and deals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogReward {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub base_points: i64,
    pub base_cashback: Decimal,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    #[serde(default)]
    pub eligibility: Eligibility,
    #[serde(default)]
    pub max_points_per_day: Option<i64>,
    #[serde(default)]
    pub max_cashback_per_day: Option<Decimal>,
}

impl CatalogReward {
    pub fn new(id: impl Into<String>, base_points: i64, base_cashback: Decimal) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            base_points,
            base_cashback,
            difficulty: None,
            eligibility: Eligibility::default(),
            max_points_per_day: None,
            max_cashback_per_day: None,
        }
    }

    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = Some(difficulty);
        self
    }

    pub fn with_eligibility(mut self, eligibility: Eligibility) -> Self {
        self.eligibility = eligibility;
        self
    }

    pub fn with_daily_cap(mut self, max_points: Option<i64>, max_cashback: Option<Decimal>) -> Self {
        self.max_points_per_day = max_points;
        self.max_cashback_per_day = max_cashback;
        self
    }
}

/// A scanned receipt; cashback is derived from its total
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptReward {
    pub receipt_id: String,
    pub store_name: String,
    pub amount: Decimal,
    pub cashback_rate: Decimal,
}

/// Something a user can complete for a reward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RewardSource {
    Game(CatalogReward),
    Challenge(CatalogReward),
    Deal(CatalogReward),
    Receipt(ReceiptReward),
    DailyLogin { streak: u32 },
}

/// How repeat claims of a source are limited
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UsagePolicy {
    /// Any number of completions, optionally capped per day
    Repeatable(Option<DailyCap>),
    /// Once per user, ever
    OneShot,
    /// Once per user per calendar day
    OncePerDay,
}

/// Reward before difficulty and VIP scaling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaseReward {
    pub points: Decimal,
    pub cashback: Decimal,
}

impl RewardSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            RewardSource::Game(_) => SourceKind::Game,
            RewardSource::Challenge(_) => SourceKind::Challenge,
            RewardSource::Deal(_) => SourceKind::Deal,
            RewardSource::Receipt(_) => SourceKind::Receipt,
            RewardSource::DailyLogin { .. } => SourceKind::DailyLogin,
        }
    }

    pub fn source_id(&self) -> &str {
        match self {
            RewardSource::Game(c) | RewardSource::Challenge(c) | RewardSource::Deal(c) => &c.id,
            RewardSource::Receipt(r) => &r.receipt_id,
            RewardSource::DailyLogin { .. } => DAILY_LOGIN_SOURCE_ID,
        }
    }

    pub fn base_reward(&self) -> BaseReward {
        match self {
            RewardSource::Game(c) | RewardSource::Challenge(c) | RewardSource::Deal(c) => {
                BaseReward {
                    points: Decimal::from(c.base_points),
                    cashback: c.base_cashback,
                }
            }
            RewardSource::Receipt(r) => BaseReward {
                points: r.amount.floor(),
                cashback: r.amount * r.cashback_rate,
            },
            RewardSource::DailyLogin { streak } => {
                let quote = daily_reward_for_streak(*streak);
                BaseReward {
                    points: Decimal::from(quote.points),
                    cashback: quote.cashback,
                }
            }
        }
    }

    /// Difficulty multiplier, 1 where difficulty does not apply
    pub fn difficulty_multiplier(&self) -> Decimal {
        match self {
            RewardSource::Game(c) | RewardSource::Challenge(c) | RewardSource::Deal(c) => c
                .difficulty
                .map(|d| d.multiplier())
                .unwrap_or(Decimal::ONE),
            _ => Decimal::ONE,
        }
    }

    /// Whether the VIP multiplier scales this source
    pub fn vip_boosted(&self) -> bool {
        !matches!(self, RewardSource::DailyLogin { .. })
    }

    pub fn eligibility(&self) -> Option<&Eligibility> {
        match self {
            RewardSource::Game(c) | RewardSource::Challenge(c) | RewardSource::Deal(c) => {
                Some(&c.eligibility)
            }
            _ => None,
        }
    }

    pub fn daily_cap(&self) -> Option<DailyCap> {
        match self {
            RewardSource::Game(c) | RewardSource::Challenge(c) => {
                if c.max_points_per_day.is_none() && c.max_cashback_per_day.is_none() {
                    None
                } else {
                    Some(DailyCap {
                        max_points: c.max_points_per_day,
                        max_cashback: c.max_cashback_per_day,
                    })
                }
            }
            _ => None,
        }
    }

    pub fn usage_policy(&self) -> UsagePolicy {
        match self {
            RewardSource::Game(_) | RewardSource::Challenge(_) => {
                UsagePolicy::Repeatable(self.daily_cap())
            }
            RewardSource::Deal(_) | RewardSource::Receipt(_) => UsagePolicy::OneShot,
            RewardSource::DailyLogin { .. } => UsagePolicy::OncePerDay,
        }
    }

    /// Human-readable label for journal descriptions
    pub fn label(&self) -> String {
        match self {
            RewardSource::Game(c) | RewardSource::Challenge(c) | RewardSource::Deal(c)
                if !c.title.is_empty() =>
            {
                format!("{} reward: {}", self.kind().as_str(), c.title)
            }
            RewardSource::Receipt(r) => format!("Receipt cashback: {}", r.store_name),
            RewardSource::DailyLogin { streak } => format!("Daily reward (day {})", streak),
            _ => format!("{} reward: {}", self.kind().as_str(), self.source_id()),
        }
    }
}

/// Computed reward prior to application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardQuote {
    pub points: i64,
    pub cashback: Decimal,
}

impl RewardQuote {
    pub fn new(points: i64, cashback: Decimal) -> Self {
        Self { points, cashback }
    }

    pub fn is_empty(&self) -> bool {
        self.points == 0 && self.cashback.is_zero()
    }
}
