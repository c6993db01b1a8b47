//! Rewards Engine - Reward calculation, caps, streaks, and the wallet ledger

pub mod calculator;
pub mod caps;
pub mod config;
pub mod eligibility;
mod engine;
pub mod journal;
pub mod ledger;
pub mod notify;
mod receipts;
pub mod streak;
mod vip;

pub use caps::DailyHeadroom;
pub use config::{load_engine_config, save_engine_config, EngineConfig};
pub use engine::{AppliedReward, RewardsEngine, SourceRewardClaim};
pub use ledger::{LedgerMismatch, ReconcileReport};
pub use notify::{Notifier, TracingNotifier};
pub use vip::effective_membership;
