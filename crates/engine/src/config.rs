//! Engine configuration, persisted in the settings table

use rewards_core::{to_cents, validate_amount, DayBoundary, Error, Result};
use rewards_persistence::sqlite::{load_setting, save_setting};
use rewards_persistence::Database;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const CONFIG_KEY: &str = "engine_config";

fn default_minimum_withdrawal() -> Decimal {
    Decimal::new(1000, 2)
}

fn default_receipt_cashback_rate() -> Decimal {
    Decimal::new(1, 2)
}

fn default_auto_approve_confidence() -> f64 {
    0.8
}

fn default_points_per_cashback_unit() -> i64 {
    100
}

fn default_max_reference_attempts() -> u32 {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Smallest withdrawal a newly opened wallet accepts
    #[serde(default = "default_minimum_withdrawal")]
    pub minimum_withdrawal: Decimal,
    /// Offset of the reference timezone used for calendar days
    #[serde(default)]
    pub day_offset_seconds: i32,
    /// Share of a receipt total paid back as cashback
    #[serde(default = "default_receipt_cashback_rate")]
    pub receipt_cashback_rate: Decimal,
    /// OCR confidence at or above which receipts skip manual review
    #[serde(default = "default_auto_approve_confidence")]
    pub auto_approve_confidence: f64,
    /// Points exchanged for 1.00 of cashback
    #[serde(default = "default_points_per_cashback_unit")]
    pub points_per_cashback_unit: i64,
    #[serde(default = "default_max_reference_attempts")]
    pub max_reference_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            minimum_withdrawal: default_minimum_withdrawal(),
            day_offset_seconds: 0,
            receipt_cashback_rate: default_receipt_cashback_rate(),
            auto_approve_confidence: default_auto_approve_confidence(),
            points_per_cashback_unit: default_points_per_cashback_unit(),
            max_reference_attempts: default_max_reference_attempts(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        validate_amount(self.minimum_withdrawal)?;
        DayBoundary::with_offset_secs(self.day_offset_seconds)?;

        if self.receipt_cashback_rate < Decimal::ZERO || self.receipt_cashback_rate > Decimal::ONE {
            return Err(Error::InvalidData(format!(
                "receipt cashback rate {} outside [0, 1]",
                self.receipt_cashback_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.auto_approve_confidence) {
            return Err(Error::InvalidData(format!(
                "auto-approve confidence {} outside [0, 1]",
                self.auto_approve_confidence
            )));
        }
        if self.points_per_cashback_unit <= 0 {
            return Err(Error::InvalidData(
                "points per cashback unit must be positive".to_string(),
            ));
        }
        if self.max_reference_attempts == 0 {
            return Err(Error::InvalidData(
                "max reference attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn day_boundary(&self) -> DayBoundary {
        DayBoundary::with_offset_secs(self.day_offset_seconds).unwrap_or_default()
    }

    pub fn minimum_withdrawal_cents(&self) -> Result<i64> {
        to_cents(self.minimum_withdrawal)
    }
}

/// Load the stored config, falling back to defaults when none is saved
pub async fn load_engine_config(db: &Database) -> Result<EngineConfig> {
    let config = load_setting::<EngineConfig>(db.pool(), CONFIG_KEY)
        .await?
        .unwrap_or_default();
    config.validate()?;
    Ok(config)
}

pub async fn save_engine_config(db: &Database, config: &EngineConfig) -> Result<()> {
    config.validate()?;
    save_setting(db.pool(), CONFIG_KEY, config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"minimumWithdrawal": "25.00", "dayOffsetSeconds": 3600}"#)
                .unwrap();
        assert_eq!(config.minimum_withdrawal, Decimal::new(2500, 2));
        assert_eq!(config.day_offset_seconds, 3600);
        assert_eq!(config.points_per_cashback_unit, 100);
        assert_eq!(config.max_reference_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = EngineConfig {
            receipt_cashback_rate: Decimal::new(15, 1),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidData(_))));

        let config = EngineConfig {
            minimum_withdrawal: Decimal::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidAmount(_))));
    }

    #[tokio::test]
    async fn test_load_and_save() {
        let db = Database::connect_in_memory().await.unwrap();
        assert_eq!(load_engine_config(&db).await.unwrap(), EngineConfig::default());

        let config = EngineConfig {
            points_per_cashback_unit: 250,
            ..Default::default()
        };
        save_engine_config(&db, &config).await.unwrap();
        assert_eq!(load_engine_config(&db).await.unwrap(), config);
    }
}
