//! Receipt scan models

use crate::errors::Error;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Line item extracted by OCR
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptItem {
    pub name: String,
    #[serde(default)]
    pub price: Option<Decimal>,
}

/// What the OCR service returns for a scanned receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResult {
    pub store_name: String,
    pub amount: Decimal,
    #[serde(default)]
    pub items: Vec<ReceiptItem>,
    /// 0.0 - 1.0
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptStatus::Pending => "pending",
            ReceiptStatus::Approved => "approved",
            ReceiptStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for ReceiptStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReceiptStatus::Pending),
            "approved" => Ok(ReceiptStatus::Approved),
            "rejected" => Ok(ReceiptStatus::Rejected),
            other => Err(Error::InvalidData(format!("unknown receipt status '{}'", other))),
        }
    }
}

/// One processed receipt; unique per (user, receipt)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptClaim {
    pub user_id: i64,
    pub receipt_id: String,
    pub store_name: String,
    pub amount: Decimal,
    pub points: i64,
    pub cashback: Decimal,
    /// The quote carried a VIP boost
    pub vip_applied: bool,
    pub status: ReceiptStatus,
    /// Journal entry carrying the cashback
    pub reference_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}
