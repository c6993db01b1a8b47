//! Receipt cashback: OCR results in, auto-approved or held for review

use crate::calculator::quote_reward;
use crate::engine::RewardsEngine;
use crate::journal;
use crate::ledger;
use chrono::{DateTime, Utc};
use rewards_core::{
    to_cents, Error, NewTransaction, Notification, NotificationKind, OcrResult, ReceiptClaim,
    ReceiptReward, ReceiptStatus, Result, RewardSource, TransactionKind, TransactionStatus,
};
use rewards_persistence::sqlite as store;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, info};

fn validate_ocr(receipt_id: &str, ocr: &OcrResult) -> Result<()> {
    if receipt_id.trim().is_empty() {
        return Err(Error::InvalidData("receipt id is empty".to_string()));
    }
    if !(0.0..=1.0).contains(&ocr.confidence) {
        return Err(Error::InvalidData(format!(
            "OCR confidence {} outside [0, 1]",
            ocr.confidence
        )));
    }
    if ocr.amount <= Decimal::ZERO {
        return Err(Error::InvalidSourceConfig(format!(
            "receipt {}: amount {} is not positive",
            receipt_id, ocr.amount
        )));
    }
    Ok(())
}

impl RewardsEngine {
    /// Process a scanned receipt once per user.
    ///
    /// Confident scans are credited straight away. The rest hold their
    /// cashback as pending funds until `review_receipt`; points wait too.
    pub async fn submit_receipt(
        &self,
        user_id: i64,
        receipt_id: &str,
        ocr: &OcrResult,
        now: DateTime<Utc>,
    ) -> Result<ReceiptClaim> {
        validate_ocr(receipt_id, ocr)?;

        let multiplier = self.vip_multiplier(user_id, now).await?;
        let source = RewardSource::Receipt(ReceiptReward {
            receipt_id: receipt_id.to_string(),
            store_name: ocr.store_name.clone(),
            amount: ocr.amount,
            cashback_rate: self.config().receipt_cashback_rate,
        });
        let quote = quote_reward(&source, multiplier)?;
        if quote.is_empty() {
            return Err(Error::InvalidSourceConfig(format!(
                "receipt {} is too small to earn a reward",
                receipt_id
            )));
        }

        let auto_approve = ocr.confidence >= self.config().auto_approve_confidence;
        let new = NewTransaction::credit(user_id, TransactionKind::Receipt, quote.cashback, quote.points)
            .with_description(source.label())
            .with_source(receipt_id)
            .with_idempotency_key(format!("receipt:{}", receipt_id));
        let max_attempts = self.config().max_reference_attempts;

        let result: Result<ReceiptClaim> = async {
            let mut tx = self.db().begin_write().await?;
            if store::get_receipt(tx.conn(), user_id, receipt_id).await?.is_some() {
                return Err(Error::AlreadyProcessed(receipt_id.to_string()));
            }

            let transaction = if auto_approve {
                self.credit_reward(tx.conn(), new, multiplier.is_some(), now).await?
            } else {
                ledger::open(tx.conn(), user_id, self.config().minimum_withdrawal_cents()?, now)
                    .await?;
                let pending = new.with_status(TransactionStatus::Pending);
                let transaction = journal::record(tx.conn(), &pending, now, max_attempts).await?;
                if quote.cashback > Decimal::ZERO {
                    ledger::add_pending_funds(tx.conn(), user_id, quote.cashback, now).await?;
                }
                transaction
            };

            let claim = ReceiptClaim {
                user_id,
                receipt_id: receipt_id.to_string(),
                store_name: ocr.store_name.clone(),
                amount: ocr.amount,
                points: quote.points,
                cashback: quote.cashback,
                vip_applied: multiplier.is_some(),
                status: if auto_approve {
                    ReceiptStatus::Approved
                } else {
                    ReceiptStatus::Pending
                },
                reference_id: Some(transaction.reference_id),
                created_at: now,
                reviewed_at: auto_approve.then_some(now),
            };
            store::insert_receipt(tx.conn(), &claim).await?;
            tx.commit().await?;
            Ok(claim)
        }
        .await;

        let claim = match result {
            Ok(claim) => claim,
            Err(e) if e.is_duplicate() => {
                debug!("Receipt {} from user {} already processed", receipt_id, user_id);
                return Err(Error::AlreadyProcessed(receipt_id.to_string()));
            }
            Err(e) => return Err(ledger::escalate(e, "submit receipt")),
        };

        info!(
            "Receipt {} from user {} {} ({} points, {} cashback, confidence {:.2})",
            receipt_id,
            user_id,
            claim.status.as_str(),
            claim.points,
            claim.cashback,
            ocr.confidence
        );
        let notification = if auto_approve {
            Notification::new(
                NotificationKind::ReceiptApproved,
                "Receipt approved",
                format!(
                    "You earned {} points and {} cashback at {}",
                    claim.points, claim.cashback, claim.store_name
                ),
            )
        } else {
            Notification::new(
                NotificationKind::ReceiptPending,
                "Receipt under review",
                format!("{} cashback is pending review", claim.cashback),
            )
        };
        self.dispatch(
            user_id,
            notification.with_data(json!({
                "receiptId": claim.receipt_id,
                "referenceId": claim.reference_id,
            })),
        );
        Ok(claim)
    }

    /// Settle a receipt held for manual review
    pub async fn review_receipt(
        &self,
        user_id: i64,
        receipt_id: &str,
        approve: bool,
        now: DateTime<Utc>,
    ) -> Result<ReceiptClaim> {
        let (receipt_status, tx_status) = if approve {
            (ReceiptStatus::Approved, TransactionStatus::Completed)
        } else {
            (ReceiptStatus::Rejected, TransactionStatus::Failed)
        };

        let result: Result<ReceiptClaim> = async {
            let mut tx = self.db().begin_write().await?;
            let Some(mut claim) = store::get_receipt(tx.conn(), user_id, receipt_id).await? else {
                return Err(Error::NotFound(format!("receipt {}", receipt_id)));
            };
            if claim.status != ReceiptStatus::Pending
                || !store::review_receipt(tx.conn(), user_id, receipt_id, receipt_status, now).await?
            {
                return Err(Error::AlreadyProcessed(receipt_id.to_string()));
            }

            let reference_id = claim.reference_id.clone().ok_or_else(|| {
                Error::ConsistencyFailure(format!("receipt {} has no journal entry", receipt_id))
            })?;
            if !store::settle_transaction(tx.conn(), &reference_id, tx_status, now).await? {
                return Err(Error::ConsistencyFailure(format!(
                    "journal entry {} for receipt {} is not pending",
                    reference_id, receipt_id
                )));
            }

            let cents = to_cents(claim.cashback)?;
            if approve {
                if cents > 0 {
                    ledger::approve_pending_funds(tx.conn(), user_id, claim.cashback, now).await?;
                }
                store::adjust_account(tx.conn(), user_id, claim.points, cents, cents).await?;
                if claim.vip_applied {
                    store::record_vip_usage(tx.conn(), user_id, claim.points, cents, now).await?;
                }
            } else if cents > 0 {
                ledger::reject_pending_funds(tx.conn(), user_id, claim.cashback, now).await?;
            }
            tx.commit().await?;

            claim.status = receipt_status;
            claim.reviewed_at = Some(now);
            Ok(claim)
        }
        .await;

        let claim = match result {
            Ok(claim) => claim,
            Err(e @ (Error::NotFound(_) | Error::AlreadyProcessed(_))) => {
                debug!("Cannot review receipt {} of user {}: {}", receipt_id, user_id, e);
                return Err(e);
            }
            // pending funds missing means the wallet drifted from the journal
            Err(Error::InsufficientPendingFunds { required, pending }) => {
                return Err(ledger::escalate(
                    Error::ConsistencyFailure(format!(
                        "receipt {} needs {} pending, wallet holds {}",
                        receipt_id, required, pending
                    )),
                    "review receipt",
                ));
            }
            Err(e) => return Err(ledger::escalate(e, "review receipt")),
        };

        info!(
            "Receipt {} of user {} {} on review",
            receipt_id,
            user_id,
            claim.status.as_str()
        );
        let notification = if approve {
            Notification::new(
                NotificationKind::ReceiptApproved,
                "Receipt approved",
                format!(
                    "You earned {} points and {} cashback at {}",
                    claim.points, claim.cashback, claim.store_name
                ),
            )
        } else {
            Notification::new(
                NotificationKind::ReceiptRejected,
                "Receipt rejected",
                format!("Your receipt from {} could not be verified", claim.store_name),
            )
        };
        self.dispatch(
            user_id,
            notification.with_data(json!({
                "receiptId": claim.receipt_id,
                "referenceId": claim.reference_id,
            })),
        );
        Ok(claim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineConfig;
    use rewards_core::ReceiptItem;
    use rewards_persistence::Database;
    use std::sync::Arc;

    async fn engine() -> RewardsEngine {
        let db = Database::connect_in_memory().await.unwrap();
        RewardsEngine::new(Arc::new(db), EngineConfig::default()).unwrap()
    }

    fn ocr(cents: i64, confidence: f64) -> OcrResult {
        OcrResult {
            store_name: "Green Grocer".to_string(),
            amount: Decimal::new(cents, 2),
            items: vec![ReceiptItem {
                name: "Apples".to_string(),
                price: Some(Decimal::new(cents, 2)),
            }],
            confidence,
        }
    }

    #[tokio::test]
    async fn test_confident_receipt_credits_immediately() {
        let engine = engine().await;
        let now = Utc::now();
        let claim = engine.submit_receipt(1, "r-1", &ocr(4250, 0.95), now).await.unwrap();
        assert_eq!(claim.status, ReceiptStatus::Approved);
        assert_eq!(claim.points, 42);
        assert_eq!(claim.cashback, Decimal::new(43, 2));

        let wallet = engine.wallet(1).await.unwrap();
        assert_eq!(wallet.available(), Decimal::new(43, 2));
        assert_eq!(engine.account(1, now).await.unwrap().total_points, 42);

        let err = engine
            .submit_receipt(1, "r-1", &ocr(4250, 0.95), now)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyProcessed(_)));
    }

    #[tokio::test]
    async fn test_vip_mirror_counts_both_review_paths() {
        let engine = engine().await;
        let now = Utc::now();
        engine
            .activate_vip(1, now - chrono::Duration::hours(1), now + chrono::Duration::days(30), None)
            .await
            .unwrap();

        let auto = engine.submit_receipt(1, "r-a", &ocr(4250, 0.95), now).await.unwrap();
        assert_eq!((auto.points, auto.cashback), (63, Decimal::new(64, 2)));
        let held = engine.submit_receipt(1, "r-b", &ocr(10000, 0.5), now).await.unwrap();
        assert!(held.vip_applied);

        let usage = engine.vip_membership(1, now).await.unwrap().unwrap().usage;
        assert_eq!(usage.rewards_count, 1);

        engine.review_receipt(1, "r-b", true, now).await.unwrap();
        let usage = engine.vip_membership(1, now).await.unwrap().unwrap().usage;
        assert_eq!(usage.rewards_count, 2);
        assert_eq!(usage.total_points_earned, 63 + 150);
        assert_eq!(usage.total_cashback_earned, Decimal::new(64 + 150, 2));
    }

    #[tokio::test]
    async fn test_low_confidence_receipt_waits_for_review() {
        let engine = engine().await;
        let now = Utc::now();
        let claim = engine.submit_receipt(1, "r-2", &ocr(10000, 0.5), now).await.unwrap();
        assert_eq!(claim.status, ReceiptStatus::Pending);

        let wallet = engine.wallet(1).await.unwrap();
        assert_eq!(wallet.balance, Decimal::new(100, 2));
        assert_eq!(wallet.pending_balance, Decimal::new(100, 2));
        assert_eq!(wallet.available(), Decimal::ZERO);
        assert_eq!(engine.account(1, now).await.unwrap().total_points, 0);
        let report = engine.reconcile(1).await.unwrap();
        assert!(report.is_consistent(), "{:?}", report.mismatches);

        let reviewed = engine.review_receipt(1, "r-2", true, now).await.unwrap();
        assert_eq!(reviewed.status, ReceiptStatus::Approved);

        let wallet = engine.wallet(1).await.unwrap();
        assert_eq!(wallet.available(), Decimal::new(100, 2));
        assert_eq!(engine.account(1, now).await.unwrap().total_points, 100);
        let entry = engine
            .transaction(reviewed.reference_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.status, TransactionStatus::Completed);

        let err = engine.review_receipt(1, "r-2", false, now).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyProcessed(_)));
        let report = engine.reconcile(1).await.unwrap();
        assert!(report.is_consistent(), "{:?}", report.mismatches);
    }

    #[tokio::test]
    async fn test_rejected_receipt_removes_pending_funds() {
        let engine = engine().await;
        let now = Utc::now();
        engine.submit_receipt(1, "r-3", &ocr(2000, 0.3), now).await.unwrap();
        let reviewed = engine.review_receipt(1, "r-3", false, now).await.unwrap();
        assert_eq!(reviewed.status, ReceiptStatus::Rejected);

        let wallet = engine.wallet(1).await.unwrap();
        assert_eq!(wallet.balance, Decimal::ZERO);
        assert_eq!(wallet.pending_balance, Decimal::ZERO);
        assert_eq!(engine.account(1, now).await.unwrap().total_points, 0);
        let report = engine.reconcile(1).await.unwrap();
        assert!(report.is_consistent(), "{:?}", report.mismatches);
    }

    #[tokio::test]
    async fn test_invalid_scans() {
        let engine = engine().await;
        let now = Utc::now();
        assert!(matches!(
            engine.submit_receipt(1, "r-4", &ocr(0, 0.9), now).await,
            Err(Error::InvalidSourceConfig(_))
        ));
        assert!(matches!(
            engine.submit_receipt(1, "r-4", &ocr(500, 1.5), now).await,
            Err(Error::InvalidData(_))
        ));
        assert!(matches!(
            engine.review_receipt(1, "missing", true, now).await,
            Err(Error::NotFound(_))
        ));
    }
}
