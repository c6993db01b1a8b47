//! Receipt claim persistence

use crate::sqlite::connection::is_unique_violation;
use chrono::{DateTime, Utc};
use rewards_core::{from_cents, to_cents, Error, ReceiptClaim, ReceiptStatus, Result};
use sqlx::{SqliteConnection, SqliteExecutor};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReceiptRow {
    pub user_id: i64,
    pub receipt_id: String,
    pub store_name: String,
    pub amount_cents: i64,
    pub points: i64,
    pub cashback_cents: i64,
    pub vip_applied: bool,
    pub status: String,
    pub reference_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl ReceiptRow {
    pub fn into_claim(self) -> Result<ReceiptClaim> {
        Ok(ReceiptClaim {
            user_id: self.user_id,
            receipt_id: self.receipt_id,
            store_name: self.store_name,
            amount: from_cents(self.amount_cents),
            points: self.points,
            cashback: from_cents(self.cashback_cents),
            vip_applied: self.vip_applied,
            status: self.status.parse()?,
            reference_id: self.reference_id,
            created_at: self.created_at,
            reviewed_at: self.reviewed_at,
        })
    }
}

/// Record a receipt. Fails with `AlreadyProcessed` if the user submitted it before.
pub async fn insert_receipt(conn: &mut SqliteConnection, claim: &ReceiptClaim) -> Result<()> {
    let result = sqlx::query(
        r#"
        INSERT INTO receipt_claims (user_id, receipt_id, store_name, amount_cents, points,
                                    cashback_cents, vip_applied, status, reference_id,
                                    created_at, reviewed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(claim.user_id)
    .bind(&claim.receipt_id)
    .bind(&claim.store_name)
    .bind(to_cents(claim.amount)?)
    .bind(claim.points)
    .bind(to_cents(claim.cashback)?)
    .bind(claim.vip_applied)
    .bind(claim.status.as_str())
    .bind(&claim.reference_id)
    .bind(claim.created_at)
    .bind(claim.reviewed_at)
    .execute(conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => {
            Err(Error::AlreadyProcessed(claim.receipt_id.clone()))
        }
        Err(e) => Err(Error::DatabaseError(e.to_string())),
    }
}

pub async fn get_receipt<'e>(
    executor: impl SqliteExecutor<'e>,
    user_id: i64,
    receipt_id: &str,
) -> Result<Option<ReceiptClaim>> {
    let row = sqlx::query_as::<_, ReceiptRow>(
        r#"
        SELECT user_id, receipt_id, store_name, amount_cents, points, cashback_cents,
               vip_applied, status, reference_id, created_at, reviewed_at
        FROM receipt_claims
        WHERE user_id = ? AND receipt_id = ?
        "#,
    )
    .bind(user_id)
    .bind(receipt_id)
    .fetch_optional(executor)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    row.map(ReceiptRow::into_claim).transpose()
}

/// Close out a pending receipt. Returns false if it was not pending.
pub async fn review_receipt(
    conn: &mut SqliteConnection,
    user_id: i64,
    receipt_id: &str,
    status: ReceiptStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE receipt_claims
        SET status = ?, reviewed_at = ?
        WHERE user_id = ? AND receipt_id = ? AND status = 'pending'
        "#,
    )
    .bind(status.as_str())
    .bind(now)
    .bind(user_id)
    .bind(receipt_id)
    .execute(conn)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(result.rows_affected() == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use rust_decimal::Decimal;

    fn claim() -> ReceiptClaim {
        ReceiptClaim {
            user_id: 1,
            receipt_id: "r-1".to_string(),
            store_name: "Corner Shop".to_string(),
            amount: Decimal::new(4250, 2),
            points: 42,
            cashback: Decimal::new(43, 2),
            vip_applied: false,
            status: ReceiptStatus::Pending,
            reference_id: Some("TXN1".to_string()),
            created_at: Utc::now(),
            reviewed_at: None,
        }
    }

    #[tokio::test]
    async fn test_receipt_processed_once() {
        let db = Database::connect_in_memory().await.unwrap();
        let mut tx = db.begin_write().await.unwrap();
        insert_receipt(tx.conn(), &claim()).await.unwrap();
        let err = insert_receipt(tx.conn(), &claim()).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyProcessed(_)));
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_review_only_pending() {
        let db = Database::connect_in_memory().await.unwrap();
        let now = Utc::now();
        let mut tx = db.begin_write().await.unwrap();
        insert_receipt(tx.conn(), &claim()).await.unwrap();
        assert!(review_receipt(tx.conn(), 1, "r-1", ReceiptStatus::Approved, now).await.unwrap());
        assert!(!review_receipt(tx.conn(), 1, "r-1", ReceiptStatus::Rejected, now).await.unwrap());
        tx.commit().await.unwrap();

        let stored = get_receipt(db.pool(), 1, "r-1").await.unwrap().unwrap();
        assert_eq!(stored.status, ReceiptStatus::Approved);
        assert_eq!(stored.amount, Decimal::new(4250, 2));
        assert!(stored.reviewed_at.is_some());
    }
}
