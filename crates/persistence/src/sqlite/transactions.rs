//! Transaction journal persistence operations

use crate::sqlite::connection::is_unique_violation_on;
use chrono::{DateTime, Utc};
use rewards_core::{
    from_cents, to_cents, Error, NewTransaction, Result, Transaction, TransactionFilter,
    TransactionStatus,
};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqliteExecutor};

/// Maximum rows returned by one history query
pub const MAX_PAGE_SIZE: u32 = 200;

const SELECT_COLUMNS: &str = r#"
    SELECT id, user_id, reference_id, tx_type, kind, amount_cents, points,
           description, status, source_id, idempotency_key, created_at, settled_at
    FROM transactions
"#;

/// Transaction record stored in database
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TransactionRow {
    pub id: i64,
    pub user_id: i64,
    pub reference_id: String,
    pub tx_type: String,
    pub kind: String,
    pub amount_cents: i64,
    pub points: i64,
    pub description: String,
    pub status: String,
    pub source_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl TransactionRow {
    pub fn into_transaction(self) -> Result<Transaction> {
        Ok(Transaction {
            id: self.id,
            user_id: self.user_id,
            reference_id: self.reference_id,
            transaction_type: self.tx_type.parse()?,
            kind: self.kind.parse()?,
            amount: from_cents(self.amount_cents),
            points: self.points,
            description: self.description,
            status: self.status.parse()?,
            source_id: self.source_id,
            idempotency_key: self.idempotency_key,
            created_at: self.created_at,
            settled_at: self.settled_at,
        })
    }
}

/// Outcome of a journal insert
#[derive(Debug)]
pub enum TransactionInsert {
    Inserted(Transaction),
    /// Another entry already owns this reference id
    ReferenceTaken,
    /// The user already has an entry with this idempotency key
    DuplicateKey,
}

/// Append an entry under the given reference id
pub async fn insert_transaction(
    conn: &mut SqliteConnection,
    reference_id: &str,
    new: &NewTransaction,
    now: DateTime<Utc>,
) -> Result<TransactionInsert> {
    let amount_cents = to_cents(new.amount)?;
    let settled_at = (new.status != TransactionStatus::Pending).then_some(now);

    let result = sqlx::query(
        r#"
        INSERT INTO transactions (user_id, reference_id, tx_type, kind, amount_cents, points,
                                  description, status, source_id, idempotency_key,
                                  created_at, settled_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(new.user_id)
    .bind(reference_id)
    .bind(new.transaction_type.as_str())
    .bind(new.kind.as_str())
    .bind(amount_cents)
    .bind(new.points)
    .bind(&new.description)
    .bind(new.status.as_str())
    .bind(&new.source_id)
    .bind(&new.idempotency_key)
    .bind(now)
    .bind(settled_at)
    .execute(conn)
    .await;

    match result {
        Ok(done) => Ok(TransactionInsert::Inserted(Transaction {
            id: done.last_insert_rowid(),
            user_id: new.user_id,
            reference_id: reference_id.to_string(),
            transaction_type: new.transaction_type,
            kind: new.kind,
            amount: from_cents(amount_cents),
            points: new.points,
            description: new.description.clone(),
            status: new.status,
            source_id: new.source_id.clone(),
            idempotency_key: new.idempotency_key.clone(),
            created_at: now,
            settled_at,
        })),
        Err(e) if is_unique_violation_on(&e, "transactions.reference_id") => {
            Ok(TransactionInsert::ReferenceTaken)
        }
        Err(e) if is_unique_violation_on(&e, "transactions.idempotency_key") => {
            Ok(TransactionInsert::DuplicateKey)
        }
        Err(e) => Err(Error::DatabaseError(e.to_string())),
    }
}

pub async fn get_transaction_by_reference<'e>(
    executor: impl SqliteExecutor<'e>,
    reference_id: &str,
) -> Result<Option<Transaction>> {
    let query = format!("{} WHERE reference_id = ?", SELECT_COLUMNS);
    let row = sqlx::query_as::<_, TransactionRow>(&query)
        .bind(reference_id)
        .fetch_optional(executor)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

    row.map(TransactionRow::into_transaction).transpose()
}

pub async fn get_transaction_by_key<'e>(
    executor: impl SqliteExecutor<'e>,
    user_id: i64,
    idempotency_key: &str,
) -> Result<Option<Transaction>> {
    let query = format!("{} WHERE user_id = ? AND idempotency_key = ?", SELECT_COLUMNS);
    let row = sqlx::query_as::<_, TransactionRow>(&query)
        .bind(user_id)
        .bind(idempotency_key)
        .fetch_optional(executor)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

    row.map(TransactionRow::into_transaction).transpose()
}

/// Get transactions for a user with optional filters, newest first
pub async fn get_transactions<'e>(
    executor: impl SqliteExecutor<'e>,
    user_id: i64,
    filter: &TransactionFilter,
) -> Result<Vec<Transaction>> {
    let mut query = format!("{} WHERE user_id = ?", SELECT_COLUMNS);

    if filter.transaction_type.is_some() {
        query.push_str(" AND tx_type = ?");
    }
    if filter.status.is_some() {
        query.push_str(" AND status = ?");
    }

    query.push_str(" ORDER BY id DESC LIMIT ? OFFSET ?");

    let mut builder = sqlx::query_as::<_, TransactionRow>(&query).bind(user_id);

    if let Some(tt) = filter.transaction_type {
        builder = builder.bind(tt.as_str());
    }
    if let Some(status) = filter.status {
        builder = builder.bind(status.as_str());
    }

    let rows = builder
        .bind(filter.limit.clamp(1, MAX_PAGE_SIZE))
        .bind(filter.offset)
        .fetch_all(executor)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

    rows.into_iter().map(TransactionRow::into_transaction).collect()
}

/// Get transaction count for a user
pub async fn count_transactions<'e>(executor: impl SqliteExecutor<'e>, user_id: i64) -> Result<u32> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(executor)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(row.0 as u32)
}

/// Move a pending entry to `status`. Returns false if it was not pending.
pub async fn settle_transaction(
    conn: &mut SqliteConnection,
    reference_id: &str,
    status: TransactionStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE transactions
        SET status = ?, settled_at = ?
        WHERE reference_id = ? AND status = 'pending'
        "#,
    )
    .bind(status.as_str())
    .bind(now)
    .bind(reference_id)
    .execute(conn)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(result.rows_affected() == 1)
}

/// Per-user sums of the journal, in cents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct JournalTotals {
    /// Completed credits (what `total_earned` must equal)
    pub completed_credit_cents: i64,
    /// Pending credits (what `pending_balance` must equal)
    pub pending_credit_cents: i64,
    /// Pending and completed debits (what `total_withdrawn` must equal)
    pub withdrawn_cents: i64,
    /// Points on completed credits, net of redemptions
    pub completed_points: i64,
    /// Completed credits excluding points redemptions
    pub earnings_cents: i64,
}

pub async fn journal_totals<'e>(
    executor: impl SqliteExecutor<'e>,
    user_id: i64,
) -> Result<JournalTotals> {
    sqlx::query_as::<_, JournalTotals>(
        r#"
        SELECT
            COALESCE(SUM(CASE WHEN tx_type = 'credit' AND status = 'completed'
                              THEN amount_cents END), 0) AS completed_credit_cents,
            COALESCE(SUM(CASE WHEN tx_type = 'credit' AND status = 'pending'
                              THEN amount_cents END), 0) AS pending_credit_cents,
            COALESCE(SUM(CASE WHEN tx_type = 'debit' AND status IN ('pending', 'completed')
                              THEN amount_cents END), 0) AS withdrawn_cents,
            COALESCE(SUM(CASE WHEN tx_type = 'credit' AND status = 'completed'
                              THEN points END), 0) AS completed_points,
            COALESCE(SUM(CASE WHEN tx_type = 'credit' AND status = 'completed'
                               AND kind != 'points_redemption'
                              THEN amount_cents END), 0) AS earnings_cents
        FROM transactions
        WHERE user_id = ?
        "#,
    )
    .bind(user_id)
    .fetch_one(executor)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use rewards_core::{TransactionKind, TransactionType};
    use rust_decimal::Decimal;

    fn reward(user_id: i64, cents: i64) -> NewTransaction {
        NewTransaction::credit(user_id, TransactionKind::Reward, from_cents(cents), 10)
            .with_description("test reward")
    }

    #[tokio::test]
    async fn test_insert_detects_collisions() {
        let db = Database::connect_in_memory().await.unwrap();
        let now = Utc::now();
        let mut tx = db.begin_write().await.unwrap();

        let first = insert_transaction(tx.conn(), "REF1", &reward(1, 50).with_idempotency_key("k1"), now)
            .await
            .unwrap();
        assert!(matches!(first, TransactionInsert::Inserted(_)));

        let same_ref = insert_transaction(tx.conn(), "REF1", &reward(1, 50), now)
            .await
            .unwrap();
        assert!(matches!(same_ref, TransactionInsert::ReferenceTaken));

        let same_key = insert_transaction(tx.conn(), "REF2", &reward(1, 50).with_idempotency_key("k1"), now)
            .await
            .unwrap();
        assert!(matches!(same_key, TransactionInsert::DuplicateKey));

        // keys are scoped per user
        let other_user = insert_transaction(tx.conn(), "REF3", &reward(2, 50).with_idempotency_key("k1"), now)
            .await
            .unwrap();
        assert!(matches!(other_user, TransactionInsert::Inserted(_)));
        tx.commit().await.unwrap();

        assert_eq!(count_transactions(db.pool(), 1).await.unwrap(), 1);
        let found = get_transaction_by_key(db.pool(), 1, "k1").await.unwrap().unwrap();
        assert_eq!(found.reference_id, "REF1");
        assert_eq!(found.amount, Decimal::new(50, 2));
    }

    #[tokio::test]
    async fn test_settle_only_from_pending() {
        let db = Database::connect_in_memory().await.unwrap();
        let now = Utc::now();
        let mut tx = db.begin_write().await.unwrap();
        insert_transaction(tx.conn(), "W1", &NewTransaction::withdrawal(1, from_cents(1500)), now)
            .await
            .unwrap();
        assert!(settle_transaction(tx.conn(), "W1", TransactionStatus::Completed, now).await.unwrap());
        assert!(!settle_transaction(tx.conn(), "W1", TransactionStatus::Failed, now).await.unwrap());
        tx.commit().await.unwrap();

        let settled = get_transaction_by_reference(db.pool(), "W1").await.unwrap().unwrap();
        assert_eq!(settled.status, TransactionStatus::Completed);
        assert_eq!(settled.transaction_type, TransactionType::Debit);
        assert!(settled.settled_at.is_some());
    }

    #[tokio::test]
    async fn test_filters_and_totals() {
        let db = Database::connect_in_memory().await.unwrap();
        let now = Utc::now();
        let mut tx = db.begin_write().await.unwrap();
        insert_transaction(tx.conn(), "A", &reward(1, 300), now).await.unwrap();
        insert_transaction(tx.conn(), "B", &reward(1, 200).with_status(TransactionStatus::Pending), now)
            .await
            .unwrap();
        insert_transaction(tx.conn(), "C", &NewTransaction::withdrawal(1, from_cents(100)), now)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let debits = get_transactions(
            db.pool(),
            1,
            &TransactionFilter {
                transaction_type: Some(TransactionType::Debit),
                limit: 10,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(debits.len(), 1);
        assert_eq!(debits[0].reference_id, "C");

        let totals = journal_totals(db.pool(), 1).await.unwrap();
        assert_eq!(totals.completed_credit_cents, 300);
        assert_eq!(totals.pending_credit_cents, 200);
        assert_eq!(totals.withdrawn_cents, 100);
        assert_eq!(totals.completed_points, 10);
    }
}
