//! Wallet persistence operations
//!
//! Every balance change is a single `col = col + ?` statement so concurrent
//! writers commute; the guards live in the `WHERE` clauses and the table's
//! CHECK constraints, never in application-side read-modify-write.

use chrono::{DateTime, Utc};
use rewards_core::{from_cents, Error, Result, Wallet};
use sqlx::{SqliteConnection, SqliteExecutor};

/// Wallet record stored in database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WalletRow {
    pub user_id: i64,
    pub balance_cents: i64,
    pub pending_cents: i64,
    pub total_earned_cents: i64,
    pub total_withdrawn_cents: i64,
    pub minimum_withdrawal_cents: i64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl WalletRow {
    pub fn into_wallet(self) -> Wallet {
        Wallet {
            user_id: self.user_id,
            balance: from_cents(self.balance_cents),
            pending_balance: from_cents(self.pending_cents),
            total_earned: from_cents(self.total_earned_cents),
            total_withdrawn: from_cents(self.total_withdrawn_cents),
            minimum_withdrawal: from_cents(self.minimum_withdrawal_cents),
            updated_at: self.updated_at,
        }
    }
}

/// Open a wallet for the user unless one exists
pub async fn ensure_wallet(
    conn: &mut SqliteConnection,
    user_id: i64,
    minimum_withdrawal_cents: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO wallets (user_id, minimum_withdrawal_cents, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(user_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(minimum_withdrawal_cents)
    .bind(now)
    .execute(conn)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;
    Ok(())
}

pub async fn get_wallet<'e>(
    executor: impl SqliteExecutor<'e>,
    user_id: i64,
) -> Result<Option<Wallet>> {
    let row = sqlx::query_as::<_, WalletRow>(
        r#"
        SELECT user_id, balance_cents, pending_cents, total_earned_cents,
               total_withdrawn_cents, minimum_withdrawal_cents, updated_at
        FROM wallets
        WHERE user_id = ?
        "#,
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(row.map(WalletRow::into_wallet))
}

/// All user ids holding a wallet, ascending
pub async fn list_wallet_user_ids<'e>(executor: impl SqliteExecutor<'e>) -> Result<Vec<i64>> {
    let rows: Vec<(i64,)> = sqlx::query_as("SELECT user_id FROM wallets ORDER BY user_id")
        .fetch_all(executor)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(rows.into_iter().map(|r| r.0).collect())
}

/// Run a wallet UPDATE and report whether it matched a row
async fn apply_update(
    conn: &mut SqliteConnection,
    sql: &str,
    user_id: i64,
    cents: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(sql)
        .bind(cents)
        .bind(now)
        .bind(user_id)
        .execute(conn)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(result.rows_affected() == 1)
}

/// `balance += cents; total_earned += cents`
pub async fn credit_wallet(
    conn: &mut SqliteConnection,
    user_id: i64,
    cents: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    let found = apply_update(
        conn,
        r#"
        UPDATE wallets
        SET balance_cents = balance_cents + ?1,
            total_earned_cents = total_earned_cents + ?1,
            updated_at = ?2
        WHERE user_id = ?3
        "#,
        user_id,
        cents,
        now,
    )
    .await?;

    if !found {
        return Err(Error::NotFound(format!("wallet for user {}", user_id)));
    }
    Ok(())
}

/// `balance += cents; pending += cents`
pub async fn add_pending(
    conn: &mut SqliteConnection,
    user_id: i64,
    cents: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    let found = apply_update(
        conn,
        r#"
        UPDATE wallets
        SET balance_cents = balance_cents + ?1,
            pending_cents = pending_cents + ?1,
            updated_at = ?2
        WHERE user_id = ?3
        "#,
        user_id,
        cents,
        now,
    )
    .await?;

    if !found {
        return Err(Error::NotFound(format!("wallet for user {}", user_id)));
    }
    Ok(())
}

/// Make pending funds available: `pending -= cents; total_earned += cents`.
/// Returns false if less than `cents` is pending.
pub async fn release_pending(
    conn: &mut SqliteConnection,
    user_id: i64,
    cents: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    apply_update(
        conn,
        r#"
        UPDATE wallets
        SET pending_cents = pending_cents - ?1,
            total_earned_cents = total_earned_cents + ?1,
            updated_at = ?2
        WHERE user_id = ?3 AND pending_cents >= ?1
        "#,
        user_id,
        cents,
        now,
    )
    .await
}

/// Drop pending funds: `balance -= cents; pending -= cents`.
/// Returns false if less than `cents` is pending.
pub async fn reverse_pending(
    conn: &mut SqliteConnection,
    user_id: i64,
    cents: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    apply_update(
        conn,
        r#"
        UPDATE wallets
        SET balance_cents = balance_cents - ?1,
            pending_cents = pending_cents - ?1,
            updated_at = ?2
        WHERE user_id = ?3 AND pending_cents >= ?1
        "#,
        user_id,
        cents,
        now,
    )
    .await
}

/// Withdraw from available funds: `balance -= cents; total_withdrawn += cents`.
/// Returns false if available funds are short.
pub async fn debit_wallet(
    conn: &mut SqliteConnection,
    user_id: i64,
    cents: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    apply_update(
        conn,
        r#"
        UPDATE wallets
        SET balance_cents = balance_cents - ?1,
            total_withdrawn_cents = total_withdrawn_cents + ?1,
            updated_at = ?2
        WHERE user_id = ?3 AND balance_cents - pending_cents >= ?1
        "#,
        user_id,
        cents,
        now,
    )
    .await
}

/// Undo a failed withdrawal: `balance += cents; total_withdrawn -= cents`
pub async fn refund_withdrawal(
    conn: &mut SqliteConnection,
    user_id: i64,
    cents: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    let found = apply_update(
        conn,
        r#"
        UPDATE wallets
        SET balance_cents = balance_cents + ?1,
            total_withdrawn_cents = total_withdrawn_cents - ?1,
            updated_at = ?2
        WHERE user_id = ?3 AND total_withdrawn_cents >= ?1
        "#,
        user_id,
        cents,
        now,
    )
    .await?;

    if !found {
        return Err(Error::ConsistencyFailure(format!(
            "cannot refund {} cents to user {}: wallet missing or not withdrawn",
            cents, user_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use rust_decimal::Decimal;

    async fn wallet_with(db: &Database, user_id: i64, cents: i64) {
        let now = Utc::now();
        let mut tx = db.begin_write().await.unwrap();
        ensure_wallet(tx.conn(), user_id, 1000, now).await.unwrap();
        credit_wallet(tx.conn(), user_id, cents, now).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_credit_and_debit() {
        let db = Database::connect_in_memory().await.unwrap();
        wallet_with(&db, 1, 5000).await;

        let mut tx = db.begin_write().await.unwrap();
        assert!(debit_wallet(tx.conn(), 1, 2000, Utc::now()).await.unwrap());
        assert!(!debit_wallet(tx.conn(), 1, 3001, Utc::now()).await.unwrap());
        tx.commit().await.unwrap();

        let wallet = get_wallet(db.pool(), 1).await.unwrap().unwrap();
        assert_eq!(wallet.balance, Decimal::new(3000, 2));
        assert_eq!(wallet.total_withdrawn, Decimal::new(2000, 2));
        assert_eq!(wallet.total_earned, Decimal::new(5000, 2));
    }

    #[tokio::test]
    async fn test_pending_cannot_be_withdrawn() {
        let db = Database::connect_in_memory().await.unwrap();
        wallet_with(&db, 2, 1000).await;

        let now = Utc::now();
        let mut tx = db.begin_write().await.unwrap();
        add_pending(tx.conn(), 2, 500, now).await.unwrap();
        assert!(!debit_wallet(tx.conn(), 2, 1500, now).await.unwrap());
        assert!(release_pending(tx.conn(), 2, 500, now).await.unwrap());
        assert!(!release_pending(tx.conn(), 2, 1, now).await.unwrap());
        assert!(debit_wallet(tx.conn(), 2, 1500, now).await.unwrap());
        tx.commit().await.unwrap();

        let wallet = get_wallet(db.pool(), 2).await.unwrap().unwrap();
        assert_eq!(wallet.balance, Decimal::ZERO);
        assert_eq!(wallet.total_earned, Decimal::new(1500, 2));
    }

    #[tokio::test]
    async fn test_credit_missing_wallet() {
        let db = Database::connect_in_memory().await.unwrap();
        let mut tx = db.begin_write().await.unwrap();
        let err = credit_wallet(tx.conn(), 3, 100, Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
