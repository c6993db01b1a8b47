//! Account totals persistence

use rewards_core::{from_cents, Account, Error, Result};
use sqlx::{SqliteConnection, SqliteExecutor};

/// Account row stored in database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountRow {
    pub user_id: i64,
    pub total_points: i64,
    pub total_cashback_cents: i64,
    pub total_earnings_cents: i64,
}

impl AccountRow {
    pub fn into_account(self) -> Account {
        Account {
            user_id: self.user_id,
            total_points: self.total_points,
            total_cashback: from_cents(self.total_cashback_cents),
            total_earnings: from_cents(self.total_earnings_cents),
            is_vip_active: false,
        }
    }
}

/// Create the account row if it does not exist yet
pub async fn ensure_account(conn: &mut SqliteConnection, user_id: i64) -> Result<()> {
    sqlx::query("INSERT INTO accounts (user_id) VALUES (?) ON CONFLICT(user_id) DO NOTHING")
        .bind(user_id)
        .execute(conn)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;
    Ok(())
}

pub async fn get_account<'e>(
    executor: impl SqliteExecutor<'e>,
    user_id: i64,
) -> Result<Option<Account>> {
    let row = sqlx::query_as::<_, AccountRow>(
        r#"
        SELECT user_id, total_points, total_cashback_cents, total_earnings_cents
        FROM accounts
        WHERE user_id = ?
        "#,
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(row.map(AccountRow::into_account))
}

/// Apply signed deltas to the account totals in one statement
pub async fn adjust_account(
    conn: &mut SqliteConnection,
    user_id: i64,
    points_delta: i64,
    cashback_delta_cents: i64,
    earnings_delta_cents: i64,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET total_points = total_points + ?,
            total_cashback_cents = total_cashback_cents + ?,
            total_earnings_cents = total_earnings_cents + ?
        WHERE user_id = ?
        "#,
    )
    .bind(points_delta)
    .bind(cashback_delta_cents)
    .bind(earnings_delta_cents)
    .bind(user_id)
    .execute(conn)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("account for user {}", user_id)));
    }
    Ok(())
}

/// Spend points if the account holds enough. Returns false when it does not.
pub async fn spend_points(conn: &mut SqliteConnection, user_id: i64, points: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET total_points = total_points - ?1
        WHERE user_id = ?2 AND total_points >= ?1
        "#,
    )
    .bind(points)
    .bind(user_id)
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

    #[tokio::test]
    async fn test_adjust_and_spend() {
        let db = Database::connect_in_memory().await.unwrap();
        let mut tx = db.begin_write().await.unwrap();
        ensure_account(tx.conn(), 5).await.unwrap();
        ensure_account(tx.conn(), 5).await.unwrap();
        adjust_account(tx.conn(), 5, 120, 250, 250).await.unwrap();
        assert!(spend_points(tx.conn(), 5, 100).await.unwrap());
        assert!(!spend_points(tx.conn(), 5, 100).await.unwrap());
        tx.commit().await.unwrap();

        let account = get_account(db.pool(), 5).await.unwrap().unwrap();
        assert_eq!(account.total_points, 20);
        assert_eq!(account.total_cashback, Decimal::new(250, 2));
    }

    #[tokio::test]
    async fn test_adjust_missing_account() {
        let db = Database::connect_in_memory().await.unwrap();
        let mut tx = db.begin_write().await.unwrap();
        let err = adjust_account(tx.conn(), 9, 1, 0, 0).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
