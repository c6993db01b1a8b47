//! Wallet ledger operations
//!
//! Each function runs on the connection of an open write transaction; the
//! caller commits the ledger change together with its journal entry.

use chrono::{DateTime, Utc};
use rewards_core::{from_cents, to_cents, validate_amount, Error, Result, Wallet};
use rewards_persistence::sqlite as store;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::error;

/// Open the account and wallet rows for a user if missing
pub async fn open(
    conn: &mut SqliteConnection,
    user_id: i64,
    minimum_withdrawal_cents: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    store::ensure_account(&mut *conn, user_id).await?;
    store::ensure_wallet(&mut *conn, user_id, minimum_withdrawal_cents, now).await
}

async fn wallet_in(conn: &mut SqliteConnection, user_id: i64) -> Result<Wallet> {
    store::get_wallet(conn, user_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("wallet for user {}", user_id)))
}

/// `balance += amount; totalEarned += amount`
pub async fn add_funds(
    conn: &mut SqliteConnection,
    user_id: i64,
    amount: Decimal,
    now: DateTime<Utc>,
) -> Result<()> {
    let cents = to_cents(validate_amount(amount)?)?;
    store::credit_wallet(conn, user_id, cents, now).await
}

/// Hold funds that are not yet withdrawable
pub async fn add_pending_funds(
    conn: &mut SqliteConnection,
    user_id: i64,
    amount: Decimal,
    now: DateTime<Utc>,
) -> Result<()> {
    let cents = to_cents(validate_amount(amount)?)?;
    store::add_pending(conn, user_id, cents, now).await
}

/// Make held funds withdrawable
pub async fn approve_pending_funds(
    conn: &mut SqliteConnection,
    user_id: i64,
    amount: Decimal,
    now: DateTime<Utc>,
) -> Result<()> {
    let cents = to_cents(validate_amount(amount)?)?;
    if !store::release_pending(&mut *conn, user_id, cents, now).await? {
        let wallet = wallet_in(conn, user_id).await?;
        return Err(Error::InsufficientPendingFunds {
            required: amount,
            pending: wallet.pending_balance,
        });
    }
    Ok(())
}

/// Drop held funds
pub async fn reject_pending_funds(
    conn: &mut SqliteConnection,
    user_id: i64,
    amount: Decimal,
    now: DateTime<Utc>,
) -> Result<()> {
    let cents = to_cents(validate_amount(amount)?)?;
    if !store::reverse_pending(&mut *conn, user_id, cents, now).await? {
        let wallet = wallet_in(conn, user_id).await?;
        return Err(Error::InsufficientPendingFunds {
            required: amount,
            pending: wallet.pending_balance,
        });
    }
    Ok(())
}

/// Take `amount` out of available funds
pub async fn withdraw_funds(
    conn: &mut SqliteConnection,
    user_id: i64,
    amount: Decimal,
    now: DateTime<Utc>,
) -> Result<()> {
    let cents = to_cents(validate_amount(amount)?)?;
    let wallet = store::get_wallet(&mut *conn, user_id).await?;
    let Some(wallet) = wallet else {
        return Err(Error::InsufficientFunds {
            required: amount,
            available: Decimal::ZERO,
        });
    };

    if amount < wallet.minimum_withdrawal {
        return Err(Error::BelowMinimumWithdrawal {
            amount,
            minimum: wallet.minimum_withdrawal,
        });
    }

    if !store::debit_wallet(conn, user_id, cents, now).await? {
        return Err(Error::InsufficientFunds {
            required: amount,
            available: wallet.available(),
        });
    }
    Ok(())
}

/// Return a failed withdrawal to the wallet
pub async fn refund_withdrawal(
    conn: &mut SqliteConnection,
    user_id: i64,
    amount: Decimal,
    now: DateTime<Utc>,
) -> Result<()> {
    let cents = to_cents(validate_amount(amount)?)?;
    store::refund_withdrawal(conn, user_id, cents, now).await
}

/// Storage failures in the middle of a ledger write leave nothing committed,
/// but the caller must treat them as a ledger fault.
pub fn escalate(err: Error, context: &str) -> Error {
    match err {
        Error::DatabaseError(msg) => {
            error!("Ledger write failed during {}: {}", context, msg);
            Error::ConsistencyFailure(format!("{}: {}", context, msg))
        }
        Error::ConsistencyFailure(msg) => {
            error!("Ledger consistency failure during {}: {}", context, msg);
            Error::ConsistencyFailure(msg)
        }
        other => other,
    }
}

/// One field whose stored value disagrees with the journal
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerMismatch {
    pub field: &'static str,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub user_id: i64,
    pub mismatches: Vec<LedgerMismatch>,
}

impl ReconcileReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Recompute wallet and account totals from the journal and compare
pub async fn reconcile(conn: &mut SqliteConnection, user_id: i64) -> Result<ReconcileReport> {
    let totals = store::journal_totals(&mut *conn, user_id).await?;
    let wallet = store::get_wallet(&mut *conn, user_id).await?;
    let account = store::get_account(&mut *conn, user_id).await?;

    let (balance, pending, earned, withdrawn) = match &wallet {
        Some(w) => (w.balance, w.pending_balance, w.total_earned, w.total_withdrawn),
        None => (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO, Decimal::ZERO),
    };
    let available = balance - pending;
    let (points, cashback, earnings) = match &account {
        Some(a) => (a.total_points, a.total_cashback, a.total_earnings),
        None => (0, Decimal::ZERO, Decimal::ZERO),
    };

    let expected_earned = from_cents(totals.completed_credit_cents);
    let expected_pending = from_cents(totals.pending_credit_cents);
    let expected_withdrawn = from_cents(totals.withdrawn_cents);
    let expected_balance = expected_earned + expected_pending - expected_withdrawn;

    let mut mismatches = Vec::new();
    let mut check = |field: &'static str, expected: String, actual: String| {
        if expected != actual {
            mismatches.push(LedgerMismatch {
                field,
                expected,
                actual,
            });
        }
    };

    check("totalEarned", expected_earned.to_string(), earned.to_string());
    check("pendingBalance", expected_pending.to_string(), pending.to_string());
    check("totalWithdrawn", expected_withdrawn.to_string(), withdrawn.to_string());
    check("balance", expected_balance.to_string(), balance.to_string());
    check("totalPoints", totals.completed_points.to_string(), points.to_string());
    check("totalCashback", available.to_string(), cashback.to_string());
    check(
        "totalEarnings",
        from_cents(totals.earnings_cents).to_string(),
        earnings.to_string(),
    );

    if !mismatches.is_empty() {
        error!(
            "Ledger for user {} disagrees with its journal in {} field(s)",
            user_id,
            mismatches.len()
        );
    }

    Ok(ReconcileReport {
        user_id,
        mismatches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewards_persistence::Database;

    async fn funded(db: &Database, user_id: i64, amount: Decimal) {
        let now = Utc::now();
        let mut tx = db.begin_write().await.unwrap();
        open(tx.conn(), user_id, 1000, now).await.unwrap();
        add_funds(tx.conn(), user_id, amount, now).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_withdraw_rules() {
        let db = Database::connect_in_memory().await.unwrap();
        funded(&db, 1, Decimal::new(2500, 2)).await;
        let now = Utc::now();

        let mut tx = db.begin_write().await.unwrap();
        let err = withdraw_funds(tx.conn(), 1, Decimal::new(500, 2), now).await.unwrap_err();
        assert!(matches!(err, Error::BelowMinimumWithdrawal { .. }));

        let err = withdraw_funds(tx.conn(), 1, Decimal::new(3000, 2), now).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds { .. }));

        withdraw_funds(tx.conn(), 1, Decimal::new(1500, 2), now).await.unwrap();
        let wallet = store::get_wallet(tx.conn(), 1).await.unwrap().unwrap();
        assert_eq!(wallet.balance, Decimal::new(1000, 2));
        assert_eq!(wallet.total_withdrawn, Decimal::new(1500, 2));
    }

    #[tokio::test]
    async fn test_amounts_must_be_positive() {
        let db = Database::connect_in_memory().await.unwrap();
        funded(&db, 1, Decimal::ONE).await;
        let mut tx = db.begin_write().await.unwrap();
        for amount in [Decimal::ZERO, Decimal::new(-5, 0), Decimal::new(1, 3)] {
            let err = add_funds(tx.conn(), 1, amount, Utc::now()).await.unwrap_err();
            assert!(matches!(err, Error::InvalidAmount(_)));
        }
    }

    #[tokio::test]
    async fn test_pending_approve_and_reject() {
        let db = Database::connect_in_memory().await.unwrap();
        funded(&db, 1, Decimal::new(1000, 2)).await;
        let now = Utc::now();

        let mut tx = db.begin_write().await.unwrap();
        add_pending_funds(tx.conn(), 1, Decimal::new(300, 2), now).await.unwrap();
        add_pending_funds(tx.conn(), 1, Decimal::new(200, 2), now).await.unwrap();
        approve_pending_funds(tx.conn(), 1, Decimal::new(300, 2), now).await.unwrap();
        reject_pending_funds(tx.conn(), 1, Decimal::new(200, 2), now).await.unwrap();

        let err = approve_pending_funds(tx.conn(), 1, Decimal::new(100, 2), now)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientPendingFunds { .. }));

        let wallet = store::get_wallet(tx.conn(), 1).await.unwrap().unwrap();
        assert_eq!(wallet.balance, Decimal::new(1300, 2));
        assert_eq!(wallet.pending_balance, Decimal::ZERO);
        assert_eq!(wallet.total_earned, Decimal::new(1300, 2));
        assert!(wallet.is_consistent());
    }

    #[tokio::test]
    async fn test_reconcile_flags_unjournalled_credit() {
        let db = Database::connect_in_memory().await.unwrap();
        funded(&db, 1, Decimal::new(500, 2)).await;

        let mut tx = db.begin_write().await.unwrap();
        let report = reconcile(tx.conn(), 1).await.unwrap();
        assert!(!report.is_consistent());
        let fields: Vec<_> = report.mismatches.iter().map(|m| m.field).collect();
        assert!(fields.contains(&"totalEarned"));
        assert!(fields.contains(&"balance"));

        let clean = reconcile(tx.conn(), 2).await.unwrap();
        assert!(clean.is_consistent());
    }

    #[test]
    fn test_escalate_storage_errors() {
        let err = escalate(Error::DatabaseError("disk I/O error".to_string()), "apply reward");
        assert!(matches!(err, Error::ConsistencyFailure(_)));

        let err = escalate(Error::AlreadyUsed("deal-1".to_string()), "apply reward");
        assert!(matches!(err, Error::AlreadyUsed(_)));
    }
}
