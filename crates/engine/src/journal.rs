//! Transaction journal: reference ids and append with retry

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rewards_core::{Error, NewTransaction, Result, Transaction};
use rewards_persistence::sqlite::{insert_transaction, TransactionInsert};
use sqlx::SqliteConnection;
use tracing::{debug, error};

const REFERENCE_PREFIX: &str = "TXN";
const REFERENCE_SUFFIX_LEN: usize = 6;

/// `TXN<unix-millis><6 alphanumerics>`
pub fn generate_reference_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REFERENCE_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{}{}{}", REFERENCE_PREFIX, now.timestamp_millis(), suffix)
}

/// Append `new` under a fresh reference id
pub async fn record(
    conn: &mut SqliteConnection,
    new: &NewTransaction,
    now: DateTime<Utc>,
    max_attempts: u32,
) -> Result<Transaction> {
    record_with(conn, new, now, max_attempts, generate_reference_id).await
}

/// Append with a caller-supplied id generator, regenerating on collision.
///
/// A repeated idempotency key is `AlreadyApplied`; running out of attempts
/// is a `ConsistencyFailure`.
pub async fn record_with<F>(
    conn: &mut SqliteConnection,
    new: &NewTransaction,
    now: DateTime<Utc>,
    max_attempts: u32,
    mut next_reference: F,
) -> Result<Transaction>
where
    F: FnMut(DateTime<Utc>) -> String,
{
    if new.amount.is_sign_negative() || (new.amount.is_zero() && new.points == 0) {
        return Err(Error::InvalidAmount(format!(
            "transaction must move money or points (amount {}, points {})",
            new.amount, new.points
        )));
    }

    for attempt in 1..=max_attempts {
        let reference_id = next_reference(now);
        match insert_transaction(&mut *conn, &reference_id, new, now).await? {
            TransactionInsert::Inserted(tx) => return Ok(tx),
            TransactionInsert::ReferenceTaken => {
                debug!(
                    "Reference {} already taken (attempt {}/{})",
                    reference_id, attempt, max_attempts
                );
            }
            TransactionInsert::DuplicateKey => {
                let key = new.idempotency_key.clone().unwrap_or_default();
                debug!("Idempotency key {} already applied for user {}", key, new.user_id);
                return Err(Error::AlreadyApplied(key));
            }
        }
    }

    error!(
        "Could not allocate a unique reference for user {} after {} attempts",
        new.user_id, max_attempts
    );
    Err(Error::ConsistencyFailure(format!(
        "no unique reference id after {} attempts",
        max_attempts
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewards_core::{TransactionKind, TransactionStatus};
    use rewards_persistence::Database;
    use rust_decimal::Decimal;

    fn reward() -> NewTransaction {
        NewTransaction::credit(1, TransactionKind::Reward, Decimal::new(100, 2), 10)
    }

    #[test]
    fn test_reference_format() {
        let now = Utc::now();
        let reference = generate_reference_id(now);
        let millis = now.timestamp_millis().to_string();
        assert!(reference.starts_with("TXN"));
        assert_eq!(&reference[3..3 + millis.len()], millis);
        assert_eq!(reference.len(), 3 + millis.len() + 6);
        assert!(reference[3 + millis.len()..]
            .chars()
            .all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn test_collision_is_retried() {
        let db = Database::connect_in_memory().await.unwrap();
        let now = Utc::now();
        let mut tx = db.begin_write().await.unwrap();
        record_with(tx.conn(), &reward(), now, 5, |_| "TXN1".to_string())
            .await
            .unwrap();

        let mut ids = vec!["TXN2", "TXN1"];
        let second = record_with(tx.conn(), &reward(), now, 5, |_| {
            ids.pop().unwrap_or("TXN3").to_string()
        })
        .await
        .unwrap();
        assert_eq!(second.reference_id, "TXN2");
        assert_eq!(second.status, TransactionStatus::Completed);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_are_consistency_failure() {
        let db = Database::connect_in_memory().await.unwrap();
        let now = Utc::now();
        let mut tx = db.begin_write().await.unwrap();
        record_with(tx.conn(), &reward(), now, 5, |_| "SAME".to_string())
            .await
            .unwrap();
        let err = record_with(tx.conn(), &reward(), now, 3, |_| "SAME".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConsistencyFailure(_)));
    }

    #[tokio::test]
    async fn test_duplicate_key_and_empty_entry() {
        let db = Database::connect_in_memory().await.unwrap();
        let now = Utc::now();
        let mut tx = db.begin_write().await.unwrap();
        let keyed = reward().with_idempotency_key("game:g1:run-1");
        record(tx.conn(), &keyed, now, 5).await.unwrap();
        let err = record(tx.conn(), &keyed, now, 5).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyApplied(ref key) if key == "game:g1:run-1"));

        let empty = NewTransaction::credit(1, TransactionKind::Reward, Decimal::ZERO, 0);
        let err = record(tx.conn(), &empty, now, 5).await.unwrap_err();
        assert!(matches!(err, Error::InvalidAmount(_)));
    }
}
