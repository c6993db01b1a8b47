//! Daily reward and streak persistence

use crate::sqlite::connection::is_unique_violation;
use chrono::{DateTime, NaiveDate, Utc};
use rewards_core::{from_cents, to_cents, DailyRewardRecord, Error, Result, StreakState};
use sqlx::{SqliteConnection, SqliteExecutor};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DailyRewardRow {
    pub user_id: i64,
    pub reward_date: NaiveDate,
    pub points: i64,
    pub cashback_cents: i64,
    pub streak: i64,
    pub claimed_at: DateTime<Utc>,
}

impl DailyRewardRow {
    pub fn into_record(self) -> DailyRewardRecord {
        DailyRewardRecord {
            user_id: self.user_id,
            reward_date: self.reward_date,
            points: self.points,
            cashback: from_cents(self.cashback_cents),
            streak: self.streak as u32,
            claimed_at: self.claimed_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StreakRow {
    pub user_id: i64,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub last_claim_date: Option<NaiveDate>,
    pub total_claims: i64,
}

impl StreakRow {
    pub fn into_state(self) -> StreakState {
        StreakState {
            user_id: self.user_id,
            current_streak: self.current_streak as u32,
            longest_streak: self.longest_streak as u32,
            last_claim_date: self.last_claim_date,
            total_claims: self.total_claims as u32,
        }
    }
}

/// Record a claimed day. Returns false if the day was already claimed.
pub async fn insert_daily_reward(
    conn: &mut SqliteConnection,
    record: &DailyRewardRecord,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO daily_rewards (user_id, reward_date, points, cashback_cents, streak, claimed_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.user_id)
    .bind(record.reward_date)
    .bind(record.points)
    .bind(to_cents(record.cashback)?)
    .bind(record.streak as i64)
    .bind(record.claimed_at)
    .execute(conn)
    .await;

    match result {
        Ok(_) => Ok(true),
        Err(e) if is_unique_violation(&e) => Ok(false),
        Err(e) => Err(Error::DatabaseError(e.to_string())),
    }
}

pub async fn daily_reward_exists<'e>(
    executor: impl SqliteExecutor<'e>,
    user_id: i64,
    reward_date: NaiveDate,
) -> Result<bool> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM daily_rewards WHERE user_id = ? AND reward_date = ?",
    )
    .bind(user_id)
    .bind(reward_date)
    .fetch_one(executor)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(row.0 > 0)
}

/// Claimed days for a user, most recent first
pub async fn list_daily_rewards<'e>(
    executor: impl SqliteExecutor<'e>,
    user_id: i64,
    limit: u32,
) -> Result<Vec<DailyRewardRecord>> {
    let rows = sqlx::query_as::<_, DailyRewardRow>(
        r#"
        SELECT user_id, reward_date, points, cashback_cents, streak, claimed_at
        FROM daily_rewards
        WHERE user_id = ?
        ORDER BY reward_date DESC
        LIMIT ?
        "#,
    )
    .bind(user_id)
    .bind(limit as i64)
    .fetch_all(executor)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(rows.into_iter().map(DailyRewardRow::into_record).collect())
}

pub async fn get_streak<'e>(
    executor: impl SqliteExecutor<'e>,
    user_id: i64,
) -> Result<Option<StreakState>> {
    let row = sqlx::query_as::<_, StreakRow>(
        r#"
        SELECT user_id, current_streak, longest_streak, last_claim_date, total_claims
        FROM streaks
        WHERE user_id = ?
        "#,
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(row.map(StreakRow::into_state))
}

pub async fn upsert_streak(conn: &mut SqliteConnection, state: &StreakState) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO streaks (user_id, current_streak, longest_streak, last_claim_date, total_claims)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET
            current_streak = excluded.current_streak,
            longest_streak = excluded.longest_streak,
            last_claim_date = excluded.last_claim_date,
            total_claims = excluded.total_claims
        "#,
    )
    .bind(state.user_id)
    .bind(state.current_streak as i64)
    .bind(state.longest_streak as i64)
    .bind(state.last_claim_date)
    .bind(state.total_claims as i64)
    .execute(conn)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use rust_decimal::Decimal;

    fn record(user_id: i64, day: NaiveDate, streak: u32) -> DailyRewardRecord {
        DailyRewardRecord {
            user_id,
            reward_date: day,
            points: 10,
            cashback: Decimal::new(10, 2),
            streak,
            claimed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_one_claim_per_day() {
        let db = Database::connect_in_memory().await.unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();

        let mut tx = db.begin_write().await.unwrap();
        assert!(insert_daily_reward(tx.conn(), &record(1, day, 1)).await.unwrap());
        assert!(!insert_daily_reward(tx.conn(), &record(1, day, 1)).await.unwrap());
        assert!(insert_daily_reward(tx.conn(), &record(2, day, 1)).await.unwrap());
        tx.commit().await.unwrap();

        assert!(daily_reward_exists(db.pool(), 1, day).await.unwrap());
        let history = list_daily_rewards(db.pool(), 1, 30).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].cashback, Decimal::new(10, 2));
    }

    #[tokio::test]
    async fn test_streak_upsert() {
        let db = Database::connect_in_memory().await.unwrap();
        assert!(get_streak(db.pool(), 1).await.unwrap().is_none());

        let mut state = StreakState::new(1);
        state.current_streak = 3;
        state.longest_streak = 3;
        state.last_claim_date = NaiveDate::from_ymd_opt(2024, 3, 12);
        state.total_claims = 3;

        let mut tx = db.begin_write().await.unwrap();
        upsert_streak(tx.conn(), &state).await.unwrap();
        state.current_streak = 1;
        upsert_streak(tx.conn(), &state).await.unwrap();
        tx.commit().await.unwrap();

        let stored = get_streak(db.pool(), 1).await.unwrap().unwrap();
        assert_eq!(stored.current_streak, 1);
        assert_eq!(stored.longest_streak, 3);
        assert_eq!(stored.last_claim_date, state.last_claim_date);
    }
}
