//! VIP membership persistence

use chrono::{DateTime, Utc};
use rewards_core::{from_cents, Error, Result, VipMembership, VipStatus, VipUsage};
use rust_decimal::Decimal;
use sqlx::{SqliteConnection, SqliteExecutor};
use std::str::FromStr;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VipRow {
    pub user_id: i64,
    pub status: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub multiplier: String,
    pub total_points_earned: i64,
    pub total_cashback_cents: i64,
    pub rewards_count: i64,
    pub last_reward_at: Option<DateTime<Utc>>,
}

impl VipRow {
    pub fn into_membership(self) -> Result<VipMembership> {
        let multiplier = Decimal::from_str(&self.multiplier)
            .map_err(|e| Error::InvalidData(format!("VIP multiplier '{}': {}", self.multiplier, e)))?;

        Ok(VipMembership {
            user_id: self.user_id,
            status: self.status.parse()?,
            start_date: self.start_date,
            end_date: self.end_date,
            multiplier,
            usage: VipUsage {
                total_points_earned: self.total_points_earned,
                total_cashback_earned: from_cents(self.total_cashback_cents),
                rewards_count: self.rewards_count,
                last_reward_at: self.last_reward_at,
            },
        })
    }
}

pub async fn get_membership<'e>(
    executor: impl SqliteExecutor<'e>,
    user_id: i64,
) -> Result<Option<VipMembership>> {
    let row = sqlx::query_as::<_, VipRow>(
        r#"
        SELECT user_id, status, start_date, end_date, multiplier,
               total_points_earned, total_cashback_cents, rewards_count, last_reward_at
        FROM vip_memberships
        WHERE user_id = ?
        "#,
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    row.map(VipRow::into_membership).transpose()
}

/// Insert or replace the membership window; usage counters carry over
pub async fn upsert_membership(conn: &mut SqliteConnection, membership: &VipMembership) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO vip_memberships (user_id, status, start_date, end_date, multiplier)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET
            status = excluded.status,
            start_date = excluded.start_date,
            end_date = excluded.end_date,
            multiplier = excluded.multiplier
        "#,
    )
    .bind(membership.user_id)
    .bind(membership.status.as_str())
    .bind(membership.start_date)
    .bind(membership.end_date)
    .bind(membership.multiplier.to_string())
    .execute(conn)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(())
}

/// Returns false if the user has no membership
pub async fn set_membership_status(
    conn: &mut SqliteConnection,
    user_id: i64,
    status: VipStatus,
) -> Result<bool> {
    let result = sqlx::query("UPDATE vip_memberships SET status = ? WHERE user_id = ?")
        .bind(status.as_str())
        .bind(user_id)
        .execute(conn)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(result.rows_affected() == 1)
}

/// Bump the usage mirror after a boosted reward
pub async fn record_vip_usage(
    conn: &mut SqliteConnection,
    user_id: i64,
    points: i64,
    cashback_cents: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE vip_memberships
        SET total_points_earned = total_points_earned + ?,
            total_cashback_cents = total_cashback_cents + ?,
            rewards_count = rewards_count + 1,
            last_reward_at = ?
        WHERE user_id = ?
        "#,
    )
    .bind(points)
    .bind(cashback_cents)
    .bind(now)
    .bind(user_id)
    .execute(conn)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use chrono::Duration;
    use rewards_core::default_vip_multiplier;

    #[tokio::test]
    async fn test_membership_lifecycle() {
        let db = Database::connect_in_memory().await.unwrap();
        let now = Utc::now();
        let membership = VipMembership {
            user_id: 4,
            status: VipStatus::Active,
            start_date: now,
            end_date: now + Duration::days(30),
            multiplier: default_vip_multiplier(),
            usage: VipUsage::default(),
        };

        let mut tx = db.begin_write().await.unwrap();
        upsert_membership(tx.conn(), &membership).await.unwrap();
        record_vip_usage(tx.conn(), 4, 150, 75, now).await.unwrap();
        assert!(set_membership_status(tx.conn(), 4, VipStatus::Suspended).await.unwrap());
        assert!(!set_membership_status(tx.conn(), 5, VipStatus::Suspended).await.unwrap());
        upsert_membership(tx.conn(), &membership).await.unwrap();
        tx.commit().await.unwrap();

        let stored = get_membership(db.pool(), 4).await.unwrap().unwrap();
        assert_eq!(stored.status, VipStatus::Active);
        assert_eq!(stored.multiplier, default_vip_multiplier());
        assert_eq!(stored.usage.total_points_earned, 150);
        assert_eq!(stored.usage.total_cashback_earned, Decimal::new(75, 2));
        assert_eq!(stored.usage.rewards_count, 1);
    }
}
