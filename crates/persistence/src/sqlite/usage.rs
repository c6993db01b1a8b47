//! Per-source usage tracking: one-shot claims and daily counters

use chrono::{DateTime, NaiveDate, Utc};
use rewards_core::{from_cents, Error, Result, SourceKind};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{SqliteConnection, SqliteExecutor};

/// What a user has earned from one source on one day
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsage {
    pub points: i64,
    pub cashback: Decimal,
    pub claims: i64,
}

/// Mark a one-shot source as used. Returns false if it already was.
pub async fn claim_one_shot(
    conn: &mut SqliteConnection,
    user_id: i64,
    kind: SourceKind,
    source_id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO source_usage (user_id, source_kind, source_id, used_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(user_id, source_kind, source_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(kind.as_str())
    .bind(source_id)
    .bind(now)
    .execute(conn)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(result.rows_affected() == 1)
}

pub async fn get_daily_usage<'e>(
    executor: impl SqliteExecutor<'e>,
    user_id: i64,
    kind: SourceKind,
    source_id: &str,
    day: NaiveDate,
) -> Result<DailyUsage> {
    let row: Option<(i64, i64, i64)> = sqlx::query_as(
        r#"
        SELECT points, cashback_cents, claims
        FROM daily_source_usage
        WHERE user_id = ? AND source_kind = ? AND source_id = ? AND usage_date = ?
        "#,
    )
    .bind(user_id)
    .bind(kind.as_str())
    .bind(source_id)
    .bind(day)
    .fetch_optional(executor)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(row
        .map(|(points, cents, claims)| DailyUsage {
            points,
            cashback: from_cents(cents),
            claims,
        })
        .unwrap_or_default())
}

/// Counter delta and the caps it must stay within
#[derive(Debug, Clone, Copy)]
pub struct UsageDelta {
    pub points: i64,
    pub cashback_cents: i64,
    pub max_points: Option<i64>,
    pub max_cashback_cents: Option<i64>,
}

/// Add to today's counters unless that would pass a cap.
/// Returns false, leaving the counters untouched, when a cap refuses the write.
pub async fn add_daily_usage(
    conn: &mut SqliteConnection,
    user_id: i64,
    kind: SourceKind,
    source_id: &str,
    day: NaiveDate,
    delta: UsageDelta,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO daily_source_usage
            (user_id, source_kind, source_id, usage_date, points, cashback_cents, claims)
        SELECT ?1, ?2, ?3, ?4, ?5, ?6, 1
        WHERE (?7 IS NULL OR ?5 <= ?7) AND (?8 IS NULL OR ?6 <= ?8)
        ON CONFLICT(user_id, source_kind, source_id, usage_date) DO UPDATE SET
            points = daily_source_usage.points + excluded.points,
            cashback_cents = daily_source_usage.cashback_cents + excluded.cashback_cents,
            claims = daily_source_usage.claims + 1
        WHERE (?7 IS NULL OR daily_source_usage.points + excluded.points <= ?7)
          AND (?8 IS NULL OR daily_source_usage.cashback_cents + excluded.cashback_cents <= ?8)
        "#,
    )
    .bind(user_id)
    .bind(kind.as_str())
    .bind(source_id)
    .bind(day)
    .bind(delta.points)
    .bind(delta.cashback_cents)
    .bind(delta.max_points)
    .bind(delta.max_cashback_cents)
    .execute(conn)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(result.rows_affected() == 1)
}
