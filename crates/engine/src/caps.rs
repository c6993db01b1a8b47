//! Per-source usage caps

use chrono::{DateTime, NaiveDate, Utc};
use rewards_core::{to_cents, DailyCap, Error, Result, RewardQuote, RewardSource, UsagePolicy};
use rewards_persistence::sqlite::{self as store, UsageDelta};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{SqliteConnection, SqliteExecutor};
use tracing::debug;

/// Room left under a source's daily cap; `None` fields are uncapped
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyHeadroom {
    pub points: Option<i64>,
    pub cashback: Option<Decimal>,
}

fn exceeds_cap(quote: &RewardQuote, cap: &DailyCap) -> bool {
    cap.max_points.is_some_and(|max| quote.points > max)
        || cap.max_cashback.is_some_and(|max| quote.cashback > max)
}

/// Consume one use of `source` worth `quote` on `day`.
///
/// Runs inside the same write transaction as the ledger credit so a refused
/// or failed credit never leaves usage behind.
pub async fn consume(
    conn: &mut SqliteConnection,
    user_id: i64,
    source: &RewardSource,
    quote: &RewardQuote,
    day: NaiveDate,
    now: DateTime<Utc>,
) -> Result<()> {
    let kind = source.kind();
    let source_id = source.source_id();

    match source.usage_policy() {
        UsagePolicy::OneShot => {
            if !store::claim_one_shot(conn, user_id, kind, source_id, now).await? {
                debug!("User {} already used {} {}", user_id, kind.as_str(), source_id);
                return Err(Error::AlreadyUsed(source_id.to_string()));
            }
        }
        UsagePolicy::Repeatable(cap) => {
            let cap = cap.unwrap_or(DailyCap {
                max_points: None,
                max_cashback: None,
            });
            if exceeds_cap(quote, &cap) {
                debug!("Quote for {} alone exceeds its daily cap", source_id);
                return Err(Error::DailyCapReached {
                    source_id: source_id.to_string(),
                });
            }

            let delta = UsageDelta {
                points: quote.points,
                cashback_cents: to_cents(quote.cashback)?,
                max_points: cap.max_points,
                max_cashback_cents: cap.max_cashback.map(to_cents).transpose()?,
            };
            if !store::add_daily_usage(conn, user_id, kind, source_id, day, delta).await? {
                debug!("User {} hit the daily cap of {} on {}", user_id, source_id, day);
                return Err(Error::DailyCapReached {
                    source_id: source_id.to_string(),
                });
            }
        }
        // Guarded by the daily reward record itself
        UsagePolicy::OncePerDay => {}
    }
    Ok(())
}

/// What `user_id` can still earn from `source` on `day`, or `None` if uncapped
pub async fn remaining_today<'e>(
    executor: impl SqliteExecutor<'e>,
    user_id: i64,
    source: &RewardSource,
    day: NaiveDate,
) -> Result<Option<DailyHeadroom>> {
    let Some(cap) = source.daily_cap() else {
        return Ok(None);
    };

    let usage =
        store::get_daily_usage(executor, user_id, source.kind(), source.source_id(), day).await?;

    Ok(Some(DailyHeadroom {
        points: cap.max_points.map(|max| (max - usage.points).max(0)),
        cashback: cap
            .max_cashback
            .map(|max| (max - usage.cashback).max(Decimal::ZERO)),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewards_core::CatalogReward;
    use rewards_persistence::Database;

    fn capped_game() -> RewardSource {
        RewardSource::Game(
            CatalogReward::new("g1", 100, Decimal::new(50, 2))
                .with_daily_cap(Some(250), Some(Decimal::new(200, 2))),
        )
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[tokio::test]
    async fn test_cap_blocks_without_partial_apply() {
        let db = Database::connect_in_memory().await.unwrap();
        let source = capped_game();
        let quote = RewardQuote::new(100, Decimal::new(50, 2));
        let now = Utc::now();

        let mut tx = db.begin_write().await.unwrap();
        consume(tx.conn(), 1, &source, &quote, day(), now).await.unwrap();
        consume(tx.conn(), 1, &source, &quote, day(), now).await.unwrap();
        let err = consume(tx.conn(), 1, &source, &quote, day(), now).await.unwrap_err();
        assert!(matches!(err, Error::DailyCapReached { .. }));
        tx.commit().await.unwrap();

        let headroom = remaining_today(db.pool(), 1, &source, day()).await.unwrap().unwrap();
        assert_eq!(headroom.points, Some(50));
        assert_eq!(headroom.cashback, Some(Decimal::new(100, 2)));

        // next day starts from zero
        let tomorrow = day().succ_opt().unwrap();
        let fresh = remaining_today(db.pool(), 1, &source, tomorrow).await.unwrap().unwrap();
        assert_eq!(fresh.points, Some(250));
    }

    #[tokio::test]
    async fn test_oversized_quote_rejected_up_front() {
        let db = Database::connect_in_memory().await.unwrap();
        let mut tx = db.begin_write().await.unwrap();
        let quote = RewardQuote::new(300, Decimal::ZERO);
        let err = consume(tx.conn(), 1, &capped_game(), &quote, day(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DailyCapReached { .. }));
    }

    #[tokio::test]
    async fn test_one_shot_deal() {
        let db = Database::connect_in_memory().await.unwrap();
        let deal = RewardSource::Deal(CatalogReward::new("d1", 20, Decimal::ZERO));
        let quote = RewardQuote::new(20, Decimal::ZERO);
        let mut tx = db.begin_write().await.unwrap();
        consume(tx.conn(), 1, &deal, &quote, day(), Utc::now()).await.unwrap();
        let err = consume(tx.conn(), 1, &deal, &quote, day(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyUsed(_)));
        tx.commit().await.unwrap();

        assert!(remaining_today(db.pool(), 1, &deal, day()).await.unwrap().is_none());
    }
}
