//! VIP membership management

use crate::engine::RewardsEngine;
use chrono::{DateTime, Utc};
use rewards_core::{default_vip_multiplier, Error, Result, VipMembership, VipStatus, VipUsage};
use rewards_persistence::sqlite as store;
use rust_decimal::Decimal;
use tracing::{debug, info};

/// The membership as it reads at `now`: a lapsed active window shows as expired
pub fn effective_membership(mut membership: VipMembership, now: DateTime<Utc>) -> VipMembership {
    if membership.status == VipStatus::Active && now > membership.end_date {
        membership.status = VipStatus::Expired;
    }
    membership
}

impl RewardsEngine {
    /// Start or renew a membership window
    pub async fn activate_vip(
        &self,
        user_id: i64,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        multiplier: Option<Decimal>,
    ) -> Result<VipMembership> {
        if end_date <= start_date {
            return Err(Error::InvalidData(format!(
                "VIP window ends ({}) before it starts ({})",
                end_date, start_date
            )));
        }
        let multiplier = multiplier.unwrap_or_else(default_vip_multiplier);
        if multiplier < Decimal::ONE {
            return Err(Error::InvalidData(format!(
                "VIP multiplier {} is below 1",
                multiplier
            )));
        }

        let membership = VipMembership {
            user_id,
            status: VipStatus::Active,
            start_date,
            end_date,
            multiplier,
            usage: VipUsage::default(),
        };

        let mut tx = self.db().begin_write().await?;
        store::upsert_membership(tx.conn(), &membership).await?;
        let stored = store::get_membership(tx.conn(), user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("VIP membership for user {}", user_id)))?;
        tx.commit().await?;

        info!(
            "VIP activated for user {} until {} at {}x",
            user_id, end_date, multiplier
        );
        Ok(stored)
    }

    pub async fn cancel_vip(&self, user_id: i64) -> Result<()> {
        self.set_vip_status(user_id, VipStatus::Cancelled).await
    }

    pub async fn suspend_vip(&self, user_id: i64) -> Result<()> {
        self.set_vip_status(user_id, VipStatus::Suspended).await
    }

    async fn set_vip_status(&self, user_id: i64, status: VipStatus) -> Result<()> {
        let mut tx = self.db().begin_write().await?;
        if !store::set_membership_status(tx.conn(), user_id, status).await? {
            debug!("No VIP membership to mark {} for user {}", status.as_str(), user_id);
            return Err(Error::NotFound(format!("VIP membership for user {}", user_id)));
        }
        tx.commit().await?;
        info!("VIP membership of user {} is now {}", user_id, status.as_str());
        Ok(())
    }

    pub async fn vip_membership(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<VipMembership>> {
        let membership = store::get_membership(self.db().pool(), user_id).await?;
        Ok(membership.map(|m| effective_membership(m, now)))
    }

    /// Multiplier to quote with for `user_id` at `now`
    pub async fn vip_multiplier(&self, user_id: i64, now: DateTime<Utc>) -> Result<Option<Decimal>> {
        let membership = store::get_membership(self.db().pool(), user_id).await?;
        Ok(membership.and_then(|m| m.active_multiplier(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EngineConfig, RewardsEngine};
    use chrono::Duration;
    use rewards_persistence::Database;
    use std::sync::Arc;

    async fn engine() -> RewardsEngine {
        let db = Database::connect_in_memory().await.unwrap();
        RewardsEngine::new(Arc::new(db), EngineConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_window_controls_multiplier() {
        let engine = engine().await;
        let now = Utc::now();
        engine
            .activate_vip(1, now - Duration::days(1), now + Duration::days(29), None)
            .await
            .unwrap();

        assert_eq!(
            engine.vip_multiplier(1, now).await.unwrap(),
            Some(default_vip_multiplier())
        );
        assert_eq!(engine.vip_multiplier(1, now + Duration::days(30)).await.unwrap(), None);

        let lapsed = engine
            .vip_membership(1, now + Duration::days(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lapsed.status, VipStatus::Expired);
    }

    #[tokio::test]
    async fn test_cancel_and_suspend() {
        let engine = engine().await;
        let now = Utc::now();
        assert!(matches!(engine.cancel_vip(1).await, Err(Error::NotFound(_))));

        engine
            .activate_vip(1, now, now + Duration::days(30), Some(Decimal::new(2, 0)))
            .await
            .unwrap();
        engine.suspend_vip(1).await.unwrap();
        assert_eq!(engine.vip_multiplier(1, now).await.unwrap(), None);

        engine.cancel_vip(1).await.unwrap();
        let membership = engine.vip_membership(1, now).await.unwrap().unwrap();
        assert_eq!(membership.status, VipStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_rejects_bad_window() {
        let engine = engine().await;
        let now = Utc::now();
        let err = engine.activate_vip(1, now, now, None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }
}
