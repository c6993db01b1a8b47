//! Rewards engine: the operations exposed to request handlers
//!
//! Every mutating operation runs in one write transaction: usage, journal,
//! wallet, account and VIP mirror either all commit or none do.
//! Notifications go out after the commit.

use crate::caps::{self, DailyHeadroom};
use crate::calculator::quote_reward;
use crate::config::{load_engine_config, EngineConfig};
use crate::eligibility::check_eligibility;
use crate::journal;
use crate::ledger::{self, ReconcileReport};
use crate::notify::{Notifier, TracingNotifier};
use crate::streak;
use chrono::{DateTime, Utc};
use rewards_core::{
    round_cashback, to_cents, validate_amount, Account, DailyClaim, DailyRewardRecord, Error,
    NewTransaction, Notification, NotificationKind, Result, RewardQuote, RewardSource, StreakState,
    StreakStatus, Transaction, TransactionFilter, TransactionKind, TransactionStatus, UsagePolicy,
    UserProfile, Wallet, DAILY_LOGIN_SOURCE_ID,
};
use rewards_persistence::sqlite::{self as store, MAX_PAGE_SIZE};
use rewards_persistence::Database;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use sqlx::SqliteConnection;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of `apply_reward`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedReward {
    pub wallet: Wallet,
    pub transaction: Transaction,
}

/// Outcome of `claim_source_reward`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRewardClaim {
    pub quote: RewardQuote,
    pub wallet: Wallet,
    pub transaction: Transaction,
}

pub struct RewardsEngine {
    db: Arc<Database>,
    config: EngineConfig,
    notifier: Arc<dyn Notifier>,
}

impl RewardsEngine {
    pub fn new(db: Arc<Database>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            db,
            config,
            notifier: Arc::new(TracingNotifier),
        })
    }

    /// Build an engine with the config stored in the database
    pub async fn load(db: Arc<Database>) -> Result<Self> {
        let config = load_engine_config(&db).await?;
        Self::new(db, config)
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    /// Best-effort; a failed notification is logged and dropped
    pub(crate) fn dispatch(&self, user_id: i64, notification: Notification) {
        if let Err(e) = self.notifier.notify(user_id, &notification) {
            warn!(
                "Notification {:?} to user {} failed: {}",
                notification.kind, user_id, e
            );
        }
    }

    /// Journal a completed credit and apply it to wallet, account and VIP mirror
    pub(crate) async fn credit_reward(
        &self,
        conn: &mut SqliteConnection,
        new: NewTransaction,
        vip_applied: bool,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        let user_id = new.user_id;
        let cents = to_cents(new.amount)?;

        ledger::open(&mut *conn, user_id, self.config.minimum_withdrawal_cents()?, now).await?;
        let transaction =
            journal::record(&mut *conn, &new, now, self.config.max_reference_attempts).await?;

        if cents > 0 {
            ledger::add_funds(&mut *conn, user_id, new.amount, now).await?;
        }
        store::adjust_account(&mut *conn, user_id, new.points, cents, cents).await?;
        if vip_applied {
            store::record_vip_usage(&mut *conn, user_id, new.points, cents, now).await?;
        }

        Ok(transaction)
    }

    pub(crate) async fn wallet_in(&self, conn: &mut SqliteConnection, user_id: i64) -> Result<Wallet> {
        Ok(store::get_wallet(conn, user_id)
            .await?
            .unwrap_or_else(|| self.empty_wallet(user_id)))
    }

    fn empty_wallet(&self, user_id: i64) -> Wallet {
        Wallet {
            user_id,
            balance: Decimal::ZERO,
            pending_balance: Decimal::ZERO,
            total_earned: Decimal::ZERO,
            total_withdrawn: Decimal::ZERO,
            minimum_withdrawal: self.config.minimum_withdrawal,
            updated_at: None,
        }
    }

    /// Quote `source` for `user_id` as of `now`, without applying anything
    pub async fn quote_reward(
        &self,
        source: &RewardSource,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<RewardQuote> {
        let multiplier = self.vip_multiplier(user_id, now).await?;
        quote_reward(source, multiplier)
    }

    /// Apply a precomputed quote exactly once per idempotency key
    pub async fn apply_reward(
        &self,
        user_id: i64,
        quote: RewardQuote,
        idempotency_key: &str,
        description: &str,
    ) -> Result<AppliedReward> {
        validate_quote(&quote)?;
        if idempotency_key.trim().is_empty() {
            return Err(Error::InvalidData("idempotency key is required".to_string()));
        }

        let now = Utc::now();
        let description = if description.trim().is_empty() {
            "Reward"
        } else {
            description
        };
        let new = NewTransaction::credit(user_id, TransactionKind::Reward, quote.cashback, quote.points)
            .with_description(description)
            .with_idempotency_key(idempotency_key);

        let result: Result<AppliedReward> = async {
            let mut tx = self.db.begin_write().await?;
            let transaction = self.credit_reward(tx.conn(), new, false, now).await?;
            let wallet = self.wallet_in(tx.conn(), user_id).await?;
            tx.commit().await?;
            Ok(AppliedReward {
                wallet,
                transaction,
            })
        }
        .await;

        let applied = result.map_err(|e| ledger::escalate(e, "apply reward"))?;
        info!(
            "Applied reward {} to user {}: {} points, {} cashback",
            applied.transaction.reference_id, user_id, quote.points, quote.cashback
        );
        self.dispatch(
            user_id,
            reward_notification(NotificationKind::RewardEarned, "Reward earned", &quote, &applied.transaction),
        );
        Ok(applied)
    }

    /// Full pipeline for a completed catalog source:
    /// eligibility, quote, usage cap, then ledger credit.
    pub async fn claim_source_reward(
        &self,
        profile: &UserProfile,
        source: &RewardSource,
        completion_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SourceRewardClaim> {
        let user_id = profile.user_id;
        let idempotency_key = match source.usage_policy() {
            UsagePolicy::Repeatable(_) => {
                if completion_id.trim().is_empty() {
                    return Err(Error::InvalidData(
                        "completion id is required for repeatable sources".to_string(),
                    ));
                }
                format!("{}:{}:{}", source.kind().as_str(), source.source_id(), completion_id)
            }
            UsagePolicy::OneShot if !matches!(source, RewardSource::Receipt(_)) => {
                format!("{}:{}", source.kind().as_str(), source.source_id())
            }
            UsagePolicy::OneShot => {
                return Err(Error::InvalidSourceConfig(
                    "receipts are claimed through submit_receipt".to_string(),
                ))
            }
            UsagePolicy::OncePerDay => {
                return Err(Error::InvalidSourceConfig(
                    "daily login is claimed through claim_daily_reward".to_string(),
                ))
            }
        };

        let multiplier = self.vip_multiplier(user_id, now).await?;
        if let Err(e) = check_eligibility(source, profile, multiplier.is_some(), now) {
            debug!("User {} not eligible for {}: {}", user_id, source.source_id(), e);
            return Err(e);
        }

        let quote = quote_reward(source, multiplier)?;
        if quote.is_empty() {
            return Err(Error::InvalidSourceConfig(format!(
                "{} grants no reward",
                source.source_id()
            )));
        }

        let day = self.config.day_boundary().day_of(now);
        let vip_applied = multiplier.is_some() && source.vip_boosted();
        let new = NewTransaction::credit(user_id, TransactionKind::Reward, quote.cashback, quote.points)
            .with_description(source.label())
            .with_source(source.source_id())
            .with_idempotency_key(idempotency_key);

        let result: Result<(Transaction, Wallet)> = async {
            let mut tx = self.db.begin_write().await?;
            caps::consume(tx.conn(), user_id, source, &quote, day, now).await?;
            let transaction = self.credit_reward(tx.conn(), new, vip_applied, now).await?;
            let wallet = self.wallet_in(tx.conn(), user_id).await?;
            tx.commit().await?;
            Ok((transaction, wallet))
        }
        .await;

        let (transaction, wallet) = match result {
            Ok(applied) => applied,
            Err(e) if e.is_duplicate() || matches!(e, Error::DailyCapReached { .. }) => {
                debug!("Claim of {} by user {} refused: {}", source.source_id(), user_id, e);
                return Err(e);
            }
            Err(e) => return Err(ledger::escalate(e, "claim source reward")),
        };

        info!(
            "User {} earned {} points and {} cashback from {} ({})",
            user_id,
            quote.points,
            quote.cashback,
            source.source_id(),
            transaction.reference_id
        );
        self.dispatch(
            user_id,
            reward_notification(NotificationKind::RewardEarned, &source.label(), &quote, &transaction),
        );

        Ok(SourceRewardClaim {
            quote,
            wallet,
            transaction,
        })
    }

    /// Claim today's login reward; the day comes from the configured boundary
    pub async fn claim_daily_reward(&self, user_id: i64, now: DateTime<Utc>) -> Result<DailyClaim> {
        let day = self.config.day_boundary().day_of(now);

        let result: Result<DailyClaim> = async {
            let mut tx = self.db.begin_write().await?;
            if store::daily_reward_exists(tx.conn(), user_id, day).await? {
                return Err(Error::AlreadyClaimed(day));
            }

            let state = store::get_streak(tx.conn(), user_id)
                .await?
                .unwrap_or_else(|| StreakState::new(user_id));
            let next = streak::advance(&state, day)?;
            let source = RewardSource::DailyLogin {
                streak: next.current_streak,
            };
            let quote = quote_reward(&source, None)?;

            let record = DailyRewardRecord {
                user_id,
                reward_date: day,
                points: quote.points,
                cashback: quote.cashback,
                streak: next.current_streak,
                claimed_at: now,
            };
            if !store::insert_daily_reward(tx.conn(), &record).await? {
                return Err(Error::AlreadyClaimed(day));
            }
            store::upsert_streak(tx.conn(), &next).await?;

            let new = NewTransaction::credit(
                user_id,
                TransactionKind::DailyReward,
                quote.cashback,
                quote.points,
            )
            .with_description(source.label())
            .with_source(DAILY_LOGIN_SOURCE_ID)
            .with_idempotency_key(format!("daily:{}", day));
            let transaction = self.credit_reward(tx.conn(), new, false, now).await?;
            tx.commit().await?;

            Ok(DailyClaim {
                record,
                streak: next,
                transaction,
            })
        }
        .await;

        let claim = match result {
            Ok(claim) => claim,
            Err(e @ Error::AlreadyClaimed(_)) => {
                debug!("User {} already claimed the daily reward for {}", user_id, day);
                return Err(e);
            }
            Err(e @ Error::NotEligible(_)) => {
                debug!("User {} cannot claim the daily reward for {}: {}", user_id, day, e);
                return Err(e);
            }
            Err(e) => return Err(ledger::escalate(e, "claim daily reward")),
        };

        info!(
            "User {} claimed daily reward for {} (streak {}): {} points, {} cashback",
            user_id, day, claim.streak.current_streak, claim.record.points, claim.record.cashback
        );
        let quote = RewardQuote::new(claim.record.points, claim.record.cashback);
        self.dispatch(
            user_id,
            reward_notification(
                NotificationKind::DailyReward,
                &format!("Day {} streak", claim.streak.current_streak),
                &quote,
                &claim.transaction,
            ),
        );
        Ok(claim)
    }

    pub async fn streak_status(&self, user_id: i64, now: DateTime<Utc>) -> Result<StreakStatus> {
        let day = self.config.day_boundary().day_of(now);
        let state = store::get_streak(self.db.pool(), user_id)
            .await?
            .unwrap_or_else(|| StreakState::new(user_id));
        Ok(streak::status(&state, day))
    }

    pub async fn daily_history(&self, user_id: i64, limit: u32) -> Result<Vec<DailyRewardRecord>> {
        store::list_daily_rewards(self.db.pool(), user_id, limit.clamp(1, MAX_PAGE_SIZE)).await
    }

    pub async fn remaining_today(
        &self,
        user_id: i64,
        source: &RewardSource,
        now: DateTime<Utc>,
    ) -> Result<Option<DailyHeadroom>> {
        let day = self.config.day_boundary().day_of(now);
        caps::remaining_today(self.db.pool(), user_id, source, day).await
    }

    /// Request a withdrawal; the debit stays pending until settled
    pub async fn withdraw(&self, user_id: i64, amount: Decimal) -> Result<Transaction> {
        validate_amount(amount)?;
        to_cents(amount)?;
        let now = Utc::now();

        let result: Result<Transaction> = async {
            let mut tx = self.db.begin_write().await?;
            // a refused withdrawal rolls the freshly opened rows back
            ledger::open(tx.conn(), user_id, self.config.minimum_withdrawal_cents()?, now).await?;
            ledger::withdraw_funds(tx.conn(), user_id, amount, now).await?;
            store::adjust_account(tx.conn(), user_id, 0, -to_cents(amount)?, 0).await?;
            let new = NewTransaction::withdrawal(user_id, amount);
            let transaction =
                journal::record(tx.conn(), &new, now, self.config.max_reference_attempts).await?;
            tx.commit().await?;
            Ok(transaction)
        }
        .await;

        let transaction = match result {
            Ok(transaction) => transaction,
            Err(
                e @ (Error::BelowMinimumWithdrawal { .. } | Error::InsufficientFunds { .. }),
            ) => {
                debug!("Withdrawal of {} by user {} refused: {}", amount, user_id, e);
                return Err(e);
            }
            Err(e) => return Err(ledger::escalate(e, "withdraw")),
        };

        info!(
            "User {} requested withdrawal {} of {}",
            user_id, transaction.reference_id, amount
        );
        self.dispatch(
            user_id,
            Notification::new(
                NotificationKind::WithdrawalRequested,
                "Withdrawal requested",
                format!("Your withdrawal of {} is being processed", amount),
            )
            .with_data(json!({ "referenceId": transaction.reference_id, "amount": amount })),
        );
        Ok(transaction)
    }

    /// Close a pending withdrawal; a failed payout is refunded to the wallet
    pub async fn settle_withdrawal(&self, reference_id: &str, succeeded: bool) -> Result<Transaction> {
        let now = Utc::now();
        let target = if succeeded {
            TransactionStatus::Completed
        } else {
            TransactionStatus::Failed
        };

        let result: Result<Transaction> = async {
            let mut tx = self.db.begin_write().await?;
            let entry = store::get_transaction_by_reference(tx.conn(), reference_id).await?;
            let Some(mut entry) = entry.filter(|t| t.kind == TransactionKind::Withdrawal) else {
                return Err(Error::NotFound(format!("withdrawal {}", reference_id)));
            };

            let invalid = |from: TransactionStatus| Error::InvalidStatusTransition {
                reference_id: reference_id.to_string(),
                from: from.to_string(),
                to: target.to_string(),
            };
            if !entry.status.can_transition_to(target) {
                return Err(invalid(entry.status));
            }
            if !store::settle_transaction(tx.conn(), reference_id, target, now).await? {
                return Err(invalid(entry.status));
            }

            if !succeeded {
                ledger::refund_withdrawal(tx.conn(), entry.user_id, entry.amount, now).await?;
                store::adjust_account(tx.conn(), entry.user_id, 0, to_cents(entry.amount)?, 0)
                    .await?;
            }
            tx.commit().await?;

            entry.status = target;
            entry.settled_at = Some(now);
            Ok(entry)
        }
        .await;

        let entry = match result {
            Ok(entry) => entry,
            Err(e @ (Error::NotFound(_) | Error::InvalidStatusTransition { .. })) => {
                debug!("Cannot settle {}: {}", reference_id, e);
                return Err(e);
            }
            Err(e) => return Err(ledger::escalate(e, "settle withdrawal")),
        };

        info!("Withdrawal {} settled as {}", reference_id, target);
        self.dispatch(
            entry.user_id,
            Notification::new(
                NotificationKind::WithdrawalSettled,
                if succeeded { "Withdrawal complete" } else { "Withdrawal failed" },
                if succeeded {
                    format!("{} has been paid out", entry.amount)
                } else {
                    format!("{} has been returned to your wallet", entry.amount)
                },
            )
            .with_data(json!({ "referenceId": entry.reference_id, "status": target.as_str() })),
        );
        Ok(entry)
    }

    /// Exchange points for cashback at the configured rate
    pub async fn redeem_points(&self, user_id: i64, points: i64) -> Result<Transaction> {
        let unit = self.config.points_per_cashback_unit;
        if points <= 0 || points % unit != 0 {
            return Err(Error::InvalidAmount(format!(
                "points must be a positive multiple of {}, got {}",
                unit, points
            )));
        }
        let cashback = round_cashback(Decimal::from(points / unit));
        let now = Utc::now();

        let result: Result<Transaction> = async {
            let mut tx = self.db.begin_write().await?;
            if !store::spend_points(tx.conn(), user_id, points).await? {
                let available = store::get_account(tx.conn(), user_id)
                    .await?
                    .map(|a| a.total_points)
                    .unwrap_or(0);
                return Err(Error::InsufficientPoints {
                    required: points,
                    available,
                });
            }

            ledger::open(tx.conn(), user_id, self.config.minimum_withdrawal_cents()?, now).await?;
            let new =
                NewTransaction::credit(user_id, TransactionKind::PointsRedemption, cashback, -points)
                    .with_description(format!("Redeemed {} points", points));
            let transaction =
                journal::record(tx.conn(), &new, now, self.config.max_reference_attempts).await?;
            ledger::add_funds(tx.conn(), user_id, cashback, now).await?;
            store::adjust_account(tx.conn(), user_id, 0, to_cents(cashback)?, 0).await?;
            tx.commit().await?;
            Ok(transaction)
        }
        .await;

        let transaction = match result {
            Ok(transaction) => transaction,
            Err(e @ Error::InsufficientPoints { .. }) => {
                debug!("User {} cannot redeem {} points: {}", user_id, points, e);
                return Err(e);
            }
            Err(e) => return Err(ledger::escalate(e, "redeem points")),
        };

        info!(
            "User {} redeemed {} points for {} ({})",
            user_id, points, cashback, transaction.reference_id
        );
        self.dispatch(
            user_id,
            Notification::new(
                NotificationKind::PointsRedeemed,
                "Points redeemed",
                format!("{} points became {} cashback", points, cashback),
            )
            .with_data(json!({ "referenceId": transaction.reference_id, "points": points })),
        );
        Ok(transaction)
    }

    pub async fn wallet(&self, user_id: i64) -> Result<Wallet> {
        Ok(store::get_wallet(self.db.pool(), user_id)
            .await?
            .unwrap_or_else(|| self.empty_wallet(user_id)))
    }

    pub async fn account(&self, user_id: i64, now: DateTime<Utc>) -> Result<Account> {
        let mut account = store::get_account(self.db.pool(), user_id)
            .await?
            .unwrap_or_else(|| Account::empty(user_id));
        account.is_vip_active = self.vip_multiplier(user_id, now).await?.is_some();
        Ok(account)
    }

    pub async fn transactions(
        &self,
        user_id: i64,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>> {
        store::get_transactions(self.db.pool(), user_id, filter).await
    }

    pub async fn transaction_count(&self, user_id: i64) -> Result<u32> {
        store::count_transactions(self.db.pool(), user_id).await
    }

    pub async fn transaction(&self, reference_id: &str) -> Result<Option<Transaction>> {
        store::get_transaction_by_reference(self.db.pool(), reference_id).await
    }

    /// The entry an idempotency key was applied under, if any
    pub async fn transaction_by_key(
        &self,
        user_id: i64,
        idempotency_key: &str,
    ) -> Result<Option<Transaction>> {
        store::get_transaction_by_key(self.db.pool(), user_id, idempotency_key).await
    }

    /// Compare one user's wallet and account with the journal.
    ///
    /// Holds the writer gate so the snapshot sees no half-applied change.
    pub async fn reconcile(&self, user_id: i64) -> Result<ReconcileReport> {
        let mut tx = self.db.begin_write().await?;
        let report = ledger::reconcile(tx.conn(), user_id).await?;
        Ok(report)
    }

    /// Reconcile every user holding a wallet
    pub async fn reconcile_all(&self) -> Result<Vec<ReconcileReport>> {
        let user_ids = store::list_wallet_user_ids(self.db.pool()).await?;
        let mut reports = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            reports.push(self.reconcile(user_id).await?);
        }
        Ok(reports)
    }
}

fn validate_quote(quote: &RewardQuote) -> Result<()> {
    if quote.points < 0 {
        return Err(Error::InvalidAmount(format!(
            "points must not be negative, got {}",
            quote.points
        )));
    }
    if quote.cashback < Decimal::ZERO || round_cashback(quote.cashback) != quote.cashback {
        return Err(Error::InvalidAmount(format!(
            "cashback {} must be non-negative with at most 2 decimal places",
            quote.cashback
        )));
    }
    if quote.is_empty() {
        return Err(Error::InvalidAmount("quote grants nothing".to_string()));
    }
    to_cents(quote.cashback)?;
    Ok(())
}

fn reward_notification(
    kind: NotificationKind,
    title: &str,
    quote: &RewardQuote,
    transaction: &Transaction,
) -> Notification {
    Notification::new(
        kind,
        title,
        format!("You earned {} points and {} cashback", quote.points, quote.cashback),
    )
    .with_data(json!({
        "referenceId": transaction.reference_id,
        "points": quote.points,
        "cashback": quote.cashback,
    }))
}
