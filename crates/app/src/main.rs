//! Rewards App - ledger reconciliation sweep

use anyhow::Context;
use rewards_engine::RewardsEngine;
use rewards_persistence::Database;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn database_path() -> PathBuf {
    match dotenvy::var("REWARDS_DATABASE") {
        Ok(path) => PathBuf::from(path),
        Err(_) => dirs_next::data_local_dir()
            .map(|p| p.join("RewardsEngine"))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rewards.db"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rewards_app=info,rewards_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = database_path();
    tracing::info!("Opening rewards database at {}", path.display());

    let db = Database::connect(&path)
        .await
        .with_context(|| format!("failed to open database {}", path.display()))?;
    let engine = RewardsEngine::load(Arc::new(db))
        .await
        .context("failed to load engine config")?;

    let reports = engine
        .reconcile_all()
        .await
        .context("reconciliation sweep failed")?;

    let mut inconsistent = 0;
    for report in &reports {
        for mismatch in &report.mismatches {
            tracing::error!(
                "User {}: {} is {} but the journal says {}",
                report.user_id,
                mismatch.field,
                mismatch.actual,
                mismatch.expected
            );
        }
        if !report.is_consistent() {
            inconsistent += 1;
        }
    }

    tracing::info!(
        "Reconciled {} wallet(s), {} inconsistent",
        reports.len(),
        inconsistent
    );

    if inconsistent > 0 {
        anyhow::bail!("{} wallet(s) disagree with the journal", inconsistent);
    }
    Ok(())
}
