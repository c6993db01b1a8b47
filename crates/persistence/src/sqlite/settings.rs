//! Key/value settings stored as JSON

use rewards_core::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::SqliteExecutor;

pub async fn load_setting<'e, T: DeserializeOwned>(
    executor: impl SqliteExecutor<'e>,
    key: &str,
) -> Result<Option<T>> {
    let json: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(executor)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

    match json {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

pub async fn save_setting<'e, T: Serialize>(
    executor: impl SqliteExecutor<'e>,
    key: &str,
    value: &T,
) -> Result<()> {
    let json = serde_json::to_string(value)?;
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = ?2",
    )
    .bind(key)
    .bind(&json)
    .execute(executor)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(())
}
