use chrono::{DateTime, Utc};
use sha2::{Digest, Sha512};
use sqlx::SqlitePool;

pub(crate) async fn is_table_exists(
    pool: &SqlitePool,
    table_name: &str,
) -> Result<bool, sqlx::Error> {
    Ok(
        sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
            .bind(table_name)
            .fetch_optional(pool)
            .await?
            .is_some(),
    )
}

pub(crate) fn get_now() -> DateTime<Utc> {
    Utc::now()
}

/// Hex encoded SHA-512 of the exact url string. No normalization is applied.
pub fn url_hash<S: AsRef<str>>(url: S) -> String {
    let mut hasher = Sha512::new();
    hasher.update(url.as_ref().as_bytes());
    hex::encode(hasher.finalize())
}
