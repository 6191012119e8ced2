use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::errors::DbResult;

/// Open the customer/manifest pool.
///
/// WAL lets the manifest be updated while a run's read cursor is open.
pub async fn connect(database_url: &str, max_connections: u32) -> DbResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    log::debug!("Connecting to {} (max {} connections)", database_url, max_connections);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await?;
    log::info!("Database connection established");
    Ok(pool)
}
