use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::{DbError, DomainError, DomainResult};

use super::types::{ExportRun, ExportedFile, RunStatus, RunTrigger};

/// Persisted history of export runs.
#[async_trait]
pub trait ExportRunRepository: Send + Sync {
    async fn create_run(&self, run: &ExportRun) -> DomainResult<()>;
    async fn update_status(&self, id: Uuid, status: RunStatus) -> DomainResult<()>;
    async fn mark_completed(
        &self,
        id: Uuid,
        rows_written: i64,
        file: Option<&ExportedFile>,
    ) -> DomainResult<()>;
    async fn mark_failed(&self, id: Uuid, rows_written: i64, error: &str) -> DomainResult<()>;
    async fn find_by_id(&self, id: Uuid) -> DomainResult<ExportRun>;
    /// Most recently started first
    async fn list_recent(&self, limit: i64) -> DomainResult<Vec<ExportRun>>;
}

pub struct SqliteExportRunRepository {
    pool: SqlitePool,
}

impl SqliteExportRunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ExportRunRow {
    id: String,
    job_name: String,
    run_token: i64,
    trigger_kind: String,
    status: String,
    started_at: String,
    finished_at: Option<String>,
    rows_written: i64,
    file_name: Option<String>,
    file_size: Option<i64>,
    checksum: Option<String>,
    error_message: Option<String>,
}

/// Fixed-width RFC 3339 so `started_at` sorts as text.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| DomainError::Internal(format!("Bad timestamp {}: {}", value, e)))
}

impl ExportRunRow {
    fn into_entity(self) -> DomainResult<ExportRun> {
        let status: RunStatus = self.status.parse()?;
        let trigger: RunTrigger = self.trigger_kind.parse()?;

        Ok(ExportRun {
            id: Uuid::parse_str(&self.id).map_err(|e| DomainError::InvalidUuid(e.to_string()))?,
            job_name: self.job_name,
            run_token: self.run_token,
            trigger,
            status,
            started_at: parse_timestamp(&self.started_at)?,
            finished_at: self.finished_at.as_deref().map(parse_timestamp).transpose()?,
            rows_written: self.rows_written,
            file_name: self.file_name,
            file_size: self.file_size,
            checksum: self.checksum,
            error_message: self.error_message,
        })
    }
}

#[async_trait]
impl ExportRunRepository for SqliteExportRunRepository {
    async fn create_run(&self, run: &ExportRun) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO export_runs (id, job_name, run_token, trigger_kind, status, started_at, finished_at, rows_written, file_name, file_size, checksum, error_message) VALUES (?,?,?,?,?,?,?,?,?,?,?,?)"
        )
        .bind(run.id.to_string())
        .bind(&run.job_name)
        .bind(run.run_token)
        .bind(run.trigger.as_str())
        .bind(run.status.as_str())
        .bind(format_timestamp(run.started_at))
        .bind(run.finished_at.map(format_timestamp))
        .bind(run.rows_written)
        .bind(&run.file_name)
        .bind(run.file_size)
        .bind(&run.checksum)
        .bind(&run.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: RunStatus) -> DomainResult<()> {
        let result = sqlx::query("UPDATE export_runs SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound("export_runs".to_string(), id.to_string()).into());
        }
        Ok(())
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        rows_written: i64,
        file: Option<&ExportedFile>,
    ) -> DomainResult<()> {
        sqlx::query(
            "UPDATE export_runs SET status = ?, finished_at = ?, rows_written = ?, file_name = ?, file_size = ?, checksum = ?, error_message = NULL WHERE id = ?"
        )
        .bind(RunStatus::Completed.as_str())
        .bind(format_timestamp(Utc::now()))
        .bind(rows_written)
        .bind(file.map(|f| f.file_name.clone()))
        .bind(file.map(|f| f.size as i64))
        .bind(file.map(|f| f.checksum.clone()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, rows_written: i64, error: &str) -> DomainResult<()> {
        sqlx::query(
            "UPDATE export_runs SET status = ?, finished_at = ?, rows_written = ?, error_message = ? WHERE id = ?"
        )
        .bind(RunStatus::Failed.as_str())
        .bind(format_timestamp(Utc::now()))
        .bind(rows_written)
        .bind(error)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> DomainResult<ExportRun> {
        let row: Option<ExportRunRow> = sqlx::query_as("SELECT * FROM export_runs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| DomainError::EntityNotFound("ExportRun".to_string(), id.to_string()))?
            .into_entity()
    }

    async fn list_recent(&self, limit: i64) -> DomainResult<Vec<ExportRun>> {
        let rows: Vec<ExportRunRow> = sqlx::query_as(
            "SELECT * FROM export_runs ORDER BY started_at DESC, run_token DESC LIMIT ?"
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ExportRunRow::into_entity).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::path::PathBuf;

    pub(crate) async fn manifest_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(include_str!("../../../migrations/20250601000100_create_export_runs.sql"))
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let repo = SqliteExportRunRepository::new(manifest_pool().await);
        let run = ExportRun::new(RunTrigger::OnDemand, 1_717_243_200_000);
        repo.create_run(&run).await.unwrap();

        let found = repo.find_by_id(run.id).await.unwrap();
        assert_eq!(found.id, run.id);
        assert_eq!(found.trigger, RunTrigger::OnDemand);
        assert_eq!(found.status, RunStatus::Started);
        assert_eq!(found.run_token, 1_717_243_200_000);
        assert!(found.finished_at.is_none());
    }

    #[tokio::test]
    async fn test_completion_records_file() {
        let repo = SqliteExportRunRepository::new(manifest_pool().await);
        let run = ExportRun::new(RunTrigger::Scheduled, 1);
        repo.create_run(&run).await.unwrap();
        repo.update_status(run.id, RunStatus::Writing).await.unwrap();

        let file = ExportedFile {
            file_name: "customers_20240601_120000.xlsx".to_string(),
            path: PathBuf::from("app/output/customers_20240601_120000.xlsx"),
            size: 4096,
            checksum: "ab".repeat(32),
        };
        repo.mark_completed(run.id, 2, Some(&file)).await.unwrap();

        let found = repo.find_by_id(run.id).await.unwrap();
        assert_eq!(found.status, RunStatus::Completed);
        assert_eq!(found.rows_written, 2);
        assert_eq!(found.file_name.as_deref(), Some("customers_20240601_120000.xlsx"));
        assert_eq!(found.file_size, Some(4096));
        assert!(found.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_failure_records_error() {
        let repo = SqliteExportRunRepository::new(manifest_pool().await);
        let run = ExportRun::new(RunTrigger::OnDemand, 2);
        repo.create_run(&run).await.unwrap();
        repo.mark_failed(run.id, 0, "Source read error: unreachable").await.unwrap();

        let found = repo.find_by_id(run.id).await.unwrap();
        assert_eq!(found.status, RunStatus::Failed);
        assert_eq!(found.error_message.as_deref(), Some("Source read error: unreachable"));
        assert!(found.file_name.is_none());
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let repo = SqliteExportRunRepository::new(manifest_pool().await);
        let missing = Uuid::new_v4();
        assert!(matches!(
            repo.find_by_id(missing).await,
            Err(DomainError::EntityNotFound(_, _))
        ));
        assert!(matches!(
            repo.update_status(missing, RunStatus::Reading).await,
            Err(DomainError::Database(DbError::NotFound(_, _)))
        ));
    }

    #[tokio::test]
    async fn test_list_recent_newest_first() {
        let repo = SqliteExportRunRepository::new(manifest_pool().await);
        let mut older = ExportRun::new(RunTrigger::Scheduled, 10);
        older.started_at = Utc::now() - chrono::Duration::hours(1);
        let newer = ExportRun::new(RunTrigger::OnDemand, 20);
        repo.create_run(&older).await.unwrap();
        repo.create_run(&newer).await.unwrap();

        let runs = repo.list_recent(10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, newer.id);
        assert_eq!(runs[1].id, older.id);

        assert_eq!(repo.list_recent(1).await.unwrap().len(), 1);
    }
}
