use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::errors::DomainError;

/// Name used to key the single-flight guard and the manifest.
pub const JOB_NAME: &str = "customerExportJob";

/// Records per writer commit.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

pub const FILE_PREFIX: &str = "customers_";
pub const FILE_SUFFIX: &str = ".xlsx";
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
pub const TODAY_DATE_FORMAT: &str = "%Y%m%d";

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Source of "now" for file naming. Swapped out in tests.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Wall clock in the process's local time zone.
pub fn local_clock() -> Clock {
    Arc::new(|| chrono::Local::now().naive_local())
}

/// `customers_<yyyyMMdd_HHmmss>.xlsx`
pub fn export_file_name(timestamp: NaiveDateTime) -> String {
    format!("{}{}{}", FILE_PREFIX, timestamp.format(FILE_TIMESTAMP_FORMAT), FILE_SUFFIX)
}

/// `customers_<yyyyMMdd>.xlsx`, the name the today-lookup asks for.
pub fn today_file_name(date: NaiveDate) -> String {
    format!("{}{}{}", FILE_PREFIX, date.format(TODAY_DATE_FORMAT), FILE_SUFFIX)
}

/// Export pipeline errors
#[derive(Debug, Error)]
pub enum ExportError {
    /// The customer store could not be read or returned a malformed row
    #[error("Source read error: {0}")]
    SourceRead(#[source] DomainError),

    /// Serialising or persisting the workbook failed
    #[error("Write error: {0}")]
    Write(String),

    #[error("File not found: {0}")]
    NotFound(String),

    /// Requested download name is not an export file name
    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    /// The run could not be handed off to an execution context
    #[error("Launch error: {0}")]
    Launch(String),

    /// A launched run ended in failure
    #[error("Job failed: {0}")]
    JobFailed(String),

    /// Another run of the same job is in flight
    #[error("Job {0} is already running")]
    AlreadyRunning(String),

    /// Run manifest could not be read or written
    #[error("Manifest error: {0}")]
    Manifest(#[source] DomainError),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ExportResult<T> = Result<T, ExportError>;

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Scheduled,
    OnDemand,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunTrigger::Scheduled => "scheduled",
            RunTrigger::OnDemand => "on_demand",
        }
    }

}

impl FromStr for RunTrigger {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(RunTrigger::Scheduled),
            "on_demand" => Ok(RunTrigger::OnDemand),
            _ => Err(DomainError::Internal(format!("Unknown run trigger: {}", s))),
        }
    }
}

impl fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-run state machine:
/// `Started -> Reading -> (Writing)* -> Completed`, or `... -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Started,
    Reading,
    Writing,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Started => "started",
            RunStatus::Reading => "reading",
            RunStatus::Writing => "writing",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl FromStr for RunStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(RunStatus::Started),
            "reading" => Ok(RunStatus::Reading),
            "writing" => Ok(RunStatus::Writing),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(DomainError::Internal(format!("Unknown run status: {}", s))),
        }
    }
}

/// Row mapped to the `export_runs` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRun {
    pub id: Uuid,
    pub job_name: String,
    pub run_token: i64,
    pub trigger: RunTrigger,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub rows_written: i64,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub checksum: Option<String>,
    pub error_message: Option<String>,
}

impl ExportRun {
    pub fn new(trigger: RunTrigger, run_token: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_name: JOB_NAME.to_string(),
            run_token,
            trigger,
            status: RunStatus::Started,
            started_at: Utc::now(),
            finished_at: None,
            rows_written: 0,
            file_name: None,
            file_size: None,
            checksum: None,
            error_message: None,
        }
    }
}

/// A workbook persisted by a finalised writer session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedFile {
    pub file_name: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub size: u64,
    /// Hex SHA-256 of the file contents
    pub checksum: String,
}

/// Outcome of one successful run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: Uuid,
    pub run_token: i64,
    pub rows_written: usize,
    pub chunks_committed: usize,
    /// `None` when the source was empty
    pub file: Option<ExportedFile>,
}

/// Catalog entry for one export file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    /// Milliseconds since the Unix epoch
    pub last_modified: i64,
    pub download_url: String,
}

/// Contents of a downloadable export file.
#[derive(Debug, Clone)]
pub struct ExportFileData {
    pub name: String,
    pub bytes: Vec<u8>,
}
