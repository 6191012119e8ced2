pub mod types;
pub mod writer;
pub mod writers;
pub mod repository;
pub mod job;
pub mod launcher;
pub mod scheduler;
pub mod catalog;

pub use types::{ExportError, ExportResult, ExportRun, ExportedFile, FileInfo, RunStatus, RunSummary, RunTrigger};
pub use writer::{TabularWriter, TabularWriterFactory};
pub use writers::XlsxWriterFactory;
pub use repository::{ExportRunRepository, SqliteExportRunRepository};
pub use job::{CustomerExportJob, JobProcessor};
pub use launcher::{JobStatus, RunHandle, RunLauncher};
pub use scheduler::ExportScheduler;
pub use catalog::{FileCatalog, LocalFileCatalog};
