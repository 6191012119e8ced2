use async_trait::async_trait;
use uuid::Uuid;

use crate::domains::customer::Customer;
use crate::domains::export::types::{ExportResult, ExportedFile};

/// One run's writer session.
///
/// The export job opens a session when a run starts, appends every chunk to
/// it, and then calls exactly one of [`finalize`](TabularWriter::finalize) or
/// [`abort`](TabularWriter::abort). All chunks of a run land in one file.
#[async_trait]
pub trait TabularWriter: Send {
    /// Append a committed chunk. An empty chunk is a no-op.
    async fn write_chunk(&mut self, chunk: &[Customer]) -> ExportResult<()>;

    /// Persist everything appended so far as a single file.
    ///
    /// Returns `Ok(None)` without touching the filesystem when no rows were
    /// appended.
    async fn finalize(self: Box<Self>) -> ExportResult<Option<ExportedFile>>;

    /// Discard the session. Nothing is left at the target path.
    async fn abort(self: Box<Self>);

    /// Rows appended so far
    fn rows_written(&self) -> usize;
}

/// Opens a fresh writer session per run.
pub trait TabularWriterFactory: Send + Sync {
    fn open(&self, run_id: Uuid) -> ExportResult<Box<dyn TabularWriter>>;
}
