use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use uuid::Uuid;

use crate::domains::customer::{Customer, CustomerSource};
use crate::domains::export::repository::ExportRunRepository;
use crate::domains::export::types::*;
use crate::domains::export::writer::{TabularWriter, TabularWriterFactory};

/// Something the launcher can run under a job name.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    fn name(&self) -> &str;
    async fn process(&self, run: ExportRun) -> ExportResult<RunSummary>;

    /// Called when `process` panicked and never reported an outcome.
    async fn abandon(&self, _run_id: Uuid, _reason: &str) {}
}

/// Counters accumulated while streaming a run.
#[derive(Debug, Default, Clone, Copy)]
struct Progress {
    rows: usize,
    chunks: usize,
}

/// Reads every customer and commits them to a writer session in fixed-size
/// chunks. No retry, no skip: the first read or write error fails the run.
pub struct CustomerExportJob {
    source: Arc<dyn CustomerSource>,
    writers: Arc<dyn TabularWriterFactory>,
    runs: Arc<dyn ExportRunRepository>,
    chunk_size: usize,
}

impl CustomerExportJob {
    pub fn new(
        source: Arc<dyn CustomerSource>,
        writers: Arc<dyn TabularWriterFactory>,
        runs: Arc<dyn ExportRunRepository>,
    ) -> Self {
        Self {
            source,
            writers,
            runs,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Execute one run end to end and record its outcome in the manifest.
    pub async fn run(&self, run: ExportRun) -> ExportResult<RunSummary> {
        log::info!(
            "Starting {} run {} (token {}, trigger {})",
            run.job_name,
            run.id,
            run.run_token,
            run.trigger
        );

        self.runs
            .create_run(&run)
            .await
            .map_err(ExportError::Manifest)?;

        let mut writer = match self.writers.open(run.id) {
            Ok(writer) => writer,
            Err(e) => {
                self.record_failure(&run, 0, &e).await;
                return Err(e);
            }
        };

        let progress = match self.stream_chunks(&run, writer.as_mut()).await {
            Ok(progress) => progress,
            Err(e) => {
                let rows = writer.rows_written();
                writer.abort().await;
                self.record_failure(&run, rows, &e).await;
                return Err(e);
            }
        };

        let file = match writer.finalize().await {
            Ok(file) => file,
            Err(e) => {
                self.record_failure(&run, progress.rows, &e).await;
                return Err(e);
            }
        };

        if let Err(e) = self
            .runs
            .mark_completed(run.id, progress.rows as i64, file.as_ref())
            .await
        {
            log::error!("Run {} completed but manifest update failed: {}", run.id, e);
        }
        log::info!(
            "Run {} completed: {} rows in {} chunks, file {}",
            run.id,
            progress.rows,
            progress.chunks,
            file.as_ref().map(|f| f.file_name.as_str()).unwrap_or("<none>")
        );
        Ok(RunSummary {
            run_id: run.id,
            run_token: run.run_token,
            rows_written: progress.rows,
            chunks_committed: progress.chunks,
            file,
        })
    }

    async fn stream_chunks(
        &self,
        run: &ExportRun,
        writer: &mut dyn TabularWriter,
    ) -> ExportResult<Progress> {
        self.set_status(run, RunStatus::Reading).await;

        let mut progress = Progress::default();
        let mut chunk: Vec<Customer> = Vec::with_capacity(self.chunk_size);
        let mut customers = self.source.stream_customers();

        while let Some(next) = customers.next().await {
            chunk.push(next.map_err(ExportError::SourceRead)?);
            if chunk.len() == self.chunk_size {
                self.commit(run, writer, &mut chunk, &mut progress).await?;
            }
        }
        if !chunk.is_empty() {
            self.commit(run, writer, &mut chunk, &mut progress).await?;
        }

        Ok(progress)
    }

    async fn commit(
        &self,
        run: &ExportRun,
        writer: &mut dyn TabularWriter,
        chunk: &mut Vec<Customer>,
        progress: &mut Progress,
    ) -> ExportResult<()> {
        if progress.chunks == 0 {
            self.set_status(run, RunStatus::Writing).await;
        }
        writer.write_chunk(chunk.as_slice()).await?;
        progress.rows += chunk.len();
        progress.chunks += 1;
        log::debug!(
            "Run {} committed chunk {} ({} rows)",
            run.id,
            progress.chunks,
            chunk.len()
        );
        chunk.clear();
        Ok(())
    }

    async fn set_status(&self, run: &ExportRun, status: RunStatus) {
        if let Err(e) = self.runs.update_status(run.id, status).await {
            log::warn!("Failed to mark run {} as {}: {}", run.id, status.as_str(), e);
        }
    }

    async fn record_failure(&self, run: &ExportRun, rows: usize, error: &ExportError) {
        log::error!("Run {} failed: {}", run.id, error);
        if let Err(e) = self.runs.mark_failed(run.id, rows as i64, &error.to_string()).await {
            log::error!("Failed to record failure of run {}: {}", run.id, e);
        }
    }
}

#[async_trait]
impl JobProcessor for CustomerExportJob {
    fn name(&self) -> &str {
        JOB_NAME
    }

    async fn process(&self, run: ExportRun) -> ExportResult<RunSummary> {
        self.run(run).await
    }

    async fn abandon(&self, run_id: Uuid, reason: &str) {
        if let Err(e) = self.runs.mark_failed(run_id, 0, reason).await {
            log::error!("Failed to record abandoned run {}: {}", run_id, e);
        }
    }
}
