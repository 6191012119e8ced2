use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::task;
use uuid::Uuid;

use crate::domains::customer::Customer;
use crate::domains::export::types::{export_file_name, Clock, ExportError, ExportResult, ExportedFile};
use crate::domains::export::writer::{TabularWriter, TabularWriterFactory};
use crate::domains::export::writers::workbook::{Cell, SheetBuilder};

pub const SHEET_NAME: &str = "Customers";

pub const HEADERS: [&str; 8] = [
    "Customer ID",
    "Name",
    "Email",
    "Mobile Number",
    "Created At",
    "Created By",
    "Updated At",
    "Updated By",
];

/// Opens one [`XlsxWriter`] per run, all writing into `output_dir`.
pub struct XlsxWriterFactory {
    output_dir: PathBuf,
    clock: Clock,
}

impl XlsxWriterFactory {
    pub fn new(output_dir: impl Into<PathBuf>, clock: Clock) -> Self {
        Self {
            output_dir: output_dir.into(),
            clock,
        }
    }
}

impl TabularWriterFactory for XlsxWriterFactory {
    fn open(&self, run_id: Uuid) -> ExportResult<Box<dyn TabularWriter>> {
        Ok(Box::new(XlsxWriter::new(run_id, self.output_dir.clone(), self.clock.clone())))
    }
}

/// Collects a run's chunks into one worksheet and persists it on finalize.
pub struct XlsxWriter {
    run_id: Uuid,
    output_dir: PathBuf,
    clock: Clock,
    sheet: SheetBuilder,
}

impl XlsxWriter {
    pub fn new(run_id: Uuid, output_dir: PathBuf, clock: Clock) -> Self {
        Self {
            run_id,
            output_dir,
            clock,
            sheet: SheetBuilder::new(SHEET_NAME, &HEADERS),
        }
    }

    fn to_row(customer: &Customer) -> Vec<Cell> {
        vec![
            Cell::Number(customer.customer_id),
            Cell::Text(customer.name.clone()),
            Cell::Text(customer.email.clone()),
            Cell::Text(customer.mobile_number.clone()),
            Cell::Text(customer.created_at_display()),
            Cell::Text(customer.created_by.clone()),
            Cell::Text(customer.updated_at_display()),
            Cell::Text(customer.updated_by.clone().unwrap_or_default()),
        ]
    }
}

#[async_trait]
impl TabularWriter for XlsxWriter {
    async fn write_chunk(&mut self, chunk: &[Customer]) -> ExportResult<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        for customer in chunk {
            self.sheet.push_row(Self::to_row(customer));
        }
        log::debug!(
            "Run {} appended {} rows ({} total)",
            self.run_id,
            chunk.len(),
            self.sheet.row_count()
        );
        Ok(())
    }

    async fn finalize(self: Box<Self>) -> ExportResult<Option<ExportedFile>> {
        if self.sheet.row_count() == 0 {
            log::info!("Run {} produced no rows, no file written", self.run_id);
            return Ok(None);
        }

        let run_id = self.run_id;
        let XlsxWriter { output_dir, clock, sheet, .. } = *self;

        let exported = task::spawn_blocking(move || persist_workbook(&output_dir, &clock, &sheet))
            .await
            .map_err(|e| ExportError::Write(format!("Writer task join error: {}", e)))??;

        log::info!(
            "Run {} wrote {} ({} bytes)",
            run_id,
            exported.file_name,
            exported.size
        );
        Ok(Some(exported))
    }

    async fn abort(self: Box<Self>) {
        log::warn!(
            "Run {} aborted, discarding {} buffered rows",
            self.run_id,
            self.sheet.row_count()
        );
    }

    fn rows_written(&self) -> usize {
        self.sheet.row_count()
    }
}

/// Serialise the sheet, write it to a temp file beside the target and rename
/// it into place. A file with the same name is replaced.
fn persist_workbook(output_dir: &Path, clock: &Clock, sheet: &SheetBuilder) -> ExportResult<ExportedFile> {
    std::fs::create_dir_all(output_dir)
        .map_err(|e| ExportError::Write(format!("Failed to create {}: {}", output_dir.display(), e)))?;

    let bytes = sheet
        .write_package(Cursor::new(Vec::new()))
        .map_err(|e| ExportError::Write(format!("Failed to build workbook: {}", e)))?
        .into_inner();

    let file_name = export_file_name(clock());
    let path = output_dir.join(&file_name);

    let mut temp = NamedTempFile::new_in(output_dir)
        .map_err(|e| ExportError::Write(format!("Failed to create temp file: {}", e)))?;
    temp.write_all(&bytes)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| ExportError::Write(format!("Failed to write {}: {}", file_name, e)))?;
    temp.persist(&path)
        .map_err(|e| ExportError::Write(format!("Failed to move {} into place: {}", file_name, e.error)))?;

    Ok(ExportedFile {
        file_name,
        path,
        size: bytes.len() as u64,
        checksum: hex::encode(Sha256::digest(&bytes)),
    })
}
