use async_trait::async_trait;
use regex::Regex;
use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::UNIX_EPOCH;
use tokio::fs;

use crate::domains::export::types::*;

pub const DEFAULT_DOWNLOAD_BASE: &str = "/batch/download/";

/// Read-only view over the output directory. The directory listing is the
/// catalog; there is no separate index.
#[async_trait]
pub trait FileCatalog: Send + Sync {
    /// Export files, most recently modified first. A missing directory is an
    /// empty catalog.
    async fn list_files(&self) -> ExportResult<Vec<FileInfo>>;

    async fn get_file(&self, name: &str) -> ExportResult<ExportFileData>;

    /// Looks up `customers_<yyyyMMdd>.xlsx` for the clock's current date.
    async fn get_today_file(&self) -> ExportResult<ExportFileData>;
}

fn export_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^customers_\d{8}_\d{6}\.xlsx$").expect("export file name pattern is valid")
    })
}

pub fn is_export_file_name(name: &str) -> bool {
    export_name_pattern().is_match(name)
}

pub struct LocalFileCatalog {
    output_dir: PathBuf,
    clock: Clock,
}

impl LocalFileCatalog {
    pub fn new(output_dir: impl Into<PathBuf>, clock: Clock) -> Self {
        Self {
            output_dir: output_dir.into(),
            clock,
        }
    }

    /// Only bare `.xlsx` names are served. Checked before any filesystem access.
    fn validate_name(name: &str) -> ExportResult<()> {
        if !name.ends_with(FILE_SUFFIX) {
            return Err(ExportError::InvalidFileName(name.to_string()));
        }
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(ExportError::InvalidFileName(name.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl FileCatalog for LocalFileCatalog {
    async fn list_files(&self) -> ExportResult<Vec<FileInfo>> {
        let mut entries = match fs::read_dir(&self.output_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("Output directory {} does not exist", self.output_dir.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(ExportError::Io(e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !is_export_file_name(&name) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                // Replaced or removed between read_dir and stat
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(ExportError::Io(e)),
            };
            let last_modified = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);

            files.push(FileInfo {
                download_url: format!("{}{}", DEFAULT_DOWNLOAD_BASE, name),
                name,
                size: metadata.len(),
                last_modified,
            });
        }

        files.sort_by(|a, b| {
            b.last_modified
                .cmp(&a.last_modified)
                .then_with(|| b.name.cmp(&a.name))
        });
        Ok(files)
    }

    async fn get_file(&self, name: &str) -> ExportResult<ExportFileData> {
        Self::validate_name(name)?;

        let path = self.output_dir.join(name);
        match fs::read(&path).await {
            Ok(bytes) => Ok(ExportFileData {
                name: name.to_string(),
                bytes,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ExportError::NotFound(name.to_string())),
            Err(e) => Err(ExportError::Io(e)),
        }
    }

    async fn get_today_file(&self) -> ExportResult<ExportFileData> {
        let name = today_file_name((self.clock)().date());
        self.get_file(&name).await
    }
}
