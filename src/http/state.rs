use std::sync::Arc;

use crate::domains::export::catalog::FileCatalog;
use crate::domains::export::launcher::RunLauncher;
use crate::domains::export::repository::ExportRunRepository;

/// Application state shared across handlers.
pub struct AppState {
    pub launcher: Arc<RunLauncher>,
    pub catalog: Arc<dyn FileCatalog>,
    pub runs: Arc<dyn ExportRunRepository>,
}

impl AppState {
    pub fn new(
        launcher: Arc<RunLauncher>,
        catalog: Arc<dyn FileCatalog>,
        runs: Arc<dyn ExportRunRepository>,
    ) -> Self {
        Self {
            launcher,
            catalog,
            runs,
        }
    }
}
