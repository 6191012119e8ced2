use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;

use customer_export::database;
use customer_export::db_migration;
use customer_export::domains::customer::SqliteCustomerRepository;
use customer_export::domains::export::types::local_clock;
use customer_export::domains::export::{
    CustomerExportJob, ExportScheduler, LocalFileCatalog, RunLauncher, SqliteExportRunRepository,
    XlsxWriterFactory,
};
use customer_export::http::{create_router, AppState};
use customer_export::{init_logging, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = Config::from_env()?;
    log::info!(
        "Starting customer export service (output {}, schedule '{}', scheduler {})",
        config.output_dir.display(),
        config.cron_expression,
        if config.scheduler_enabled { "enabled" } else { "disabled" }
    );

    let pool = database::connect(&config.database_url, config.max_connections).await?;
    db_migration::initialize_database(&pool).await?;

    let clock = local_clock();
    let runs = Arc::new(SqliteExportRunRepository::new(pool.clone()));
    let job = CustomerExportJob::new(
        Arc::new(SqliteCustomerRepository::new(pool.clone())),
        Arc::new(XlsxWriterFactory::new(&config.output_dir, clock.clone())),
        runs.clone(),
    );
    let launcher = Arc::new(RunLauncher::new(Arc::new(job)));
    let catalog = Arc::new(LocalFileCatalog::new(&config.output_dir, clock));

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let scheduler_task = if config.scheduler_enabled {
        let scheduler = Arc::new(ExportScheduler::new(&config.cron_expression, launcher.clone())?);
        Some(tokio::spawn(scheduler.run(cancel_rx)))
    } else {
        None
    };

    let state = Arc::new(AppState::new(launcher, catalog, runs));
    let app = create_router(state);

    let listener = TcpListener::bind(&config.bind_address).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = cancel_tx.send(true);
    if let Some(task) = scheduler_task {
        if let Err(e) = task.await {
            log::error!("Scheduler task ended abnormally: {}", e);
        }
    }
    pool.close().await;
    log::info!("Customer export service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown signal received");
}
