use chrono::{DateTime, Local};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{self, Duration};

use crate::domains::export::launcher::RunLauncher;
use crate::domains::export::types::{ExportError, ExportResult, RunTrigger};

/// Fires the export job on a cron schedule evaluated in local time.
pub struct ExportScheduler {
    expression: String,
    schedule: Schedule,
    launcher: Arc<RunLauncher>,
}

impl ExportScheduler {
    /// Accepts six-field (with seconds) or seven-field (with year) expressions.
    pub fn new(expression: &str, launcher: Arc<RunLauncher>) -> ExportResult<Self> {
        let schedule = Schedule::from_str(expression).map_err(|e| {
            ExportError::Configuration(format!("Invalid cron expression '{}': {}", expression, e))
        })?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
            launcher,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn next_fire_after(&self, after: DateTime<Local>) -> Option<DateTime<Local>> {
        self.schedule.after(&after).next()
    }

    /// Start the scheduler loop. Runs until the provided cancellation signal fires.
    pub async fn run(self: Arc<Self>, cancel: watch::Receiver<bool>) {
        log::info!("Export scheduler started ({})", self.expression);
        let mut cancel = cancel;

        loop {
            let Some(next) = self.schedule.upcoming(Local).next() else {
                log::warn!("Cron expression '{}' has no future fire times", self.expression);
                break;
            };
            let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
            log::debug!("Next scheduled export at {}", next);

            tokio::select! {
                _ = time::sleep(wait) => self.fire().await,
                _ = cancel.changed() => {
                    log::info!("Export scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// One scheduled tick. Failures are logged and never stop the loop.
    async fn fire(&self) {
        match self.launcher.run_now(RunTrigger::Scheduled).await {
            Ok(summary) => log::info!(
                "Scheduled export {} finished with {} rows",
                summary.run_id,
                summary.rows_written
            ),
            Err(ExportError::AlreadyRunning(job)) => {
                log::warn!("Skipping scheduled tick: {} is already running", job)
            }
            Err(e) => log::error!("Scheduled export failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::export::job::JobProcessor;
    use crate::domains::export::types::{ExportRun, RunSummary, JOB_NAME};
    use crate::errors::{DbError, DomainError};
    use async_trait::async_trait;
    use chrono::{TimeZone, Timelike};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct CountingProcessor {
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl JobProcessor for CountingProcessor {
        fn name(&self) -> &str {
            JOB_NAME
        }

        async fn process(&self, run: ExportRun) -> ExportResult<RunSummary> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(RunSummary {
                run_id: run.id,
                run_token: run.run_token,
                rows_written: 0,
                chunks_committed: 0,
                file: None,
            })
        }
    }

    /// Fails every run the way an unreachable store does.
    struct UnreachableStoreProcessor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JobProcessor for UnreachableStoreProcessor {
        fn name(&self) -> &str {
            JOB_NAME
        }

        async fn process(&self, _run: ExportRun) -> ExportResult<RunSummary> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ExportError::SourceRead(DomainError::Database(DbError::Other(
                "connection refused".into(),
            ))))
        }
    }

    fn counting(gate: Option<Arc<Notify>>) -> Arc<CountingProcessor> {
        Arc::new(CountingProcessor {
            calls: AtomicUsize::new(0),
            gate,
        })
    }

    #[test]
    fn test_invalid_expression_is_configuration_error() {
        let launcher = Arc::new(RunLauncher::new(counting(None)));
        assert!(matches!(
            ExportScheduler::new("not a cron", launcher),
            Err(ExportError::Configuration(_))
        ));
    }

    #[test]
    fn test_daily_two_am() {
        let launcher = Arc::new(RunLauncher::new(counting(None)));
        let scheduler = ExportScheduler::new("0 0 2 * * *", launcher).unwrap();
        assert_eq!(scheduler.expression(), "0 0 2 * * *");

        let evening = Local.with_ymd_and_hms(2024, 6, 1, 23, 0, 0).unwrap();
        let next = scheduler.next_fire_after(evening).unwrap();
        assert_eq!(next.date_naive(), evening.date_naive().succ_opt().unwrap());
        assert_eq!((next.hour(), next.minute(), next.second()), (2, 0, 0));

        let early = Local.with_ymd_and_hms(2024, 6, 1, 1, 0, 0).unwrap();
        let next = scheduler.next_fire_after(early).unwrap();
        assert_eq!(next.date_naive(), early.date_naive());
    }

    #[tokio::test]
    async fn test_fires_until_cancelled() {
        let processor = counting(None);
        let launcher = Arc::new(RunLauncher::new(processor.clone()));
        let scheduler = Arc::new(ExportScheduler::new("* * * * * *", launcher).unwrap());

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(scheduler.run(cancel_rx));

        time::sleep(Duration::from_millis(2500)).await;
        cancel_tx.send(true).unwrap();
        task.await.unwrap();

        let fired = processor.calls.load(Ordering::SeqCst);
        assert!(fired >= 1, "expected at least one tick, got {}", fired);

        time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(processor.calls.load(Ordering::SeqCst), fired);
    }

    #[tokio::test]
    async fn test_failed_runs_do_not_stop_the_loop() {
        let processor = Arc::new(UnreachableStoreProcessor {
            calls: AtomicUsize::new(0),
        });
        let launcher = Arc::new(RunLauncher::new(processor.clone()));
        let scheduler = Arc::new(ExportScheduler::new("* * * * * *", launcher.clone()).unwrap());

        scheduler.fire().await;
        assert_eq!(processor.calls.load(Ordering::SeqCst), 1);
        assert!(!launcher.is_running());

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(scheduler.run(cancel_rx));

        time::sleep(Duration::from_millis(3500)).await;
        cancel_tx.send(true).unwrap();
        task.await.unwrap();

        let fired = processor.calls.load(Ordering::SeqCst) - 1;
        assert!(fired >= 2, "expected the loop to keep firing after failures, got {}", fired);
        assert!(!launcher.is_running());
    }

    #[tokio::test]
    async fn test_busy_tick_is_skipped() {
        let gate = Arc::new(Notify::new());
        let processor = counting(Some(gate.clone()));
        let launcher = Arc::new(RunLauncher::new(processor.clone()));
        let scheduler = ExportScheduler::new("0 0 2 * * *", launcher.clone()).unwrap();

        let mut on_demand = launcher.launch(RunTrigger::OnDemand).unwrap();
        while processor.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        scheduler.fire().await;
        assert_eq!(processor.calls.load(Ordering::SeqCst), 1);

        gate.notify_one();
        on_demand.wait_for_completion().await.unwrap();
    }
}
