use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::watch;
use uuid::Uuid;

use crate::domains::export::job::JobProcessor;
use crate::domains::export::types::*;

#[derive(Debug, Clone)]
pub enum JobStatus {
    Running,
    Completed(RunSummary),
    Failed(String),
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// Handle for tracking a launched run
pub struct RunHandle {
    pub run_id: Uuid,
    pub run_token: i64,
    status_receiver: watch::Receiver<JobStatus>,
}

impl RunHandle {
    pub async fn wait_for_completion(&mut self) -> ExportResult<RunSummary> {
        loop {
            {
                match &*self.status_receiver.borrow_and_update() {
                    JobStatus::Completed(summary) => return Ok(summary.clone()),
                    JobStatus::Failed(err) => return Err(ExportError::JobFailed(err.clone())),
                    JobStatus::Running => {}
                }
            }
            if self.status_receiver.changed().await.is_err() {
                return Err(ExportError::JobFailed(format!(
                    "Run {} ended without reporting a status",
                    self.run_id
                )));
            }
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status_receiver.borrow().clone()
    }
}

type InFlight = Arc<Mutex<HashMap<String, Uuid>>>;

/// Holds a job's single-flight slot; dropping it, even while unwinding,
/// frees the slot.
struct FlightGuard {
    in_flight: InFlight,
    job_name: String,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.remove(&self.job_name);
    }
}

/// Starts export runs, at most one per job name at a time.
pub struct RunLauncher {
    processor: Arc<dyn JobProcessor>,
    in_flight: InFlight,
    last_token: AtomicI64,
}

impl RunLauncher {
    pub fn new(processor: Arc<dyn JobProcessor>) -> Self {
        Self {
            processor,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            last_token: AtomicI64::new(0),
        }
    }

    pub fn job_name(&self) -> &str {
        self.processor.name()
    }

    pub fn is_running(&self) -> bool {
        let in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.contains_key(self.processor.name())
    }

    /// Start a run in the background and return without waiting for it.
    pub fn launch(&self, trigger: RunTrigger) -> ExportResult<RunHandle> {
        let runtime = Handle::try_current()
            .map_err(|e| ExportError::Launch(format!("No async runtime available: {}", e)))?;

        let run = ExportRun::new(trigger, self.next_token());
        let guard = self.acquire(run.id)?;
        let (tx, rx) = watch::channel(JobStatus::Running);

        let run_id = run.id;
        let run_token = run.run_token;
        let processor = self.processor.clone();

        runtime.spawn(async move {
            let outcome = supervise(processor.as_ref(), run).await;
            // Free the slot before waiters observe the final status.
            drop(guard);
            let status = match outcome {
                Ok(summary) => JobStatus::Completed(summary),
                Err(e) => {
                    log::error!("Export run {} failed: {}", run_id, e);
                    JobStatus::Failed(e.to_string())
                }
            };
            // Nobody may be listening for fire-and-forget launches.
            let _ = tx.send(status);
        });

        log::info!("Launched {} run {} ({})", self.processor.name(), run_id, trigger);
        Ok(RunHandle {
            run_id,
            run_token,
            status_receiver: rx,
        })
    }

    /// Run on the caller's task and return its outcome.
    pub async fn run_now(&self, trigger: RunTrigger) -> ExportResult<RunSummary> {
        let run = ExportRun::new(trigger, self.next_token());
        let _guard = self.acquire(run.id)?;
        supervise(self.processor.as_ref(), run).await
    }

    fn acquire(&self, run_id: Uuid) -> ExportResult<FlightGuard> {
        let job_name = self.processor.name().to_string();
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(active) = in_flight.get(&job_name) {
            log::warn!("{} run {} requested while run {} is active", job_name, run_id, active);
            return Err(ExportError::AlreadyRunning(job_name));
        }
        in_flight.insert(job_name.clone(), run_id);
        Ok(FlightGuard {
            in_flight: self.in_flight.clone(),
            job_name,
        })
    }

    /// Epoch milliseconds, strictly increasing per launcher.
    fn next_token(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let previous = self
            .last_token
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
            .unwrap_or(now);
        now.max(previous + 1)
    }
}

/// Run the processor, turning a panic into a failed run.
async fn supervise(processor: &dyn JobProcessor, run: ExportRun) -> ExportResult<RunSummary> {
    let run_id = run.id;
    match AssertUnwindSafe(processor.process(run)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let reason = format!("Run panicked: {}", panic_message(panic.as_ref()));
            log::error!("Export run {} {}", run_id, reason.to_lowercase());
            processor.abandon(run_id, &reason).await;
            Err(ExportError::JobFailed(reason))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Blocks each run until released; fails when `fail` is set.
    struct GatedProcessor {
        gate: Arc<Notify>,
        started: Arc<Notify>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl GatedProcessor {
        fn new(fail: bool) -> Self {
            Self {
                gate: Arc::new(Notify::new()),
                started: Arc::new(Notify::new()),
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl JobProcessor for GatedProcessor {
        fn name(&self) -> &str {
            JOB_NAME
        }

        async fn process(&self, run: ExportRun) -> ExportResult<RunSummary> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            self.gate.notified().await;
            if self.fail {
                return Err(ExportError::Write("disk full".into()));
            }
            Ok(RunSummary {
                run_id: run.id,
                run_token: run.run_token,
                rows_written: 2,
                chunks_committed: 1,
                file: None,
            })
        }
    }

    /// Completes immediately.
    struct InstantProcessor;

    #[async_trait]
    impl JobProcessor for InstantProcessor {
        fn name(&self) -> &str {
            JOB_NAME
        }

        async fn process(&self, run: ExportRun) -> ExportResult<RunSummary> {
            Ok(RunSummary {
                run_id: run.id,
                run_token: run.run_token,
                rows_written: 0,
                chunks_committed: 0,
                file: None,
            })
        }
    }

    #[tokio::test]
    async fn test_launch_and_wait() {
        let processor = Arc::new(GatedProcessor::new(false));
        let launcher = RunLauncher::new(processor.clone());

        let mut handle = launcher.launch(RunTrigger::OnDemand).unwrap();
        processor.started.notified().await;
        assert!(launcher.is_running());
        assert!(!handle.status().is_finished());

        processor.gate.notify_one();
        let summary = handle.wait_for_completion().await.unwrap();
        assert_eq!(summary.run_id, handle.run_id);
        assert_eq!(summary.rows_written, 2);
        assert!(!launcher.is_running());
    }

    #[tokio::test]
    async fn test_second_launch_rejected_while_running() {
        let processor = Arc::new(GatedProcessor::new(false));
        let launcher = RunLauncher::new(processor.clone());

        let mut first = launcher.launch(RunTrigger::OnDemand).unwrap();
        processor.started.notified().await;

        assert!(matches!(
            launcher.launch(RunTrigger::OnDemand),
            Err(ExportError::AlreadyRunning(name)) if name == JOB_NAME
        ));
        assert!(matches!(
            launcher.run_now(RunTrigger::Scheduled).await,
            Err(ExportError::AlreadyRunning(_))
        ));

        processor.gate.notify_one();
        first.wait_for_completion().await.unwrap();
        assert_eq!(processor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slot_released_after_failure() {
        let processor = Arc::new(GatedProcessor::new(true));
        let launcher = RunLauncher::new(processor.clone());

        let mut handle = launcher.launch(RunTrigger::Scheduled).unwrap();
        processor.gate.notify_one();
        let result = handle.wait_for_completion().await;
        assert!(matches!(result, Err(ExportError::JobFailed(msg)) if msg.contains("disk full")));
        assert!(matches!(handle.status(), JobStatus::Failed(_)));

        let mut again = launcher.launch(RunTrigger::OnDemand).unwrap();
        processor.gate.notify_one();
        assert!(again.wait_for_completion().await.is_err());
        assert_eq!(processor.calls.load(Ordering::SeqCst), 2);
    }

    /// Panics mid-run and remembers which runs were abandoned.
    #[derive(Default)]
    struct PanickingProcessor {
        abandoned: Mutex<Vec<(Uuid, String)>>,
    }

    #[async_trait]
    impl JobProcessor for PanickingProcessor {
        fn name(&self) -> &str {
            JOB_NAME
        }

        async fn process(&self, _run: ExportRun) -> ExportResult<RunSummary> {
            panic!("writer exploded");
        }

        async fn abandon(&self, run_id: Uuid, reason: &str) {
            self.abandoned
                .lock()
                .unwrap()
                .push((run_id, reason.to_string()));
        }
    }

    #[tokio::test]
    async fn test_panicking_run_fails_and_frees_slot() {
        let processor = Arc::new(PanickingProcessor::default());
        let launcher = RunLauncher::new(processor.clone());

        let mut handle = launcher.launch(RunTrigger::OnDemand).unwrap();
        let result = handle.wait_for_completion().await;
        assert!(matches!(result, Err(ExportError::JobFailed(msg)) if msg.contains("writer exploded")));
        assert!(!launcher.is_running());

        let abandoned = processor.abandoned.lock().unwrap().clone();
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].0, handle.run_id);
        assert!(abandoned[0].1.contains("writer exploded"));

        assert!(matches!(
            launcher.run_now(RunTrigger::Scheduled).await,
            Err(ExportError::JobFailed(_))
        ));
        assert_eq!(processor.abandoned.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_run_now_sequential() {
        let launcher = RunLauncher::new(Arc::new(InstantProcessor));
        let first = launcher.run_now(RunTrigger::Scheduled).await.unwrap();
        let second = launcher.run_now(RunTrigger::Scheduled).await.unwrap();
        assert!(second.run_token > first.run_token);
        assert_ne!(first.run_id, second.run_id);
    }

    #[test]
    fn test_launch_without_runtime() {
        let launcher = RunLauncher::new(Arc::new(InstantProcessor));
        assert!(matches!(
            launcher.launch(RunTrigger::OnDemand),
            Err(ExportError::Launch(_))
        ));
        assert!(!launcher.is_running());
    }

    #[test]
    fn test_tokens_strictly_increase() {
        let launcher = RunLauncher::new(Arc::new(InstantProcessor));
        let tokens: Vec<i64> = (0..50).map(|_| launcher.next_token()).collect();
        assert!(tokens.windows(2).all(|w| w[1] > w[0]));
    }
}
