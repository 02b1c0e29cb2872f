use crate::app::ports::ConverterPort;
use crate::app::report::{DispatchReport, ItemOutcome};
use crate::config::{DispatchConfig, ErrorPolicy};
use crate::discovery::{Discovery, WorkItem};
use crate::error::{DispatchError, Result};
use crate::observability::metrics;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Walks the input tree and hands every candidate file to the converter.
///
/// At most `concurrency` conversions are in flight; with the default of 1 each
/// conversion finishes before the next one starts.
pub struct BatchDispatcher {
    config: DispatchConfig,
    converter: Arc<dyn ConverterPort>,
}

impl BatchDispatcher {
    pub fn new(config: DispatchConfig, converter: Arc<dyn ConverterPort>) -> Self {
        Self { config, converter }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// List the work a run would dispatch, without converting anything
    pub fn plan(&self) -> Result<Vec<WorkItem>> {
        self.config.validate()?;
        Ok(Discovery::new(&self.config.input_root, &self.config.categories)
            .work_items()
            .collect())
    }

    /// Run the dispatch to completion and return the summary.
    ///
    /// Only configuration problems are returned as errors. Converter failures,
    /// panics included, are recorded in the report.
    pub async fn run(&self) -> Result<DispatchReport> {
        self.config.validate()?;

        let mut report = DispatchReport::new();
        info!(
            run_id = %report.run_id,
            input = %self.config.input_root.display(),
            output = %self.config.output_root.display(),
            categories = %self.config.categories.join(","),
            concurrency = self.config.concurrency,
            on_error = %self.config.on_error,
            "Starting dispatch"
        );

        let abort_on_error = self.config.on_error == ErrorPolicy::Abort;
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let halted = Arc::new(AtomicBool::new(false));
        let mut in_flight: JoinSet<ItemOutcome> = JoinSet::new();

        // Directory listing and globbing block, so discovery runs off the runtime
        let (items_tx, mut items_rx) = mpsc::channel::<WorkItem>(self.config.concurrency * 2);
        let input_root = self.config.input_root.clone();
        let categories = self.config.categories.clone();
        let discovery = tokio::task::spawn_blocking(move || {
            for item in Discovery::new(&input_root, &categories).work_items() {
                // Receiver is gone once dispatch has stopped
                if items_tx.blocking_send(item).is_err() {
                    break;
                }
            }
        });

        while let Some(item) = items_rx.recv().await {
            while let Some(joined) = in_flight.try_join_next() {
                settle(&mut report, joined);
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| DispatchError::Internal(format!("dispatch semaphore closed: {}", e)))?;

            // A permit is only released once the failing task has raised the flag
            if halted.load(Ordering::SeqCst) {
                warn!("⏹️ Stopping dispatch after converter failure");
                break;
            }

            debug!(input = %item.input_path.display(), category = %item.category, "Dispatching");
            metrics::item_attempted();

            let converter = Arc::clone(&self.converter);
            let output_root = self.config.output_root.clone();
            let input_path = item.input_path.clone();
            let halted = Arc::clone(&halted);
            in_flight.spawn(async move {
                let timer = metrics::ConvertTimer::start();
                // Run the conversion in its own task so a panic stays attached to this item
                let conversion =
                    tokio::spawn(async move { converter.convert(&output_root, &input_path).await });
                let result = match conversion.await {
                    Ok(result) => result,
                    Err(e) => Err(converter_crashed(&item.input_path, e)),
                };
                let elapsed_secs = timer.elapsed_secs();
                if result.is_err() && abort_on_error {
                    halted.store(true, Ordering::SeqCst);
                }
                drop(permit);
                ItemOutcome {
                    item,
                    result,
                    elapsed_secs,
                }
            });
        }
        drop(items_rx);

        while let Some(joined) = in_flight.join_next().await {
            settle(&mut report, joined);
        }

        if let Err(e) = discovery.await {
            error!(error = %e, "Discovery task ended abnormally");
        }

        report.halted = halted.load(Ordering::SeqCst);
        report.complete();

        if report.is_success() {
            info!(
                run_id = %report.run_id,
                attempted = report.attempted,
                succeeded = report.succeeded,
                "✅ Dispatch completed"
            );
        } else {
            warn!(
                run_id = %report.run_id,
                attempted = report.attempted,
                succeeded = report.succeeded,
                failed = report.failed,
                halted = report.halted,
                "⚠️ Dispatch completed with failures"
            );
        }

        Ok(report)
    }
}

/// Turn a panicked (or cancelled) conversion task into an execution failure
fn converter_crashed(input_path: &Path, e: JoinError) -> DispatchError {
    let reason = if e.is_panic() {
        let payload = e.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        format!("converter panicked: {}", message)
    } else {
        "converter task was cancelled".to_string()
    };
    DispatchError::ConverterExecution {
        path: input_path.to_path_buf(),
        reason,
    }
}

/// Record a finished wrapper task. The wrapper only awaits the conversion
/// task, so a join error here means the runtime is shutting down.
fn settle(report: &mut DispatchReport, joined: std::result::Result<ItemOutcome, JoinError>) {
    match joined {
        Ok(outcome) => record(report, outcome),
        Err(e) => error!(error = %e, "Conversion wrapper task ended without an outcome"),
    }
}

fn record(report: &mut DispatchReport, outcome: ItemOutcome) {
    match &outcome.result {
        Ok(()) => {
            metrics::item_succeeded();
            debug!(
                input = %outcome.item.input_path.display(),
                elapsed_secs = outcome.elapsed_secs,
                "Converted"
            );
        }
        Err(e) => {
            metrics::item_failed(e.kind());
            warn!(
                input = %outcome.item.input_path.display(),
                category = %outcome.item.category,
                error = %e,
                "❌ Conversion failed"
            );
        }
    }
    report.record(&outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::sync::Mutex;

    /// Records every call; fails for inputs whose file name contains
    /// `fail_marker` and panics for those containing `panic_marker`.
    /// Failing and panicking inputs return at once, others sleep for `delay`.
    struct MockConverter {
        calls: Arc<Mutex<Vec<(PathBuf, PathBuf)>>>,
        fail_marker: Option<&'static str>,
        panic_marker: Option<&'static str>,
        delay: Duration,
        active: AtomicUsize,
        max_active: Arc<AtomicUsize>,
    }

    impl MockConverter {
        fn new() -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                fail_marker: None,
                panic_marker: None,
                delay: Duration::from_millis(0),
                active: AtomicUsize::new(0),
                max_active: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing_on(mut self, marker: &'static str) -> Self {
            self.fail_marker = Some(marker);
            self
        }

        fn panicking_on(mut self, marker: &'static str) -> Self {
            self.panic_marker = Some(marker);
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl ConverterPort for MockConverter {
        async fn convert(&self, output_root: &Path, input_path: &Path) -> Result<()> {
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now_active, Ordering::SeqCst);
            self.calls
                .lock()
                .await
                .push((output_root.to_path_buf(), input_path.to_path_buf()));

            let name = input_path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            let failing = self.fail_marker.map_or(false, |marker| name.contains(marker));
            let panicking = self.panic_marker.map_or(false, |marker| name.contains(marker));
            if !failing && !panicking {
                tokio::time::sleep(self.delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            if panicking {
                panic!("converter crashed on {}", name);
            }
            if failing {
                return Err(DispatchError::ConverterExecution {
                    path: input_path.to_path_buf(),
                    reason: "exit code 1".to_string(),
                });
            }
            Ok(())
        }
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[tokio::test]
    async fn test_two_daylight_files_dispatched_with_output_root_first() {
        let root = tempdir().unwrap();
        let a1 = root.path().join("S/daylight/MYD021KM.A1.npy");
        let a2 = root.path().join("S/daylight/MYD021KM.A2.npy");
        touch(&a1);
        touch(&a2);
        fs::create_dir_all(root.path().join("S/night")).unwrap();

        let converter = Arc::new(MockConverter::new());
        let calls = converter.calls.clone();
        let dispatcher = BatchDispatcher::new(DispatchConfig::new(root.path(), "/out"), converter);

        let report = dispatcher.run().await.unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 2);

        let calls = calls.lock().await;
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|(out, _)| out == Path::new("/out")));
        let mut inputs: Vec<PathBuf> = calls.iter().map(|(_, input)| input.clone()).collect();
        inputs.sort();
        assert_eq!(inputs, vec![a1, a2]);
    }

    #[tokio::test]
    async fn test_default_concurrency_never_overlaps() {
        let root = tempdir().unwrap();
        for i in 0..4 {
            touch(&root.path().join(format!("S{}/night/MYD021KM.N{}.npy", i, i)));
        }

        let converter = Arc::new(MockConverter::new().with_delay(Duration::from_millis(20)));
        let max_active = converter.max_active.clone();
        let dispatcher = BatchDispatcher::new(DispatchConfig::new(root.path(), "/out"), converter);

        let report = dispatcher.run().await.unwrap();
        assert_eq!(report.attempted, 4);
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_raised_concurrency_is_bounded() {
        let root = tempdir().unwrap();
        for i in 0..6 {
            touch(&root.path().join(format!("S/daylight/MYD021KM.D{}.npy", i)));
        }

        let converter = Arc::new(MockConverter::new().with_delay(Duration::from_millis(30)));
        let max_active = converter.max_active.clone();
        let config = DispatchConfig::new(root.path(), "/out").with_concurrency(2);
        let dispatcher = BatchDispatcher::new(config, converter);

        let report = dispatcher.run().await.unwrap();
        assert_eq!(report.succeeded, 6);
        assert_eq!(max_active.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_abort_waits_for_in_flight_items() {
        let root = tempdir().unwrap();
        for name in ["F1", "F2", "F3"] {
            touch(&root.path().join(format!("S/daylight/MYD021KM.{}.npy", name)));
        }

        // F1 fails at once while F2 is still converting
        let converter = Arc::new(
            MockConverter::new()
                .failing_on("F1")
                .with_delay(Duration::from_millis(50)),
        );
        let calls = converter.calls.clone();
        let config = DispatchConfig::new(root.path(), "/out")
            .with_concurrency(2)
            .with_error_policy(ErrorPolicy::Abort);
        let dispatcher = BatchDispatcher::new(config, converter);

        let report = dispatcher.run().await.unwrap();
        assert!(report.halted);
        assert_eq!(report.attempted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);
        assert!(report.failures[0].input_path.ends_with("MYD021KM.F1.npy"));

        let calls = calls.lock().await;
        assert_eq!(calls.len(), 2);
        assert!(!calls.iter().any(|(_, input)| input.ends_with("daylight/MYD021KM.F3.npy")));
    }

    #[tokio::test]
    async fn test_panicking_converter_is_recorded_and_dispatch_continues() {
        let root = tempdir().unwrap();
        touch(&root.path().join("S/daylight/MYD021KM.F1.npy"));
        touch(&root.path().join("S/night/MYD021KM.F2.npy"));

        let converter = Arc::new(MockConverter::new().panicking_on("F1"));
        let calls = converter.calls.clone();
        let dispatcher = BatchDispatcher::new(DispatchConfig::new(root.path(), "/out"), converter);

        let report = dispatcher.run().await.unwrap();
        assert_eq!(calls.lock().await.len(), 2);
        assert_eq!(report.attempted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);
        assert!(!report.halted);

        let failure = &report.failures[0];
        assert!(failure.input_path.ends_with("daylight/MYD021KM.F1.npy"));
        assert_eq!(failure.kind, "execution");
        assert!(failure.error.contains("converter panicked: converter crashed on MYD021KM.F1.npy"));
    }

    #[tokio::test]
    async fn test_panicking_converter_honours_abort() {
        let root = tempdir().unwrap();
        touch(&root.path().join("S/daylight/MYD021KM.F1.npy"));
        touch(&root.path().join("S/night/MYD021KM.F2.npy"));

        let converter = Arc::new(MockConverter::new().panicking_on("F1"));
        let calls = converter.calls.clone();
        let config = DispatchConfig::new(root.path(), "/out").with_error_policy(ErrorPolicy::Abort);
        let dispatcher = BatchDispatcher::new(config, converter);

        let report = dispatcher.run().await.unwrap();
        assert_eq!(calls.lock().await.len(), 1);
        assert_eq!(report.failed, 1);
        assert!(report.halted);
    }

    #[tokio::test]
    async fn test_continue_on_error_attempts_every_file() {
        let root = tempdir().unwrap();
        touch(&root.path().join("S/daylight/MYD021KM.F1.npy"));
        touch(&root.path().join("S/night/MYD021KM.F2.npy"));

        let converter = Arc::new(MockConverter::new().failing_on("F1"));
        let calls = converter.calls.clone();
        let dispatcher = BatchDispatcher::new(DispatchConfig::new(root.path(), "/out"), converter);

        let report = dispatcher.run().await.unwrap();
        assert_eq!(calls.lock().await.len(), 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);
        assert!(!report.halted);
        assert!(report.failures[0].input_path.ends_with("daylight/MYD021KM.F1.npy"));
    }

    #[tokio::test]
    async fn test_abort_on_error_stops_walk() {
        let root = tempdir().unwrap();
        touch(&root.path().join("S/daylight/MYD021KM.F1.npy"));
        touch(&root.path().join("S/night/MYD021KM.F2.npy"));

        let converter = Arc::new(MockConverter::new().failing_on("F1"));
        let calls = converter.calls.clone();
        let config = DispatchConfig::new(root.path(), "/out").with_error_policy(ErrorPolicy::Abort);
        let dispatcher = BatchDispatcher::new(config, converter);

        let report = dispatcher.run().await.unwrap();
        assert_eq!(calls.lock().await.len(), 1);
        assert_eq!(report.attempted, 1);
        assert_eq!(report.failed, 1);
        assert!(report.halted);
    }

    #[tokio::test]
    async fn test_backlog_larger_than_channel_is_fully_dispatched() {
        let root = tempdir().unwrap();
        for sample in 0..5 {
            for category in ["daylight", "night", "corrupt"] {
                touch(&root.path().join(format!("S{}/{}/MYD021KM.X.npy", sample, category)));
            }
        }

        let converter = Arc::new(MockConverter::new());
        let calls = converter.calls.clone();
        let dispatcher = BatchDispatcher::new(DispatchConfig::new(root.path(), "/out"), converter);

        let report = dispatcher.run().await.unwrap();
        assert_eq!(report.succeeded, 15);
        assert_eq!(calls.lock().await.len(), 15);
    }

    #[tokio::test]
    async fn test_abort_with_pending_backlog_returns() {
        let root = tempdir().unwrap();
        // Glob order puts F1 ahead of the lowercase names
        touch(&root.path().join("S/daylight/MYD021KM.F1.npy"));
        for i in 0..10 {
            touch(&root.path().join(format!("S/daylight/MYD021KM.ok{:02}.npy", i)));
        }

        let converter = Arc::new(MockConverter::new().failing_on("F1"));
        let calls = converter.calls.clone();
        let config = DispatchConfig::new(root.path(), "/out").with_error_policy(ErrorPolicy::Abort);
        let dispatcher = BatchDispatcher::new(config, converter);

        let report = tokio::time::timeout(Duration::from_secs(10), dispatcher.run())
            .await
            .expect("dispatch finished")
            .unwrap();
        assert!(report.halted);
        assert_eq!(report.attempted, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(calls.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_input_root_dispatches_nothing() {
        let root = tempdir().unwrap();
        let converter = Arc::new(MockConverter::new());
        let calls = converter.calls.clone();
        let dispatcher =
            BatchDispatcher::new(DispatchConfig::new(root.path().join("absent"), "/out"), converter);

        let err = dispatcher.run().await.unwrap_err();
        assert!(err.is_configuration());
        assert!(calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_plan_lists_items_without_converting() {
        let root = tempdir().unwrap();
        touch(&root.path().join("S/corrupt/MYD021KM.C.npy"));

        let converter = Arc::new(MockConverter::new());
        let calls = converter.calls.clone();
        let dispatcher = BatchDispatcher::new(DispatchConfig::new(root.path(), "/out"), converter);

        let plan = dispatcher.plan().unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].category, "corrupt");
        assert!(calls.lock().await.is_empty());
    }
}
