//! Async front door: dataset activation, run submission and status reads.

use crate::cache::ResultCache;
use crate::config::AnalyticsConfig;
use crate::data::{load_dataset, DatasetSnapshot};
use crate::error::{AnalyticsError, Result};
use crate::pipeline::orchestrator::Orchestrator;
use crate::pipeline::status::{PipelineStatus, StatusReader, StatusTracker};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Depth of the run queue; the running guard keeps at most one request in flight.
const QUEUE_CAPACITY: usize = 4;

struct RunRequest {
    run_id: u64,
    dataset: Arc<DatasetSnapshot>,
}

pub struct PipelineService {
    dataset: RwLock<Option<Arc<DatasetSnapshot>>>,
    orchestrator: Orchestrator,
    queue: mpsc::Sender<RunRequest>,
    worker: JoinHandle<()>,
}

impl PipelineService {
    /// Spawn the worker task. Must be called from within a Tokio runtime.
    pub fn start(config: AnalyticsConfig) -> Self {
        let orchestrator = Orchestrator::new(
            Arc::new(config),
            Arc::new(StatusTracker::new()),
            Arc::new(ResultCache::new()),
        );
        let (queue, rx) = mpsc::channel(QUEUE_CAPACITY);
        let worker = tokio::spawn(run_worker(orchestrator.clone(), rx));
        Self {
            dataset: RwLock::new(None),
            orchestrator,
            queue,
            worker,
        }
    }

    /// Make `dataset` the one every later run reads. Re-activating the same
    /// snapshot is a no-op.
    pub fn activate_dataset(&self, dataset: Arc<DatasetSnapshot>) {
        let mut current = self.dataset.write().unwrap_or_else(|e| e.into_inner());
        if current.as_ref().is_some_and(|d| Arc::ptr_eq(d, &dataset)) {
            return;
        }
        info!(
            file = %dataset.file_name,
            rows = dataset.row_count(),
            columns = dataset.column_count(),
            "dataset activated"
        );
        *current = Some(dataset);
    }

    /// Read, validate and activate a CSV file.
    pub fn load_and_activate(&self, path: impl AsRef<Path>) -> Result<Arc<DatasetSnapshot>> {
        let path = path.as_ref();
        let frame = load_dataset(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let dataset = DatasetSnapshot::new(frame, file_name)?;
        self.activate_dataset(dataset.clone());
        Ok(dataset)
    }

    pub fn active_dataset(&self) -> Option<Arc<DatasetSnapshot>> {
        self.dataset.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Queue a run over the active dataset and return its id without waiting.
    pub fn start_run(&self) -> Result<u64> {
        let dataset = self.active_dataset().ok_or(AnalyticsError::NoDataset)?;
        let tracker = self.orchestrator.tracker();
        let run_id = tracker.begin_run()?;

        if let Err(e) = self.queue.try_send(RunRequest { run_id, dataset }) {
            warn!(run_id, "run queue rejected request");
            tracker.fail(format!("run could not be scheduled: {}", e));
            return Err(AnalyticsError::Computation(
                "pipeline worker is not accepting runs".to_string(),
            ));
        }
        info!(run_id, "pipeline run queued");
        Ok(run_id)
    }

    pub fn status(&self) -> PipelineStatus {
        self.orchestrator.tracker().snapshot()
    }

    pub fn subscribe(&self) -> StatusReader {
        self.orchestrator.tracker().reader()
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        self.orchestrator.cache()
    }

    /// Resolve once `run_id` has completed or failed.
    pub async fn wait_for_run(&self, run_id: u64) -> PipelineStatus {
        self.subscribe().wait_for_terminal(run_id).await
    }
}

impl Drop for PipelineService {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_worker(orchestrator: Orchestrator, mut rx: mpsc::Receiver<RunRequest>) {
    while let Some(RunRequest { run_id, dataset }) = rx.recv().await {
        let job = orchestrator.clone();
        let result = tokio::task::spawn_blocking(move || job.execute(run_id, &dataset)).await;
        if let Err(e) = result {
            error!(run_id, error = %e, "pipeline worker task aborted");
            orchestrator.tracker().fail(format!("pipeline run aborted: {}", e));
        }
    }
    info!("pipeline worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::status::PipelineState;

    #[tokio::test]
    async fn test_start_run_requires_dataset() {
        let service = PipelineService::start(AnalyticsConfig::default());
        let err = service.start_run().unwrap_err();
        assert!(matches!(err, AnalyticsError::NoDataset));
        assert_eq!(service.status().state, PipelineState::Idle);
        assert!(service.active_dataset().is_none());
    }

    #[tokio::test]
    async fn test_load_rejects_unknown_format() {
        let service = PipelineService::start(AnalyticsConfig::default());
        let err = service.load_and_activate("sales.xlsx").unwrap_err();
        assert_eq!(err.kind(), "format_error");
        assert!(service.active_dataset().is_none());
    }
}
