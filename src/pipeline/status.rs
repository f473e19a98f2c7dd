//! Process-wide pipeline status published over a `watch` channel.
//!
//! The orchestrator holds the only [`StatusTracker`]; everyone else reads
//! cloned snapshots, so a status query never waits on a running stage.

use crate::error::{AnalyticsError, Result};
use crate::pipeline::stage::StageId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStatus {
    /// Increments on every accepted run; 0 before the first one.
    pub run_id: u64,
    pub state: PipelineState,
    pub current_stage: Option<StageId>,
    pub stages_completed: Vec<StageId>,
    pub progress: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl PipelineStatus {
    pub fn idle() -> Self {
        Self {
            run_id: 0,
            state: PipelineState::Idle,
            current_stage: None,
            stages_completed: Vec::new(),
            progress: 0.0,
            start_time: None,
            end_time: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, PipelineState::Completed | PipelineState::Failed)
    }
}

/// Writer side of the status channel
#[derive(Debug)]
pub struct StatusTracker {
    tx: watch::Sender<PipelineStatus>,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PipelineStatus::idle());
        Self { tx }
    }

    /// Claim the run slot and reset the status for a new run.
    ///
    /// Check and transition happen under the channel lock, so two callers can
    /// never both see a non-running state.
    pub fn begin_run(&self) -> Result<u64> {
        let mut run_id = None;
        self.tx.send_if_modified(|status| {
            if status.state == PipelineState::Running {
                return false;
            }
            let next = status.run_id + 1;
            *status = PipelineStatus {
                run_id: next,
                state: PipelineState::Running,
                start_time: Some(Utc::now()),
                ..PipelineStatus::idle()
            };
            run_id = Some(next);
            true
        });
        run_id.ok_or(AnalyticsError::AlreadyRunning)
    }

    pub fn stage_started(&self, stage: StageId) {
        self.tx.send_modify(|status| status.current_stage = Some(stage));
    }

    pub fn stage_completed(&self, stage: StageId, total_stages: usize) {
        self.tx.send_modify(|status| {
            status.stages_completed.push(stage);
            status.progress = status.stages_completed.len() as f64 / total_stages as f64 * 100.0;
        });
    }

    /// Terminal failure; `current_stage` keeps pointing at the stage that failed.
    pub fn fail(&self, message: String) {
        self.tx.send_modify(|status| {
            status.state = PipelineState::Failed;
            status.error = Some(message);
            status.end_time = Some(Utc::now());
        });
    }

    pub fn complete(&self) {
        self.tx.send_modify(|status| {
            status.state = PipelineState::Completed;
            status.current_stage = None;
            status.progress = 100.0;
            status.end_time = Some(Utc::now());
        });
    }

    pub fn snapshot(&self) -> PipelineStatus {
        self.tx.borrow().clone()
    }

    pub fn reader(&self) -> StatusReader {
        StatusReader {
            rx: self.tx.subscribe(),
        }
    }
}

/// Cloneable read handle
#[derive(Debug, Clone)]
pub struct StatusReader {
    rx: watch::Receiver<PipelineStatus>,
}

impl StatusReader {
    pub fn snapshot(&self) -> PipelineStatus {
        self.rx.borrow().clone()
    }

    /// Resolve once run `run_id` has reached a terminal state (or been superseded).
    pub async fn wait_for_terminal(&mut self, run_id: u64) -> PipelineStatus {
        let reached = match self
            .rx
            .wait_for(|s| s.run_id > run_id || (s.run_id == run_id && s.is_terminal()))
            .await
        {
            Ok(status) => Some(status.clone()),
            Err(_) => None,
        };
        // Tracker dropped; the last published value is all there is.
        reached.unwrap_or_else(|| self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_run_guards_running_state() {
        let tracker = StatusTracker::new();
        assert_eq!(tracker.snapshot().state, PipelineState::Idle);

        let first = tracker.begin_run().unwrap();
        assert_eq!(first, 1);
        tracker.stage_started(StageId::Ingestion);
        let before = tracker.snapshot();

        let err = tracker.begin_run().unwrap_err();
        assert!(matches!(err, AnalyticsError::AlreadyRunning));
        assert_eq!(tracker.snapshot(), before);
    }

    #[test]
    fn test_progress_and_completion() {
        let tracker = StatusTracker::new();
        tracker.begin_run().unwrap();
        for stage in &StageId::ALL[..3] {
            tracker.stage_started(*stage);
            tracker.stage_completed(*stage, StageId::ALL.len());
        }
        assert!((tracker.snapshot().progress - 25.0).abs() < 1e-9);

        tracker.complete();
        let status = tracker.snapshot();
        assert_eq!(status.state, PipelineState::Completed);
        assert_eq!(status.progress, 100.0);
        assert!(status.end_time.is_some());
        assert!(status.is_terminal());
    }

    #[test]
    fn test_new_run_resets_previous_failure() {
        let tracker = StatusTracker::new();
        tracker.begin_run().unwrap();
        tracker.stage_started(StageId::Ingestion);
        tracker.stage_completed(StageId::Ingestion, 12);
        tracker.stage_started(StageId::Cleaning);
        tracker.fail("cleaning failed: boom".to_string());

        let failed = tracker.snapshot();
        assert_eq!(failed.current_stage, Some(StageId::Cleaning));
        assert_eq!(failed.stages_completed, vec![StageId::Ingestion]);

        let second = tracker.begin_run().unwrap();
        let status = tracker.snapshot();
        assert_eq!(second, 2);
        assert_eq!(status.state, PipelineState::Running);
        assert!(status.stages_completed.is_empty());
        assert_eq!(status.error, None);
        assert_eq!(status.end_time, None);
    }

    #[test]
    fn test_status_serializes_lowercase_state() {
        let json = serde_json::to_value(PipelineStatus::idle()).unwrap();
        assert_eq!(json["state"], "idle");
        assert!(json["current_stage"].is_null());
    }

    #[tokio::test]
    async fn test_reader_waits_for_terminal_state() {
        let tracker = std::sync::Arc::new(StatusTracker::new());
        let mut reader = tracker.reader();
        let run_id = tracker.begin_run().unwrap();

        let writer = tracker.clone();
        tokio::spawn(async move {
            writer.stage_started(StageId::Ingestion);
            writer.complete();
        });

        let status = reader.wait_for_terminal(run_id).await;
        assert_eq!(status.state, PipelineState::Completed);
        assert_eq!(status.run_id, run_id);
    }

    #[tokio::test]
    async fn test_reader_falls_back_when_tracker_is_gone() {
        let tracker = StatusTracker::new();
        let mut reader = tracker.reader();
        let run_id = tracker.begin_run().unwrap();
        drop(tracker);

        let status = reader.wait_for_terminal(run_id).await;
        assert_eq!(status.run_id, run_id);
        assert_eq!(status.state, PipelineState::Running);
    }
}
