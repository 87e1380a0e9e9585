// Session - runs pipelines off the caller's thread, one at a time
//
// A run executes on tokio's blocking pool. Its events arrive on an unbounded
// channel in emission order, and the channel closes once the run has ended.

use super::{Pipeline, PipelineEvent, PipelineFailure, PipelineOutput, RecordingSource, Stage};
use crate::config::TopomapConfig;
use crate::error::{Result, TopomapError};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owns the "one run in flight" rule
#[derive(Debug, Clone, Default)]
pub struct TopomapSession {
    active: Arc<Mutex<bool>>,
}

/// Clears the session's busy flag when the run ends, however it ends
struct ActiveGuard(Arc<Mutex<bool>>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        *self.0.lock() = false;
    }
}

impl TopomapSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        *self.active.lock()
    }

    /// Start a run with `config`. Must be called from within a Tokio runtime.
    pub fn start(&self, config: TopomapConfig, source: RecordingSource) -> Result<RunHandle> {
        self.start_pipeline(Pipeline::new(config), source)
    }

    /// Start a prepared pipeline; the session adds its own event channel to
    /// the pipeline's observers.
    pub fn start_pipeline(&self, pipeline: Pipeline, source: RecordingSource) -> Result<RunHandle> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            TopomapError::Internal("Pipeline sessions require a Tokio runtime".to_string())
        })?;

        {
            let mut active = self.active.lock();
            if *active {
                log::warn!("Rejected pipeline start: a run is already in progress");
                return Err(TopomapError::Busy);
            }
            *active = true;
        }
        let guard = ActiveGuard(self.active.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let pipeline = pipeline.with_observer(tx);

        let task = runtime.spawn_blocking(move || {
            let _guard = guard;
            pipeline.run(source, &token)
        });

        Ok(RunHandle {
            events: rx,
            cancel,
            task,
        })
    }
}

/// Handle to a run started by [`TopomapSession`]
pub struct RunHandle {
    events: mpsc::UnboundedReceiver<PipelineEvent>,
    cancel: CancellationToken,
    task: JoinHandle<std::result::Result<PipelineOutput, PipelineFailure>>,
}

impl RunHandle {
    /// Request cooperative cancellation; the run stops before its next stage.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next event, or `None` once the run has ended and every event was received.
    pub async fn next_event(&mut self) -> Option<PipelineEvent> {
        self.events.recv().await
    }

    /// Wait for the run and collect every event it emitted.
    pub async fn finish(mut self) -> (Vec<PipelineEvent>, std::result::Result<PipelineOutput, PipelineFailure>) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        (events, join(self.task).await)
    }

    /// Wait for the run, discarding events not yet received.
    pub async fn wait(self) -> std::result::Result<PipelineOutput, PipelineFailure> {
        join(self.task).await
    }
}

async fn join(
    task: JoinHandle<std::result::Result<PipelineOutput, PipelineFailure>>,
) -> std::result::Result<PipelineOutput, PipelineFailure> {
    match task.await {
        Ok(result) => result,
        Err(e) => {
            log::error!("Pipeline task did not complete: {}", e);
            Err(PipelineFailure {
                stage: Stage::Failed,
                error: TopomapError::Internal(format!("Pipeline task did not complete: {}", e)),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Recording;
    use std::f64::consts::PI;

    fn recording() -> Recording {
        let n = 1024;
        let sine: Vec<f64> = (0..n).map(|i| (2.0 * PI * 10.0 * i as f64 / 256.0).sin()).collect();
        Recording::new(
            vec!["C3".to_string(), "C4".to_string()],
            256.0,
            vec![sine.clone(), sine],
        )
        .unwrap()
    }

    fn config() -> TopomapConfig {
        let mut config = TopomapConfig::default();
        config.render.resolution = 16;
        config.render.dpi = 40;
        config
    }

    #[tokio::test]
    async fn test_events_end_with_terminal() {
        let session = TopomapSession::new();
        let handle = session.start(config(), recording().into()).unwrap();
        let (events, result) = handle.finish().await;
        assert!(result.is_ok());
        assert_eq!(events.last(), Some(&PipelineEvent::Done));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn test_failure_releases_session() {
        let session = TopomapSession::new();
        let bad = TopomapConfig {
            frequency_range: (40.0, 1.0),
            ..config()
        };
        let failure = session
            .start(bad, recording().into())
            .unwrap()
            .wait()
            .await
            .unwrap_err();
        assert_eq!(failure.stage, Stage::Idle);
        assert!(!session.is_running());
        assert!(session.start(config(), recording().into()).is_ok());
    }

    #[test]
    fn test_start_outside_runtime() {
        let session = TopomapSession::new();
        assert!(matches!(
            session.start(config(), recording().into()),
            Err(TopomapError::Internal(_))
        ));
        assert!(!session.is_running());
    }
}
