use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Wall-clock duration of one named scope
#[derive(Debug, Clone, Serialize)]
pub struct StageTiming {
    pub label: String,
    pub duration_ms: f64,
}

/// Shared collector that scopes append their timing to when dropped
#[derive(Debug, Clone, Default)]
pub struct TimingLog {
    entries: Arc<Mutex<Vec<StageTiming>>>,
}

impl TimingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope(&self, label: impl Into<String>) -> ProfileScope {
        ProfileScope {
            label: label.into(),
            start: Instant::now(),
            sink: Some(self.clone()),
        }
    }

    pub fn entries(&self) -> Vec<StageTiming> {
        self.entries.lock().clone()
    }

    fn push(&self, timing: StageTiming) {
        self.entries.lock().push(timing);
    }
}

/// Logs the time between creation and drop at info level
pub struct ProfileScope {
    label: String,
    start: Instant,
    sink: Option<TimingLog>,
}

impl ProfileScope {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            start: Instant::now(),
            sink: None,
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        let duration_ms = self.elapsed_ms();

        log::info!("[PROFILE] {} - {:.3}ms", self.label, duration_ms);

        if let Some(sink) = &self.sink {
            sink.push(StageTiming {
                label: std::mem::take(&mut self.label),
                duration_ms,
            });
        }
    }
}

/// Macro for easy profiling
#[macro_export]
macro_rules! profile_scope {
    ($label:expr) => {
        let _profile_scope = $crate::profiling::ProfileScope::new($label);
    };
    ($log:expr, $label:expr) => {
        let _profile_scope = $log.scope($label);
    };
}
