use serde::Serialize;
use tracing::{info, warn};

/// Aggregate counters at the moment of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Counts {
    pub success: usize,
    pub failed: usize,
    /// Jobs carried into the next wave so far.
    pub retrying: usize,
    pub total: usize,
}

/// Emitted when a wave is about to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WaveStarted {
    /// 1 for the initial wave, 2.. for retry waves.
    pub wave: u32,
    pub jobs: usize,
    pub workers: usize,
}

/// Emitted once per attempt, in completion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSettled {
    pub index: usize,
    pub name: String,
    pub succeeded: bool,
    pub attempt: u32,
    /// The job failed and was carried into the next wave.
    pub will_retry: bool,
    pub error: Option<String>,
    pub counts: Counts,
}

/// Observer for batch progress. Purely informational: nothing a sink does
/// changes the outcome of a run.
pub trait ProgressSink: Send + Sync {
    fn on_wave_started(&self, _event: &WaveStarted) {}

    fn on_job_settled(&self, event: &JobSettled);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn on_job_settled(&self, _event: &JobSettled) {}
}

/// Reports progress through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn on_wave_started(&self, event: &WaveStarted) {
        if event.wave == 1 {
            info!(
                "Dispatching {} jobs with {} workers",
                event.jobs, event.workers
            );
        } else {
            info!(
                "Retry wave {} for {} jobs with {} workers",
                event.wave - 1,
                event.jobs,
                event.workers
            );
        }
    }

    fn on_job_settled(&self, event: &JobSettled) {
        let counts = event.counts;
        if event.succeeded {
            info!(
                success = counts.success,
                failed = counts.failed,
                retrying = counts.retrying,
                total = counts.total,
                "{} done (attempt {})",
                event.name,
                event.attempt
            );
        } else if event.will_retry {
            warn!(
                retrying = counts.retrying,
                "{} needs another attempt: {}",
                event.name,
                event.error.as_deref().unwrap_or_default()
            );
        } else {
            warn!(
                success = counts.success,
                failed = counts.failed,
                total = counts.total,
                "{} failed after attempt {}: {}",
                event.name,
                event.attempt,
                event.error.as_deref().unwrap_or_default()
            );
        }
    }
}
