//! Wave-based batch execution over a shared key pool.

mod context;
mod job;
mod progress;
mod runner;

pub use context::{BackoffSettings, RunContext, RunSettings};
pub use job::{Document, Job, JobReport, Outcome, ResultSlots, Settled};
pub use progress::{Counts, JobSettled, LogSink, NoopSink, ProgressSink, WaveStarted};
pub use runner::{BatchReport, BatchRunner};
