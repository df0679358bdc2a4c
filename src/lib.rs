pub mod analyzer;
pub mod batch;
pub mod cli;
pub mod config;
pub mod error;
pub mod init;
pub mod keys;
pub mod planner;
pub mod retry;

// Re-export key types for convenience
pub use analyzer::{create_analyzer, Analyzer};
pub use batch::{BatchReport, BatchRunner, Document, JobReport, ProgressSink, RunContext};
pub use config::Config;
pub use error::{AnalyzeError, BatchError, JobError};
pub use init::{initialize_config, InitOptions};
pub use keys::{ApiKey, KeyPool};
pub use planner::{plan, PlanInput, Strategy, WaveBudget};
pub use retry::is_retryable;

// Test utilities module - only compiled with test or testing feature
#[cfg(any(test, feature = "testing"))]
pub mod test_utils;
