use crate::analyzer::Analyzer;
use crate::batch::progress::{LogSink, ProgressSink};
use crate::config::{BackoffConfig, Config};
use crate::error::BatchError;
use crate::keys::KeyPool;
use crate::planner::PlanInput;
use std::sync::Arc;
use std::time::Duration;

/// Validated numbers a run is driven by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub tokens_per_min_per_key: u64,
    pub requests_per_min_per_key: u64,
    pub requests_per_day_per_key: u64,
    pub avg_tokens_per_job: u64,
    pub avg_seconds_per_job: u64,
    pub hard_worker_cap: usize,
    /// Attempts per job, also the ceiling on retry waves.
    pub max_attempts: u32,
    pub job_timeout: Option<Duration>,
    pub backoff: BackoffSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffSettings {
    pub step: Duration,
    pub max: Duration,
}

impl BackoffSettings {
    /// No delay between waves.
    pub const NONE: Self = Self {
        step: Duration::ZERO,
        max: Duration::ZERO,
    };

    /// Delay before retry wave `retry_wave` (1-based).
    #[must_use]
    pub fn delay_for(&self, retry_wave: u32) -> Duration {
        self.step.saturating_mul(retry_wave).min(self.max)
    }
}

impl From<&BackoffConfig> for BackoffSettings {
    fn from(config: &BackoffConfig) -> Self {
        Self {
            step: Duration::from_secs(config.step_seconds),
            max: Duration::from_secs(config.max_seconds),
        }
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RunSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            tokens_per_min_per_key: config.limits.tokens_per_minute,
            requests_per_min_per_key: config.limits.requests_per_minute,
            requests_per_day_per_key: config.limits.requests_per_day,
            avg_tokens_per_job: config.planner.avg_tokens_per_job,
            avg_seconds_per_job: config.planner.avg_seconds_per_job,
            hard_worker_cap: config.planner.hard_worker_cap,
            max_attempts: config.retry.max_attempts,
            job_timeout: config.retry.job_timeout(),
            backoff: BackoffSettings::from(&config.backoff),
        }
    }

    /// Per-key quotas with every other setting at its default.
    #[must_use]
    pub fn with_limits(tokens_per_min: u64, requests_per_min: u64, requests_per_day: u64) -> Self {
        Self {
            tokens_per_min_per_key: tokens_per_min,
            requests_per_min_per_key: requests_per_min,
            requests_per_day_per_key: requests_per_day,
            ..Self::default()
        }
    }

    /// # Errors
    ///
    /// Returns [`BatchError::InvalidSetting`] naming the first setting that
    /// is zero.
    pub fn validate(&self) -> Result<(), BatchError> {
        let checks: [(&'static str, bool); 7] = [
            ("tokens_per_minute", self.tokens_per_min_per_key > 0),
            ("requests_per_minute", self.requests_per_min_per_key > 0),
            ("requests_per_day", self.requests_per_day_per_key > 0),
            ("avg_tokens_per_job", self.avg_tokens_per_job > 0),
            ("avg_seconds_per_job", self.avg_seconds_per_job > 0),
            ("hard_worker_cap", self.hard_worker_cap > 0),
            ("max_attempts", self.max_attempts > 0),
        ];
        match checks.into_iter().find(|(_, ok)| !ok) {
            Some((name, _)) => Err(BatchError::InvalidSetting {
                name,
                reason: "must be greater than 0".to_string(),
            }),
            None => Ok(()),
        }
    }

    #[must_use]
    pub const fn plan_input(&self, num_jobs: usize, num_keys: usize) -> PlanInput {
        PlanInput {
            num_jobs,
            num_keys,
            tokens_per_min_per_key: self.tokens_per_min_per_key,
            requests_per_min_per_key: self.requests_per_min_per_key,
            requests_per_day_per_key: self.requests_per_day_per_key,
            avg_tokens_per_job: self.avg_tokens_per_job,
            avg_seconds_per_job: self.avg_seconds_per_job,
            hard_worker_cap: self.hard_worker_cap,
        }
    }
}

/// Everything a run needs, passed in explicitly by the caller.
#[derive(Clone)]
pub struct RunContext {
    pub settings: RunSettings,
    pub keys: Arc<KeyPool>,
    pub analyzer: Arc<dyn Analyzer>,
    pub sink: Arc<dyn ProgressSink>,
}

impl RunContext {
    /// Context reporting progress through [`LogSink`].
    #[must_use]
    pub fn new(settings: RunSettings, keys: Arc<KeyPool>, analyzer: Arc<dyn Analyzer>) -> Self {
        Self {
            settings,
            keys,
            analyzer,
            sink: Arc::new(LogSink),
        }
    }

    /// Build the key pool and settings from a loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::EmptyKeyPool`] when no keys are configured.
    pub fn from_config(config: &Config, analyzer: Arc<dyn Analyzer>) -> Result<Self, BatchError> {
        let keys = KeyPool::new(
            config.keys.api_keys.iter().map(String::as_str),
            config.keys.max_consecutive_failures,
        )?;
        Ok(Self::new(
            RunSettings::from_config(config),
            Arc::new(keys),
            analyzer,
        ))
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("settings", &self.settings)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::mock::MockAnalyzer;

    #[test]
    fn test_settings_from_default_config() {
        let settings = RunSettings::default();
        assert_eq!(settings.requests_per_min_per_key, 2);
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.backoff.delay_for(1), Duration::from_secs(5));
        assert_eq!(settings.backoff.delay_for(4), Duration::from_secs(15));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_validation_names_field() {
        let mut settings = RunSettings::with_limits(1000, 5, 0);
        assert_eq!(
            settings.validate(),
            Err(BatchError::InvalidSetting {
                name: "requests_per_day",
                reason: "must be greater than 0".to_string(),
            })
        );
        settings.requests_per_day_per_key = 10;
        settings.max_attempts = 0;
        assert!(matches!(
            settings.validate(),
            Err(BatchError::InvalidSetting {
                name: "max_attempts",
                ..
            })
        ));
    }

    #[test]
    fn test_context_requires_keys() {
        let config = Config::default();
        let err = RunContext::from_config(&config, Arc::new(MockAnalyzer::new())).unwrap_err();
        assert_eq!(err, BatchError::EmptyKeyPool);

        let mut config = Config::default();
        config.keys.api_keys = vec!["a".to_string(), "b".to_string()];
        let ctx = RunContext::from_config(&config, Arc::new(MockAnalyzer::new())).unwrap();
        assert_eq!(ctx.keys.len(), 2);
    }
}
