//! Sizing of the first dispatch wave from per-key quotas.

use serde::Serialize;
use std::fmt;

/// Upper bound on parallel workers regardless of quota.
pub const DEFAULT_HARD_WORKER_CAP: usize = 10;
/// Worker cap applied when the daily ceiling is already the bottleneck.
pub const LIMITED_WORKER_CAP: usize = 3;
pub const DEFAULT_AVG_TOKENS_PER_JOB: u64 = 20_000;
pub const DEFAULT_AVG_SECONDS_PER_JOB: u64 = 30;

/// Everything the planner reads. All quotas are per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanInput {
    pub num_jobs: usize,
    pub num_keys: usize,
    pub tokens_per_min_per_key: u64,
    pub requests_per_min_per_key: u64,
    pub requests_per_day_per_key: u64,
    pub avg_tokens_per_job: u64,
    pub avg_seconds_per_job: u64,
    pub hard_worker_cap: usize,
}

impl PlanInput {
    /// Input with the default per-job estimates and worker cap.
    #[must_use]
    pub const fn new(
        num_jobs: usize,
        num_keys: usize,
        tokens_per_min_per_key: u64,
        requests_per_min_per_key: u64,
        requests_per_day_per_key: u64,
    ) -> Self {
        Self {
            num_jobs,
            num_keys,
            tokens_per_min_per_key,
            requests_per_min_per_key,
            requests_per_day_per_key,
            avg_tokens_per_job: DEFAULT_AVG_TOKENS_PER_JOB,
            avg_seconds_per_job: DEFAULT_AVG_SECONDS_PER_JOB,
            hard_worker_cap: DEFAULT_HARD_WORKER_CAP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Every job fits in one minute of request quota.
    FastParallel,
    /// Jobs span several minutes but fit in the daily quota.
    BatchParallel,
    /// Jobs exceed the daily quota.
    Limited,
}

impl Strategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FastParallel => "fast_parallel",
            Self::BatchParallel => "batch_parallel",
            Self::Limited => "limited",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capacity figures behind a budget; the smallest one is the bottleneck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaLimits {
    pub by_request_rate: u64,
    pub by_token_rate: u64,
    pub by_daily_cap: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaveBudget {
    pub optimal_workers: usize,
    pub strategy: Strategy,
    pub estimated_seconds: f64,
    pub estimated_sequential_seconds: f64,
    pub speedup_factor: f64,
    pub daily_limit_ok: bool,
    pub limits: QuotaLimits,
    pub num_jobs: usize,
    pub num_keys: usize,
    pub requests_per_min_per_key: u64,
    pub requests_per_day_per_key: u64,
}

impl WaveBudget {
    /// Worker count for every retry wave.
    #[must_use]
    pub fn retry_workers(&self) -> usize {
        (self.optimal_workers / 2).max(1)
    }

    /// Number of waves of `optimal_workers` needed to cover all jobs once.
    #[must_use]
    pub const fn batches(&self) -> usize {
        self.num_jobs.div_ceil(self.optimal_workers)
    }
}

fn saturating_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

fn clamp_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

/// Compute the worker count and strategy for a run.
///
/// Pure and deterministic. An empty job set yields one worker.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn plan(input: &PlanInput) -> WaveBudget {
    let keys = saturating_u64(input.num_keys);
    let jobs = saturating_u64(input.num_jobs);

    let by_request_rate = keys.saturating_mul(input.requests_per_min_per_key);
    let by_token_rate = keys
        .saturating_mul(input.tokens_per_min_per_key)
        .checked_div(input.avg_tokens_per_job)
        .unwrap_or(u64::MAX);
    let by_daily_cap = keys.saturating_mul(input.requests_per_day_per_key);

    let mut workers = clamp_usize(by_request_rate)
        .min(clamp_usize(by_token_rate))
        .min(input.num_jobs)
        .min(input.hard_worker_cap)
        .max(1);

    let daily_limit_ok = jobs <= by_daily_cap;

    let strategy = if jobs <= by_request_rate {
        Strategy::FastParallel
    } else if jobs <= by_daily_cap {
        Strategy::BatchParallel
    } else {
        workers = workers.min(LIMITED_WORKER_CAP);
        Strategy::Limited
    };

    let per_job = input.avg_seconds_per_job as f64;
    let estimated_seconds = (input.num_jobs as f64 / workers as f64) * per_job;
    let estimated_sequential_seconds = input.num_jobs as f64 * per_job;
    let speedup_factor = if estimated_seconds > 0.0 {
        estimated_sequential_seconds / estimated_seconds
    } else {
        1.0
    };

    WaveBudget {
        optimal_workers: workers,
        strategy,
        estimated_seconds,
        estimated_sequential_seconds,
        speedup_factor,
        daily_limit_ok,
        limits: QuotaLimits {
            by_request_rate,
            by_token_rate,
            by_daily_cap,
        },
        num_jobs: input.num_jobs,
        num_keys: input.num_keys,
        requests_per_min_per_key: input.requests_per_min_per_key,
        requests_per_day_per_key: input.requests_per_day_per_key,
    }
}

impl fmt::Display for WaveBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Computed settings:")?;
        writeln!(f, "  API keys: {}", self.num_keys)?;
        writeln!(f, "  Jobs: {}", self.num_jobs)?;
        writeln!(f, "  Workers: {}", self.optimal_workers)?;
        writeln!(f, "  Strategy: {}", self.strategy)?;
        writeln!(
            f,
            "  Estimated time: {:.1} minutes",
            self.estimated_seconds / 60.0
        )?;
        writeln!(f)?;
        writeln!(f, "API limits:")?;
        writeln!(
            f,
            "  Max concurrent: {} jobs per minute",
            self.limits.by_request_rate
        )?;
        writeln!(
            f,
            "  Per key: {} requests/min",
            self.requests_per_min_per_key
        )?;
        write!(f, "  Daily limit: {} jobs", self.limits.by_daily_cap)?;

        if saturating_u64(self.num_jobs) > self.limits.by_request_rate {
            writeln!(f)?;
            writeln!(f)?;
            writeln!(f, "Processing strategy:")?;
            writeln!(f, "  Batches: {}", self.batches())?;
            write!(f, "  Per batch: {} concurrent jobs", self.optimal_workers)?;
        }
        if !self.daily_limit_ok {
            writeln!(f)?;
            writeln!(f)?;
            write!(
                f,
                "Daily limit exceeded: only {} jobs can run today",
                self.limits.by_daily_cap
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn gemini_free_tier(num_jobs: usize, num_keys: usize) -> PlanInput {
        PlanInput::new(num_jobs, num_keys, 125_000, 2, 50)
    }

    #[test]
    fn test_small_batch_is_fast_parallel() {
        let budget = plan(&gemini_free_tier(3, 5));
        assert_eq!(budget.optimal_workers, 3);
        assert_eq!(budget.strategy, Strategy::FastParallel);
        assert!(budget.daily_limit_ok);
        assert_eq!(budget.limits.by_request_rate, 10);
        assert_eq!(budget.limits.by_token_rate, 31);
        assert_eq!(budget.limits.by_daily_cap, 250);
    }

    #[test]
    fn test_hard_cap_applies() {
        let budget = plan(&gemini_free_tier(100, 5));
        assert_eq!(budget.optimal_workers, 10);
        assert_eq!(budget.strategy, Strategy::BatchParallel);
        assert_eq!(budget.batches(), 10);
        assert_eq!(budget.retry_workers(), 5);
    }

    #[test]
    fn test_over_daily_cap_is_limited() {
        let budget = plan(&gemini_free_tier(1000, 1));
        assert_eq!(budget.strategy, Strategy::Limited);
        assert!(!budget.daily_limit_ok);
        assert_eq!(budget.optimal_workers, 2);

        let wide = plan(&PlanInput::new(1000, 10, 1_000_000, 10, 50));
        assert_eq!(wide.strategy, Strategy::Limited);
        assert_eq!(wide.optimal_workers, LIMITED_WORKER_CAP);
    }

    #[test]
    fn test_token_rate_bottleneck() {
        let budget = plan(&PlanInput::new(20, 2, 30_000, 60, 1000));
        assert_eq!(budget.limits.by_token_rate, 3);
        assert_eq!(budget.optimal_workers, 3);
    }

    #[test]
    fn test_zero_jobs_does_not_divide_by_zero() {
        let budget = plan(&gemini_free_tier(0, 2));
        assert_eq!(budget.optimal_workers, 1);
        assert!(budget.daily_limit_ok);
        assert!(budget.estimated_seconds.abs() < f64::EPSILON);
        assert!((budget.speedup_factor - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_token_estimate_is_unbounded() {
        let mut input = gemini_free_tier(4, 1);
        input.avg_tokens_per_job = 0;
        let budget = plan(&input);
        assert_eq!(budget.limits.by_token_rate, u64::MAX);
        assert_eq!(budget.optimal_workers, 2);
    }

    #[test]
    fn test_estimate_and_speedup() {
        let budget = plan(&gemini_free_tier(6, 1));
        // 2 workers, 6 jobs of 30s
        assert!((budget.estimated_seconds - 90.0).abs() < f64::EPSILON);
        assert!((budget.estimated_sequential_seconds - 180.0).abs() < f64::EPSILON);
        assert!((budget.speedup_factor - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let input = gemini_free_tier(42, 3);
        assert_eq!(plan(&input), plan(&input));
    }

    #[test]
    fn test_summary_mentions_batches_when_wide() {
        let text = plan(&gemini_free_tier(100, 5)).to_string();
        assert!(text.contains("Workers: 10"));
        assert!(text.contains("Batches: 10"));
        assert!(!text.contains("Daily limit exceeded"));

        let narrow = plan(&gemini_free_tier(2, 5)).to_string();
        assert!(!narrow.contains("Batches"));

        let over = plan(&gemini_free_tier(1000, 1)).to_string();
        assert!(over.contains("Daily limit exceeded: only 50 jobs"));
    }
}
