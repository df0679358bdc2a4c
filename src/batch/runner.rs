use crate::analyzer::Analyzer;
use crate::batch::context::RunContext;
use crate::batch::job::{Document, Job, JobReport, Outcome, ResultSlots, Settled};
use crate::batch::progress::{Counts, JobSettled, WaveStarted};
use crate::error::{BatchError, JobError};
use crate::keys::KeyPool;
use crate::planner::{self, WaveBudget};
use crate::retry::is_retryable;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{self, JoinSet};
use tracing::{debug, error, info, warn};

/// What a finished run hands back.
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// One entry per input document, in input order.
    pub results: Vec<JobReport>,
    pub budget: WaveBudget,
    pub elapsed: Duration,
    /// Distinct jobs that needed at least one retry wave.
    pub retried_jobs: usize,
    /// Waves dispatched, including the first.
    pub waves: u32,
}

impl BatchReport {
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// Drives documents through sequential waves of bounded parallel attempts.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    ctx: RunContext,
}

fn describe(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// One attempt of one job: acquire a key, call the analyzer on a blocking
/// thread and classify the failure.
///
/// The blocking call owns `permit` and reports the key's health itself, so a
/// call abandoned by the timeout keeps its worker slot and still settles the
/// key once it returns.
async fn attempt(
    keys: Arc<KeyPool>,
    analyzer: Arc<dyn Analyzer>,
    job: Job,
    timeout: Option<Duration>,
    permit: OwnedSemaphorePermit,
) -> Outcome {
    let key = keys.acquire();
    info!(
        "Processing {} - attempt {}/{} with key {}",
        job.name(),
        job.attempt,
        job.max_attempts,
        key
    );

    let document = Arc::clone(&job.document);
    let pool = Arc::clone(&keys);
    let call_key = key.clone();
    let call = task::spawn_blocking(move || {
        let _permit = permit;
        let result = analyzer.analyze(&document, &call_key);
        if result.is_ok() {
            pool.report_success(&call_key);
        } else {
            pool.report_failure(&call_key);
        }
        result
    });

    let joined = match timeout {
        Some(limit) => {
            if let Ok(joined) = tokio::time::timeout(limit, call).await {
                joined
            } else {
                let error_message = format!("analysis timed out after {}", describe(limit));
                warn!("{}: {}", job.name(), error_message);
                return Outcome::Failure {
                    index: job.index,
                    name: job.name().to_string(),
                    retryable: is_retryable(&error_message),
                    error_message,
                };
            }
        }
        None => call.await,
    };

    match joined {
        Ok(Ok(payload)) => Outcome::Success {
            index: job.index,
            name: job.name().to_string(),
            payload,
        },
        Ok(Err(err)) => {
            let error_message = err.message().to_string();
            let retryable = is_retryable(&error_message);
            error!(
                "Failed to process {} (attempt {}): {}",
                job.name(),
                job.attempt,
                error_message
            );
            Outcome::Failure {
                index: job.index,
                name: job.name().to_string(),
                error_message,
                retryable,
            }
        }
        Err(join_err) => {
            keys.report_failure(&key);
            error!("Analyzer for {} panicked: {join_err}", job.name());
            Outcome::Failure {
                index: job.index,
                name: job.name().to_string(),
                error_message: format!("analysis panicked: {join_err}"),
                retryable: false,
            }
        }
    }
}

impl BatchRunner {
    #[must_use]
    pub const fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub const fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Budget the run would use for `num_jobs` documents.
    #[must_use]
    pub fn plan(&self, num_jobs: usize) -> WaveBudget {
        planner::plan(&self.ctx.settings.plan_input(num_jobs, self.ctx.keys.len()))
    }

    /// Analyze every document and return one report per document, in input
    /// order.
    ///
    /// Per-document failures are recorded in the results and never fail the
    /// run.
    ///
    /// # Errors
    ///
    /// Returns a [`BatchError`] before any document is dispatched when the
    /// settings are invalid or the documents exceed the daily quota of all
    /// keys combined.
    pub async fn run(&self, documents: Vec<Document>) -> Result<BatchReport, BatchError> {
        let settings = &self.ctx.settings;
        settings.validate()?;

        let total = documents.len();
        let budget = self.plan(total);
        if !budget.daily_limit_ok {
            error!(
                "{} documents exceed the daily limit of {}",
                total, budget.limits.by_daily_cap
            );
            return Err(BatchError::DailyLimitExceeded {
                jobs: total,
                capacity: budget.limits.by_daily_cap,
            });
        }
        info!(
            strategy = %budget.strategy,
            workers = budget.optimal_workers,
            estimated_seconds = budget.estimated_seconds,
            "Planned batch of {} documents over {} keys",
            total,
            budget.num_keys
        );

        let started = Instant::now();
        let names: Vec<String> = documents.iter().map(|d| d.name.clone()).collect();
        let mut slots = ResultSlots::new(total);
        let mut retried = vec![false; total];
        let mut pending: Vec<Job> = documents
            .into_iter()
            .enumerate()
            .map(|(index, document)| Job::new(index, document, settings.max_attempts))
            .collect();

        let mut wave = 1;
        let mut workers = budget.optimal_workers;
        let mut waves = 0;
        while !pending.is_empty() {
            waves += 1;
            let carried = self.run_wave(wave, workers, pending, &mut slots).await;
            if carried.is_empty() {
                break;
            }
            for (job, _) in &carried {
                retried[job.index] = true;
            }

            // Wave k+1 is retry wave k.
            let retry_wave = wave;
            let delay = settings.backoff.delay_for(retry_wave);
            if !delay.is_zero() {
                info!(
                    "Waiting {} before retrying {} documents",
                    describe(delay),
                    carried.len()
                );
                tokio::time::sleep(delay).await;
            }

            pending = carried.into_iter().map(|(job, _)| job.next_attempt()).collect();
            workers = budget.retry_workers();
            wave += 1;
        }

        let elapsed = started.elapsed();
        let report = BatchReport {
            results: slots.into_reports(&names),
            budget,
            elapsed,
            retried_jobs: retried.iter().filter(|r| **r).count(),
            waves,
        };
        log_summary(&report);
        Ok(report)
    }

    /// Dispatch one wave and collect every outcome. Returns the jobs that
    /// failed transiently and still have attempts left, with their last error.
    async fn run_wave(
        &self,
        wave: u32,
        workers: usize,
        jobs: Vec<Job>,
        slots: &mut ResultSlots,
    ) -> Vec<(Job, String)> {
        let total = slots.len();
        self.ctx.sink.on_wave_started(&WaveStarted {
            wave,
            jobs: jobs.len(),
            workers,
        });

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut in_flight: HashMap<usize, Job> = HashMap::with_capacity(jobs.len());
        let mut tasks = JoinSet::new();
        for job in jobs {
            let semaphore = Arc::clone(&semaphore);
            let keys = Arc::clone(&self.ctx.keys);
            let analyzer = Arc::clone(&self.ctx.analyzer);
            let timeout = self.ctx.settings.job_timeout;
            let scheduled = job.clone();
            tasks.spawn(async move {
                let Ok(permit) = semaphore.acquire_owned().await else {
                    return Outcome::Failure {
                        index: scheduled.index,
                        name: scheduled.name().to_string(),
                        error_message: "worker pool closed".to_string(),
                        retryable: false,
                    };
                };
                attempt(keys, analyzer, scheduled, timeout, permit).await
            });
            in_flight.insert(job.index, job);
        }

        let mut carried = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    error!("Worker task failed: {join_err}");
                    continue;
                }
            };
            let Some(job) = in_flight.remove(&outcome.index()) else {
                continue;
            };

            let (succeeded, will_retry, error) = match outcome {
                Outcome::Success { payload, .. } => {
                    slots.settle(&job, Settled::Success(payload));
                    (true, false, None)
                }
                Outcome::Failure {
                    error_message,
                    retryable: true,
                    ..
                } if job.has_attempts_left() => {
                    carried.push((job.clone(), error_message.clone()));
                    (false, true, Some(error_message))
                }
                Outcome::Failure {
                    error_message,
                    retryable,
                    ..
                } => {
                    let failure = if retryable {
                        JobError::ExhaustedRetries {
                            attempts: job.attempt,
                            message: error_message,
                        }
                    } else {
                        JobError::Fatal {
                            message: error_message,
                        }
                    };
                    let shown = failure.to_string();
                    slots.settle(&job, Settled::Failure(failure));
                    (false, false, Some(shown))
                }
            };

            self.ctx.sink.on_job_settled(&JobSettled {
                index: job.index,
                name: job.name().to_string(),
                succeeded,
                attempt: job.attempt,
                will_retry,
                error,
                counts: Counts {
                    success: slots.succeeded(),
                    failed: slots.failed(),
                    retrying: carried.len(),
                    total,
                },
            });
        }

        for job in in_flight.into_values() {
            debug!("{} never reported back", job.name());
            slots.settle(
                &job,
                Settled::Failure(JobError::Fatal {
                    message: "worker task aborted".to_string(),
                }),
            );
        }

        // Calls abandoned by the timeout still hold their slots.
        let busy = workers - semaphore.available_permits();
        if busy > 0 {
            debug!("Waiting for {busy} abandoned analyses before the next wave");
        }
        if let Ok(permits) = u32::try_from(workers) {
            let _drained = semaphore.acquire_many(permits).await;
        }
        carried
    }
}

fn log_summary(report: &BatchReport) {
    let total = report.results.len();
    let succeeded = report.succeeded();
    let seconds = report.elapsed.as_secs_f64();
    if succeeded == total {
        info!(
            "All {} documents processed in {:.1}s ({:.1} minutes)",
            total,
            seconds,
            seconds / 60.0
        );
    } else {
        warn!(
            "Processing finished: {}/{} succeeded, {} failed in {:.1}s ({:.1} minutes)",
            succeeded,
            total,
            report.failed(),
            seconds,
            seconds / 60.0
        );
    }
    if report.retried_jobs > 0 {
        info!("{} documents needed a retry", report.retried_jobs);
    }

    let estimate = report.budget.estimated_seconds;
    if (seconds - estimate).abs() < estimate * 0.2 {
        info!("Processing time matched the estimate");
    } else if seconds < estimate {
        info!(
            "Processing was {:.0}s faster than estimated",
            estimate - seconds
        );
    }
}
