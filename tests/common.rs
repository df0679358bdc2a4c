#![allow(dead_code)]

use std::env;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct EnvGuard {
    vars: Vec<(&'static str, Option<String>)>,
}

impl EnvGuard {
    #[must_use]
    pub fn new(vars: Vec<&'static str>) -> Self {
        let vars = vars
            .into_iter()
            .map(|var| (var, env::var(var).ok()))
            .collect();
        Self { vars }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        // Restore original environment state
        for (var, original_value) in &self.vars {
            match original_value {
                Some(value) => env::set_var(var, value),
                None => env::remove_var(var),
            }
        }
    }
}

/// Every `SLUICE_*` variable the config layer reads.
pub const SLUICE_VARS: &[&str] = &[
    "SLUICE_PROVIDER",
    "SLUICE_BASE_URL",
    "SLUICE_MODEL",
    "SLUICE_API_KEYS",
    "SLUICE_API_KEY_1",
    "SLUICE_API_KEY_2",
    "SLUICE_API_KEY_3",
    "SLUICE_MAX_KEY_FAILURES",
    "SLUICE_TOKENS_PER_MINUTE",
    "SLUICE_REQUESTS_PER_MINUTE",
    "SLUICE_REQUESTS_PER_DAY",
    "SLUICE_AVG_TOKENS_PER_JOB",
    "SLUICE_AVG_SECONDS_PER_JOB",
    "SLUICE_HARD_WORKER_CAP",
    "SLUICE_MAX_ATTEMPTS",
    "SLUICE_JOB_TIMEOUT",
    "SLUICE_BACKOFF_STEP",
    "SLUICE_MAX_BACKOFF",
    "SLUICE_LOG_LEVEL",
    "SLUICE_LOG_FORMAT",
];

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Serializes env-touching tests and clears every `SLUICE_*` variable until
/// dropped.
pub struct CleanEnv {
    _guard: EnvGuard,
    _lock: MutexGuard<'static, ()>,
}

#[must_use]
pub fn clean_env() -> CleanEnv {
    let lock = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let guard = EnvGuard::new(SLUICE_VARS.to_vec());
    for var in SLUICE_VARS {
        env::remove_var(var);
    }
    CleanEnv {
        _guard: guard,
        _lock: lock,
    }
}
