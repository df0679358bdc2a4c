use crate::error::BatchError;
use std::env;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, warn};

/// Default number of consecutive failures after which a key is skipped.
pub const DEFAULT_MAX_FAILURES: u32 = 3;

/// An API credential. Cloning is cheap; formatting never shows the full
/// secret.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ApiKey(Arc<str>);

impl ApiKey {
    pub fn new(secret: impl Into<Arc<str>>) -> Self {
        Self(secret.into())
    }

    /// The raw secret, for building requests.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// First eight characters followed by `...`.
    #[must_use]
    pub fn redacted(&self) -> String {
        let prefix: String = self.0.chars().take(8).collect();
        format!("{prefix}...")
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ApiKey").field(&self.redacted()).finish()
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

#[derive(Debug)]
struct Credential {
    key: ApiKey,
    consecutive_failures: u32,
    last_reset_at: Instant,
}

#[derive(Debug)]
struct PoolState {
    credentials: Vec<Credential>,
    cursor: usize,
}

/// Point-in-time view of one credential's health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHealth {
    pub key: ApiKey,
    pub consecutive_failures: u32,
    pub usable: bool,
}

/// Round-robin credential pool with per-key failure tracking.
///
/// All operations take a single lock and walk at most the whole pool, so
/// concurrent workers only contend briefly.
#[derive(Debug)]
pub struct KeyPool {
    state: Mutex<PoolState>,
    max_failures: u32,
}

impl KeyPool {
    /// Builds a pool from keys in the given order.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::EmptyKeyPool`] if `keys` is empty and
    /// [`BatchError::InvalidSetting`] if `max_failures` is zero.
    pub fn new<I, K>(keys: I, max_failures: u32) -> Result<Self, BatchError>
    where
        I: IntoIterator<Item = K>,
        K: Into<Arc<str>>,
    {
        if max_failures == 0 {
            return Err(BatchError::InvalidSetting {
                name: "max_consecutive_failures",
                reason: "must be greater than 0".to_string(),
            });
        }
        let now = Instant::now();
        let credentials: Vec<Credential> = keys
            .into_iter()
            .map(|secret| Credential {
                key: ApiKey::new(secret),
                consecutive_failures: 0,
                last_reset_at: now,
            })
            .collect();
        if credentials.is_empty() {
            return Err(BatchError::EmptyKeyPool);
        }
        Ok(Self {
            state: Mutex::new(PoolState {
                credentials,
                cursor: 0,
            }),
            max_failures,
        })
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Every operation leaves the state consistent, so a panic elsewhere
        // while holding the lock does not invalidate it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the next usable key, starting at the cursor.
    ///
    /// When every key has reached the failure limit, all counters are reset
    /// and the first key is returned. The pool never refuses a caller.
    pub fn acquire(&self) -> ApiKey {
        let mut state = self.lock();
        let len = state.credentials.len();
        for _ in 0..len {
            let index = state.cursor;
            state.cursor = (state.cursor + 1) % len;
            let credential = &state.credentials[index];
            if credential.consecutive_failures < self.max_failures {
                return credential.key.clone();
            }
        }

        warn!("All API keys have failed, resetting failure counters");
        let now = Instant::now();
        for credential in &mut state.credentials {
            credential.consecutive_failures = 0;
            credential.last_reset_at = now;
        }
        state.credentials[0].key.clone()
    }

    /// Records a failed call made with `key`. Unknown keys are ignored.
    pub fn report_failure(&self, key: &ApiKey) {
        let mut state = self.lock();
        if let Some(credential) = state.credentials.iter_mut().find(|c| &c.key == key) {
            credential.consecutive_failures += 1;
            warn!(
                "API key failure count for {}: {}",
                credential.key, credential.consecutive_failures
            );
        }
    }

    /// Records a successful call made with `key`, clearing its failure streak.
    pub fn report_success(&self, key: &ApiKey) {
        let mut state = self.lock();
        if let Some(credential) = state.credentials.iter_mut().find(|c| &c.key == key) {
            if credential.consecutive_failures > 0 {
                debug!("API key {} recovered", credential.key);
                credential.consecutive_failures = 0;
                credential.last_reset_at = Instant::now();
            }
        }
    }

    /// Current failure streak of `key`, if it belongs to the pool.
    #[must_use]
    pub fn failures(&self, key: &ApiKey) -> Option<u32> {
        self.lock()
            .credentials
            .iter()
            .find(|c| &c.key == key)
            .map(|c| c.consecutive_failures)
    }

    /// When `key`'s counter was last zeroed, if it belongs to the pool.
    #[must_use]
    pub fn last_reset_at(&self, key: &ApiKey) -> Option<Instant> {
        self.lock()
            .credentials
            .iter()
            .find(|c| &c.key == key)
            .map(|c| c.last_reset_at)
    }

    #[must_use]
    pub fn health(&self) -> Vec<KeyHealth> {
        self.lock()
            .credentials
            .iter()
            .map(|c| KeyHealth {
                key: c.key.clone(),
                consecutive_failures: c.consecutive_failures,
                usable: c.consecutive_failures < self.max_failures,
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().credentials.len()
    }

    /// Always false: construction rejects empty pools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().credentials.is_empty()
    }

    #[must_use]
    pub const fn max_failures(&self) -> u32 {
        self.max_failures
    }
}

/// Read API keys from the environment.
///
/// `<PREFIX>_API_KEYS` holds a comma-separated list. When it is missing or
/// empty, `<PREFIX>_API_KEY_1`, `<PREFIX>_API_KEY_2`, ... are read until the
/// first gap.
#[must_use]
pub fn keys_from_env(prefix: &str) -> Vec<String> {
    let mut keys: Vec<String> = env::var(format!("{prefix}_API_KEYS"))
        .map(|all| parse_key_list(&all))
        .unwrap_or_default();

    if keys.is_empty() {
        let mut index = 1;
        while let Ok(key) = env::var(format!("{prefix}_API_KEY_{index}")) {
            let key = key.trim();
            if key.is_empty() {
                break;
            }
            keys.push(key.to_string());
            index += 1;
        }
    }
    keys
}

/// Split a comma-separated key list, trimming entries and dropping blanks.
#[must_use]
pub fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::thread;

    fn pool(keys: &[&str]) -> KeyPool {
        KeyPool::new(keys.iter().copied(), DEFAULT_MAX_FAILURES).unwrap()
    }

    #[test]
    fn test_empty_pool_rejected() {
        let result = KeyPool::new(Vec::<String>::new(), DEFAULT_MAX_FAILURES);
        assert_eq!(result.unwrap_err(), BatchError::EmptyKeyPool);
    }

    #[test]
    fn test_zero_max_failures_rejected() {
        assert!(matches!(
            KeyPool::new(["a"], 0),
            Err(BatchError::InvalidSetting { .. })
        ));
    }

    #[test]
    fn test_round_robin_rotation() {
        let pool = pool(&["alpha", "beta", "gamma"]);
        let picked: Vec<String> = (0..6).map(|_| pool.acquire().expose().to_string()).collect();
        assert_eq!(
            picked,
            vec!["alpha", "beta", "gamma", "alpha", "beta", "gamma"]
        );
    }

    #[test]
    fn test_exhausted_key_is_skipped() {
        let pool = pool(&["alpha", "beta"]);
        let alpha = ApiKey::new("alpha");
        for _ in 0..3 {
            pool.report_failure(&alpha);
        }
        for _ in 0..4 {
            assert_eq!(pool.acquire().expose(), "beta");
        }
    }

    #[test]
    fn test_fail_open_resets_all_counters() {
        let pool = pool(&["alpha", "beta"]);
        let alpha = ApiKey::new("alpha");
        let beta = ApiKey::new("beta");
        for _ in 0..3 {
            pool.report_failure(&alpha);
            pool.report_failure(&beta);
        }
        assert!(pool.health().iter().all(|h| !h.usable));

        let key = pool.acquire();
        assert_eq!(key.expose(), "alpha");
        assert_eq!(pool.failures(&alpha), Some(0));
        assert_eq!(pool.failures(&beta), Some(0));
    }

    #[test]
    fn test_success_clears_streak() {
        let pool = pool(&["alpha"]);
        let alpha = ApiKey::new("alpha");
        pool.report_failure(&alpha);
        pool.report_failure(&alpha);
        assert_eq!(pool.failures(&alpha), Some(2));
        let before = pool.last_reset_at(&alpha).unwrap();
        pool.report_success(&alpha);
        assert_eq!(pool.failures(&alpha), Some(0));
        assert!(pool.last_reset_at(&alpha).unwrap() >= before);
    }

    #[test]
    fn test_unknown_key_reports_are_ignored() {
        let pool = pool(&["alpha"]);
        let stranger = ApiKey::new("stranger");
        pool.report_failure(&stranger);
        pool.report_success(&stranger);
        assert_eq!(pool.failures(&stranger), None);
        assert_eq!(pool.failures(&ApiKey::new("alpha")), Some(0));
    }

    #[test]
    fn test_concurrent_access_keeps_counts() {
        let pool = pool(&["alpha", "beta", "gamma", "delta"]);
        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..250 {
                        let key = pool.acquire();
                        pool.report_failure(&key);
                        pool.report_success(&key);
                    }
                });
            }
        });
        assert_eq!(pool.len(), 4);
        assert!(pool.health().iter().all(|h| h.consecutive_failures == 0));
    }

    #[test]
    fn test_redaction() {
        let key = ApiKey::new("AIzaSyD-very-secret");
        assert_eq!(key.redacted(), "AIzaSyD-...");
        assert_eq!(format!("{key}"), "AIzaSyD-...");
        assert!(!format!("{key:?}").contains("secret"));
    }

    #[test]
    fn test_parse_key_list() {
        assert_eq!(
            parse_key_list(" k1, k2 ,,k3 ,"),
            vec!["k1".to_string(), "k2".to_string(), "k3".to_string()]
        );
        assert!(parse_key_list(" , ").is_empty());
    }
}
