use crate::keys;
use crate::planner::{
    DEFAULT_AVG_SECONDS_PER_JOB, DEFAULT_AVG_TOKENS_PER_JOB, DEFAULT_HARD_WORKER_CAP,
};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use std::{env, path::Path, path::PathBuf};
use tracing::debug;

/// Prefix for every environment override.
pub const ENV_PREFIX: &str = "SLUICE";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub limits: RateLimits,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Per-key quotas.
#[allow(clippy::struct_field_names)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimits {
    #[serde(default = "default_tokens_per_minute")]
    pub tokens_per_minute: u64,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u64,
    #[serde(default = "default_requests_per_day")]
    pub requests_per_day: u64,
}

const fn default_tokens_per_minute() -> u64 {
    125_000
}
const fn default_requests_per_minute() -> u64 {
    2
}
const fn default_requests_per_day() -> u64 {
    50
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            tokens_per_minute: default_tokens_per_minute(),
            requests_per_minute: default_requests_per_minute(),
            requests_per_day: default_requests_per_day(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default = "default_avg_tokens_per_job")]
    pub avg_tokens_per_job: u64,
    #[serde(default = "default_avg_seconds_per_job")]
    pub avg_seconds_per_job: u64,
    #[serde(default = "default_hard_worker_cap")]
    pub hard_worker_cap: usize,
}

const fn default_avg_tokens_per_job() -> u64 {
    DEFAULT_AVG_TOKENS_PER_JOB
}
const fn default_avg_seconds_per_job() -> u64 {
    DEFAULT_AVG_SECONDS_PER_JOB
}
const fn default_hard_worker_cap() -> usize {
    DEFAULT_HARD_WORKER_CAP
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            avg_tokens_per_job: default_avg_tokens_per_job(),
            avg_seconds_per_job: default_avg_seconds_per_job(),
            hard_worker_cap: default_hard_worker_cap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per job, and the ceiling on retry waves.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Upper bound on a single analyze call. Unset means no bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_timeout_seconds: Option<u64>,
}

const fn default_max_attempts() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            job_timeout_seconds: None,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_seconds.map(Duration::from_secs)
    }
}

/// Linear backoff between retry waves: `min(max_seconds, step_seconds * wave)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_step")]
    pub step_seconds: u64,
    #[serde(default = "default_max_backoff")]
    pub max_seconds: u64,
}

const fn default_backoff_step() -> u64 {
    5
}
const fn default_max_backoff() -> u64 {
    15
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            step_seconds: default_backoff_step(),
            max_seconds: default_max_backoff(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

const fn default_max_consecutive_failures() -> u32 {
    keys::DEFAULT_MAX_FAILURES
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_provider")]
    pub provider: String,
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,
    #[serde(default = "default_prompt")]
    pub prompt: String,
    /// JSON schema the model's answer must follow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_api_provider() -> String {
    "gemini".to_string()
}
fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
const fn default_temperature() -> f32 {
    0.5
}
fn default_system_instruction() -> String {
    "You are a financial analyst.".to_string()
}
fn default_prompt() -> String {
    "Analyze the attached audit report and answer in JSON.".to_string()
}
const fn default_request_timeout() -> u64 {
    300
}

impl ApiConfig {
    #[must_use]
    pub fn default_base_url(provider: &str) -> Option<String> {
        match provider {
            "gemini" => Some("https://generativelanguage.googleapis.com/v1beta".to_string()),
            _ => None,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        let provider = default_api_provider();
        Self {
            base_url: Self::default_base_url(&provider),
            provider,
            model: default_model(),
            temperature: default_temperature(),
            system_instruction: default_system_instruction(),
            prompt: default_prompt(),
            response_schema: None,
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_var(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .with_context(|| format!("invalid value for {ENV_PREFIX}_{name}: {raw:?}"))
        })
        .transpose()
}

impl Config {
    /// Load configuration from a TOML file at the specified path
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - The file cannot be read
    /// - The TOML content cannot be parsed into the Config structure
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Apply `SLUICE_*` environment variables on top of this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable does not parse.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(provider) = env_var("PROVIDER") {
            self.api.provider = provider;
            if env_var("BASE_URL").is_none() {
                self.api.base_url = ApiConfig::default_base_url(&self.api.provider);
            }
        }
        if let Some(base_url) = env_var("BASE_URL") {
            self.api.base_url = Some(base_url);
        }
        if let Some(model) = env_var("MODEL") {
            self.api.model = model;
        }

        let env_keys = keys::keys_from_env(ENV_PREFIX);
        if !env_keys.is_empty() {
            debug!("Using {} API keys from the environment", env_keys.len());
            self.keys.api_keys = env_keys;
        }
        if let Some(max) = parse_env("MAX_KEY_FAILURES")? {
            self.keys.max_consecutive_failures = max;
        }

        if let Some(tpm) = parse_env("TOKENS_PER_MINUTE")? {
            self.limits.tokens_per_minute = tpm;
        }
        if let Some(rpm) = parse_env("REQUESTS_PER_MINUTE")? {
            self.limits.requests_per_minute = rpm;
        }
        if let Some(rpd) = parse_env("REQUESTS_PER_DAY")? {
            self.limits.requests_per_day = rpd;
        }

        if let Some(tokens) = parse_env("AVG_TOKENS_PER_JOB")? {
            self.planner.avg_tokens_per_job = tokens;
        }
        if let Some(seconds) = parse_env("AVG_SECONDS_PER_JOB")? {
            self.planner.avg_seconds_per_job = seconds;
        }
        if let Some(cap) = parse_env("HARD_WORKER_CAP")? {
            self.planner.hard_worker_cap = cap;
        }

        if let Some(attempts) = parse_env("MAX_ATTEMPTS")? {
            self.retry.max_attempts = attempts;
        }
        if let Some(timeout) = parse_env("JOB_TIMEOUT")? {
            self.retry.job_timeout_seconds = Some(timeout);
        }

        if let Some(step) = parse_env("BACKOFF_STEP")? {
            self.backoff.step_seconds = step;
        }
        if let Some(max) = parse_env("MAX_BACKOFF")? {
            self.backoff.max_seconds = max;
        }

        if let Some(level) = env_var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = env_var("LOG_FORMAT") {
            self.logging.format = format;
        }
        Ok(())
    }

    /// Load configuration from environment variables on top of the defaults
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - Environment variables contain invalid values
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// The per-user config file, `$CONFIG_DIR/sluice/config.toml`.
    #[must_use]
    pub fn user_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sluice").join("config.toml"))
    }

    /// Candidate config file locations, most specific first.
    #[must_use]
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("sluice.toml")];
        paths.extend(Self::user_path());
        paths.push(PathBuf::from("/etc/sluice/config.toml"));
        paths
    }

    /// Load configuration from `path` or the default locations, then apply
    /// environment overrides. The result is not validated.
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - The given file, or the first existing default one, cannot be read or
    ///   parsed
    /// - Environment variables contain invalid values
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::search_paths().into_iter().find(|p| p.exists()) {
                Some(found) => {
                    let config = Self::from_file(&found)?;
                    debug!("Loaded config from {}", found.display());
                    config
                }
                None => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - No API keys are configured
    /// - A limit, estimate or retry setting is zero
    /// - The provider is unknown
    pub fn validate(&self) -> Result<()> {
        if self.keys.api_keys.is_empty() {
            return Err(anyhow!(
                "at least one API key is required (set keys.api_keys, {ENV_PREFIX}_API_KEYS or --api-key)"
            ));
        }
        if self.keys.max_consecutive_failures == 0 {
            return Err(anyhow!("max_consecutive_failures must be greater than 0"));
        }

        let positive = [
            ("tokens_per_minute", self.limits.tokens_per_minute),
            ("requests_per_minute", self.limits.requests_per_minute),
            ("requests_per_day", self.limits.requests_per_day),
            ("avg_tokens_per_job", self.planner.avg_tokens_per_job),
            ("avg_seconds_per_job", self.planner.avg_seconds_per_job),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(anyhow!("{name} must be greater than 0"));
            }
        }
        if self.planner.hard_worker_cap == 0 {
            return Err(anyhow!("hard_worker_cap must be greater than 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be greater than 0"));
        }
        if self.retry.job_timeout_seconds == Some(0) {
            return Err(anyhow!("job_timeout_seconds must be greater than 0"));
        }
        if self.backoff.step_seconds > self.backoff.max_seconds {
            return Err(anyhow!(
                "backoff step_seconds must not exceed max_seconds"
            ));
        }

        match self.api.provider.as_str() {
            "gemini" | "mock" => {}
            other => return Err(anyhow!("unknown API provider: {other}")),
        }
        if !(0.0..=2.0).contains(&self.api.temperature) {
            return Err(anyhow!("temperature must be between 0.0 and 2.0"));
        }
        Ok(())
    }
}
