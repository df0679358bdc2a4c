use crate::batch::Document;
use crate::config::{ApiConfig, Config};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (defaults to the standard search locations)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Set log level
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    /// Set log format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: String,

    /// Increase verbosity
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize configuration file at `--config` or the default location
    Init {
        /// Don't prompt for input, use defaults
        #[arg(long)]
        no_prompt: bool,

        /// Force overwrite if config file exists
        #[arg(long)]
        force: bool,
    },

    /// Show the worker budget for a batch without running it
    Plan {
        /// Number of documents in the batch
        #[arg(long)]
        jobs: usize,

        /// Number of API keys (defaults to the configured keys)
        #[arg(long)]
        keys: Option<usize>,

        #[command(flatten)]
        limits: LimitArgs,
    },

    /// Analyze documents in parallel across the configured keys
    Run {
        /// API provider
        #[arg(long)]
        api: Option<String>,

        /// API key, repeat for several keys
        #[arg(long = "api-key")]
        api_keys: Vec<String>,

        /// API base URL
        #[arg(long)]
        api_base_url: Option<String>,

        /// Model name
        #[arg(long)]
        model: Option<String>,

        /// Write the JSON results here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,

        #[command(flatten)]
        limits: LimitArgs,

        /// Files to analyze; directories contribute their PDF files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

/// Limit overrides shared by `plan` and `run`.
#[derive(Args, Debug, Default, Clone, PartialEq, Eq)]
pub struct LimitArgs {
    /// Tokens per minute, per key
    #[arg(long)]
    pub tokens_per_minute: Option<u64>,

    /// Requests per minute, per key
    #[arg(long)]
    pub requests_per_minute: Option<u64>,

    /// Requests per day, per key
    #[arg(long)]
    pub requests_per_day: Option<u64>,

    /// Attempts per document, including the first
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Upper bound on concurrent workers
    #[arg(long)]
    pub hard_worker_cap: Option<usize>,

    /// Give up on a single attempt after this many seconds
    #[arg(long)]
    pub job_timeout: Option<u64>,
}

impl LimitArgs {
    /// Overwrite `config` with every flag that was given.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(tpm) = self.tokens_per_minute {
            config.limits.tokens_per_minute = tpm;
        }
        if let Some(rpm) = self.requests_per_minute {
            config.limits.requests_per_minute = rpm;
        }
        if let Some(rpd) = self.requests_per_day {
            config.limits.requests_per_day = rpd;
        }
        if let Some(attempts) = self.max_attempts {
            config.retry.max_attempts = attempts;
        }
        if let Some(cap) = self.hard_worker_cap {
            config.planner.hard_worker_cap = cap;
        }
        if let Some(seconds) = self.job_timeout {
            config.retry.job_timeout_seconds = Some(seconds);
        }
    }
}

impl Commands {
    pub const fn limits(&self) -> Option<&LimitArgs> {
        match self {
            Self::Plan { limits, .. } | Self::Run { limits, .. } => Some(limits),
            Self::Init { .. } => None,
        }
    }

    /// Apply the command's flags on top of a loaded configuration.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(limits) = self.limits() {
            limits.apply_to(config);
        }
        if let Self::Run {
            api,
            api_keys,
            api_base_url,
            model,
            ..
        } = self
        {
            if let Some(provider) = api {
                if *provider != config.api.provider {
                    config.api.base_url = ApiConfig::default_base_url(provider);
                }
                config.api.provider.clone_from(provider);
            }
            if !api_keys.is_empty() {
                config.keys.api_keys.clone_from(api_keys);
            }
            if let Some(url) = api_base_url {
                config.api.base_url = Some(url.clone());
            }
            if let Some(model) = model {
                config.api.model.clone_from(model);
            }
        }
    }
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Read the documents named on the command line, in order. A directory
/// contributes its PDF files sorted by name; other entries are read as given.
///
/// # Errors
///
/// Returns an error if a path cannot be read.
pub fn collect_documents(paths: &[PathBuf]) -> Result<Vec<Document>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries = std::fs::read_dir(path)
                .with_context(|| format!("failed to read directory {}", path.display()))?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<std::io::Result<Vec<_>>>()?;
            entries.retain(|p| p.is_file() && is_pdf(p));
            entries.sort();
            files.extend(entries);
        } else {
            files.push(path.clone());
        }
    }

    files
        .into_iter()
        .map(|file| {
            let content = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let name = file
                .file_name()
                .map_or_else(|| file.display().to_string(), |n| n.to_string_lossy().into_owned());
            Ok(Document::new(name, content))
        })
        .collect()
}
