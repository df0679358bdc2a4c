use anyhow::{anyhow, Context, Result};
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Select};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::config::{ApiConfig, Config};
use crate::keys::parse_key_list;

const PROVIDERS: &[&str] = &["gemini", "mock"];

const HEADER: &str = "\
# sluice configuration
#
# Limits are per API key. Environment variables prefixed with SLUICE_
# override these values, and command-line flags override both.
";

pub struct InitOptions {
    pub config_path: Option<PathBuf>,
    pub no_prompt: bool,
    pub force: bool,
}

/// The per-user config file, or `./sluice.toml` when the platform has no
/// config directory. Both are on the search path.
#[must_use]
pub fn default_config_path() -> PathBuf {
    Config::user_path().unwrap_or_else(|| PathBuf::from("sluice.toml"))
}

/// Serialize `config` with the explanatory header.
///
/// # Errors
///
/// Returns an error if the configuration cannot be serialized.
pub fn render_config(config: &Config) -> Result<String> {
    let body = toml::to_string_pretty(config).context("failed to serialize config")?;
    Ok(format!("{HEADER}\n{body}"))
}

/// Check that `api_key` is accepted by listing the models it can see.
async fn test_gemini_key(api_key: &str, base_url: &str) -> Result<()> {
    let client = Client::new();

    let response = client
        .get(format!("{}/models", base_url.trim_end_matches('/')))
        .header("x-goog-api-key", api_key)
        .timeout(Duration::from_secs(10))
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let error = response.text().await?;
        return Err(anyhow!("API test failed with HTTP {status}: {error}"));
    }

    Ok(())
}

/// Resolve `${VAR}` references to the variable's value.
fn resolve_key(entry: &str) -> Option<String> {
    entry
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .map_or_else(|| Some(entry.to_string()), |name| std::env::var(name).ok())
}

fn prompt_number(prompt: &str, default: u64) -> Result<u64> {
    let value: u64 = Input::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(default)
        .interact_text()?;
    Ok(value)
}

async fn prompt(config: &mut Config) -> Result<()> {
    let theme = ColorfulTheme::default();
    println!("Initializing sluice configuration...\n");

    let provider = Select::with_theme(&theme)
        .with_prompt("Select API provider")
        .items(PROVIDERS)
        .default(0)
        .interact()?;
    config.api.provider = PROVIDERS[provider].to_string();
    config.api.base_url = ApiConfig::default_base_url(&config.api.provider);

    let raw: String = Input::with_theme(&theme)
        .with_prompt("API keys, comma-separated (or ${VAR} references)")
        .allow_empty(true)
        .interact_text()?;
    let entries = parse_key_list(&raw);

    if config.api.provider == "gemini" && !entries.is_empty() {
        let test = Confirm::with_theme(&theme)
            .with_prompt("Test the first API key now?")
            .default(true)
            .interact()?;
        if test {
            if let Some(key) = entries.first().and_then(|entry| resolve_key(entry.as_str())) {
                let base_url = config
                    .api
                    .base_url
                    .clone()
                    .or_else(|| ApiConfig::default_base_url("gemini"))
                    .unwrap_or_default();
                print!("Testing API key... ");
                match test_gemini_key(&key, &base_url).await {
                    Ok(()) => println!("✓ Success"),
                    Err(e) => {
                        println!("✗ Failed");
                        return Err(anyhow!("API key validation failed: {e}"));
                    }
                }
            }
        }
    }
    config.keys.api_keys = entries;

    config.limits.requests_per_minute =
        prompt_number("Requests per minute, per key", config.limits.requests_per_minute)?;
    config.limits.tokens_per_minute =
        prompt_number("Tokens per minute, per key", config.limits.tokens_per_minute)?;
    config.limits.requests_per_day =
        prompt_number("Requests per day, per key", config.limits.requests_per_day)?;
    Ok(())
}

fn write_config(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, render_config(config)?)
        .with_context(|| format!("failed to write {}", path.display()))
}

/// Create a configuration file, prompting for the essentials unless
/// `no_prompt` is set.
///
/// # Errors
///
/// Returns an error if the file exists and `force` is not set, a prompt
/// fails, the key check fails, or the file cannot be written.
pub async fn initialize_config(opts: InitOptions) -> Result<()> {
    let config_path = opts.config_path.unwrap_or_else(default_config_path);

    if config_path.exists() && !opts.force {
        return Err(anyhow!(
            "Config file already exists at {}. Use --force to overwrite.",
            config_path.display()
        ));
    }

    let mut config = Config::default();
    if !opts.no_prompt {
        prompt(&mut config).await?;
    }

    write_config(&config_path, &config)?;
    debug!("Wrote config to {}", config_path.display());
    println!("\nConfiguration created at: {}", config_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rendered_config_loads_back() {
        let mut config = Config::default();
        config.keys.api_keys = vec!["abc".to_string()];
        let text = render_config(&config).unwrap();
        assert!(text.starts_with("# sluice configuration"));

        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.keys.api_keys, vec!["abc"]);
        assert_eq!(parsed.limits.requests_per_day, 50);
    }

    #[test]
    fn test_resolve_key_reads_environment() {
        assert_eq!(resolve_key("plain"), Some("plain".to_string()));
        assert_eq!(resolve_key("${SLUICE_INIT_TEST_UNSET_VAR}"), None);
        std::env::set_var("SLUICE_INIT_TEST_KEY", "from-env");
        assert_eq!(
            resolve_key("${SLUICE_INIT_TEST_KEY}"),
            Some("from-env".to_string())
        );
        std::env::remove_var("SLUICE_INIT_TEST_KEY");
    }

    #[test]
    fn test_default_path_is_searched() {
        let path = default_config_path();
        assert!(path.ends_with("sluice/config.toml") || path == Path::new("sluice.toml"));
        assert!(Config::search_paths().contains(&path));
    }
}
