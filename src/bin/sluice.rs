use anyhow::{Context, Result};
use clap::Parser;
use sluice::batch::{BatchRunner, RunContext, RunSettings};
use sluice::cli::{collect_documents, Cli, Commands};
use sluice::config::Config;
use sluice::planner;
use sluice::{create_analyzer, initialize_config, InitOptions};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Init writes the config file, so it must not read one
    let mut config = if matches!(cli.command, Commands::Init { .. }) {
        Config::default()
    } else {
        Config::load(cli.config.as_deref())?
    };

    // Setup logging based on CLI options, but only if not already initialized
    if std::env::var("RUST_LOG").is_err() {
        let level = if cli.log_level == "info" {
            config.logging.level.as_str()
        } else {
            cli.log_level.as_str()
        };
        let filter = if cli.verbose { "debug" } else { level };
        let json = cli.log_format == "json" || config.logging.format == "json";

        let subscriber = fmt()
            .with_env_filter(EnvFilter::new(filter))
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);

        if json {
            let _ = subscriber.json().try_init();
        } else {
            let _ = subscriber.try_init();
        }
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .try_init();
    }

    // Init only needs the target path
    if let Commands::Init { no_prompt, force } = cli.command {
        return initialize_config(InitOptions {
            config_path: cli.config,
            no_prompt,
            force,
        })
        .await;
    }

    cli.command.apply_to(&mut config);

    let result = match cli.command {
        Commands::Plan { jobs, keys, .. } => plan_command(&config, jobs, keys),
        Commands::Run { files, output, .. } => run_command(config, &files, output).await,
        Commands::Init { .. } => unreachable!(), // Already handled above
    };

    if let Err(ref e) = result {
        eprintln!("{e:#}");
    }
    result
}

fn plan_command(config: &Config, jobs: usize, keys: Option<usize>) -> Result<()> {
    let settings = RunSettings::from_config(config);
    settings.validate()?;
    let keys = keys.unwrap_or(config.keys.api_keys.len()).max(1);

    let budget = planner::plan(&settings.plan_input(jobs, keys));
    println!("{budget}");
    if !budget.daily_limit_ok {
        anyhow::bail!(
            "{jobs} jobs exceed the daily capacity of {} requests",
            budget.limits.by_daily_cap
        );
    }
    Ok(())
}

async fn run_command(config: Config, files: &[PathBuf], output: Option<PathBuf>) -> Result<()> {
    config.validate()?;
    let documents = collect_documents(files)?;
    info!("Loaded {} documents", documents.len());

    let analyzer = create_analyzer(&config.api)?;
    let ctx = RunContext::from_config(&config, analyzer)?;
    let report = BatchRunner::new(ctx).run(documents).await?;

    let json = serde_json::to_string_pretty(&report.results)?;
    match output {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("Results written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
