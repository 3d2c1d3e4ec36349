use anyhow::{Context, Result};
use std::path::Path;

use crate::agent::{self, Agent, PollingScheduler, SyncOutcome};
use crate::cli::{Args, Commands};
use crate::config::{AgentConfig, CONFIG_URL_ENV};
use crate::platform;

use super::utils::{format_duration, init_logging};

/// Resolve configuration, set up logging and run the requested command
pub fn run_command(args: Args) -> Result<()> {
    let mut config = AgentConfig::load_or_default(&args.config)?;
    apply_overrides(&mut config, &args, std::env::var(CONFIG_URL_ENV).ok());

    init_logging(args.verbose, &config.logging.level);
    tracing::debug!("{}", config_source(&args.config));
    config.validate().context("Invalid configuration")?;

    match args.command.unwrap_or(Commands::CheckIn) {
        Commands::CheckIn => check_in(&config),
        Commands::Extract => extract(&config),
        Commands::Daemon => daemon(&config),
        Commands::Status => status(&config),
        Commands::ShowConfig => show_config(&config),
    }
}

fn config_source(path: &Path) -> String {
    if path.exists() {
        format!("Loaded config from {}", path.display())
    } else {
        format!("No config file at {}, using defaults", path.display())
    }
}

/// CLI flags > `CONFIG_URL` > config file > defaults
fn apply_overrides(config: &mut AgentConfig, args: &Args, env_url: Option<String>) {
    config.apply_env_url(env_url);

    if let Some(sota_dir) = &args.sota_dir {
        config.agent.sota_dir = sota_dir.clone();
    }
    if let Some(secrets_dir) = &args.secrets_dir {
        config.agent.secrets_dir = secrets_dir.clone();
    }
}

/// Build the agent; missing credentials end the process here
fn build_agent(config: &AgentConfig) -> Result<Agent> {
    Agent::new(config).context("Unable to initialize agent")
}

/// Check in once
pub fn check_in(config: &AgentConfig) -> Result<()> {
    let agent = build_agent(config)?;

    let runtime = tokio::runtime::Runtime::new()?;
    let outcome = runtime
        .block_on(async { agent.check_in().await })
        .context("Check-in failed")?;

    match outcome {
        SyncOutcome::Updated(summary) => {
            println!(
                "✓ Config updated: {} written, {} unchanged",
                summary.written, summary.unchanged
            );
            if summary.hook_failures > 0 {
                println!("  {} on-change command(s) failed", summary.hook_failures);
            }
        }
        SyncOutcome::NotModified => {
            println!("✓ Config unchanged");
        }
    }

    Ok(())
}

/// Extract the persisted bundle without going to the network
pub fn extract(config: &AgentConfig) -> Result<()> {
    let agent = Agent::offline(config).context("Unable to initialize agent")?;

    let summary = agent.extract().with_context(|| {
        format!(
            "Unable to extract {}",
            config.encrypted_config_path().display()
        )
    })?;

    println!(
        "✓ Extracted: {} written, {} unchanged",
        summary.written, summary.unchanged
    );

    Ok(())
}

/// Run check-ins on a schedule in the foreground
pub fn daemon(config: &AgentConfig) -> Result<()> {
    let agent = build_agent(config)?;
    let scheduler = PollingScheduler::from_settings(&config.daemon);

    tracing::info!(
        "Poll interval: {} seconds (+0..{} seconds jitter)",
        config.daemon.poll_interval,
        config.daemon.poll_jitter
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(agent::run_daemon(&agent, &scheduler));

    Ok(())
}

/// Show agent status
pub fn status(config: &AgentConfig) -> Result<()> {
    println!("Config Agent Status");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Config URL:     {}", config.agent.config_url);

    let bundle_path = config.encrypted_config_path();
    match platform::modified_time(&bundle_path)? {
        Some(modified) => {
            let ago = chrono::Utc::now() - chrono::DateTime::<chrono::Utc>::from(modified);
            println!(
                "Bundle:         {} ({} ago)",
                agent::format_http_date(modified),
                format_duration(ago)
            );
        }
        None => {
            println!("Bundle:         none (never fetched)");
        }
    }

    let secrets_dir = &config.agent.secrets_dir;
    match std::fs::read_dir(secrets_dir) {
        Ok(entries) => {
            let count = entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                .count();
            println!("Secrets:        {} files in {}", count, secrets_dir.display());
        }
        Err(e) => {
            println!("Secrets:        {} unavailable ({})", secrets_dir.display(), e);
        }
    }

    Ok(())
}

/// Show the effective configuration
pub fn show_config(config: &AgentConfig) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}
