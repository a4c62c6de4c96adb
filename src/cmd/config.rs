//! Configuration view and validation commands: `chatops config`.

use anyhow::Result;
use chatops::config::{ChatopsConfig, ExecutorMode};
use chatops::executor::workflow::is_valid_github_token;
use console::style;
use std::path::Path;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = ChatopsConfig::config_path(project_dir);

    match command {
        None | Some(ConfigCommands::Show) => {
            let config = ChatopsConfig::load(project_dir)?;
            println!();
            println!("chatops configuration");
            println!("=====================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!(
                    "No chatops.toml found at {}, using defaults",
                    config_path.display()
                );
            }
            println!();
            println!("{}", toml::to_string_pretty(&config)?);
            println!("Effective values (with env overrides):");
            println!("  HF_API_TOKEN = {}", presence(config.nlu.api_token.is_some()));
            println!("  GITHUB_TOKEN = {}", presence(config.github.token.is_some()));
            println!("  executor = {}", mode_name(config.executor_mode()));
            println!();
        }
        Some(ConfigCommands::Validate) => {
            let config = match ChatopsConfig::load(project_dir) {
                Ok(config) => config,
                Err(e) => {
                    println!("{} {:#}", style("Invalid configuration:").red().bold(), e);
                    anyhow::bail!("configuration is invalid");
                }
            };
            let warnings = collect_warnings(&config);
            if warnings.is_empty() {
                println!("{} Configuration is valid", style("OK").green().bold());
            } else {
                println!(
                    "Configuration is valid with {} warning(s):",
                    warnings.len()
                );
                for warning in &warnings {
                    println!("  {} {}", style("!").yellow().bold(), warning);
                }
            }
        }
    }

    Ok(())
}

fn presence(set: bool) -> &'static str {
    if set { "set" } else { "not set" }
}

fn mode_name(mode: ExecutorMode) -> &'static str {
    match mode {
        ExecutorMode::Simulated => "simulated",
        ExecutorMode::Workflow => "github workflow",
    }
}

/// Settings that load fine but will not behave the way they read.
fn collect_warnings(config: &ChatopsConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if config.executor.remote_enabled {
        if config.github.token.is_none() {
            warnings.push(
                "executor.remote_enabled is set but GITHUB_TOKEN is missing; jobs will be simulated"
                    .to_string(),
            );
        }
        if config.github.repository().is_none() {
            warnings.push(
                "executor.remote_enabled is set but github.owner/github.repo are missing; jobs will be simulated"
                    .to_string(),
            );
        }
    }
    if let Some(token) = &config.github.token
        && !is_valid_github_token(token)
    {
        warnings.push("GITHUB_TOKEN does not look like a GitHub token".to_string());
    }
    if config.nlu.enabled && config.nlu.api_token.is_none() {
        warnings.push("nlu.enabled is set but HF_API_TOKEN is missing; rules only".to_string());
    }
    if config.nlu.known_services.is_empty() {
        warnings.push("nlu.known_services is empty; no service names will be recognized".to_string());
    }
    if config.poller.jitter_ms > config.poller.interval_ms {
        warnings.push(format!(
            "poller.jitter_ms ({}) exceeds poller.interval_ms ({})",
            config.poller.jitter_ms, config.poller.interval_ms
        ));
    }
    warnings
}
