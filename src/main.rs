use anyhow::{Context, Result};
use chatops::config::ChatopsConfig;
use chatops::logging::{self, LogOptions};
use chatops_common::Environment;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

mod cmd;

#[derive(Parser)]
#[command(name = "chatops")]
#[command(version, about = "Turn free-text ops commands into tracked, asynchronously executed jobs")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Also write JSON logs to a daily-rolling file in this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize .chatops/chatops.toml in the project
    Init {
        /// Overwrite an existing configuration without asking
        #[arg(long)]
        force: bool,
    },
    /// Run the HTTP and WebSocket server
    Serve {
        /// Port to serve on (overrides [server] port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Job database path (overrides [server] db_path)
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (CORS permissive, bind all interfaces)
        #[arg(long)]
        dev: bool,
    },
    /// Parse a command and print the intent as JSON
    Parse {
        /// The command text, e.g. "deploy frontend to prod"
        #[arg(required = true, num_args = 1..)]
        command: Vec<String>,

        /// Skip the hosted classifier
        #[arg(long)]
        no_nlu: bool,

        /// Minimum classifier confidence (0.0-1.0)
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Run one command through the orchestrator and follow it to completion
    Submit {
        #[arg(required = true, num_args = 1..)]
        command: Vec<String>,

        #[arg(short, long, env = "CHATOPS_USER")]
        user: String,

        /// Fill the service slot
        #[arg(long)]
        service: Option<String>,

        /// Fill the environment slot
        #[arg(long = "env")]
        environment: Option<Environment>,

        /// Fill the replicas slot
        #[arg(long)]
        replicas: Option<u32>,

        /// Skip the hosted classifier
        #[arg(long)]
        no_nlu: bool,

        /// Fail instead of prompting for missing details
        #[arg(long)]
        no_input: bool,

        /// Job database path (overrides [server] db_path)
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    dotenvy::from_path(project_dir.join(".env")).ok();

    let _log_guard = logging::init(&LogOptions {
        verbose: cli.verbose,
        json: cli.log_json,
        log_dir: cli.log_dir.as_deref().map(|dir| resolve(&project_dir, dir)),
    })?;

    match &cli.command {
        Commands::Init { force } => cmd::cmd_init(&project_dir, *force)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
        Commands::Serve { port, db_path, dev } => {
            let mut config = load_config(&project_dir, db_path.as_deref())?;
            if let Some(port) = port {
                config.server.port = *port;
            }
            config.server.dev_mode |= *dev;
            cmd::cmd_serve(&config).await?;
        }
        Commands::Parse {
            command,
            no_nlu,
            threshold,
        } => {
            let config = load_config(&project_dir, None)?;
            cmd::cmd_parse(&config, &command.join(" "), *no_nlu, *threshold).await?;
        }
        Commands::Submit {
            command,
            user,
            service,
            environment,
            replicas,
            no_nlu,
            no_input,
            db_path,
        } => {
            let config = load_config(&project_dir, db_path.as_deref())?;
            cmd::cmd_submit(
                &config,
                cmd::SubmitArgs {
                    command: command.join(" "),
                    user_id: user.clone(),
                    service: service.clone(),
                    environment: *environment,
                    replicas: *replicas,
                    no_nlu: *no_nlu,
                    interactive: !*no_input && console::user_attended(),
                    verbose: cli.verbose,
                },
            )
            .await?;
        }
    }

    Ok(())
}

/// Load the layered config; CLI paths win, relative paths hang off the project.
fn load_config(project_dir: &Path, db_path: Option<&Path>) -> Result<ChatopsConfig> {
    let mut config = ChatopsConfig::load(project_dir)?;
    if let Some(db_path) = db_path {
        config.server.db_path = db_path.to_path_buf();
    }
    config.server.db_path = resolve(project_dir, &config.server.db_path);
    Ok(config)
}

fn resolve(project_dir: &Path, path: &Path) -> PathBuf {
    if path.is_relative() {
        project_dir.join(path)
    } else {
        path.to_path_buf()
    }
}
