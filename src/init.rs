//! Project initialization for `chatops init`.
//!
//! Creates the `.chatops/` directory in a project:
//!
//! ```text
//! .chatops/
//! ├── chatops.toml     # Configuration with every default spelled out
//! └── .gitignore       # Keeps the job database and logs out of git
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::ChatopsConfig;

/// The name of the chatops project directory.
pub const CHATOPS_DIR: &str = ".chatops";

const GITIGNORE: &str = "jobs.db*\nlogs/\n";

const CONFIG_HEADER: &str = "\
# chatops configuration.
#
# Secrets are read from the environment (or a .env file), never from here:
#   HF_API_TOKEN   enables the hosted intent classifier
#   GITHUB_TOKEN   enables workflow dispatch when [executor] remote_enabled = true

";

/// Result of initializing a chatops project.
#[derive(Debug)]
pub struct InitResult {
    pub chatops_dir: PathBuf,
    pub config_path: PathBuf,
    /// Whether `chatops.toml` was written by this call
    pub wrote_config: bool,
}

/// Initialize a chatops project in the given directory.
///
/// An existing `chatops.toml` is left untouched unless `overwrite` is set.
pub fn init_project(project_dir: &Path, overwrite: bool) -> Result<InitResult> {
    let chatops_dir = chatops_dir(project_dir);
    std::fs::create_dir_all(&chatops_dir)
        .with_context(|| format!("Failed to create directory: {}", chatops_dir.display()))?;

    let gitignore = chatops_dir.join(".gitignore");
    if !gitignore.exists() {
        std::fs::write(&gitignore, GITIGNORE)
            .with_context(|| format!("Failed to create {}", gitignore.display()))?;
    }

    let config_path = ChatopsConfig::config_path(project_dir);
    let wrote_config = if config_path.exists() && !overwrite {
        false
    } else {
        std::fs::write(&config_path, default_config_toml()?)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        true
    };

    Ok(InitResult {
        chatops_dir,
        config_path,
        wrote_config,
    })
}

/// The default configuration rendered as TOML.
pub fn default_config_toml() -> Result<String> {
    let body = toml::to_string_pretty(&ChatopsConfig::default())
        .context("Failed to render default configuration")?;
    Ok(format!("{}{}", CONFIG_HEADER, body))
}

pub fn is_initialized(project_dir: &Path) -> bool {
    ChatopsConfig::config_path(project_dir).exists()
}

pub fn chatops_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(CHATOPS_DIR)
}
