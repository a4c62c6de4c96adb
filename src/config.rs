//! Unified configuration for the chatops engine.
//!
//! Settings are layered: `.chatops/chatops.toml` → environment (including a
//! `.env` file loaded by the CLI) → command-line flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! port = 8787
//! db_path = ".chatops/jobs.db"
//!
//! [nlu]
//! enabled = true
//! confidence_threshold = 0.7
//! model = "facebook/bart-large-mnli"
//! known_services = ["frontend", "api-service", "worker"]
//!
//! [executor]
//! remote_enabled = true
//!
//! [github]
//! owner = "acme"
//! repo = "infra"
//! workflow = "chatops.yml"
//! branch = "main"
//!
//! [poller]
//! interval_ms = 4000
//! jitter_ms = 1000
//! max_attempts = 60
//!
//! [simulation]
//! success_rate = 0.9
//! ```
//!
//! Secrets never live in the file: `HF_API_TOKEN` and `GITHUB_TOKEN` are read
//! from the environment only.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::nlu::classifier::ClassifierStrategy;

/// Which executor strategy the orchestrator is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorMode {
    Simulated,
    Workflow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_port() -> u16 {
    8787
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".chatops/jobs.db")
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            db_path: default_db_path(),
            dev_mode: false,
        }
    }
}

/// Intent classifier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NluConfig {
    /// Whether commands use the classifier tier unless a request opts out
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_model")]
    pub model: String,
    /// Force a strategy instead of inferring it from the model name
    #[serde(default)]
    pub strategy: Option<ClassifierStrategy>,
    #[serde(default = "default_inference_url")]
    pub api_url: String,
    #[serde(default = "default_known_services")]
    pub known_services: Vec<String>,
    #[serde(skip)]
    pub api_token: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_confidence_threshold() -> f32 {
    0.7
}

fn default_model() -> String {
    "facebook/bart-large-mnli".to_string()
}

fn default_inference_url() -> String {
    "https://api-inference.huggingface.co/models".to_string()
}

fn default_known_services() -> Vec<String> {
    [
        "api-service",
        "auth-service",
        "payment-service",
        "user-service",
        "notification-service",
        "frontend",
        "backend",
        "gateway",
        "worker",
        "database",
        "redis",
        "nginx",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for NluConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            confidence_threshold: default_confidence_threshold(),
            model: default_model(),
            strategy: None,
            api_url: default_inference_url(),
            known_services: default_known_services(),
            api_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Dispatch to the CI workflow when GitHub credentials are present
    #[serde(default)]
    pub remote_enabled: bool,
    /// Timeout for command submission calls (classifier, dispatch)
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

fn default_command_timeout_ms() -> u64 {
    30_000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            remote_enabled: false,
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl ExecutorConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// GitHub Actions workflow used by the remote executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default = "default_workflow")]
    pub workflow: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
    #[serde(default = "default_discovery_attempts")]
    pub discovery_attempts: u32,
    #[serde(default = "default_discovery_delay_ms")]
    pub discovery_delay_ms: u64,
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_workflow() -> String {
    "chatops.yml".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_discovery_attempts() -> u32 {
    10
}

fn default_discovery_delay_ms() -> u64 {
    3_000
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            owner: None,
            repo: None,
            workflow: default_workflow(),
            branch: default_branch(),
            api_url: default_github_api_url(),
            discovery_attempts: default_discovery_attempts(),
            discovery_delay_ms: default_discovery_delay_ms(),
            token: None,
        }
    }
}

impl GitHubConfig {
    /// `owner/repo`, when both halves are configured.
    pub fn repository(&self) -> Option<String> {
        match (&self.owner, &self.repo) {
            (Some(owner), Some(repo)) => Some(format!("{}/{}", owner, repo)),
            _ => None,
        }
    }
}

/// Status polling settings, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerSettings {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_cap_ms")]
    pub error_backoff_cap_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_interval_ms() -> u64 {
    4_000
}

fn default_jitter_ms() -> u64 {
    1_000
}

fn default_max_attempts() -> u32 {
    60
}

fn default_backoff_cap_ms() -> u64 {
    30_000
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            interval_ms: default_interval_ms(),
            jitter_ms: default_jitter_ms(),
            max_attempts: default_max_attempts(),
            error_backoff_cap_ms: default_backoff_cap_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,
    /// Fixed RNG seed for reproducible demos
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_success_rate() -> f64 {
    0.9
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            success_rate: default_success_rate(),
            seed: None,
        }
    }
}

/// Root configuration, as read from `.chatops/chatops.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatopsConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub nlu: NluConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub poller: PollerSettings,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl ChatopsConfig {
    /// Location of the config file inside a project directory.
    pub fn config_path(project_dir: &Path) -> PathBuf {
        project_dir.join(".chatops").join("chatops.toml")
    }

    /// Load the config file (defaults if absent) and apply environment overrides.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = Self::config_path(project_dir);
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Self::from_toml_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env_from(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid chatops configuration")
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("HF_API_TOKEN").or_else(|| lookup("HUGGINGFACE_API_KEY")) {
            self.nlu.api_token = Some(token).filter(|t| !t.trim().is_empty());
        }
        if let Some(model) = lookup("CHATOPS_NLU_MODEL") {
            self.nlu.model = model;
        }
        if let Some(enabled) = lookup("CHATOPS_NLU_ENABLED") {
            self.nlu.enabled = parse_flag(&enabled);
        }
        if let Some(token) = lookup("GITHUB_TOKEN") {
            self.github.token = Some(token).filter(|t| !t.trim().is_empty());
        }
        if let Some(slug) = lookup("GITHUB_REPOSITORY")
            && let Some((owner, repo)) = slug.split_once('/')
        {
            self.github.owner = Some(owner.to_string());
            self.github.repo = Some(repo.to_string());
        }
        if let Some(workflow) = lookup("CHATOPS_WORKFLOW") {
            self.github.workflow = workflow;
        }
        if let Some(remote) = lookup("CHATOPS_REMOTE_EXECUTION") {
            self.executor.remote_enabled = parse_flag(&remote);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.nlu.confidence_threshold) {
            anyhow::bail!(
                "nlu.confidence_threshold must be between 0.0 and 1.0, got {}",
                self.nlu.confidence_threshold
            );
        }
        if !(0.0..=1.0).contains(&self.simulation.success_rate) {
            anyhow::bail!(
                "simulation.success_rate must be between 0.0 and 1.0, got {}",
                self.simulation.success_rate
            );
        }
        if self.poller.max_attempts == 0 {
            anyhow::bail!("poller.max_attempts must be at least 1");
        }
        Ok(())
    }

    /// Remote execution needs the switch, a token and a repository.
    pub fn executor_mode(&self) -> ExecutorMode {
        if self.executor.remote_enabled
            && self.github.token.is_some()
            && self.github.repository().is_some()
        {
            ExecutorMode::Workflow
        } else {
            ExecutorMode::Simulated
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ChatopsConfig::default();
        assert_eq!(config.server.port, 8787);
        assert!(config.nlu.enabled);
        assert_eq!(config.nlu.confidence_threshold, 0.7);
        assert_eq!(config.poller.max_attempts, 60);
        assert_eq!(config.poller.request_timeout_ms, 15_000);
        assert_eq!(config.executor.command_timeout(), Duration::from_secs(30));
        assert!(config.nlu.known_services.contains(&"frontend".to_string()));
        assert_eq!(config.executor_mode(), ExecutorMode::Simulated);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = ChatopsConfig::from_toml_str(
            r#"
            [nlu]
            confidence_threshold = 0.6
            strategy = "nli"

            [github]
            owner = "acme"
            repo = "infra"
            "#,
        )
        .unwrap();
        assert_eq!(config.nlu.confidence_threshold, 0.6);
        assert_eq!(config.nlu.strategy, Some(ClassifierStrategy::Nli));
        assert_eq!(config.github.repository().as_deref(), Some("acme/infra"));
        assert_eq!(config.github.workflow, "chatops.yml");
        assert_eq!(config.poller.interval_ms, 4_000);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ChatopsConfig::default();
        config.apply_env_from(env(&[
            ("HF_API_TOKEN", "hf_abc"),
            ("GITHUB_TOKEN", "ghp_xyz"),
            ("GITHUB_REPOSITORY", "acme/infra"),
            ("CHATOPS_REMOTE_EXECUTION", "true"),
        ]));
        assert_eq!(config.nlu.api_token.as_deref(), Some("hf_abc"));
        assert_eq!(config.github.token.as_deref(), Some("ghp_xyz"));
        assert_eq!(config.executor_mode(), ExecutorMode::Workflow);
    }

    #[test]
    fn test_remote_requires_token_and_repo() {
        let mut config = ChatopsConfig::default();
        config.apply_env_from(env(&[("CHATOPS_REMOTE_EXECUTION", "1")]));
        assert_eq!(config.executor_mode(), ExecutorMode::Simulated);

        config.apply_env_from(env(&[("GITHUB_TOKEN", "ghp_xyz")]));
        assert_eq!(config.executor_mode(), ExecutorMode::Simulated);
    }

    #[test]
    fn test_blank_token_is_ignored() {
        let mut config = ChatopsConfig::default();
        config.apply_env_from(env(&[("HF_API_TOKEN", "  ")]));
        assert!(config.nlu.api_token.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = ChatopsConfig::default();
        config.nlu.confidence_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ChatopsConfig::load(dir.path()).unwrap();
        assert_eq!(config.server.db_path, PathBuf::from(".chatops/jobs.db"));
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".chatops")).unwrap();
        std::fs::write(
            ChatopsConfig::config_path(dir.path()),
            "[server]\nport = 9000\n",
        )
        .unwrap();
        let config = ChatopsConfig::load(dir.path()).unwrap();
        assert_eq!(config.server.port, 9000);
    }
}
