//! TOML-based configuration for Veriface
//!
//! This module provides declarative configuration for the server, the audit
//! database, fusion constants, dispatch/QA timeouts, upload limits and the
//! verification agents via a TOML file (`veriface.toml`).
//!
//! # Hot Reloading
//!
//! Configuration changes are automatically detected and applied at runtime.
//! Use `ConfigManager` for thread-safe access to the current configuration.
//! Agents listed in `[agents.*]` are re-read on every dispatch; the fusion
//! policy and timeouts are fixed when the pipeline is built.

use crate::fusion::FusionPolicy;
use crate::types::AgentDescriptor;
use arc_swap::ArcSwap;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Root configuration structure loaded from veriface.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifaceConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    /// Global threshold/margin used by fusion
    #[serde(default)]
    pub fusion: FusionPolicy,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub qa: QaConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    /// Verification agents keyed by display name
    #[serde(default)]
    pub agents: BTreeMap<String, AgentConfig>,
}

// ============= Server Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

// ============= Authentication Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Environment variable name containing the static bearer token
    #[serde(default = "default_api_token_env")]
    pub api_token_env: String,
}

fn default_api_token_env() -> String {
    "API_TOKEN".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_token_env: default_api_token_env(),
        }
    }
}

// ============= Database Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Local database path, or `:memory:`
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Environment variable for Turso URL (optional cloud config)
    pub turso_url_env: Option<String>,

    /// Environment variable for Turso auth token
    pub turso_token_env: Option<String>,
}

fn default_database_url() -> String {
    "./data/veriface.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            turso_url_env: None,
            turso_token_env: None,
        }
    }
}

// ============= Dispatch Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Per-agent call timeout
    #[serde(default = "default_dispatch_timeout_ms")]
    pub timeout_ms: u64,

    /// Failing agents tolerated before the request is aborted
    #[serde(default = "default_max_tolerated_failures")]
    pub max_tolerated_failures: usize,
}

fn default_dispatch_timeout_ms() -> u64 {
    3_000
}

fn default_max_tolerated_failures() -> usize {
    1
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_dispatch_timeout_ms(),
            max_tolerated_failures: default_max_tolerated_failures(),
        }
    }
}

impl DispatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ============= QA Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaConfig {
    /// Base URL; requests go to `{url}/ask`
    #[serde(default = "default_qa_url")]
    pub url: String,

    #[serde(default = "default_qa_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_top_k")]
    pub top_k: u32,

    /// Name written to service records
    #[serde(default = "default_qa_service_name")]
    pub service_name: String,
}

fn default_qa_url() -> String {
    "http://localhost:8001".to_string()
}

fn default_qa_timeout_ms() -> u64 {
    40_000
}

fn default_top_k() -> u32 {
    5
}

fn default_qa_service_name() -> String {
    "normativa-rag".to_string()
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            url: default_qa_url(),
            timeout_ms: default_qa_timeout_ms(),
            top_k: default_top_k(),
            service_name: default_qa_service_name(),
        }
    }
}

impl QaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ============= Upload Limits =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,

    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,
}

fn default_max_image_bytes() -> usize {
    5 * 1024 * 1024
}

fn default_allowed_mime_types() -> Vec<String> {
    vec!["image/jpeg".to_string(), "image/png".to_string()]
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: default_max_image_bytes(),
            allowed_mime_types: default_allowed_mime_types(),
        }
    }
}

// ============= Registry Configuration =============

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrySource {
    /// `[agents.*]` tables in this file
    #[default]
    Config,
    /// `agents` table in the audit database
    Database,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub source: RegistrySource,
}

// ============= Agent Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Full URL of the agent's verify endpoint
    pub verify_endpoint: String,

    /// Per-agent threshold (informational, fusion uses `[fusion]`)
    #[serde(default = "default_agent_threshold")]
    pub threshold: f64,

    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_agent_threshold() -> f64 {
    0.75
}

fn default_true() -> bool {
    true
}

// ============= Configuration Loading & Validation =============

/// Configuration warnings that don't prevent operation but may indicate issues
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub kind: ConfigWarningKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigWarningKind {
    NoActiveAgents,
    UnusedAgentThreshold,
    AgentsIgnoredByRegistry,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Environment variable '{0}' referenced in config is not set")]
    MissingEnvVar(String),

    #[error("Invalid URL '{1}' for {0}")]
    InvalidUrl(String, String),

    #[error("Watch error: {0}")]
    WatchError(#[from] notify::Error),
}

impl From<ConfigError> for crate::types::AppError {
    fn from(err: ConfigError) -> Self {
        crate::types::AppError::Configuration(err.to_string())
    }
}

impl VerifaceConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config: VerifaceConfig = toml::from_str(&content)?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration for internal consistency and env var availability
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_env_var(&self.auth.api_token_env)?;

        if let Some(ref env) = self.database.turso_url_env {
            self.validate_env_var(env)?;
        }
        if let Some(ref env) = self.database.turso_token_env {
            self.validate_env_var(env)?;
        }

        if !(0.0..=1.0).contains(&self.fusion.threshold) {
            return Err(ConfigError::ValidationError(format!(
                "fusion.threshold must be within [0, 1], got {}",
                self.fusion.threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.fusion.margin) {
            return Err(ConfigError::ValidationError(format!(
                "fusion.margin must be within [0, 1], got {}",
                self.fusion.margin
            )));
        }

        if self.dispatch.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.qa.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "qa.timeout_ms must be greater than zero".to_string(),
            ));
        }
        validate_url("qa.url", &self.qa.url)?;

        if self.limits.max_image_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_image_bytes must be greater than zero".to_string(),
            ));
        }
        if self.limits.allowed_mime_types.is_empty() {
            return Err(ConfigError::ValidationError(
                "limits.allowed_mime_types must not be empty".to_string(),
            ));
        }

        for (name, agent) in &self.agents {
            validate_url(&format!("agent '{}'", name), &agent.verify_endpoint)?;
            if !(0.0..=1.0).contains(&agent.threshold) {
                return Err(ConfigError::ValidationError(format!(
                    "agent '{}' threshold must be within [0, 1], got {}",
                    name, agent.threshold
                )));
            }
        }

        Ok(())
    }

    /// Validate and collect warnings
    pub fn validate_with_warnings(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        self.validate()?;

        let mut warnings = Vec::new();
        warnings.extend(self.check_active_agents());
        warnings.extend(self.check_agent_thresholds());
        warnings.extend(self.check_registry_source());

        Ok(warnings)
    }

    fn check_active_agents(&self) -> Vec<ConfigWarning> {
        if self.registry.source != RegistrySource::Config {
            return vec![];
        }
        if self.agents.values().any(|a| a.active) {
            return vec![];
        }
        vec![ConfigWarning {
            kind: ConfigWarningKind::NoActiveAgents,
            message: "No active agents configured; every request will resolve to 'unknown'"
                .to_string(),
        }]
    }

    fn check_agent_thresholds(&self) -> Vec<ConfigWarning> {
        self.agents
            .iter()
            .filter(|(_, agent)| (agent.threshold - self.fusion.threshold).abs() > f64::EPSILON)
            .map(|(name, agent)| ConfigWarning {
                kind: ConfigWarningKind::UnusedAgentThreshold,
                message: format!(
                    "Agent '{}' sets threshold {} but fusion only applies the global threshold {}",
                    name, agent.threshold, self.fusion.threshold
                ),
            })
            .collect()
    }

    fn check_registry_source(&self) -> Vec<ConfigWarning> {
        if self.registry.source == RegistrySource::Database && !self.agents.is_empty() {
            vec![ConfigWarning {
                kind: ConfigWarningKind::AgentsIgnoredByRegistry,
                message: format!(
                    "{} agent(s) defined in [agents] are only used by 'agent sync' while registry.source = \"database\"",
                    self.agents.len()
                ),
            }]
        } else {
            vec![]
        }
    }

    fn validate_env_var(&self, name: &str) -> Result<(), ConfigError> {
        std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))?;
        Ok(())
    }

    /// Get a resolved value from an env var reference
    pub fn resolve_env(&self, env_name: &str) -> Option<String> {
        std::env::var(env_name).ok()
    }

    /// Get the API bearer token from the environment
    pub fn api_token(&self) -> Result<String, ConfigError> {
        self.resolve_env(&self.auth.api_token_env)
            .ok_or_else(|| ConfigError::MissingEnvVar(self.auth.api_token_env.clone()))
    }

    /// Remote Turso URL and token, when both env vars are configured
    pub fn turso_remote(&self) -> Option<(String, String)> {
        let url = self.resolve_env(self.database.turso_url_env.as_deref()?)?;
        let token = self.resolve_env(self.database.turso_token_env.as_deref()?)?;
        Some((url, token))
    }

    /// Every configured agent, ordered by name
    pub fn agent_descriptors(&self) -> Vec<AgentDescriptor> {
        self.agents
            .iter()
            .map(|(name, agent)| AgentDescriptor {
                name: name.clone(),
                verify_endpoint: agent.verify_endpoint.clone(),
                threshold: agent.threshold,
                active: agent.active,
            })
            .collect()
    }

    /// Active agents only, ordered by name
    pub fn active_agents(&self) -> Vec<AgentDescriptor> {
        self.agent_descriptors()
            .into_iter()
            .filter(|a| a.active)
            .collect()
    }
}

fn validate_url(field: &str, value: &str) -> Result<(), ConfigError> {
    match reqwest::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(ConfigError::InvalidUrl(field.to_string(), value.to_string())),
    }
}

// ============= Hot Reloading Configuration Manager =============

/// Shared, swappable configuration backed by `veriface.toml`.
///
/// Reads never block: handlers and the config-backed agent registry take an
/// `Arc` snapshot per request. A file watcher (see [`ConfigManager::start_watching`])
/// swaps in a new snapshot whenever the file changes and still validates.
pub struct ConfigManager {
    current: Arc<ArcSwap<VerifaceConfig>>,
    config_path: PathBuf,
    watcher: Arc<RwLock<Option<RecommendedWatcher>>>,
}

impl ConfigManager {
    /// Load `path` (resolved against the working directory) and manage it.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = absolute(path.as_ref())?;
        let config = VerifaceConfig::load(&config_path)?;

        Ok(Self::with_path(config, config_path))
    }

    /// Manage an already-built configuration. Nothing is read from disk and
    /// [`reload`](Self::reload) will fail unless `veriface.toml` exists.
    pub fn from_config(config: VerifaceConfig) -> Self {
        Self::with_path(config, PathBuf::from("veriface.toml"))
    }

    fn with_path(config: VerifaceConfig, config_path: PathBuf) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
            config_path,
            watcher: Arc::new(RwLock::new(None)),
        }
    }

    /// Current snapshot
    pub fn config(&self) -> Arc<VerifaceConfig> {
        self.current.load_full()
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Re-read the file now. On error the previous snapshot stays in place.
    pub fn reload(&self) -> Result<(), ConfigError> {
        swap_in(&self.current, &self.config_path)
    }

    /// Watch the config file's directory and reload on change.
    ///
    /// Must be called from within a Tokio runtime. Bursts of filesystem
    /// events are collapsed into one reload per 500ms.
    pub fn start_watching(&mut self) -> Result<(), ConfigError> {
        let (tx, rx) = mpsc::unbounded_channel::<()>();

        let file_name = self.config_path.file_name().map(|n| n.to_os_string());
        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let touches_config = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if touches_config && (event.kind.is_modify() || event.kind.is_create()) {
                        let _ = tx.send(());
                    }
                }
                Err(e) => error!("Config watcher error: {:?}", e),
            })?;

        // Editors replace the file rather than writing in place, so watch the directory
        let dir = match self.config_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        *self.watcher.write() = Some(watcher);

        tokio::spawn(reload_on_change(
            rx,
            Arc::clone(&self.current),
            self.config_path.clone(),
        ));

        info!(path = %self.config_path.display(), "Watching configuration for changes");
        Ok(())
    }

    /// Drop the file watcher; the reload task ends with it.
    pub fn stop_watching(&self) {
        if self.watcher.write().take().is_some() {
            info!("Stopped watching configuration");
        }
    }
}

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        Self {
            current: Arc::clone(&self.current),
            config_path: self.config_path.clone(),
            watcher: Arc::clone(&self.watcher),
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf, ConfigError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

fn swap_in(current: &ArcSwap<VerifaceConfig>, path: &Path) -> Result<(), ConfigError> {
    let next = VerifaceConfig::load(path)?;
    let before = current.load().active_agents().len();
    let after = next.active_agents().len();
    current.store(Arc::new(next));

    info!(
        path = %path.display(),
        active_agents = after,
        "Configuration reloaded"
    );
    if before != after {
        info!("Active agents changed from {} to {}", before, after);
    }
    Ok(())
}

async fn reload_on_change(
    mut events: mpsc::UnboundedReceiver<()>,
    current: Arc<ArcSwap<VerifaceConfig>>,
    path: PathBuf,
) {
    const DEBOUNCE: Duration = Duration::from_millis(500);

    while events.recv().await.is_some() {
        // Let the writer finish, then drain whatever arrived meanwhile
        tokio::time::sleep(DEBOUNCE).await;
        while events.try_recv().is_ok() {}

        if let Err(e) = swap_in(&current, &path) {
            warn!("Ignoring invalid configuration change: {}", e);
        }
    }
}
