use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod settings;

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;

/// Process-wide configuration. Loaded once at startup and handed to the runner
/// and scheduler by reference; nothing below reads the environment on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_version", alias = "configVersion")]
    pub version: u32,
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_file: Option<PathBuf>,
    #[serde(default)]
    pub submission: SubmissionConfig,
}

fn default_version() -> u32 {
    SUPPORTED_CONFIG_VERSION
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_anthropic_version")]
    pub anthropic_version: String,
}

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

fn default_anthropic_version() -> String {
    "2023-06-01".to_string()
}

impl EndpointConfig {
    /// Reads the API key from the configured environment variable.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        match std::env::var(&self.api_key_env) {
            Ok(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(ConfigError(format!(
                "config error: environment variable {} is not set",
                self.api_key_env
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Connection string for postgres. Falls back to `url_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_url_env")]
    pub url_env: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: default_db_path(),
            url: None,
            url_env: default_url_env(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".driftwatch/driftwatch.db")
}

fn default_url_env() -> String {
    "DATABASE_URL".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl StorageConfig {
    pub fn resolve_url(&self) -> Result<String, ConfigError> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        std::env::var(&self.url_env).map_err(|_| {
            ConfigError(format!(
                "config error: postgres backend needs storage.url or {}",
                self.url_env
            ))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunnerConfig {
    /// Flat delay between consecutive endpoint calls.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    #[serde(default = "default_window_days")]
    pub baseline_window_days: u32,
    /// How long a run waits for another process's run to finish. 0 refuses at once.
    #[serde(default = "default_lock_wait_secs")]
    pub lock_wait_secs: u64,
    /// A lock claimed longer ago than this belongs to a crashed process.
    #[serde(default = "default_lock_stale_secs")]
    pub lock_stale_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            pacing_ms: default_pacing_ms(),
            baseline_window_days: default_window_days(),
            lock_wait_secs: default_lock_wait_secs(),
            lock_stale_secs: default_lock_stale_secs(),
        }
    }
}

fn default_pacing_ms() -> u64 {
    500
}

fn default_lock_wait_secs() -> u64 {
    1800
}

fn default_lock_stale_secs() -> u64 {
    3600
}

fn default_window_days() -> u32 {
    7
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmissionConfig {
    #[serde(default = "default_share_base_url")]
    pub share_base_url: String,
    #[serde(default = "default_window_days")]
    pub comparison_window_days: u32,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            share_base_url: default_share_base_url(),
            comparison_window_days: default_window_days(),
        }
    }
}

fn default_share_base_url() -> String {
    "http://localhost:8080".to_string()
}

pub fn load_config(path: &Path, strict: bool) -> Result<MonitorConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {}", path.display(), e)))?;
    parse_config(&raw, path, strict)
}

pub fn parse_config(raw: &str, path: &Path, strict: bool) -> Result<MonitorConfig, ConfigError> {
    let mut ignored_keys = std::collections::BTreeSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(raw);

    let mut cfg: MonitorConfig = serde_ignored::deserialize(deserializer, |p| {
        ignored_keys.insert(p.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse YAML: {}", e)))?;

    // Anchors and extension keys are allowed
    let meaningful: Vec<_> = ignored_keys
        .iter()
        .filter(|k| !k.starts_with('_') && !k.starts_with("x-"))
        .collect();
    if !meaningful.is_empty() {
        if strict {
            return Err(ConfigError(format!(
                "Unknown fields detected in strict mode: {:?} (file: {})",
                meaningful,
                path.display()
            )));
        }
        tracing::warn!(fields = ?meaningful, "ignored unknown config fields");
    }

    if cfg.version != SUPPORTED_CONFIG_VERSION {
        return Err(ConfigError(format!(
            "unsupported config version {} (supported: {})",
            cfg.version, SUPPORTED_CONFIG_VERSION
        )));
    }
    if cfg.endpoint.model.trim().is_empty() {
        return Err(ConfigError("config error: endpoint.model is empty".into()));
    }
    if cfg.runner.baseline_window_days == 0 {
        return Err(ConfigError(
            "config error: runner.baseline_window_days must be >= 1".into(),
        ));
    }

    normalize_paths(&mut cfg, path);
    Ok(cfg)
}

// Relative paths are resolved against the directory holding the config file.
fn normalize_paths(cfg: &mut MonitorConfig, config_path: &Path) {
    let base = config_path.parent().unwrap_or(Path::new("."));
    if let Some(catalog) = cfg.catalog_file.as_mut() {
        if catalog.is_relative() {
            *catalog = base.join(&*catalog);
        }
    }
    if cfg.storage.path.is_relative() && cfg.storage.path != Path::new(":memory:") {
        cfg.storage.path = base.join(&cfg.storage.path);
    }
}

pub const SAMPLE_CONFIG: &str = r#"version: 1
endpoint:
  provider: anthropic
  base_url: https://api.anthropic.com
  model: claude-sonnet-4-5
  api_key_env: ANTHROPIC_API_KEY
  region: us-east-1
  request_timeout_secs: 120
storage:
  backend: sqlite
  path: .driftwatch/driftwatch.db
runner:
  pacing_ms: 500
  baseline_window_days: 7
  lock_wait_secs: 1800
submission:
  share_base_url: http://localhost:8080
"#;

pub fn write_sample_config(path: &Path) -> Result<(), ConfigError> {
    std::fs::write(path, SAMPLE_CONFIG)
        .map_err(|e| ConfigError(format!("failed to write sample config: {}", e)))?;
    Ok(())
}
