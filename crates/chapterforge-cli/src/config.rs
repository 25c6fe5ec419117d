//! Configuration loading (spec §6 "Configuration"), following the teacher's
//! `dotenvy::dotenv()` + `std::env::var` pattern (`crates/everruns-api`,
//! `crates/everruns-worker`) plus an optional structured TOML file mirroring
//! `crates/control-plane/src/config/providers.rs`'s `toml::from_str` use.
//! Environment variables take precedence over the file, which takes
//! precedence over the defaults below.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "development" => Some(Self::Development),
            "staging" => Some(Self::Staging),
            "production" => Some(Self::Production),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARNING" => Some(Self::Warning),
            "ERROR" => Some(Self::Error),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }

    /// `CRITICAL` has no tracing level of its own; it logs as `error!` with a
    /// `critical = true` field, so the filter directive collapses to "error".
    pub fn as_filter_directive(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error | Self::Critical => "error",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WorkerCounts {
    pub parser: u32,
    pub ai: u32,
    pub media: u32,
    pub aggregator: u32,
}

impl WorkerCounts {
    fn defaults() -> Self {
        Self { parser: 2, ai: 3, media: 2, aggregator: 1 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkersSection {
    #[serde(default = "WorkerCounts::defaults")]
    pub counts: WorkerCounts,
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: u32,
}

fn default_max_concurrent_tasks() -> u32 {
    10
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self { counts: WorkerCounts::defaults(), max_concurrent_tasks: default_max_concurrent_tasks() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServiceApiConfig {
    pub api_key: Option<String>,
    pub rate_limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub openai: ServiceApiConfig,
    pub anthropic: ServiceApiConfig,
    pub object_store_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            openai: ServiceApiConfig::default(),
            anthropic: ServiceApiConfig::default(),
            object_store_url: None,
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CacheSection {
    pub size: Option<usize>,
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StateSection {
    pub redis_url: Option<String>,
    pub file_root: Option<String>,
    pub execution_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub environment: String,
    pub logging_level: String,
    pub metrics_enabled: bool,
    pub workers: WorkersSection,
    pub api: ApiSection,
    pub cache: CacheSection,
    pub state: StateSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            logging_level: "INFO".to_string(),
            metrics_enabled: false,
            workers: WorkersSection::default(),
            api: ApiSection::default(),
            cache: CacheSection::default(),
            state: StateSection::default(),
        }
    }
}

impl Config {
    pub fn environment(&self) -> Environment {
        Environment::parse(&self.environment).unwrap_or(Environment::Development)
    }

    pub fn log_level(&self) -> LogLevel {
        LogLevel::parse(&self.logging_level).unwrap_or(LogLevel::Info)
    }

    pub fn state_file_root(&self) -> &str {
        self.state.file_root.as_deref().unwrap_or(".chapterforge/state")
    }

    /// production requires at least one LM api key and a non-localhost kv
    /// url; `state.redis_url` stands in for "kv url" since this workspace's
    /// `KvStore` is an interface-only extension point (DESIGN.md).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.environment() != Environment::Production {
            return Ok(());
        }

        let has_api_key = [&self.api.openai.api_key, &self.api.anthropic.api_key]
            .into_iter()
            .any(|key| key.as_deref().is_some_and(|k| k.len() >= 10));
        if !has_api_key {
            return Err(ConfigError::Invalid(
                "production environment requires at least one LM api key".to_string(),
            ));
        }

        match &self.state.redis_url {
            Some(url) if !url.contains("localhost") && !url.contains("127.0.0.1") => Ok(()),
            Some(_) => Err(ConfigError::Invalid(
                "production environment requires a non-localhost kv url".to_string(),
            )),
            None => Err(ConfigError::Invalid(
                "production environment requires state.redis_url to be set".to_string(),
            )),
        }
    }
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(v) = std::env::var("CHAPTERFORGE_ENVIRONMENT") {
        config.environment = v;
    }
    if let Ok(v) = std::env::var("CHAPTERFORGE_LOGGING_LEVEL") {
        config.logging_level = v;
    }
    if let Ok(v) = std::env::var("CHAPTERFORGE_METRICS_ENABLED") {
        config.metrics_enabled = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Ok(v) = std::env::var("CHAPTERFORGE_OPENAI_API_KEY") {
        config.api.openai.api_key = Some(v);
    }
    if let Ok(v) = std::env::var("CHAPTERFORGE_ANTHROPIC_API_KEY") {
        config.api.anthropic.api_key = Some(v);
    }
    if let Ok(v) = std::env::var("CHAPTERFORGE_STATE_FILE_ROOT") {
        config.state.file_root = Some(v);
    }
    if let Ok(v) = std::env::var("CHAPTERFORGE_STATE_REDIS_URL") {
        config.state.redis_url = Some(v);
    }
    if let Ok(v) = std::env::var("CHAPTERFORGE_CACHE_SIZE") {
        config.cache.size = v.parse().ok();
    }
    if let Ok(v) = std::env::var("CHAPTERFORGE_CACHE_TTL_SECS") {
        config.cache.ttl_secs = v.parse().ok();
    }
    if let Ok(v) = std::env::var("CHAPTERFORGE_WORKERS_MAX_CONCURRENT_TASKS") {
        if let Ok(v) = v.parse() {
            config.workers.max_concurrent_tasks = v;
        }
    }
}

/// Loads `.env` (if present), an optional TOML file named by
/// `CHAPTERFORGE_CONFIG` (or `config_path`), then applies environment
/// overrides, then validates.
pub fn load(config_path: Option<&Path>) -> Result<Config, ConfigError> {
    dotenvy::dotenv().ok();

    let mut config = match config_path.map(Path::to_path_buf).or_else(|| std::env::var("CHAPTERFORGE_CONFIG").ok().map(Into::into)) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
            toml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.display().to_string(), source })?
        }
        None => Config::default(),
    };

    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}
