//! Configuration loading, validation, and management for agentloop.
//!
//! Loads configuration from `~/.agentloop/config.toml` (or the file named by
//! `AGENTLOOP_CONFIG`) with environment variable overrides. Validates all
//! settings at startup.
//!
//! Model profiles live under `[llm]`. Scalar keys directly under `[llm]` form
//! the `default` profile; each `[llm.<name>]` sub-table is a named profile
//! that inherits every key it does not set from the default.

use agentloop_core::agent::AgentConfig;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the profile every lookup falls back to.
pub const DEFAULT_PROFILE: &str = "default";

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model profiles by name; always contains `default`
    #[serde(default = "default_profiles", deserialize_with = "deserialize_profiles")]
    pub llm: BTreeMap<String, LlmSettings>,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Model-call retry policy
    #[serde(default)]
    pub retry: RetrySettings,

    /// Log output settings
    #[serde(default)]
    pub log: LogConfig,
}

/// Which wire dialect a profile speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    #[default]
    OpenAi,
    Azure,
}

/// One named model profile.
#[derive(Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Model id (or deployment name for Azure)
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default)]
    pub api_type: ApiType,

    #[serde(default)]
    pub api_key: String,

    /// Only sent for Azure
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("api_type", &self.api_type)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "***" })
            .field("api_version", &self.api_version)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl LlmSettings {
    /// A copy safe to print: the API key is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.api_key.is_empty() {
            copy.api_key = "***".into();
        }
        copy
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            api_type: ApiType::default(),
            api_key: String::new(),
            api_version: default_api_version(),
            base_url: default_base_url(),
        }
    }
}

/// Random exponential backoff for model calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Lower bound of every wait
    #[serde(default = "default_min_wait_ms")]
    pub min_wait_ms: u64,

    /// Upper bound of every wait
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            min_wait_ms: default_min_wait_ms(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_model() -> String {
    "gpt-4".into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.7
}
fn default_api_version() -> String {
    "2024-02-15-preview".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_max_attempts() -> u32 {
    6
}
fn default_min_wait_ms() -> u64 {
    1_000
}
fn default_max_wait_ms() -> u64 {
    60_000
}
fn default_log_filter() -> String {
    "info".into()
}

fn default_profiles() -> BTreeMap<String, LlmSettings> {
    BTreeMap::from([(DEFAULT_PROFILE.to_string(), LlmSettings::default())])
}

fn deserialize_profiles<'de, D>(deserializer: D) -> Result<BTreeMap<String, LlmSettings>, D::Error>
where
    D: Deserializer<'de>,
{
    let table = toml::Table::deserialize(deserializer)?;
    resolve_profiles(table).map_err(serde::de::Error::custom)
}

/// Split `[llm]` into the default profile and its named overrides.
fn resolve_profiles(table: toml::Table) -> Result<BTreeMap<String, LlmSettings>, String> {
    let mut base = toml::Table::new();
    let mut overrides = Vec::new();
    for (key, value) in table {
        match value {
            toml::Value::Table(sub) => overrides.push((key, sub)),
            scalar => {
                base.insert(key, scalar);
            }
        }
    }

    let mut profiles = BTreeMap::new();
    let default: LlmSettings = toml::Value::Table(base.clone())
        .try_into()
        .map_err(|e| format!("[llm]: {e}"))?;
    profiles.insert(DEFAULT_PROFILE.to_string(), default);

    for (name, sub) in overrides {
        let mut merged = base.clone();
        merged.extend(sub);
        let settings: LlmSettings = toml::Value::Table(merged)
            .try_into()
            .map_err(|e| format!("[llm.{name}]: {e}"))?;
        profiles.insert(name, settings);
    }
    Ok(profiles)
}

impl AppConfig {
    /// Load configuration from `AGENTLOOP_CONFIG` or `~/.agentloop/config.toml`,
    /// then apply environment overrides:
    /// - `AGENTLOOP_API_KEY`, then `OPENAI_API_KEY`: key for profiles without one
    /// - `AGENTLOOP_MODEL`: model of the default profile
    /// - `AGENTLOOP_BASE_URL`: endpoint of the default profile
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var("AGENTLOOP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"));
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment values read through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let api_key = lookup("AGENTLOOP_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            for settings in self.llm.values_mut().filter(|s| s.api_key.is_empty()) {
                settings.api_key = key.clone();
            }
        }

        let default = self.llm.entry(DEFAULT_PROFILE.to_string()).or_default();
        if let Some(model) = lookup("AGENTLOOP_MODEL") {
            default.model = model;
        }
        if let Some(base_url) = lookup("AGENTLOOP_BASE_URL") {
            default.base_url = base_url;
        }
    }

    /// Resolve a profile by name, falling back to `default`.
    pub fn profile(&self, name: &str) -> LlmSettings {
        if let Some(settings) = self.llm.get(name) {
            return settings.clone();
        }
        tracing::debug!(profile = %name, "Profile not configured, falling back to default");
        self.llm.get(DEFAULT_PROFILE).cloned().unwrap_or_default()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".agentloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, settings) in &self.llm {
            if !(0.0..=2.0).contains(&settings.temperature) {
                return Err(ConfigError::ValidationError(format!(
                    "llm.{name}.temperature must be between 0.0 and 2.0"
                )));
            }
            if settings.base_url.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "llm.{name}.base_url must not be empty"
                )));
            }
            if settings.api_type == ApiType::Azure && settings.api_version.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "llm.{name}.api_version is required for azure profiles"
                )));
            }
        }

        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError("agent.max_steps must be > 0".into()));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError("retry.max_attempts must be >= 1".into()));
        }

        if self.retry.min_wait_ms > self.retry.max_wait_ms {
            return Err(ConfigError::ValidationError(
                "retry.min_wait_ms must not exceed retry.max_wait_ms".into(),
            ));
        }

        Ok(())
    }

    /// A copy safe to print: every API key is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for settings in copy.llm.values_mut() {
            *settings = settings.redacted();
        }
        copy
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: default_profiles(),
            agent: AgentConfig::default(),
            retry: RetrySettings::default(),
            log: LogConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        let profile = config.profile(DEFAULT_PROFILE);
        assert_eq!(profile.model, "gpt-4");
        assert_eq!(profile.max_tokens, 4096);
        assert_eq!(profile.api_type, ApiType::OpenAi);
        assert_eq!(profile.api_version, "2024-02-15-preview");
        assert_eq!(profile.base_url, "https://api.openai.com/v1");
        assert_eq!(config.retry.max_attempts, 6);
    }

    #[test]
    fn named_profiles_inherit_from_default() {
        let config = AppConfig::from_toml(
            r#"
[llm]
model = "gpt-4o"
api_key = "sk-base"
temperature = 0.0

[llm.vision]
model = "gpt-4o-vision"
max_tokens = 8192
"#,
        )
        .unwrap();

        let vision = config.profile("vision");
        assert_eq!(vision.model, "gpt-4o-vision");
        assert_eq!(vision.max_tokens, 8192);
        assert_eq!(vision.api_key, "sk-base");
        assert_eq!(vision.temperature, 0.0);

        let default = config.profile(DEFAULT_PROFILE);
        assert_eq!(default.model, "gpt-4o");
        assert_eq!(default.max_tokens, 4096);
    }

    #[test]
    fn missing_profile_falls_back_to_default() {
        let config = AppConfig::from_toml("[llm]\nmodel = \"local-model\"\n").unwrap();
        assert_eq!(config.profile("does-not-exist").model, "local-model");
    }

    #[test]
    fn config_roundtrip_toml() {
        let mut config = AppConfig::default();
        config.llm.insert(
            "azure".into(),
            LlmSettings {
                api_type: ApiType::Azure,
                model: "gpt4-deployment".into(),
                ..LlmSettings::default()
            },
        );
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = AppConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed.profile("azure").api_type, ApiType::Azure);
        assert_eq!(parsed.profile("azure").model, "gpt4-deployment");
        assert_eq!(parsed.agent.max_steps, config.agent.max_steps);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let result = AppConfig::from_toml("[llm]\ntemperature = 5.0\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn inverted_retry_bounds_rejected() {
        let mut config = AppConfig::default();
        config.retry.min_wait_ms = 10_000;
        config.retry.max_wait_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.profile(DEFAULT_PROFILE).model, "gpt-4");
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[agent]\nmax_steps = 7\nmax_observe = 500\n\n[retry]\nmax_attempts = 3\n"
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.agent.max_steps, 7);
        assert_eq!(config.agent.max_observe, Some(500));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.min_wait_ms, 1_000);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[agent\nmax_steps = ").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_fill_missing_keys() {
        let mut config = AppConfig::from_toml(
            "[llm]\nmodel = \"gpt-4\"\n\n[llm.own]\napi_key = \"sk-own\"\n",
        )
        .unwrap();
        let env = HashMap::from([
            ("OPENAI_API_KEY", "sk-env"),
            ("AGENTLOOP_MODEL", "gpt-4o-mini"),
        ]);
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.profile(DEFAULT_PROFILE).api_key, "sk-env");
        assert_eq!(config.profile(DEFAULT_PROFILE).model, "gpt-4o-mini");
        assert_eq!(config.profile("own").api_key, "sk-own");
    }

    #[test]
    fn debug_redacts_api_key() {
        let settings = LlmSettings {
            api_key: "sk-secret".into(),
            ..LlmSettings::default()
        };
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("***"));
        assert_eq!(settings.redacted().api_key, "***");
    }
}
