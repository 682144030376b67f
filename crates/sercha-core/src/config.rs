//! Ambient configuration: rate limit presets, OAuth callback defaults,
//! sync scheduling, and logging — typed structs that map to a YAML
//! configuration file, with loading, validation, defaults, and a builder
//! for programmatic use.
//!
//! Loading a config file from disk and wiring it into a running process is
//! the composition root's job, out of scope here; this module only owns
//! the typed shape such a loader populates.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level ambient configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub sync: SyncConfig,
    pub rate_limits: RateLimitPresets,
    pub oauth: OAuthDefaults,
    pub logging: LoggingConfig,
}

/// Sync scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds between incremental-sync polling cycles for connectors
    /// without push/watch support.
    pub poll_interval_seconds: u64,
    /// Maximum number of sources syncing concurrently.
    pub max_concurrent_sources: u32,
    /// Seconds a single sync operation may run before the orchestrator
    /// cancels it.
    pub sync_timeout_seconds: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 300,
            max_concurrent_sources: 4,
            sync_timeout_seconds: 3600,
        }
    }
}

/// Token-bucket parameters for one provider family.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitPreset {
    /// Steady-state tokens refilled per second.
    pub rate: f64,
    /// Maximum burst size.
    pub burst: u32,
}

/// Per-provider-family rate limit presets, keyed by `ProviderFamily::as_str()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitPresets {
    pub presets: HashMap<String, RateLimitPreset>,
    /// Used for a provider family with no entry in `presets`.
    pub fallback: RateLimitPreset,
}

impl Default for RateLimitPresets {
    fn default() -> Self {
        let mut presets = HashMap::new();
        presets.insert("notion".to_string(), RateLimitPreset { rate: 3.0, burst: 10 });
        presets.insert("google".to_string(), RateLimitPreset { rate: 5.0, burst: 10 });
        presets.insert("microsoft".to_string(), RateLimitPreset { rate: 5.0, burst: 10 });
        presets.insert("github".to_string(), RateLimitPreset { rate: 5.0, burst: 10 });
        presets.insert("dropbox".to_string(), RateLimitPreset { rate: 5.0, burst: 10 });
        Self {
            presets,
            fallback: RateLimitPreset { rate: 2.0, burst: 5 },
        }
    }
}

impl RateLimitPresets {
    /// Looks up the preset for a provider family, falling back to
    /// [`RateLimitPresets::fallback`] for anything unconfigured.
    pub fn for_provider(&self, provider_family: &str) -> RateLimitPreset {
        self.presets
            .get(provider_family)
            .copied()
            .unwrap_or(self.fallback)
    }
}

/// OAuth loopback callback server defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthDefaults {
    pub callback_port: u16,
    pub callback_path: String,
    pub callback_timeout_seconds: u64,
}

impl Default for OAuthDefaults {
    fn default() -> Self {
        Self {
            callback_port: 18080,
            callback_path: "/callback".to_string(),
            callback_timeout_seconds: 120,
        }
    }
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Path to the log file; `None` logs to stderr only.
    pub file: Option<PathBuf>,
    /// Emit structured JSON instead of human-readable lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            json: false,
        }
    }
}

impl Config {
    /// Loads configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Tries to load from `path`; falls back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("sercha")
            .join("config.yaml")
    }
}

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.poll_interval_seconds"`.
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validates the configuration and returns all errors found. An empty
    /// vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.sync.poll_interval_seconds == 0 {
            errors.push(ValidationError {
                field: "sync.poll_interval_seconds".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.max_concurrent_sources == 0 {
            errors.push(ValidationError {
                field: "sync.max_concurrent_sources".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.sync_timeout_seconds == 0 {
            errors.push(ValidationError {
                field: "sync.sync_timeout_seconds".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.rate_limits.fallback.rate <= 0.0 {
            errors.push(ValidationError {
                field: "rate_limits.fallback.rate".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.rate_limits.fallback.burst == 0 {
            errors.push(ValidationError {
                field: "rate_limits.fallback.burst".into(),
                message: "must be greater than 0".into(),
            });
        }
        for (family, preset) in &self.rate_limits.presets {
            if preset.rate <= 0.0 {
                errors.push(ValidationError {
                    field: format!("rate_limits.presets.{family}.rate"),
                    message: "must be greater than 0".into(),
                });
            }
            if preset.burst == 0 {
                errors.push(ValidationError {
                    field: format!("rate_limits.presets.{family}.burst"),
                    message: "must be greater than 0".into(),
                });
            }
        }

        if self.oauth.callback_port == 0 {
            errors.push(ValidationError {
                field: "oauth.callback_port".into(),
                message: "must be a valid TCP port".into(),
            });
        }
        if !self.oauth.callback_path.starts_with('/') {
            errors.push(ValidationError {
                field: "oauth.callback_path".into(),
                message: "must start with '/'".into(),
            });
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

/// Builder for constructing a [`Config`] programmatically.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn sync_poll_interval_seconds(mut self, seconds: u64) -> Self {
        self.config.sync.poll_interval_seconds = seconds;
        self
    }

    pub fn sync_max_concurrent_sources(mut self, n: u32) -> Self {
        self.config.sync.max_concurrent_sources = n;
        self
    }

    pub fn sync_timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.sync.sync_timeout_seconds = seconds;
        self
    }

    pub fn rate_limit_preset(mut self, provider_family: impl Into<String>, preset: RateLimitPreset) -> Self {
        self.config.rate_limits.presets.insert(provider_family.into(), preset);
        self
    }

    pub fn oauth_callback_port(mut self, port: u16) -> Self {
        self.config.oauth.callback_port = port;
        self
    }

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_file(mut self, file: PathBuf) -> Self {
        self.config.logging.file = Some(file);
        self
    }

    pub fn logging_json(mut self, json: bool) -> Self {
        self.config.logging.json = json;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }

    /// Builds and validates in one step.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_config_has_sensible_values() {
        let cfg = Config::default();
        assert_eq!(cfg.sync.poll_interval_seconds, 300);
        assert_eq!(cfg.sync.max_concurrent_sources, 4);
        assert_eq!(cfg.rate_limits.for_provider("notion").rate, 3.0);
        assert_eq!(cfg.rate_limits.for_provider("google").burst, 10);
        assert_eq!(cfg.rate_limits.for_provider("unknown-provider").rate, 2.0);
        assert_eq!(cfg.oauth.callback_port, 18080);
        assert_eq!(cfg.oauth.callback_path, "/callback");
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn default_config_passes_validation() {
        let cfg = Config::default();
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn load_from_yaml_file() {
        let yaml = r#"
sync:
  poll_interval_seconds: 60
  max_concurrent_sources: 2
  sync_timeout_seconds: 1800
rate_limits:
  presets:
    notion:
      rate: 3.0
      burst: 10
  fallback:
    rate: 2.0
    burst: 5
oauth:
  callback_port: 18080
  callback_path: /callback
  callback_timeout_seconds: 60
logging:
  level: debug
  file: /tmp/sercha.log
  json: true
"#;
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(yaml.as_bytes()).unwrap();
        tmp.flush().unwrap();

        let cfg = Config::load(tmp.path()).expect("load config");
        assert_eq!(cfg.sync.poll_interval_seconds, 60);
        assert_eq!(cfg.sync.max_concurrent_sources, 2);
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
        assert_eq!(cfg.logging.file, Some(PathBuf::from("/tmp/sercha.log")));
    }

    #[test]
    fn load_or_default_returns_default_on_missing_file() {
        let cfg = Config::load_or_default(Path::new("/nonexistent/config.yaml"));
        assert_eq!(cfg.sync.poll_interval_seconds, 300);
    }

    #[test]
    fn load_returns_error_on_invalid_yaml() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"not: [valid: yaml: {{{").unwrap();
        tmp.flush().unwrap();

        assert!(Config::load(tmp.path()).is_err());
    }

    #[test]
    fn validate_catches_zero_poll_interval() {
        let mut cfg = Config::default();
        cfg.sync.poll_interval_seconds = 0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "sync.poll_interval_seconds"));
    }

    #[test]
    fn validate_catches_invalid_log_level() {
        let mut cfg = Config::default();
        cfg.logging.level = "verbose".to_string();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "logging.level"));
    }

    #[test]
    fn validate_catches_bad_callback_path() {
        let mut cfg = Config::default();
        cfg.oauth.callback_path = "callback".to_string();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "oauth.callback_path"));
    }

    #[test]
    fn validate_catches_zero_rate_limit_values() {
        let mut cfg = Config::default();
        cfg.rate_limits.fallback.rate = 0.0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "rate_limits.fallback.rate"));
    }

    #[test]
    fn builder_overrides_fields() {
        let cfg = ConfigBuilder::new()
            .sync_poll_interval_seconds(120)
            .sync_max_concurrent_sources(8)
            .oauth_callback_port(9000)
            .logging_level("debug")
            .logging_json(true)
            .build();

        assert_eq!(cfg.sync.poll_interval_seconds, 120);
        assert_eq!(cfg.sync.max_concurrent_sources, 8);
        assert_eq!(cfg.oauth.callback_port, 9000);
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
    }

    #[test]
    fn builder_build_validated_fails_for_invalid_config() {
        let result = ConfigBuilder::new()
            .sync_poll_interval_seconds(0)
            .logging_level("nope")
            .build_validated();
        assert!(result.is_err());
        assert!(result.unwrap_err().len() >= 2);
    }

    #[test]
    fn default_path_ends_with_config_yaml() {
        let p = Config::default_path();
        assert!(p.ends_with("sercha/config.yaml"));
    }

    #[test]
    fn validation_error_display() {
        let err = ValidationError {
            field: "sync.poll_interval_seconds".into(),
            message: "must be greater than 0".into(),
        };
        assert_eq!(err.to_string(), "sync.poll_interval_seconds: must be greater than 0");
    }

    #[test]
    fn for_provider_falls_back_for_unknown_family() {
        let presets = RateLimitPresets::default();
        let preset = presets.for_provider("some-new-provider");
        assert_eq!(preset, presets.fallback);
    }
}
