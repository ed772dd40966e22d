//! Engine configuration.
//!
//! # Responsibility
//! - Load engine settings from an optional TOML file.
//! - Apply environment overrides and validate ranges before use.
//!
//! # Invariants
//! - A config returned by [`EngineConfig::load`] or [`EngineConfig::from_env`]
//!   has passed [`EngineConfig::validate`].
//!
//! Environment overrides: `PSP_DB_PATH`, `PSP_LOG_LEVEL`, `PSP_LOG_DIR`.

use crate::apps::manifest::AppManifest;
use crate::model::psp::{DEFAULT_CHAR_BUDGET, DEFAULT_MAX_FRAGMENTS, MAX_CHAR_BUDGET};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub const ENV_DB_PATH: &str = "PSP_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "PSP_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "PSP_LOG_DIR";

const DEFAULT_DB_FILE_NAME: &str = "psp.sqlite3";

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub db_path: PathBuf,
    pub log_level: String,
    /// Absolute directory for rolling log files. Logging stays off when unset.
    pub log_dir: Option<PathBuf>,
    pub analysis: AnalysisSettings,
    pub invocation: InvocationSettings,
    pub feedback: FeedbackSettings,
    /// Registered third-party apps. Empty disables app authorization.
    pub apps: Vec<AppManifest>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: std::env::temp_dir().join(DEFAULT_DB_FILE_NAME),
            log_level: crate::logging::default_log_level().to_string(),
            log_dir: None,
            analysis: AnalysisSettings::default(),
            invocation: InvocationSettings::default(),
            feedback: FeedbackSettings::default(),
            apps: Vec::new(),
        }
    }
}

/// Local analyzer and production pass settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Only records newer than this many days are analyzed. `0` disables the window.
    pub window_days: u32,
    /// Recency half-life for record and fragment decay.
    pub half_life_days: f64,
    pub max_topics: usize,
    pub max_tags: usize,
    pub max_sources: usize,
    pub max_quotes: usize,
    /// Production is skipped below this many records in the window.
    pub min_records: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            window_days: 180,
            half_life_days: 30.0,
            max_topics: 8,
            max_tags: 5,
            max_sources: 3,
            max_quotes: 3,
            min_records: 1,
        }
    }
}

/// Invocation defaults applied when callers do not pass explicit limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationSettings {
    pub char_budget: usize,
    pub max_fragments: usize,
}

impl Default for InvocationSettings {
    fn default() -> Self {
        Self {
            char_budget: DEFAULT_CHAR_BUDGET,
            max_fragments: DEFAULT_MAX_FRAGMENTS,
        }
    }
}

/// Feedback loop learning rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackSettings {
    /// EWMA factor applied to fragment weights.
    pub fragment_learning_rate: f64,
    /// Gradient step applied to strategy weights.
    pub strategy_learning_rate: f64,
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self {
            fragment_learning_rate: 0.2,
            strategy_learning_rate: 0.05,
        }
    }
}

impl EngineConfig {
    /// Loads a TOML file, applies env overrides and validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Builds defaults, applies env overrides and validates.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parses TOML without env overrides or validation.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(ConfigError::Parse)
    }

    /// Applies `PSP_*` environment variables. Blank values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = env_value(ENV_DB_PATH) {
            self.db_path = PathBuf::from(value);
        }
        if let Some(value) = env_value(ENV_LOG_LEVEL) {
            self.log_level = value;
        }
        if let Some(value) = env_value(ENV_LOG_DIR) {
            self.log_dir = Some(PathBuf::from(value));
        }
    }

    /// Checks value ranges and app manifests.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db_path.as_os_str().is_empty() {
            return Err(invalid("db_path must not be empty"));
        }
        if let Some(log_dir) = &self.log_dir {
            if !log_dir.is_absolute() {
                return Err(invalid(format!(
                    "log_dir must be an absolute path, got `{}`",
                    log_dir.display()
                )));
            }
        }

        let analysis = &self.analysis;
        if !analysis.half_life_days.is_finite() || analysis.half_life_days <= 0.0 {
            return Err(invalid("analysis.half_life_days must be positive"));
        }
        if analysis.max_topics == 0 {
            return Err(invalid("analysis.max_topics must be positive"));
        }

        let invocation = &self.invocation;
        if invocation.char_budget == 0 || invocation.char_budget > MAX_CHAR_BUDGET {
            return Err(invalid(format!(
                "invocation.char_budget must be in 1..={MAX_CHAR_BUDGET}"
            )));
        }
        if invocation.max_fragments == 0 {
            return Err(invalid("invocation.max_fragments must be positive"));
        }

        for (name, rate) in [
            (
                "feedback.fragment_learning_rate",
                self.feedback.fragment_learning_rate,
            ),
            (
                "feedback.strategy_learning_rate",
                self.feedback.strategy_learning_rate,
            ),
        ] {
            if !(rate > 0.0 && rate <= 1.0) {
                return Err(invalid(format!("{name} must be in (0, 1], got {rate}")));
            }
        }

        for manifest in &self.apps {
            manifest
                .validate()
                .map_err(|err| invalid(format!("app `{}`: {err}", manifest.id)))?;
        }

        Ok(())
    }
}

fn env_value(name: &str) -> Option<String> {
    let raw = std::env::var(name).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

/// Configuration load/validation errors.
#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(toml::de::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config TOML: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, EngineConfig};

    #[test]
    fn defaults_validate() {
        EngineConfig::default()
            .validate()
            .expect("default config should be valid");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            db_path = "/tmp/psp-test.sqlite3"

            [analysis]
            max_topics = 4

            [[apps]]
            id = "reader.app"
            version = "1.0.0"
            scopes = ["submit", "prompt"]
            "#,
        )
        .expect("toml should parse");

        assert_eq!(config.analysis.max_topics, 4);
        assert_eq!(config.analysis.half_life_days, 30.0);
        assert_eq!(config.invocation.char_budget, 2_000);
        assert_eq!(config.apps.len(), 1);
        config.validate().expect("config should validate");
    }

    #[test]
    fn rejects_out_of_range_learning_rate() {
        let mut config = EngineConfig::default();
        config.feedback.fragment_learning_rate = 1.5;
        let err = config.validate().expect_err("rate above 1 must fail");
        assert!(matches!(err, ConfigError::Invalid(message) if message.contains("fragment_learning_rate")));
    }

    #[test]
    fn rejects_relative_log_dir() {
        let mut config = EngineConfig::default();
        config.log_dir = Some("logs".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_invalid_app_manifest() {
        let mut config = EngineConfig::default();
        config.apps = vec![crate::apps::manifest::AppManifest {
            id: "Bad App".to_string(),
            version: "1.0.0".to_string(),
            scopes: vec!["submit".to_string()],
        }];
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = EngineConfig::from_toml_str("db_path = [").expect_err("must fail");
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
