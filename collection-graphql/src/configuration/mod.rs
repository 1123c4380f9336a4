//! Logic for loading configuration in to an object model

use std::path::Path;

use displaydoc::Display;
use schemars::JsonSchema;
use schemars::r#gen::SchemaSettings;
use schemars::schema::RootSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// could not read configuration file {path}: {error}
    CannotReadFile {
        path: String,
        error: std::io::Error,
    },
    /// {message}: {error}
    InvalidConfiguration {
        message: &'static str,
        error: String,
    },
}

/// The configuration of the query engine.
///
/// Can be created through `serde::Deserialize` from various formats,
/// or inline in Rust code with `serde_json::json!` and `serde_json::from_value`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Configuration {
    /// Limits applied while planning queries.
    pub query: QueryConfig,

    /// Log output.
    pub logging: LoggingConfig,
}

/// Limits applied while planning queries.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct QueryConfig {
    /// Upper bound for the `limit` argument, at every nesting level.
    /// `-1` (all rows) is clamped to it as well.
    /// Unbounded when not set.
    #[serde(default)]
    pub limit_max: Option<i64>,

    /// Maximum depth of nested selection sets.
    /// Defaults to 512
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,
}

fn default_recursion_limit() -> usize {
    512
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            limit_max: None,
            recursion_limit: default_recursion_limit(),
        }
    }
}

#[buildstructor::buildstructor]
impl QueryConfig {
    #[builder]
    pub fn new(limit_max: Option<i64>, recursion_limit: Option<usize>) -> Self {
        Self {
            limit_max,
            recursion_limit: recursion_limit.unwrap_or_else(default_recursion_limit),
        }
    }
}

/// Log output.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log filter, in `RUST_LOG` syntax.
    /// Defaults to "info"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl Configuration {
    /// Parses and validates YAML configuration.
    ///
    /// An empty document yields the defaults.
    pub fn from_yaml(raw_yaml: &str) -> Result<Self, ConfigurationError> {
        if raw_yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let configuration: Configuration = serde_yaml::from_str(raw_yaml).map_err(|e| {
            ConfigurationError::InvalidConfiguration {
                message: "failed to parse yaml",
                error: e.to_string(),
            }
        })?;
        configuration.validate()?;
        Ok(configuration)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let raw_yaml =
            std::fs::read_to_string(path).map_err(|error| ConfigurationError::CannotReadFile {
                path: path.display().to_string(),
                error,
            })?;
        Self::from_yaml(&raw_yaml)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if let Some(limit_max) = self.query.limit_max
            && limit_max < 0
        {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "invalid query.limit_max",
                error: format!("{limit_max} is negative"),
            });
        }
        if self.query.recursion_limit == 0 {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "invalid query.recursion_limit",
                error: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Generate a JSON schema for the configuration.
pub fn generate_config_schema() -> RootSchema {
    let settings = SchemaSettings::draft07().with(|s| {
        s.option_nullable = true;
        s.option_add_null_type = false;
        s.inline_subschemas = true;
    });
    settings.into_generator().into_root_schema_for::<Configuration>()
}
