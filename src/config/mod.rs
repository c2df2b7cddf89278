//! Writer configuration.
//!
//! Handles loading configuration from YAML files with environment variable
//! interpolation, and compiles the object key templates it names.

mod vars;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::Path;

use crate::compression::CompressionKind;
use crate::error::{
    ConfigError, EmptyFieldsSnafu, EmptyStorageUrlSnafu, EnvInterpolationSnafu,
    InvalidPartSizeSnafu, KeyTemplateSnafu, PartSizeBelowMinimumSnafu, ReadFileSnafu,
    YamlParseSnafu,
};
use crate::format::{FormatKind, OutputField, ValueEncoding};
use crate::storage::BackendConfig;
use crate::template::{KeyTemplate, TimestampSource};

/// Byte size constants (binary/IEC units).
pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

/// S3 rejects non-final multipart parts smaller than 5 MiB.
pub const MIN_S3_PART_SIZE_MB: usize = 5;

/// Default file name appended to the rendered prefix.
pub const DEFAULT_FILE_NAME_TEMPLATE: &str = "{{topic}}-{{partition}}-{{start_offset}}";

/// Main configuration structure for a writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    pub storage: StorageConfig,
    /// Object naming and encoding (optional, all fields defaulted).
    #[serde(default)]
    pub output: OutputConfig,
    /// Metrics configuration (optional, disabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Destination object store and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Destination URL.
    /// Examples: "s3://bucket/base", "s3::http://localhost:9000/bucket", "/local/path", "memory://"
    pub url: String,

    /// Region override (falls back to the URL, then the environment).
    #[serde(default)]
    pub region: Option<String>,

    /// Endpoint override for S3-compatible stores; implies path-style addressing.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Static access key; when unset, credentials come from the environment.
    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Additional object_store options passed through verbatim.
    #[serde(default)]
    pub storage_options: HashMap<String, String>,

    /// Multipart part size in MB (default: 8, at least 5 for S3).
    #[serde(default = "default_part_size_mb")]
    pub part_size_mb: usize,
}

fn default_part_size_mb() -> usize {
    8
}

impl StorageConfig {
    /// Storage configuration for a URL with every other setting defaulted.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            region: None,
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            storage_options: HashMap::new(),
            part_size_mb: default_part_size_mb(),
        }
    }

    pub fn part_size_bytes(&self) -> usize {
        self.part_size_mb * MB
    }
}

/// Object naming, record format and compression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Template rendered in front of every object key (default: empty).
    #[serde(default)]
    pub prefix: String,

    /// Template for the object name after the prefix.
    #[serde(default = "default_file_name")]
    pub file_name: String,

    #[serde(default)]
    pub compression: CompressionKind,

    #[serde(default)]
    pub format: FormatKind,

    /// Record fields written, in order (default: [value]).
    #[serde(default = "default_fields")]
    pub fields: Vec<OutputField>,

    #[serde(default)]
    pub value_encoding: ValueEncoding,

    #[serde(default)]
    pub timestamp_source: TimestampSource,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            file_name: default_file_name(),
            compression: CompressionKind::default(),
            format: FormatKind::default(),
            fields: default_fields(),
            value_encoding: ValueEncoding::default(),
            timestamp_source: TimestampSource::default(),
        }
    }
}

fn default_file_name() -> String {
    DEFAULT_FILE_NAME_TEMPLATE.to_string()
}

fn default_fields() -> Vec<OutputField> {
    vec![OutputField::Value]
}

impl OutputConfig {
    /// Compile the prefix template.
    pub fn prefix_template(&self) -> Result<KeyTemplate, ConfigError> {
        KeyTemplate::parse(&self.prefix).context(KeyTemplateSnafu {
            which: "prefix",
            template: self.prefix.clone(),
        })
    }

    /// Compile the file name template.
    pub fn file_name_template(&self) -> Result<KeyTemplate, ConfigError> {
        KeyTemplate::parse(&self.file_name).context(KeyTemplateSnafu {
            which: "file name",
            template: self.file_name.clone(),
        })
    }
}

/// Metrics configuration for Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the Prometheus endpoint is served (default: false).
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

impl WriterConfig {
    /// Minimal configuration writing to `url` with default output settings.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            storage: StorageConfig::for_url(url),
            output: OutputConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_options(path, true)
    }

    /// Load configuration from a YAML file with optional environment variable interpolation.
    pub fn from_file_with_options(
        path: impl AsRef<Path>,
        interpolate_env: bool,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        Self::from_yaml(&content, interpolate_env)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(content: &str, interpolate_env: bool) -> Result<Self, ConfigError> {
        let content = if interpolate_env {
            vars::interpolate(content).map_err(|errors| {
                EnvInterpolationSnafu {
                    message: errors.join("\n"),
                }
                .build()
            })?
        } else {
            content.to_string()
        };

        let config: WriterConfig = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration, compiling both key templates.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.storage.url.trim().is_empty(), EmptyStorageUrlSnafu);
        ensure!(self.storage.part_size_mb > 0, InvalidPartSizeSnafu);
        if let Ok(BackendConfig::S3(_)) = BackendConfig::parse_url(&self.storage.url) {
            ensure!(
                self.storage.part_size_mb >= MIN_S3_PART_SIZE_MB,
                PartSizeBelowMinimumSnafu {
                    part_size_mb: self.storage.part_size_mb,
                    minimum: MIN_S3_PART_SIZE_MB,
                }
            );
        }
        ensure!(!self.output.fields.is_empty(), EmptyFieldsSnafu);
        self.output.prefix_template()?;
        self.output.file_name_template()?;
        Ok(())
    }
}
