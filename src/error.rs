//! Error types for flurry using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase.

use snafu::prelude::*;

use crate::record::PartitionKey;

// ============ Template Errors ============

/// Errors raised while compiling or rendering an object key template.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TemplateError {
    /// Placeholder does not follow `{{ name }}` / `{{ name:parameter=value }}`.
    #[snafu(display("Malformed placeholder '{placeholder}'"))]
    MalformedPlaceholder { placeholder: String },

    /// Placeholder names a variable that is not recognized.
    #[snafu(display("Unknown template variable '{name}'"))]
    UnknownVariable { name: String },

    /// Variable does not accept the given parameter.
    #[snafu(display("Variable '{variable}' does not accept parameter '{parameter}'"))]
    UnsupportedParameter { variable: String, parameter: String },

    /// Parameter value is outside the accepted set.
    #[snafu(display("Invalid value '{value}' for parameter '{parameter}' of '{variable}'"))]
    InvalidParameterValue {
        variable: String,
        parameter: String,
        value: String,
    },

    /// Variable requires a parameter that was not given.
    #[snafu(display("Variable '{variable}' requires parameter '{parameter}'"))]
    MissingParameter { variable: String, parameter: String },

    /// No resolver was bound for a variable referenced by the template.
    #[snafu(display("No value bound for template variable '{name}'"))]
    UnboundVariable { name: String },

    /// Timestamp source is the record, but the record carries no timestamp.
    #[snafu(display("Record at offset {offset} has no timestamp"))]
    MissingTimestamp { offset: u64 },
}

// ============ Stream Errors ============

/// I/O errors raised by an object output stream and its codec.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StreamError {
    /// Encoder, compressor or buffer I/O failed.
    #[snafu(display("Stream I/O failed"))]
    StreamIo { source: std::io::Error },

    /// Object store rejected an upload or commit.
    #[snafu(display("Upload of {key} failed"))]
    Upload {
        key: String,
        source: object_store::Error,
    },

    /// Write attempted after the object was committed.
    #[snafu(display("Stream for {key} is already closed"))]
    StreamClosed { key: String },

    /// Buffer lock error (mutex poisoned).
    #[snafu(display("Buffer lock failed: mutex poisoned"))]
    BufferLock,

    /// Committing a multipart upload (or finishing its codec) failed and the
    /// upload was aborted. The object is lost; closing again cannot recover it.
    #[snafu(display("Commit of {key} failed and its upload was aborted"))]
    CommitAborted {
        key: String,
        source: Box<StreamError>,
    },
}

impl StreamError {
    /// Whether closing the stream again can still commit the object.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            StreamError::CommitAborted { .. } | StreamError::StreamClosed { .. }
        )
    }
}

// ============ Storage Errors ============

/// Errors that can occur while constructing a storage backend.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error"))]
    Io { source: std::io::Error },

    /// Rendered key would be rewritten when converted to an object path.
    #[snafu(display("Object key '{key}' is not a valid object path"))]
    InvalidKey { key: String },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error"))]
    S3Config { source: object_store::Error },
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Storage URL is empty.
    #[snafu(display("Storage URL cannot be empty"))]
    EmptyStorageUrl,

    /// Multipart part size must be positive.
    #[snafu(display("Part size must be at least 1 MB"))]
    InvalidPartSize,

    /// Part size is below the smallest non-final part S3 accepts.
    #[snafu(display("Part size {part_size_mb} MB is below the {minimum} MB S3 multipart minimum"))]
    PartSizeBelowMinimum { part_size_mb: usize, minimum: usize },

    /// Output field projection is empty.
    #[snafu(display("Output must have at least one field"))]
    EmptyFields,

    /// A key template failed to compile.
    #[snafu(display("Invalid {which} template '{template}'"))]
    KeyTemplate {
        which: &'static str,
        template: String,
        source: TemplateError,
    },

    /// Format kind is not one of the supported kinds.
    #[snafu(display("Unsupported format type '{value}'"))]
    UnsupportedFormat { value: String },

    /// Compression kind is not one of the supported kinds.
    #[snafu(display("Unsupported compression type '{value}'"))]
    UnsupportedCompression { value: String },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Writer Errors ============

/// A partition whose stream could not be committed during `close_all`.
#[derive(Debug)]
pub struct CloseFailure {
    pub partition: PartitionKey,
    pub error: StreamError,
}

/// Errors surfaced by the writer facade.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WriterError {
    /// Writer configuration is invalid.
    #[snafu(display("Invalid writer configuration"))]
    InvalidConfig { source: ConfigError },

    /// Storage backend could not be constructed.
    #[snafu(display("Storage backend unavailable"))]
    WriterStorage { source: StorageError },

    /// Object key could not be rendered for a new stream.
    #[snafu(display("Failed to render object key for {partition}"))]
    RenderKey {
        partition: PartitionKey,
        source: TemplateError,
    },

    /// The rendered object key could not be opened as a stream.
    #[snafu(display("Failed to open stream for {partition}"))]
    OpenStream {
        partition: PartitionKey,
        source: StorageError,
    },

    /// Writing a record failed; the partition's current object was abandoned.
    #[snafu(display("Failed to write record to {partition}"))]
    Write {
        partition: PartitionKey,
        source: StreamError,
    },

    /// Committing a partition's object failed. The stream is kept for retry
    /// unless the error is not retryable, in which case its upload was aborted
    /// and the stream dropped.
    #[snafu(display("Failed to close stream for {partition}"))]
    Close {
        partition: PartitionKey,
        source: StreamError,
    },

    /// One or more streams failed to commit during `close_all`.
    ///
    /// Failed streams stay registered unless their upload was aborted.
    #[snafu(display(
        "Failed to close {} partition stream(s): {}",
        failures.len(),
        failures.iter().map(|f| f.partition.to_string()).collect::<Vec<_>>().join(", ")
    ))]
    CloseAll { failures: Vec<CloseFailure> },
}

impl WriterError {
    /// The template error behind this failure, if the failure is a render error.
    pub fn as_template_error(&self) -> Option<&TemplateError> {
        match self {
            WriterError::RenderKey { source, .. } => Some(source),
            WriterError::InvalidConfig {
                source: ConfigError::KeyTemplate { source, .. },
            } => Some(source),
            _ => None,
        }
    }
}
