//! Record encoders.
//!
//! An encoder turns one [`Record`] into one line of output. The encoder is
//! chosen once per writer from [`FormatKind`] and shared by every stream.

mod csv;
mod jsonl;

pub use csv::CsvEncoder;
pub use jsonl::JsonlEncoder;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::str::FromStr;

use crate::config::OutputConfig;
use crate::error::{ConfigError, UnsupportedFormatSnafu};
use crate::record::Record;

/// Serializes records onto an output stream.
pub trait RecordEncoder: Send + Sync {
    /// Write one encoded record, including its line terminator.
    fn write_record(&self, record: &Record, out: &mut dyn Write) -> io::Result<()>;

    fn kind(&self) -> FormatKind;
}

/// Output line format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    /// Comma-separated fields.
    #[default]
    Csv,
    /// One JSON object per line.
    Jsonl,
}

impl FromStr for FormatKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(FormatKind::Csv),
            "jsonl" | "json" => Ok(FormatKind::Jsonl),
            _ => UnsupportedFormatSnafu { value: s }.fail(),
        }
    }
}

/// A record field included in the output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputField {
    Key,
    Value,
    Offset,
    Timestamp,
    Headers,
}

impl OutputField {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputField::Key => "key",
            OutputField::Value => "value",
            OutputField::Offset => "offset",
            OutputField::Timestamp => "timestamp",
            OutputField::Headers => "headers",
        }
    }
}

/// How record values are rendered as text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValueEncoding {
    #[default]
    Base64,
    /// Raw bytes, lossily decoded as UTF-8.
    None,
}

impl ValueEncoding {
    pub fn encode(&self, bytes: &[u8]) -> String {
        match self {
            ValueEncoding::Base64 => STANDARD.encode(bytes),
            ValueEncoding::None => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

/// Build the encoder described by the output section of the config.
pub fn encoder_for(output: &OutputConfig) -> Box<dyn RecordEncoder> {
    let fields = output.fields.clone();
    match output.format {
        FormatKind::Csv => Box::new(CsvEncoder::new(fields, output.value_encoding)),
        FormatKind::Jsonl => Box::new(JsonlEncoder::new(fields, output.value_encoding)),
    }
}

/// Header values are always base64, whatever the value encoding.
fn encode_header_value(value: Option<&[u8]>) -> String {
    value.map(|v| STANDARD.encode(v)).unwrap_or_default()
}
