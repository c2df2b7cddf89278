//! Comma-separated record lines.

use std::io::{self, Write};

use super::{FormatKind, OutputField, RecordEncoder, ValueEncoding, encode_header_value};
use crate::record::Record;

/// Writes the configured fields separated by commas, one record per line.
///
/// Fields are not quoted; keys and unencoded values containing commas or
/// newlines are written as-is.
#[derive(Debug, Clone)]
pub struct CsvEncoder {
    fields: Vec<OutputField>,
    value_encoding: ValueEncoding,
}

impl CsvEncoder {
    pub fn new(fields: Vec<OutputField>, value_encoding: ValueEncoding) -> Self {
        Self {
            fields,
            value_encoding,
        }
    }

    fn field(&self, record: &Record, field: OutputField) -> String {
        match field {
            OutputField::Key => record
                .key
                .as_deref()
                .map(|k| String::from_utf8_lossy(k).into_owned())
                .unwrap_or_default(),
            OutputField::Value => record
                .value
                .as_deref()
                .map(|v| self.value_encoding.encode(v))
                .unwrap_or_default(),
            OutputField::Offset => record.offset.to_string(),
            OutputField::Timestamp => record
                .timestamp_millis()
                .map(|ms| ms.to_string())
                .unwrap_or_default(),
            OutputField::Headers => record
                .headers
                .iter()
                .map(|h| format!("{}:{}", h.name, encode_header_value(h.value.as_deref())))
                .collect::<Vec<_>>()
                .join(";"),
        }
    }
}

impl RecordEncoder for CsvEncoder {
    fn write_record(&self, record: &Record, out: &mut dyn Write) -> io::Result<()> {
        let line = self
            .fields
            .iter()
            .map(|field| self.field(record, *field))
            .collect::<Vec<_>>()
            .join(",");
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")
    }

    fn kind(&self) -> FormatKind {
        FormatKind::Csv
    }
}
