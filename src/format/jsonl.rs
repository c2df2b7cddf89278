//! JSON lines output.

use serde_json::{Map, Value, json};
use std::io::{self, Write};

use super::{FormatKind, OutputField, RecordEncoder, ValueEncoding, encode_header_value};
use crate::record::Record;

/// Writes one JSON object per record with the configured fields as members.
#[derive(Debug, Clone)]
pub struct JsonlEncoder {
    fields: Vec<OutputField>,
    value_encoding: ValueEncoding,
}

impl JsonlEncoder {
    pub fn new(fields: Vec<OutputField>, value_encoding: ValueEncoding) -> Self {
        Self {
            fields,
            value_encoding,
        }
    }

    fn field(&self, record: &Record, field: OutputField) -> Value {
        match field {
            OutputField::Key => record
                .key
                .as_deref()
                .map(|k| Value::String(String::from_utf8_lossy(k).into_owned()))
                .unwrap_or(Value::Null),
            OutputField::Value => record
                .value
                .as_deref()
                .map(|v| Value::String(self.value_encoding.encode(v)))
                .unwrap_or(Value::Null),
            OutputField::Offset => json!(record.offset),
            OutputField::Timestamp => record
                .timestamp_millis()
                .map(|ms| json!(ms))
                .unwrap_or(Value::Null),
            OutputField::Headers => Value::Array(
                record
                    .headers
                    .iter()
                    .map(|h| {
                        json!({
                            "key": h.name,
                            "value": encode_header_value(h.value.as_deref()),
                        })
                    })
                    .collect(),
            ),
        }
    }
}

impl RecordEncoder for JsonlEncoder {
    fn write_record(&self, record: &Record, out: &mut dyn Write) -> io::Result<()> {
        let object: Map<String, Value> = self
            .fields
            .iter()
            .map(|field| (field.as_str().to_string(), self.field(record, *field)))
            .collect();
        serde_json::to_writer(&mut *out, &object)?;
        out.write_all(b"\n")
    }

    fn kind(&self) -> FormatKind {
        FormatKind::Jsonl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};

    fn encode(encoder: &JsonlEncoder, record: &Record) -> Value {
        let mut out = Vec::new();
        encoder.write_record(record, &mut out).unwrap();
        assert_eq!(out.last(), Some(&b'\n'));
        serde_json::from_slice(&out).unwrap()
    }

    #[test]
    fn test_value_only() {
        let encoder = JsonlEncoder::new(vec![OutputField::Value], ValueEncoding::Base64);
        let record = Record::new("orders", 0, 10, "hello");
        assert_eq!(encode(&encoder, &record), json!({"value": "aGVsbG8="}));
    }

    #[test]
    fn test_all_fields() {
        let encoder = JsonlEncoder::new(
            vec![
                OutputField::Key,
                OutputField::Value,
                OutputField::Offset,
                OutputField::Timestamp,
                OutputField::Headers,
            ],
            ValueEncoding::None,
        );
        let record = Record::new("orders", 2, 5, "{\"id\":1}")
            .with_timestamp(Utc.timestamp_millis_opt(1_000).unwrap())
            .with_header("h", Some(Bytes::from_static(b"v")));

        assert_eq!(
            encode(&encoder, &record),
            json!({
                "key": null,
                "value": "{\"id\":1}",
                "offset": 5,
                "timestamp": 1000,
                "headers": [{"key": "h", "value": "dg=="}],
            })
        );
    }
}
