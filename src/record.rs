//! Inbound record and partition identity types.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;

/// Identifies one logical output stream: a topic name plus a partition number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub topic: String,
    pub partition: u32,
}

impl PartitionKey {
    pub fn new(topic: impl Into<String>, partition: u32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// A single record header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: Option<Bytes>,
}

/// One inbound message, immutable once received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: u32,
    /// Position within the partition, starting at 0.
    pub offset: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<Header>,
}

impl Record {
    /// Create a record with no timestamp, key or headers.
    pub fn new(
        topic: impl Into<String>,
        partition: u32,
        offset: u64,
        value: impl Into<Bytes>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            timestamp: None,
            key: None,
            value: Some(value.into()),
            headers: Vec::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: Option<Bytes>) -> Self {
        self.headers.push(Header {
            name: name.into(),
            value,
        });
        self
    }

    /// The partition this record belongs to.
    pub fn partition_key(&self) -> PartitionKey {
        PartitionKey::new(self.topic.clone(), self.partition)
    }

    /// Timestamp as milliseconds since the Unix epoch.
    pub fn timestamp_millis(&self) -> Option<i64> {
        self.timestamp.map(|ts| ts.timestamp_millis())
    }
}
