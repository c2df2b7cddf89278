//! Partition stream registry.
//!
//! Maps each [`PartitionKey`] to at most one open [`StreamEntry`]. Entries are
//! created lazily from the first record routed to a partition; that record
//! fixes the object key for the life of the entry.

use snafu::prelude::*;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use tracing::{debug, warn};

use crate::compression::{self, CompressedStream, CompressionKind};
use crate::emit;
use crate::error::{
    CloseFailure, OpenStreamSnafu, StreamError, TemplateError, WriteSnafu, WriterError,
};
use crate::metrics::events::{KeyRenderFailed, OpenStreams, StreamAbandoned};
use crate::record::{PartitionKey, Record};
use crate::storage::StorageProvider;
use crate::template::{Clock, KeyTemplate, TimestampSource, record_context};

/// One open output stream and its diagnostics.
#[derive(Debug)]
pub struct StreamEntry {
    pub(crate) stream: CompressedStream,
    key: String,
    start_offset: u64,
    records: u64,
}

impl StreamEntry {
    /// Object key, fixed when the entry was created.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Offset of the first record written to this stream.
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    /// Encoded (post-compression) bytes produced so far.
    pub fn bytes_written(&self) -> u64 {
        self.stream.bytes_written()
    }

    pub(crate) fn record_written(&mut self) {
        self.records += 1;
    }

    fn into_closed(self, partition: PartitionKey) -> ClosedObject {
        ClosedObject {
            partition,
            bytes: self.bytes_written(),
            key: self.key,
            start_offset: self.start_offset,
            records: self.records,
        }
    }
}

/// Summary of an object committed to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedObject {
    pub partition: PartitionKey,
    pub key: String,
    pub start_offset: u64,
    pub records: u64,
    pub bytes: u64,
}

/// Builds new stream entries: renders the key and opens a compressed stream.
pub struct StreamFactory {
    storage: StorageProvider,
    prefix: KeyTemplate,
    file_name: KeyTemplate,
    compression: CompressionKind,
    timestamp_source: TimestampSource,
    clock: Clock,
    part_size: usize,
}

impl StreamFactory {
    pub fn new(
        storage: StorageProvider,
        prefix: KeyTemplate,
        file_name: KeyTemplate,
        compression: CompressionKind,
        timestamp_source: TimestampSource,
        clock: Clock,
        part_size: usize,
    ) -> Self {
        Self {
            storage,
            prefix,
            file_name,
            compression,
            timestamp_source,
            clock,
            part_size,
        }
    }

    pub fn set_clock(&mut self, clock: Clock) {
        self.clock = clock;
    }

    pub fn storage(&self) -> &StorageProvider {
        &self.storage
    }

    /// Render `<prefix><file name><extension>` for a stream whose first record is `record`.
    pub fn object_key(&self, record: &Record) -> Result<String, TemplateError> {
        let context = record_context(record, self.timestamp_source, &self.clock);
        let mut key = self.prefix.render(&context)?;
        key.push_str(&self.file_name.render(&context)?);
        key.push_str(self.compression.extension());
        Ok(key)
    }

    fn open(&self, partition: &PartitionKey, record: &Record) -> Result<StreamEntry, WriterError> {
        let key = self.object_key(record).map_err(|source| {
            emit!(KeyRenderFailed);
            WriterError::RenderKey {
                partition: partition.clone(),
                source,
            }
        })?;

        let output = self
            .storage
            .open(&key, self.part_size)
            .context(OpenStreamSnafu {
                partition: partition.clone(),
            })?;
        let stream = compression::wrap(output, self.compression).context(WriteSnafu {
            partition: partition.clone(),
        })?;

        debug!(
            %partition,
            key = %key,
            start_offset = record.offset,
            compression = self.compression.as_str(),
            "Opened stream"
        );

        Ok(StreamEntry {
            stream,
            key,
            start_offset: record.offset,
            records: 0,
        })
    }
}

/// Partition → open stream map owned by one writer.
pub struct StreamRegistry {
    factory: StreamFactory,
    streams: HashMap<PartitionKey, StreamEntry>,
}

impl StreamRegistry {
    pub fn new(factory: StreamFactory) -> Self {
        Self {
            factory,
            streams: HashMap::new(),
        }
    }

    pub fn factory(&self) -> &StreamFactory {
        &self.factory
    }

    pub(crate) fn factory_mut(&mut self) -> &mut StreamFactory {
        &mut self.factory
    }

    /// The open entry for `partition`, creating it from `record` if absent.
    pub fn get_or_create(
        &mut self,
        partition: &PartitionKey,
        record: &Record,
    ) -> Result<&mut StreamEntry, WriterError> {
        let open = self.streams.len();
        match self.streams.entry(partition.clone()) {
            Entry::Occupied(slot) => Ok(slot.into_mut()),
            Entry::Vacant(slot) => {
                let entry = self.factory.open(partition, record)?;
                emit!(OpenStreams { count: open + 1 });
                Ok(slot.insert(entry))
            }
        }
    }

    /// Close and remove the entry for `partition`.
    ///
    /// Absent partitions are a no-op. On a retryable failure the entry stays
    /// so the close can be retried; if the failure aborted the upload the
    /// entry is dropped, as with [`abandon`](Self::abandon).
    pub async fn close_and_remove(
        &mut self,
        partition: &PartitionKey,
    ) -> Result<Option<ClosedObject>, StreamError> {
        let Some(entry) = self.streams.get_mut(partition) else {
            return Ok(None);
        };
        if let Err(error) = entry.stream.close().await {
            if entry.stream.is_aborted() {
                self.streams.remove(partition);
                emit!(StreamAbandoned);
                emit!(OpenStreams {
                    count: self.streams.len()
                });
            }
            return Err(error);
        }

        let closed = self
            .streams
            .remove(partition)
            .map(|entry| entry.into_closed(partition.clone()));
        emit!(OpenStreams {
            count: self.streams.len()
        });
        Ok(closed)
    }

    /// Close every entry, removing the ones that committed.
    ///
    /// Every entry is attempted; failures are collected. Entries that failed
    /// with a retryable error stay registered, aborted ones are dropped.
    pub async fn close_all(&mut self) -> Result<Vec<ClosedObject>, WriterError> {
        let mut partitions: Vec<PartitionKey> = self.streams.keys().cloned().collect();
        partitions.sort();

        let mut closed = Vec::with_capacity(partitions.len());
        let mut failures = Vec::new();
        for partition in partitions {
            match self.close_and_remove(&partition).await {
                Ok(Some(object)) => closed.push(object),
                Ok(None) => {}
                Err(error) => {
                    warn!(
                        %partition,
                        error = %error,
                        retryable = error.is_retryable(),
                        "Failed to close stream"
                    );
                    failures.push(CloseFailure { partition, error });
                }
            }
        }

        if failures.is_empty() {
            Ok(closed)
        } else {
            Err(WriterError::CloseAll { failures })
        }
    }

    /// Drop the entry for `partition` without committing it.
    ///
    /// The entry is removed even if aborting the upload fails.
    pub async fn abandon(&mut self, partition: &PartitionKey) -> Result<(), StreamError> {
        let Some(mut entry) = self.streams.remove(partition) else {
            return Ok(());
        };
        emit!(StreamAbandoned);
        emit!(OpenStreams {
            count: self.streams.len()
        });
        entry.stream.abort().await
    }

    pub fn get(&self, partition: &PartitionKey) -> Option<&StreamEntry> {
        self.streams.get(partition)
    }

    pub fn contains(&self, partition: &PartitionKey) -> bool {
        self.streams.contains_key(partition)
    }

    pub fn partitions(&self) -> impl Iterator<Item = &PartitionKey> {
        self.streams.keys()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
