//! Writer facade.
//!
//! [`StreamWriter`] routes records to one object per partition. Each call
//! completes its store I/O before returning; the writer is driven by a single
//! owner through `&mut self`.

use chrono::Utc;
use object_store::ObjectStore;
use snafu::prelude::*;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::WriterConfig;
use crate::emit;
use crate::error::{
    CloseSnafu, InvalidConfigSnafu, StreamError, WriteSnafu, WriterError, WriterStorageSnafu,
};
use crate::format::{RecordEncoder, encoder_for};
use crate::metrics::events::{BytesWritten, RecordsWritten};
use crate::record::{PartitionKey, Record};
use crate::registry::{ClosedObject, StreamEntry, StreamFactory, StreamRegistry};
use crate::storage::StorageProvider;
use crate::template::Clock;

/// Partitioned streaming object writer.
pub struct StreamWriter {
    registry: StreamRegistry,
    encoder: Box<dyn RecordEncoder>,
}

impl StreamWriter {
    /// Build a writer, constructing the storage backend named by the config.
    pub async fn new(config: &WriterConfig) -> Result<Self, WriterError> {
        config.validate().context(InvalidConfigSnafu)?;
        let storage = StorageProvider::for_config(&config.storage)
            .await
            .context(WriterStorageSnafu)?;
        info!(url = %storage.canonical_url(), "Writer storage configured");
        Self::with_storage(config, storage)
    }

    /// Build a writer over an existing store; the config's storage URL is not used
    /// to pick a backend.
    pub fn with_store(
        config: &WriterConfig,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self, WriterError> {
        config.validate().context(InvalidConfigSnafu)?;
        Self::with_storage(config, StorageProvider::from_object_store(store))
    }

    fn with_storage(config: &WriterConfig, storage: StorageProvider) -> Result<Self, WriterError> {
        let output = &config.output;
        let prefix = output.prefix_template().context(InvalidConfigSnafu)?;
        let file_name = output.file_name_template().context(InvalidConfigSnafu)?;
        let clock: Clock = Arc::new(Utc::now);

        let factory = StreamFactory::new(
            storage,
            prefix,
            file_name,
            output.compression,
            output.timestamp_source,
            clock,
            config.storage.part_size_bytes(),
        );

        Ok(Self {
            registry: StreamRegistry::new(factory),
            encoder: encoder_for(output),
        })
    }

    /// Replace the clock used for wall-clock template variables.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.registry.factory_mut().set_clock(clock);
        self
    }

    /// Encode `record` into the stream for `partition`, opening one if needed,
    /// then upload any full parts.
    ///
    /// If encoding or uploading fails, the partition's current object is
    /// abandoned and the next write starts a new one.
    pub async fn write(
        &mut self,
        partition: &PartitionKey,
        record: &Record,
    ) -> Result<(), WriterError> {
        let entry = self.registry.get_or_create(partition, record)?;
        let before = entry.bytes_written();

        match append(self.encoder.as_ref(), entry, record).await {
            Ok(()) => {
                emit!(RecordsWritten {
                    topic: partition.topic.clone(),
                    count: 1,
                });
                emit!(BytesWritten {
                    bytes: entry.bytes_written().saturating_sub(before),
                });
                Ok(())
            }
            Err(source) => {
                warn!(
                    %partition,
                    offset = record.offset,
                    error = %source,
                    "Write failed, abandoning stream"
                );
                if let Err(e) = self.registry.abandon(partition).await {
                    warn!(%partition, error = %e, "Failed to abort upload");
                }
                Err(source).context(WriteSnafu {
                    partition: partition.clone(),
                })
            }
        }
    }

    /// Finalize the partition's current object. The next write starts a new
    /// object with a freshly rendered key.
    pub async fn flush(
        &mut self,
        partition: &PartitionKey,
    ) -> Result<Option<ClosedObject>, WriterError> {
        let closed = self.close_and_remove(partition).await?;
        if let Some(object) = &closed {
            debug!(
                %partition,
                key = %object.key,
                records = object.records,
                bytes = object.bytes,
                "Flushed stream"
            );
        }
        Ok(closed)
    }

    /// Finalize the partition's object because the partition is no longer
    /// assigned to this writer. A partition with no open stream is a no-op.
    pub async fn close(
        &mut self,
        partition: &PartitionKey,
    ) -> Result<Option<ClosedObject>, WriterError> {
        let closed = self.close_and_remove(partition).await?;
        if let Some(object) = &closed {
            info!(
                %partition,
                key = %object.key,
                records = object.records,
                bytes = object.bytes,
                "Closed stream"
            );
        }
        Ok(closed)
    }

    /// Finalize every open stream, reporting every failure together.
    pub async fn close_all(&mut self) -> Result<Vec<ClosedObject>, WriterError> {
        let open = self.registry.len();
        let closed = self.registry.close_all().await?;
        if open > 0 {
            info!(streams = closed.len(), "Closed all streams");
        }
        Ok(closed)
    }

    async fn close_and_remove(
        &mut self,
        partition: &PartitionKey,
    ) -> Result<Option<ClosedObject>, WriterError> {
        self.registry
            .close_and_remove(partition)
            .await
            .context(CloseSnafu {
                partition: partition.clone(),
            })
    }

    /// The open stream for `partition`, if any.
    pub fn stream(&self, partition: &PartitionKey) -> Option<&StreamEntry> {
        self.registry.get(partition)
    }

    pub fn open_streams(&self) -> usize {
        self.registry.len()
    }

    pub fn storage(&self) -> &StorageProvider {
        self.registry.factory().storage()
    }
}

async fn append(
    encoder: &dyn RecordEncoder,
    entry: &mut StreamEntry,
    record: &Record,
) -> Result<(), StreamError> {
    encoder
        .write_record(record, &mut entry.stream)
        .map_err(|source| StreamError::StreamIo { source })?;
    entry.stream.flush().await?;
    entry.record_written();
    Ok(())
}
