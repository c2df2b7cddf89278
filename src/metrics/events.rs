//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the writer.
//! Events implement the `InternalEvent` trait which emits the corresponding
//! Prometheus metric.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when a record is encoded into a partition stream.
pub struct RecordsWritten {
    pub topic: String,
    pub count: u64,
}

impl InternalEvent for RecordsWritten {
    fn emit(self) {
        trace!(topic = %self.topic, count = self.count, "Records written");
        counter!("flurry_records_written_total", "topic" => self.topic).increment(self.count);
    }
}

/// Event emitted when encoded bytes enter a stream buffer.
pub struct BytesWritten {
    pub bytes: u64,
}

impl InternalEvent for BytesWritten {
    fn emit(self) {
        trace!(bytes = self.bytes, "Bytes written");
        counter!("flurry_bytes_written_total").increment(self.bytes);
    }
}

/// Event emitted when an object becomes visible in the store.
pub struct ObjectCommitted {
    pub bytes: u64,
    pub multipart: bool,
}

impl InternalEvent for ObjectCommitted {
    fn emit(self) {
        let mode = if self.multipart { "multipart" } else { "single" };
        trace!(bytes = self.bytes, mode, "Object committed");
        counter!("flurry_objects_committed_total", "mode" => mode).increment(1);
        histogram!("flurry_object_size_bytes").record(self.bytes as f64);
    }
}

/// Event emitted when a partition stream is abandoned after a failed write.
pub struct StreamAbandoned;

impl InternalEvent for StreamAbandoned {
    fn emit(self) {
        trace!("Stream abandoned");
        counter!("flurry_streams_abandoned_total").increment(1);
    }
}

/// Event emitted when a key template fails to render for a new stream.
pub struct KeyRenderFailed;

impl InternalEvent for KeyRenderFailed {
    fn emit(self) {
        trace!("Key render failed");
        counter!("flurry_key_render_failures_total").increment(1);
    }
}

/// Event emitted when the number of open partition streams changes.
pub struct OpenStreams {
    pub count: usize,
}

impl InternalEvent for OpenStreams {
    fn emit(self) {
        trace!(count = self.count, "Open streams");
        gauge!("flurry_open_streams").set(self.count as f64);
    }
}

// ============================================================================
// Storage operation events
// ============================================================================

/// Storage operation types.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Put,
    CreateMultipart,
    PutPart,
    CompleteMultipart,
    AbortMultipart,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
            StorageOperation::CreateMultipart => "create_multipart",
            StorageOperation::PutPart => "put_part",
            StorageOperation::CompleteMultipart => "complete_multipart",
            StorageOperation::AbortMultipart => "abort_multipart",
        }
    }
}

/// Status of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    pub fn of<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            RequestStatus::Success
        } else {
            RequestStatus::Error
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted when a storage request completes.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "flurry_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted when a storage request completes with duration.
pub struct StorageRequestDuration {
    pub operation: StorageOperation,
    pub duration: Duration,
}

impl InternalEvent for StorageRequestDuration {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            duration_ms = self.duration.as_millis(),
            "Storage request duration"
        );
        histogram!(
            "flurry_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a multipart upload completes.
pub struct MultipartUploadCompleted {
    pub parts: usize,
}

impl InternalEvent for MultipartUploadCompleted {
    fn emit(self) {
        trace!(parts = self.parts, "Multipart upload completed");
        counter!("flurry_multipart_uploads_total", "outcome" => "completed").increment(1);
        histogram!("flurry_multipart_upload_parts").record(self.parts as f64);
    }
}

/// Event emitted when a multipart upload is aborted.
pub struct MultipartUploadAborted;

impl InternalEvent for MultipartUploadAborted {
    fn emit(self) {
        trace!("Multipart upload aborted");
        counter!("flurry_multipart_uploads_total", "outcome" => "aborted").increment(1);
    }
}
