//! Buffered object output stream with lazy multipart upload.
//!
//! Bytes accumulate in a shared in-memory buffer. `flush` uploads every full
//! part, starting a multipart upload the first time one is needed. `close`
//! either PUTs the whole buffer as a single object or uploads the remainder
//! as a final part and completes the upload.
//!
//! Buffered bytes are only dropped once the store has acknowledged them, so a
//! failed single-object `close` can be retried without losing data. A failed
//! multipart commit cannot be retried: part numbers are assigned as parts are
//! sent, so the upload is aborted and the close reports
//! [`StreamError::CommitAborted`].

use bytes::{Bytes, BytesMut};
use object_store::path::Path;
use object_store::{MultipartUpload, ObjectStore, PutPayload};
use snafu::prelude::*;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, warn};

use crate::emit;
use crate::error::{
    BufferLockSnafu, StreamClosedSnafu, StreamError, StreamIoSnafu, UploadSnafu,
};
use crate::metrics::events::{
    MultipartUploadAborted, MultipartUploadCompleted, ObjectCommitted, RequestStatus,
    StorageOperation, StorageRequest, StorageRequestDuration,
};

#[derive(Debug, Default)]
struct BufferState {
    bytes: BytesMut,
    total: u64,
}

/// Shared byte buffer that codecs write into and the stream drains.
///
/// Cloning shares the underlying storage.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    state: Arc<Mutex<BufferState>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BufferState>, StreamError> {
        self.state.lock().map_err(|_| BufferLockSnafu.build())
    }

    /// Bytes currently held and not yet acknowledged by the store.
    pub fn len(&self) -> Result<usize, StreamError> {
        Ok(self.lock()?.bytes.len())
    }

    pub fn is_empty(&self) -> Result<bool, StreamError> {
        Ok(self.len()? == 0)
    }

    /// Total bytes ever written into the buffer.
    pub fn total_written(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .total
    }

    /// Copy of the first `len` buffered bytes (or all, if fewer are held).
    pub fn peek(&self, len: usize) -> Result<Bytes, StreamError> {
        let state = self.lock()?;
        let len = len.min(state.bytes.len());
        Ok(Bytes::copy_from_slice(&state.bytes[..len]))
    }

    /// Drop the first `len` bytes after the store acknowledged them.
    pub fn consume(&self, len: usize) -> Result<(), StreamError> {
        let mut state = self.lock()?;
        let len = len.min(state.bytes.len());
        let _ = state.bytes.split_to(len);
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StreamError> {
        self.lock()?.bytes.clear();
        Ok(())
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::other("buffer mutex poisoned"))?;
        state.bytes.extend_from_slice(buf);
        state.total += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Open,
    Committed,
    Aborted,
}

/// Output stream bound to one object key.
pub struct ObjectOutputStream {
    store: Arc<dyn ObjectStore>,
    location: Path,
    key: String,
    buffer: SharedBuffer,
    upload: Option<Box<dyn MultipartUpload>>,
    part_size: usize,
    parts: usize,
    state: StreamState,
}

impl std::fmt::Debug for ObjectOutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectOutputStream")
            .field("key", &self.key)
            .field("location", &self.location)
            .field("part_size", &self.part_size)
            .field("parts", &self.parts)
            .field("state", &self.state)
            .finish()
    }
}

impl ObjectOutputStream {
    /// Create a stream that writes `location` in `store`.
    ///
    /// Nothing is sent to the store until the first full part or close.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        location: Path,
        key: impl Into<String>,
        part_size: usize,
    ) -> Self {
        Self {
            store,
            location,
            key: key.into(),
            buffer: SharedBuffer::new(),
            upload: None,
            part_size: part_size.max(1),
            parts: 0,
            state: StreamState::Open,
        }
    }

    /// Writer handle onto the stream's buffer, for codecs to write into.
    pub fn sink(&self) -> SharedBuffer {
        self.buffer.clone()
    }

    /// The object key as rendered from the templates.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Fully qualified location in the store.
    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn bytes_written(&self) -> u64 {
        self.buffer.total_written()
    }

    /// Parts uploaded so far.
    pub fn parts_uploaded(&self) -> usize {
        self.parts
    }

    /// Whether the object was committed or the upload abandoned.
    pub fn is_closed(&self) -> bool {
        self.state != StreamState::Open
    }

    /// Whether the upload was abandoned without committing.
    pub fn is_aborted(&self) -> bool {
        self.state == StreamState::Aborted
    }

    fn ensure_open(&self) -> Result<(), StreamError> {
        ensure!(
            self.state == StreamState::Open,
            StreamClosedSnafu { key: &self.key }
        );
        Ok(())
    }

    /// Append raw bytes to the buffer.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        self.ensure_open()?;
        let mut sink = self.buffer.clone();
        sink.write_all(bytes).context(StreamIoSnafu)?;
        Ok(())
    }

    /// Upload every full part currently buffered.
    pub async fn flush(&mut self) -> Result<(), StreamError> {
        self.ensure_open()?;
        while self.buffer.len()? >= self.part_size {
            let part = self.buffer.peek(self.part_size)?;
            self.put_part(part).await?;
            self.buffer.consume(self.part_size)?;
        }
        Ok(())
    }

    /// Commit the object. Calling close on a committed stream is a no-op.
    ///
    /// A failed single PUT leaves the stream open for another close. A failed
    /// multipart commit aborts the upload and returns
    /// [`StreamError::CommitAborted`].
    pub async fn close(&mut self) -> Result<(), StreamError> {
        match self.state {
            StreamState::Committed => return Ok(()),
            StreamState::Aborted => return StreamClosedSnafu { key: &self.key }.fail(),
            StreamState::Open => {}
        }

        let multipart = self.upload.is_some();
        if multipart {
            if let Err(error) = self.finish_multipart().await {
                return Err(self.abort_with(error).await);
            }
        } else {
            let remaining = self.buffer.peek(usize::MAX)?;
            self.put_single(remaining).await?;
            self.buffer.clear()?;
        }

        self.state = StreamState::Committed;
        emit!(ObjectCommitted {
            bytes: self.bytes_written(),
            multipart,
        });
        debug!(
            key = %self.key,
            bytes = self.bytes_written(),
            parts = self.parts,
            "Object committed"
        );
        Ok(())
    }

    /// Abandon the object, aborting any in-progress multipart upload.
    ///
    /// Nothing becomes visible at the key. Further writes are rejected.
    pub async fn abort(&mut self) -> Result<(), StreamError> {
        if self.state != StreamState::Open {
            return Ok(());
        }
        self.state = StreamState::Aborted;
        self.buffer.clear()?;

        if let Some(mut upload) = self.upload.take() {
            let start = Instant::now();
            let result = upload.abort().await;
            emit_request(StorageOperation::AbortMultipart, &result, start);
            result.context(UploadSnafu { key: &self.key })?;
            emit!(MultipartUploadAborted);
            debug!(key = %self.key, parts = self.parts, "Multipart upload aborted");
        }
        Ok(())
    }

    /// Abort after `error` left the object uncommittable.
    pub(crate) async fn abort_with(&mut self, error: StreamError) -> StreamError {
        warn!(key = %self.key, error = %error, "Commit failed, aborting upload");
        if let Err(abort_error) = self.abort().await {
            warn!(key = %self.key, error = %abort_error, "Failed to abort upload");
        }
        StreamError::CommitAborted {
            key: self.key.clone(),
            source: Box::new(error),
        }
    }

    async fn finish_multipart(&mut self) -> Result<(), StreamError> {
        let remaining = self.buffer.peek(usize::MAX)?;
        if !remaining.is_empty() {
            let len = remaining.len();
            self.put_part(remaining).await?;
            self.buffer.consume(len)?;
        }
        self.complete().await
    }

    async fn put_single(&self, bytes: Bytes) -> Result<(), StreamError> {
        let start = Instant::now();
        let result = self
            .store
            .put(&self.location, PutPayload::from(bytes))
            .await;
        emit_request(StorageOperation::Put, &result, start);
        result.context(UploadSnafu { key: &self.key })?;
        Ok(())
    }

    async fn put_part(&mut self, part: Bytes) -> Result<(), StreamError> {
        let mut upload = match self.upload.take() {
            Some(upload) => upload,
            None => self.start_multipart().await?,
        };

        let start = Instant::now();
        let result = upload.put_part(PutPayload::from(part)).await;
        emit_request(StorageOperation::PutPart, &result, start);
        self.upload = Some(upload);

        result.context(UploadSnafu { key: &self.key })?;
        self.parts += 1;
        debug!(key = %self.key, part = self.parts, "Uploaded part");
        Ok(())
    }

    async fn start_multipart(&self) -> Result<Box<dyn MultipartUpload>, StreamError> {
        let start = Instant::now();
        let result = self.store.put_multipart(&self.location).await;
        emit_request(StorageOperation::CreateMultipart, &result, start);
        let upload = result.context(UploadSnafu { key: &self.key })?;
        debug!(key = %self.key, "Started multipart upload");
        Ok(upload)
    }

    async fn complete(&mut self) -> Result<(), StreamError> {
        let Some(mut upload) = self.upload.take() else {
            return Ok(());
        };

        let start = Instant::now();
        let result = upload.complete().await;
        emit_request(StorageOperation::CompleteMultipart, &result, start);
        if result.is_err() {
            self.upload = Some(upload);
        }

        result.context(UploadSnafu { key: &self.key })?;
        emit!(MultipartUploadCompleted { parts: self.parts });
        Ok(())
    }
}

fn emit_request<T, E>(operation: StorageOperation, result: &Result<T, E>, start: Instant) {
    emit!(StorageRequest {
        operation,
        status: RequestStatus::of(result),
    });
    emit!(StorageRequestDuration {
        operation,
        duration: start.elapsed(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::FlakyStore;
    use object_store::memory::InMemory;

    fn stream(store: &Arc<InMemory>, key: &str, part_size: usize) -> ObjectOutputStream {
        ObjectOutputStream::new(store.clone(), Path::from(key), key, part_size)
    }

    async fn read(store: &InMemory, key: &str) -> Option<Bytes> {
        match store.get(&Path::from(key)).await {
            Ok(result) => Some(result.bytes().await.unwrap()),
            Err(object_store::Error::NotFound { .. }) => None,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn test_shared_buffer_peek_consume() {
        let mut buffer = SharedBuffer::new();
        buffer.write_all(b"abcdef").unwrap();

        assert_eq!(buffer.peek(4).unwrap().as_ref(), b"abcd");
        buffer.consume(4).unwrap();
        assert_eq!(buffer.peek(usize::MAX).unwrap().as_ref(), b"ef");
        assert_eq!(buffer.total_written(), 6);
    }

    #[tokio::test]
    async fn test_small_object_uses_single_put() {
        let store = Arc::new(InMemory::new());
        let mut out = stream(&store, "a/b", 1024);

        out.write(b"hello").unwrap();
        out.flush().await.unwrap();
        assert!(read(&store, "a/b").await.is_none(), "not visible before close");

        out.close().await.unwrap();
        assert_eq!(read(&store, "a/b").await.unwrap().as_ref(), b"hello");
        assert_eq!(out.parts_uploaded(), 0);
    }

    #[tokio::test]
    async fn test_empty_close_commits_empty_object() {
        let store = Arc::new(InMemory::new());
        let mut out = stream(&store, "empty", 1024);

        out.close().await.unwrap();
        assert_eq!(read(&store, "empty").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_flush_uploads_full_parts() {
        let store = Arc::new(InMemory::new());
        let mut out = stream(&store, "multi", 4);

        out.write(b"0123456789").unwrap();
        out.flush().await.unwrap();
        assert_eq!(out.parts_uploaded(), 2);
        assert_eq!(out.buffer.len().unwrap(), 2);
        assert!(read(&store, "multi").await.is_none());

        out.close().await.unwrap();
        assert_eq!(out.parts_uploaded(), 3);
        assert_eq!(read(&store, "multi").await.unwrap().as_ref(), b"0123456789");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let store = Arc::new(InMemory::new());
        let mut out = stream(&store, "once", 1024);

        out.write(b"x").unwrap();
        out.close().await.unwrap();
        out.close().await.unwrap();
        assert!(out.is_closed());
        assert!(matches!(
            out.write(b"y"),
            Err(StreamError::StreamClosed { .. })
        ));
        assert_eq!(read(&store, "once").await.unwrap().as_ref(), b"x");
    }

    #[tokio::test]
    async fn test_abort_leaves_nothing_visible() {
        let store = Arc::new(InMemory::new());
        let mut out = stream(&store, "gone", 2);

        out.write(b"abcdef").unwrap();
        out.flush().await.unwrap();
        out.abort().await.unwrap();

        assert!(read(&store, "gone").await.is_none());
        assert!(matches!(
            out.close().await,
            Err(StreamError::StreamClosed { .. })
        ));
    }

    fn flaky_stream(store: &Arc<FlakyStore>, key: &str, part_size: usize) -> ObjectOutputStream {
        ObjectOutputStream::new(store.clone(), Path::from(key), key, part_size)
    }

    #[tokio::test]
    async fn test_failed_single_put_is_retryable() {
        let store = Arc::new(FlakyStore::new());
        let mut out = flaky_stream(&store, "retry", 1024);
        out.write(b"payload").unwrap();

        store.fail_puts(1);
        let err = out.close().await.unwrap_err();
        assert!(matches!(err, StreamError::Upload { .. }));
        assert!(err.is_retryable());
        assert!(!out.is_closed());
        assert_eq!(out.buffer.len().unwrap(), 7);

        out.close().await.unwrap();
        assert!(store.exists("retry").await);
        assert_eq!(store.aborts(), 0);
    }

    #[tokio::test]
    async fn test_failed_final_part_aborts_upload() {
        let store = Arc::new(FlakyStore::new());
        let mut out = flaky_stream(&store, "parts", 4);
        out.write(b"0123456789").unwrap();
        out.flush().await.unwrap();
        assert_eq!(out.parts_uploaded(), 2);

        store.fail_parts(1);
        let err = out.close().await.unwrap_err();
        assert!(matches!(err, StreamError::CommitAborted { .. }));
        assert!(!err.is_retryable());
        assert!(out.is_aborted());
        assert_eq!(store.aborts(), 1);
        assert!(!store.exists("parts").await);

        // The upload is gone; a second close cannot resurrect it.
        assert!(matches!(
            out.close().await,
            Err(StreamError::StreamClosed { .. })
        ));
        assert_eq!(store.aborts(), 1);
    }

    #[tokio::test]
    async fn test_failed_complete_aborts_upload() {
        let store = Arc::new(FlakyStore::new());
        let mut out = flaky_stream(&store, "complete", 4);
        out.write(b"01234567").unwrap();
        out.flush().await.unwrap();

        store.fail_completes(1);
        let err = out.close().await.unwrap_err();
        assert!(matches!(err, StreamError::CommitAborted { .. }));
        assert!(out.is_aborted());
        assert_eq!(store.aborts(), 1);
        assert!(!store.exists("complete").await);
    }
}
