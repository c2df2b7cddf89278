//! In-memory store with injectable request failures.

use async_trait::async_trait;
use futures::stream::BoxStream;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{
    GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, ObjectStore,
    PutMultipartOpts, PutOptions, PutPayload, PutResult, Result, UploadPart,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct Faults {
    puts: AtomicUsize,
    parts: AtomicUsize,
    completes: AtomicUsize,
    aborts: AtomicUsize,
}

/// Consume one pending failure from `counter`, if any.
fn take(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn injected() -> object_store::Error {
    object_store::Error::Generic {
        store: "FlakyStore",
        source: "injected failure".into(),
    }
}

/// [`InMemory`] whose next N single PUTs, part uploads or completes fail.
#[derive(Debug, Default)]
pub(crate) struct FlakyStore {
    inner: InMemory,
    faults: Arc<Faults>,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_puts(&self, n: usize) {
        self.faults.puts.store(n, Ordering::SeqCst);
    }

    pub(crate) fn fail_parts(&self, n: usize) {
        self.faults.parts.store(n, Ordering::SeqCst);
    }

    pub(crate) fn fail_completes(&self, n: usize) {
        self.faults.completes.store(n, Ordering::SeqCst);
    }

    /// Multipart uploads aborted so far.
    pub(crate) fn aborts(&self) -> usize {
        self.faults.aborts.load(Ordering::SeqCst)
    }

    /// Whether an object is visible at `key`.
    pub(crate) async fn exists(&self, key: &str) -> bool {
        self.inner.head(&Path::from(key)).await.is_ok()
    }
}

impl std::fmt::Display for FlakyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FlakyStore({})", self.inner)
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn put_opts(
        &self,
        location: &Path,
        payload: PutPayload,
        opts: PutOptions,
    ) -> Result<PutResult> {
        if take(&self.faults.puts) {
            return Err(injected());
        }
        self.inner.put_opts(location, payload, opts).await
    }

    async fn put_multipart_opts(
        &self,
        location: &Path,
        opts: PutMultipartOpts,
    ) -> Result<Box<dyn MultipartUpload>> {
        let inner = self.inner.put_multipart_opts(location, opts).await?;
        Ok(Box::new(FlakyUpload {
            inner,
            faults: self.faults.clone(),
        }))
    }

    async fn get_opts(&self, location: &Path, options: GetOptions) -> Result<GetResult> {
        self.inner.get_opts(location, options).await
    }

    async fn delete(&self, location: &Path) -> Result<()> {
        self.inner.delete(location).await
    }

    fn list(&self, prefix: Option<&Path>) -> BoxStream<'_, Result<ObjectMeta>> {
        self.inner.list(prefix)
    }

    async fn list_with_delimiter(&self, prefix: Option<&Path>) -> Result<ListResult> {
        self.inner.list_with_delimiter(prefix).await
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        self.inner.copy(from, to).await
    }

    async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> Result<()> {
        self.inner.copy_if_not_exists(from, to).await
    }
}

#[derive(Debug)]
struct FlakyUpload {
    inner: Box<dyn MultipartUpload>,
    faults: Arc<Faults>,
}

#[async_trait]
impl MultipartUpload for FlakyUpload {
    fn put_part(&mut self, data: PutPayload) -> UploadPart {
        if take(&self.faults.parts) {
            return Box::pin(futures::future::ready(Err(injected())));
        }
        self.inner.put_part(data)
    }

    async fn complete(&mut self) -> Result<PutResult> {
        if take(&self.faults.completes) {
            return Err(injected());
        }
        self.inner.complete().await
    }

    async fn abort(&mut self) -> Result<()> {
        self.faults.aborts.fetch_add(1, Ordering::SeqCst);
        self.inner.abort().await
    }
}
