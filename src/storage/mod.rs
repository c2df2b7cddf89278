//! Object store abstraction.
//!
//! Resolves a destination URL into an `object_store` backend (S3 or an
//! S3-compatible service, the local filesystem, or memory) and opens
//! [`ObjectOutputStream`]s onto keys beneath it.

mod local;
mod output;
mod s3;
#[cfg(test)]
pub(crate) mod testing;

pub use local::LocalConfig;
pub use output::{ObjectOutputStream, SharedBuffer};
pub use s3::S3Config;

use bytes::Bytes;
use object_store::ObjectStore;
use object_store::memory::InMemory;
use object_store::path::Path;
use regex::Regex;
use snafu::prelude::*;
use std::borrow::Cow;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use crate::config::StorageConfig;
use crate::emit;
use crate::error::{InvalidKeySnafu, InvalidUrlSnafu, ObjectStoreSnafu, StorageError};
use crate::metrics::events::{
    RequestStatus, StorageOperation, StorageRequest, StorageRequestDuration,
};

/// Storage provider that abstracts over the supported backends.
#[derive(Clone)]
pub struct StorageProvider {
    config: BackendConfig,
    object_store: Arc<dyn ObjectStore>,
    canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

// URL patterns for different storage backends
const S3_PATH: &str =
    r"^https://s3\.(?P<region>[\w\-]+)\.amazonaws\.com/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";
const S3_VIRTUAL: &str =
    r"^https://(?P<bucket>[a-z0-9\-\.]+)\.s3\.(?P<region>[\w\-]+)\.amazonaws\.com(/(?P<key>.+))?$";
const S3_URL: &str = r"^[sS]3[aA]?://(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";
const S3_ENDPOINT_URL: &str = r"^[sS]3[aA]?::(?<protocol>https?)://(?P<endpoint>[^:/]+):(?<port>\d+)/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";

const FILE_URI: &str = r"^file://(?P<path>.*)$";
const FILE_URL: &str = r"^file:(?P<path>.*)$";
const FILE_PATH: &str = r"^/(?P<path>.*)$";

const MEMORY_URL: &str = r"^memory://(?P<key>.+)?$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    S3,
    Local,
    Memory,
}

static MATCHERS: LazyLock<Vec<(Backend, Regex)>> = LazyLock::new(|| {
    [
        (Backend::S3, S3_PATH),
        (Backend::S3, S3_VIRTUAL),
        (Backend::S3, S3_ENDPOINT_URL),
        (Backend::S3, S3_URL),
        (Backend::Memory, MEMORY_URL),
        (Backend::Local, FILE_URI),
        (Backend::Local, FILE_URL),
        (Backend::Local, FILE_PATH),
    ]
    .into_iter()
    .map(|(backend, pattern)| (backend, Regex::new(pattern).expect("Invalid URL regex")))
    .collect()
});

/// Backend configuration resolved from a destination URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    S3(S3Config),
    Local(LocalConfig),
    Memory { key: Option<Path> },
    /// A store handed in directly by the caller.
    External,
}

impl BackendConfig {
    /// Parse a URL into a backend configuration.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        let found = MATCHERS
            .iter()
            .find_map(|(backend, regex)| regex.captures(url).map(|caps| (*backend, caps)));

        match found {
            Some((Backend::S3, matches)) => Ok(Self::parse_s3(matches)),
            Some((Backend::Local, matches)) => Ok(Self::parse_local(matches)),
            Some((Backend::Memory, matches)) => Ok(BackendConfig::Memory {
                key: matches.name("key").map(|m| m.as_str().into()),
            }),
            None => InvalidUrlSnafu { url }.fail(),
        }
    }

    fn parse_s3(matches: regex::Captures) -> Self {
        let bucket = matches
            .name("bucket")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        let region = std::env::var("AWS_DEFAULT_REGION")
            .ok()
            .or_else(|| matches.name("region").map(|m| m.as_str().to_string()));

        let endpoint = std::env::var("AWS_ENDPOINT").ok().or_else(|| {
            matches.name("endpoint").map(|endpoint| {
                let port = matches
                    .name("port")
                    .and_then(|p| p.as_str().parse::<u16>().ok())
                    .unwrap_or(443);
                let protocol = matches
                    .name("protocol")
                    .map(|p| p.as_str())
                    .unwrap_or("https");
                format!("{}://{}:{}", protocol, endpoint.as_str(), port)
            })
        });

        let key = matches.name("key").map(|m| m.as_str().into());

        BackendConfig::S3(S3Config {
            endpoint,
            region,
            bucket,
            key,
        })
    }

    fn parse_local(matches: regex::Captures) -> Self {
        let path = matches.name("path").map(|m| m.as_str()).unwrap_or_default();
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        BackendConfig::Local(LocalConfig { path })
    }

    /// Key prefix every object is written under.
    pub(crate) fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::S3(s3) => s3.key.as_ref(),
            BackendConfig::Memory { key } => key.as_ref(),
            BackendConfig::Local(_) | BackendConfig::External => None,
        }
    }
}

impl StorageProvider {
    /// Create a storage provider from the storage section of the config.
    pub async fn for_config(config: &StorageConfig) -> Result<Self, StorageError> {
        match BackendConfig::parse_url(&config.url)? {
            BackendConfig::S3(mut s3) => {
                if let Some(region) = &config.region {
                    s3.region = Some(region.clone());
                }
                if let Some(endpoint) = &config.endpoint {
                    s3.endpoint = Some(endpoint.clone());
                }
                Self::construct_s3(s3, config).await
            }
            BackendConfig::Local(local) => Self::construct_local(local).await,
            BackendConfig::Memory { key } => {
                let canonical_url = match &key {
                    Some(key) => format!("memory://{key}"),
                    None => "memory://".to_string(),
                };
                Ok(Self {
                    config: BackendConfig::Memory { key },
                    object_store: Arc::new(InMemory::new()),
                    canonical_url,
                })
            }
            BackendConfig::External => InvalidUrlSnafu { url: &config.url }.fail(),
        }
    }

    /// Wrap a store built elsewhere; keys are written at its root.
    pub fn from_object_store(object_store: Arc<dyn ObjectStore>) -> Self {
        let canonical_url = object_store.to_string();
        Self {
            config: BackendConfig::External,
            object_store,
            canonical_url,
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    /// Qualify a path with the configured key prefix.
    pub fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match self.config.key() {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    /// Open an output stream for `key`. Nothing is sent until it is flushed
    /// past a part boundary or closed.
    ///
    /// Keys that would not survive conversion to an object path unchanged
    /// (empty segments, leading or trailing `/`, characters that need
    /// percent-encoding) are rejected, so the committed key is always `key`.
    pub fn open(&self, key: &str, part_size: usize) -> Result<ObjectOutputStream, StorageError> {
        let path = Path::from(key);
        ensure!(!key.is_empty() && path.as_ref() == key, InvalidKeySnafu { key });
        let location = self.qualify_path(&path).into_owned();
        Ok(ObjectOutputStream::new(
            self.object_store.clone(),
            location,
            key,
            part_size,
        ))
    }

    /// Get the contents of an object written under `key`.
    pub async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = Path::from(key);
        let start = Instant::now();
        let result = self.object_store.get(&self.qualify_path(&path)).await;

        emit!(StorageRequest {
            operation: StorageOperation::Get,
            status: RequestStatus::of(&result),
        });
        emit!(StorageRequestDuration {
            operation: StorageOperation::Get,
            duration: start.elapsed(),
        });

        let bytes = result
            .context(ObjectStoreSnafu)?
            .bytes()
            .await
            .context(ObjectStoreSnafu)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_s3_url_parsing() {
        let config = BackendConfig::parse_url("s3://mybucket/path/to/data").unwrap();
        match config {
            BackendConfig::S3(s3) => {
                assert_eq!(s3.bucket, "mybucket");
                assert_eq!(s3.key, Some(Path::from("path/to/data")));
            }
            _ => panic!("Expected S3 config"),
        }
    }

    #[test]
    fn test_s3_endpoint_url_parsing() {
        let config = BackendConfig::parse_url("s3::http://localhost:9000/exports").unwrap();
        match config {
            BackendConfig::S3(s3) => {
                assert_eq!(s3.bucket, "exports");
                assert_eq!(s3.key, None);
                if std::env::var("AWS_ENDPOINT").is_err() {
                    assert_eq!(s3.endpoint.as_deref(), Some("http://localhost:9000"));
                }
            }
            _ => panic!("Expected S3 config"),
        }
    }

    #[test]
    fn test_local_url_parsing() {
        for url in ["/local/path", "file:///local/path", "file:local/path"] {
            match BackendConfig::parse_url(url).unwrap() {
                BackendConfig::Local(local) => assert_eq!(local.path, "/local/path"),
                other => panic!("Expected Local config for {url}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_memory_url_parsing() {
        assert_eq!(
            BackendConfig::parse_url("memory://").unwrap(),
            BackendConfig::Memory { key: None }
        );
        assert_eq!(
            BackendConfig::parse_url("memory://base/dir").unwrap(),
            BackendConfig::Memory {
                key: Some(Path::from("base/dir"))
            }
        );
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            BackendConfig::parse_url("ftp://host/path"),
            Err(StorageError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn test_memory_provider_qualifies_keys() {
        let provider = StorageProvider::for_config(&StorageConfig::for_url("memory://base"))
            .await
            .unwrap();

        let mut out = provider.open("orders/orders-0-1", 1024).unwrap();
        assert_eq!(out.location().as_ref(), "base/orders/orders-0-1");
        out.write(b"payload").unwrap();
        out.close().await.unwrap();

        assert_eq!(
            provider.get("orders/orders-0-1").await.unwrap().as_ref(),
            b"payload"
        );
    }

    #[tokio::test]
    async fn test_local_provider_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let url = format!("{}/exports", temp_dir.path().display());
        let provider = StorageProvider::for_config(&StorageConfig::for_url(url))
            .await
            .unwrap();

        let mut out = provider
            .open("orders/date=2026-01-28/orders-0-0", 1024)
            .unwrap();
        out.write(b"line\n").unwrap();
        out.close().await.unwrap();

        let on_disk = temp_dir
            .path()
            .join("exports/orders/date=2026-01-28/orders-0-0");
        assert_eq!(std::fs::read(on_disk).unwrap(), b"line\n");
    }

    #[test]
    fn test_open_rejects_rewritten_keys() {
        let provider = StorageProvider::from_object_store(Arc::new(InMemory::new()));
        for key in ["", "orders//orders-0-0", "/orders-0-0", "orders/", "../orders", "a?b"] {
            assert!(
                matches!(
                    provider.open(key, 1024),
                    Err(StorageError::InvalidKey { .. })
                ),
                "expected {key:?} to be rejected"
            );
        }
        assert!(provider.open("orders/date=2026-01-28/orders-0-0.gz", 1024).is_ok());
    }
}
