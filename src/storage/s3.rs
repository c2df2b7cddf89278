//! S3 storage backend implementation.

use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{ObjectStore, RetryConfig};
use snafu::prelude::*;
use std::sync::Arc;
use tracing::debug;

use crate::config::StorageConfig;
use crate::error::{S3ConfigSnafu, StorageError};

use super::{BackendConfig, StorageProvider};

/// S3 storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub bucket: String,
    pub key: Option<Path>,
}

impl StorageProvider {
    pub(super) async fn construct_s3(
        config: S3Config,
        storage: &StorageConfig,
    ) -> Result<Self, StorageError> {
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(&config.bucket);

        for (key, value) in &storage.storage_options {
            builder = builder.with_config(key.parse().context(S3ConfigSnafu)?, value.clone());
        }

        builder = builder.with_retry(RetryConfig::default());

        if let (Some(key_id), Some(secret)) =
            (&storage.access_key_id, &storage.secret_access_key)
        {
            builder = builder
                .with_access_key_id(key_id)
                .with_secret_access_key(secret);
        }

        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }

        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false)
                .with_allow_http(true);
        }

        let canonical_url = match (&config.region, &config.endpoint) {
            (_, Some(endpoint)) => format!("s3::{}/{}", endpoint, config.bucket),
            (Some(region), _) => format!("https://s3.{}.amazonaws.com/{}", region, config.bucket),
            _ => format!("https://s3.amazonaws.com/{}", config.bucket),
        };

        let canonical_url = match &config.key {
            Some(key) => format!("{canonical_url}/{key}"),
            None => canonical_url,
        };
        debug!(url = %canonical_url, "Configured S3 backend");

        let object_store: Arc<dyn ObjectStore> =
            Arc::new(builder.build().context(S3ConfigSnafu)?);

        Ok(Self {
            config: BackendConfig::S3(config),
            object_store,
            canonical_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_construct_with_endpoint_and_static_credentials() {
        let mut storage = StorageConfig::for_url("s3::http://localhost:9000/exports/base");
        storage.region = Some("us-east-1".to_string());
        storage.access_key_id = Some("minio".to_string());
        storage.secret_access_key = Some("minio123".to_string());

        let provider = StorageProvider::for_config(&storage).await.unwrap();
        assert!(provider.canonical_url().starts_with("s3::"));
        assert!(provider.canonical_url().ends_with("/exports/base"));

        let out = provider.open("orders/orders-0-0", 1024).unwrap();
        assert_eq!(out.location().as_ref(), "base/orders/orders-0-0");
    }

    #[tokio::test]
    async fn test_unknown_storage_option_rejected() {
        let mut storage = StorageConfig::for_url("s3://exports");
        storage.region = Some("us-east-1".to_string());
        storage
            .storage_options
            .insert("not_a_real_option".to_string(), "x".to_string());

        assert!(matches!(
            StorageProvider::for_config(&storage).await,
            Err(StorageError::S3Config { .. })
        ));
    }
}
