use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::{primitives::ByteStream as AwsByteStream, Client};
use bytes::Bytes;
use std::env;
use tracing::debug;

use crate::{BlobError, BlobResult, BlobStore, PutResult, StoreCapabilities};

/// S3-compatible store configuration
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint_url: String,
    /// Base for public URLs; defaults to `{endpoint_url}/{bucket}`
    pub public_base_url: Option<String>,
}

impl S3Config {
    /// Read connection settings from `S3_*` environment variables
    pub fn from_env(bucket: impl Into<String>) -> BlobResult<Self> {
        fn get_env(key: &str) -> BlobResult<String> {
            env::var(key).map_err(|_| BlobError::invalid(format!("{} environment variable required", key)))
        }

        Ok(Self {
            bucket: bucket.into(),
            region: get_env("S3_REGION")?,
            access_key_id: get_env("S3_ACCESS_KEY_ID")?,
            secret_access_key: get_env("S3_SECRET_ACCESS_KEY")?,
            endpoint_url: get_env("S3_ENDPOINT_URL")?,
            public_base_url: env::var("S3_PUBLIC_BASE_URL").ok(),
        })
    }
}

/// Object store backed by any S3-compatible service
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl S3BlobStore {
    pub async fn new(config: S3Config) -> Self {
        let public_base_url = config
            .public_base_url
            .clone()
            .unwrap_or_else(|| format!("{}/{}", config.endpoint_url.trim_end_matches('/'), config.bucket));
        let bucket = config.bucket.clone();
        let client = Self::create_client(config).await;

        Self {
            client,
            bucket,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn from_env(bucket: impl Into<String>) -> BlobResult<Self> {
        Ok(Self::new(S3Config::from_env(bucket)?).await)
    }

    async fn create_client(config: S3Config) -> Client {
        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "site-blob",
        );

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .endpoint_url(config.endpoint_url)
            .load()
            .await;

        Client::from_conf(
            aws_sdk_s3::config::Builder::from(&aws_config)
                .force_path_style(true)
                .build(),
        )
    }

    fn map_aws_error(err: impl std::error::Error + Send + Sync + 'static) -> BlobError {
        BlobError::backend(err)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(
        &self,
        path: &str,
        content_type: Option<&str>,
        bytes: Bytes,
    ) -> BlobResult<PutResult> {
        let size_bytes = bytes.len() as u64;
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(AwsByteStream::from(bytes));

        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }

        let result = request.send().await.map_err(Self::map_aws_error)?;

        let mut put = PutResult::new(size_bytes);
        if let Some(etag) = result.e_tag {
            put = put.with_etag(etag);
        }
        Ok(put)
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.public_base_url, path.trim_start_matches('/'))
    }

    async fn remove(&self, paths: &[String]) -> BlobResult<()> {
        // S3 answers 204 for keys that do not exist, so this stays idempotent
        for path in paths {
            debug!("Deleting object {}", path);
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(path)
                .send()
                .await
                .map_err(Self::map_aws_error)?;
        }
        Ok(())
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::basic().with_max_object_bytes(5 * 1024 * 1024 * 1024)
    }
}
