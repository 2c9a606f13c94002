//! Object-storage access: configuration carried in volume secrets, the
//! bucket operations the plugin needs, and the factory that builds a client
//! for each request.

pub mod client;

use std::sync::Arc;

use async_trait::async_trait;
use hyper::Uri;
use libcsi::StringMap;
use thiserror::Error;

pub use client::S3Client;

pub const SECRET_ACCESS_KEY_ID: &str = "accessKeyID";
pub const SECRET_SECRET_ACCESS_KEY: &str = "secretAccessKey";
pub const SECRET_ENDPOINT: &str = "endpoint";
pub const SECRET_REGION: &str = "region";
pub const SECRET_BUCKET: &str = "bucket";
pub const SECRET_MOUNTER: &str = "mounter";
pub const SECRET_OPTIONS: &str = "options";

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_MOUNTER: &str = "s3fs";

#[derive(Debug, Error)]
pub enum S3Error {
    #[error("missing secret {0}")]
    MissingSecret(&'static str),

    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("{op} {bucket}: {reason}")]
    Request {
        op: &'static str,
        bucket: String,
        reason: String,
    },
}

/// Connection settings for one S3-compatible backend.
#[derive(Clone, PartialEq, Eq)]
pub struct S3Config {
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Absolute http(s) URL of the S3 API.
    pub endpoint: String,
    pub region: String,
    /// Pre-existing bucket to mount instead of one named after the volume.
    pub existing_bucket: Option<String>,
    /// FUSE helper used to mount the bucket.
    pub mounter: String,
    /// Extra options handed to the helper.
    pub mount_options: Vec<String>,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("existing_bucket", &self.existing_bucket)
            .field("mounter", &self.mounter)
            .field("mount_options", &self.mount_options)
            .finish()
    }
}

impl S3Config {
    pub fn from_secrets(secrets: &StringMap) -> Result<Self, S3Error> {
        let required = |key: &'static str| {
            secrets
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or(S3Error::MissingSecret(key))
        };
        let optional = |key: &str| secrets.get(key).filter(|v| !v.is_empty()).cloned();

        let endpoint = required(SECRET_ENDPOINT)?;
        let uri = endpoint
            .parse::<Uri>()
            .map_err(|e| S3Error::InvalidEndpoint {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;
        if !matches!(uri.scheme_str(), Some("http" | "https")) || uri.host().is_none() {
            return Err(S3Error::InvalidEndpoint {
                endpoint,
                reason: "expected an http(s) URL with a host".into(),
            });
        }

        Ok(Self {
            access_key_id: required(SECRET_ACCESS_KEY_ID)?,
            secret_access_key: required(SECRET_SECRET_ACCESS_KEY)?,
            endpoint,
            region: optional(SECRET_REGION).unwrap_or_else(|| DEFAULT_REGION.to_owned()),
            existing_bucket: optional(SECRET_BUCKET),
            mounter: optional(SECRET_MOUNTER).unwrap_or_else(|| DEFAULT_MOUNTER.to_owned()),
            mount_options: optional(SECRET_OPTIONS)
                .map(|o| o.split_whitespace().map(str::to_owned).collect())
                .unwrap_or_default(),
        })
    }
}

/// Bucket operations used by the controller.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, S3Error>;

    /// Create `bucket` and mark it as created by the plugin; succeeds if it
    /// is already owned by the caller.
    async fn create_bucket(&self, bucket: &str) -> Result<(), S3Error>;

    /// Whether `bucket` carries the mark left by [`ObjectStore::create_bucket`].
    /// A missing bucket is not owned.
    async fn owns_bucket(&self, bucket: &str) -> Result<bool, S3Error>;

    /// Remove `bucket`; succeeds if it is already gone.
    async fn remove_bucket(&self, bucket: &str) -> Result<(), S3Error>;
}

/// A parsed configuration together with a client bound to it.
#[derive(Clone)]
pub struct StorageClient {
    pub config: S3Config,
    pub store: Arc<dyn ObjectStore>,
}

/// Builds a [`StorageClient`] from request secrets.
pub trait ClientFactory: Send + Sync {
    fn from_secrets(&self, secrets: &StringMap) -> Result<StorageClient, S3Error>;
}

/// Factory producing an [`S3Client`] per request.
#[derive(Debug, Default, Clone)]
pub struct S3ClientFactory;

impl ClientFactory for S3ClientFactory {
    fn from_secrets(&self, secrets: &StringMap) -> Result<StorageClient, S3Error> {
        let config = S3Config::from_secrets(secrets)?;
        let store = Arc::new(S3Client::new(&config));
        Ok(StorageClient { config, store })
    }
}
