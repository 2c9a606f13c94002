//! [`ObjectStore`] on the AWS SDK, addressing buckets path-style so any
//! S3-compatible endpoint works.

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration, Tag, Tagging};
use tracing::{debug, instrument};

use super::{DEFAULT_REGION, ObjectStore, S3Config, S3Error};

/// Bucket tag marking buckets the plugin created.
pub const OWNER_TAG_KEY: &str = "csi.rk8s.io/created-by";
pub const OWNER_TAG_VALUE: &str = "s3csi";

const CREDENTIALS_PROVIDER: &str = "s3csi";

#[derive(Clone, Debug)]
pub struct S3Client {
    client: Client,
    region: String,
}

impl S3Client {
    pub fn new(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            CREDENTIALS_PROVIDER,
        );
        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(config.endpoint.clone())
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        Self {
            client: Client::from_conf(sdk_config),
            region: config.region.clone(),
        }
    }

    async fn tag_owned(&self, bucket: &str) -> Result<(), S3Error> {
        let tag = Tag::builder()
            .key(OWNER_TAG_KEY)
            .value(OWNER_TAG_VALUE)
            .build()
            .map_err(|e| request_failed("PutBucketTagging", bucket, e))?;
        let tagging = Tagging::builder()
            .tag_set(tag)
            .build()
            .map_err(|e| request_failed("PutBucketTagging", bucket, e))?;
        self.client
            .put_bucket_tagging()
            .bucket(bucket)
            .tagging(tagging)
            .send()
            .await
            .map_err(|e| request_failed("PutBucketTagging", bucket, DisplayErrorContext(e)))?;
        Ok(())
    }
}

fn request_failed(op: &'static str, bucket: &str, e: impl std::fmt::Display) -> S3Error {
    S3Error::Request {
        op,
        bucket: bucket.to_owned(),
        reason: e.to_string(),
    }
}

/// `CreateBucket` configuration; the default region takes none.
fn location_constraint(region: &str) -> Option<CreateBucketConfiguration> {
    (region != DEFAULT_REGION).then(|| {
        CreateBucketConfiguration::builder()
            .location_constraint(BucketLocationConstraint::from(region))
            .build()
    })
}

#[async_trait]
impl ObjectStore for S3Client {
    #[instrument(skip(self))]
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, S3Error> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(e) => Err(request_failed("HeadBucket", bucket, DisplayErrorContext(e))),
        }
    }

    #[instrument(skip(self))]
    async fn create_bucket(&self, bucket: &str) -> Result<(), S3Error> {
        let created = self
            .client
            .create_bucket()
            .bucket(bucket)
            .set_create_bucket_configuration(location_constraint(&self.region))
            .send()
            .await;
        match created {
            Ok(_) => debug!(bucket, "bucket created"),
            Err(e)
                if e.as_service_error()
                    .is_some_and(|e| e.is_bucket_already_owned_by_you()) =>
            {
                debug!(bucket, "bucket already owned")
            }
            Err(e) => return Err(request_failed("CreateBucket", bucket, DisplayErrorContext(e))),
        }
        self.tag_owned(bucket).await
    }

    #[instrument(skip(self))]
    async fn owns_bucket(&self, bucket: &str) -> Result<bool, S3Error> {
        match self.client.get_bucket_tagging().bucket(bucket).send().await {
            Ok(out) => Ok(out
                .tag_set()
                .iter()
                .any(|t| t.key() == OWNER_TAG_KEY && t.value() == OWNER_TAG_VALUE)),
            Err(e)
                if matches!(
                    e.as_service_error().and_then(|e| e.code()),
                    Some("NoSuchTagSet" | "NoSuchBucket")
                ) =>
            {
                Ok(false)
            }
            Err(e) => Err(request_failed("GetBucketTagging", bucket, DisplayErrorContext(e))),
        }
    }

    #[instrument(skip(self))]
    async fn remove_bucket(&self, bucket: &str) -> Result<(), S3Error> {
        match self.client.delete_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(e) if e.as_service_error().and_then(|e| e.code()) == Some("NoSuchBucket") => {
                debug!(bucket, "bucket already gone");
                Ok(())
            }
            Err(e) => Err(request_failed("DeleteBucket", bucket, DisplayErrorContext(e))),
        }
    }
}
