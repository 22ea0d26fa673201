//! Amazon S3 (and S3-compatible) backend built on `aws-sdk-s3`.
//!
//! Error mapping:
//! - `BucketAlreadyOwnedByYou` on create → `Ok(CreateStatus::AlreadyOwned)`
//! - `BucketAlreadyExists` → `AlreadyExists`
//! - `NotFound` on head → `Ok(HeadStatus::NotFound)`; `NoSuchBucket` on delete → `NotFound`
//! - dispatch failures, SDK timeouts, throttling and 5xx → `Transient`
//! - other 4xx → `Rejected`

use crate::backend::{
    BackendError, BackendErrorKind, BucketBackend, BucketName, CreateStatus, HeadStatus,
    LocationHint,
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;

/// Region whose buckets must be created without a location constraint.
const DEFAULT_REGION: &str = "us-east-1";

const TRANSIENT_CODES: &[&str] =
    &["SlowDown", "InternalError", "ServiceUnavailable", "RequestTimeout", "Throttling"];

/// Where and as whom to connect.
#[derive(Debug, Clone, Default)]
pub struct S3Settings {
    pub region: Option<String>,
    pub profile: Option<String>,
    /// Custom endpoint (LocalStack, MinIO, a fault proxy). Enables path-style addressing.
    pub endpoint: Option<String>,
}

/// [`BucketBackend`](crate::BucketBackend) over the AWS SDK S3 client.
#[derive(Debug, Clone)]
pub struct S3Backend {
    client: Client,
}

impl S3Backend {
    /// Wrap an already configured client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Client for the real S3 endpoints of `config`'s region.
    pub fn from_config(config: &SdkConfig) -> Self {
        Self::new(Client::new(config))
    }

    /// Talk to an S3-compatible endpoint using path-style bucket addressing.
    pub fn from_endpoint(config: &SdkConfig, endpoint: &str) -> Self {
        let conf = aws_sdk_s3::config::Builder::from(config)
            .endpoint_url(endpoint)
            .force_path_style(true)
            .build();
        Self::new(Client::from_conf(conf))
    }

    /// Load credentials and region from the default provider chain, applying `settings`.
    pub async fn load(settings: &S3Settings) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(profile) = &settings.profile {
            loader = loader.profile_name(profile);
        }
        let config = loader.load().await;
        match &settings.endpoint {
            Some(endpoint) => Self::from_endpoint(&config, endpoint),
            None => Self::from_config(&config),
        }
    }

    /// The underlying SDK client.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn location_constraint(location: &LocationHint) -> Option<CreateBucketConfiguration> {
    if location.is_default() || location.as_str() == DEFAULT_REGION {
        return None;
    }
    Some(
        CreateBucketConfiguration::builder()
            .location_constraint(BucketLocationConstraint::from(location.as_str()))
            .build(),
    )
}

fn classify<E>(err: SdkError<E, HttpResponse>) -> BackendError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let kind = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            BackendErrorKind::Transient
        }
        SdkError::ServiceError(ctx) => {
            let status = ctx.raw().status().as_u16();
            classify_service(ctx.err().code(), status)
        }
        _ => BackendErrorKind::Other,
    };
    let message = DisplayErrorContext(&err).to_string();
    BackendError::new(kind, message).with_source(err)
}

fn classify_service(code: Option<&str>, status: u16) -> BackendErrorKind {
    match code {
        Some("NoSuchBucket" | "NotFound") => BackendErrorKind::NotFound,
        Some("BucketAlreadyExists") => BackendErrorKind::AlreadyExists,
        Some(code) if TRANSIENT_CODES.contains(&code) => BackendErrorKind::Transient,
        _ if status == 404 => BackendErrorKind::NotFound,
        _ if status == 429 || status >= 500 => BackendErrorKind::Transient,
        _ if (400..500).contains(&status) => BackendErrorKind::Rejected,
        _ => BackendErrorKind::Other,
    }
}

#[async_trait]
impl BucketBackend for S3Backend {
    async fn create(
        &self,
        name: &BucketName,
        location: &LocationHint,
    ) -> Result<CreateStatus, BackendError> {
        let created = self
            .client
            .create_bucket()
            .bucket(name.as_str())
            .set_create_bucket_configuration(location_constraint(location))
            .send()
            .await;

        match created {
            Ok(_) => Ok(CreateStatus::Created),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_bucket_already_owned_by_you()) => {
                Ok(CreateStatus::AlreadyOwned)
            }
            Err(err) => Err(classify(err)),
        }
    }

    async fn head(&self, name: &BucketName) -> Result<HeadStatus, BackendError> {
        match self.client.head_bucket().bucket(name.as_str()).send().await {
            Ok(_) => Ok(HeadStatus::Exists),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {
                Ok(HeadStatus::NotFound)
            }
            Err(err) => Err(classify(err)),
        }
    }

    async fn delete(&self, name: &BucketName) -> Result<(), BackendError> {
        self.client
            .delete_bucket()
            .bucket(name.as_str())
            .send()
            .await
            .map(|_| ())
            .map_err(classify)
    }
}
