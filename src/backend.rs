//! The capability surface the provisioner depends on.
//!
//! A backend exposes exactly three operations: `create`, `head`, and `delete`. The provisioner
//! never sees an SDK client type; production, the scripted double, and clients routed through the
//! fault proxy all plug in behind [`BucketBackend`].
//!
//! Deadlines and cancellation are applied by the caller: every backend future is raced against the
//! attempt deadline and the caller's cancellation token, and dropped when either fires. Backends
//! must therefore release their transport resources on drop.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Errors raised while validating a provisioning request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// Bucket names must contain at least one non-whitespace character.
    #[error("bucket name must not be empty")]
    EmptyBucketName,
    /// `max_attempts` must be > 0.
    #[error("max_attempts must be > 0 (got {0})")]
    ZeroAttempts(usize),
}

/// Caller-supplied bucket identifier. Opaque apart from being non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketName(String);

impl BucketName {
    /// Validate a bucket name; blank names are rejected.
    pub fn new(name: impl Into<String>) -> Result<Self, RequestError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RequestError::EmptyBucketName);
        }
        Ok(Self(name))
    }

    /// The name as given.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for BucketName {
    type Error = RequestError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Placement parameter handed to `create` untouched (a region for S3).
///
/// An empty hint means "backend default".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LocationHint(String);

impl LocationHint {
    /// Wrap a placement hint verbatim.
    pub fn new(hint: impl Into<String>) -> Self {
        Self(hint.into())
    }

    /// The hint as given.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the empty hint, which leaves placement to the backend.
    pub fn is_default(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LocationHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LocationHint {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Successful result of a `create` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStatus {
    /// The backend created the bucket.
    Created,
    /// The bucket already exists and belongs to the caller's account.
    AlreadyOwned,
}

/// Successful result of a `head` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadStatus {
    Exists,
    NotFound,
}

/// Coarse classification of backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendErrorKind {
    /// Network trouble, throttling, or a server-side fault; retrying may help.
    Transient,
    /// The bucket does not exist.
    NotFound,
    /// The name is taken by someone else.
    AlreadyExists,
    /// The request was refused (bad name, access denied, invalid location).
    Rejected,
    /// Anything the backend could not classify.
    Other,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BackendErrorKind::Transient => "transient",
            BackendErrorKind::NotFound => "not found",
            BackendErrorKind::AlreadyExists => "already exists",
            BackendErrorKind::Rejected => "rejected",
            BackendErrorKind::Other => "other",
        };
        f.write_str(label)
    }
}

/// Error returned by a [`BucketBackend`] operation.
#[derive(Debug, Clone)]
pub struct BackendError {
    kind: BackendErrorKind,
    message: String,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl BackendError {
    /// Error of the given kind with a human-readable message.
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), source: None }
    }

    /// [`BackendErrorKind::Transient`].
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Transient, message)
    }

    /// [`BackendErrorKind::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::NotFound, message)
    }

    /// [`BackendErrorKind::AlreadyExists`].
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::AlreadyExists, message)
    }

    /// [`BackendErrorKind::Rejected`].
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Rejected, message)
    }

    /// [`BackendErrorKind::Other`].
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Other, message)
    }

    /// Attach the underlying error (SDK error, io error, ...).
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    /// Classification used by the retry loop and the waiter.
    pub fn kind(&self) -> BackendErrorKind {
        self.kind
    }

    /// Message as reported by the backend.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the backend believes an identical retry could succeed.
    pub fn is_transient(&self) -> bool {
        self.kind == BackendErrorKind::Transient
    }

    /// The bucket does not exist.
    pub fn is_not_found(&self) -> bool {
        self.kind == BackendErrorKind::NotFound
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl PartialEq for BackendError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message == other.message
    }
}

impl Eq for BackendError {}

/// Minimal storage capability: create, existence check, delete.
#[async_trait]
pub trait BucketBackend: Send + Sync {
    async fn create(
        &self,
        name: &BucketName,
        location: &LocationHint,
    ) -> Result<CreateStatus, BackendError>;

    async fn head(&self, name: &BucketName) -> Result<HeadStatus, BackendError>;

    async fn delete(&self, name: &BucketName) -> Result<(), BackendError>;
}

#[async_trait]
impl<B> BucketBackend for Arc<B>
where
    B: BucketBackend + ?Sized,
{
    async fn create(
        &self,
        name: &BucketName,
        location: &LocationHint,
    ) -> Result<CreateStatus, BackendError> {
        (**self).create(name, location).await
    }

    async fn head(&self, name: &BucketName) -> Result<HeadStatus, BackendError> {
        (**self).head(name).await
    }

    async fn delete(&self, name: &BucketName) -> Result<(), BackendError> {
        (**self).delete(name).await
    }
}
