//! In-process backend with eventual read-after-create visibility.
//!
//! Buckets live in a map. A created bucket only becomes visible to `head` after
//! `visibility_lag`, which reproduces the consistency window the existence waiter exists for.
//! Re-creating a bucket this backend already holds answers `AlreadyOwned`; names registered with
//! [`InMemoryBackend::with_foreign_bucket`] answer `AlreadyExists`.

use crate::backend::{
    BackendError, BucketBackend, BucketName, CreateStatus, HeadStatus, LocationHint,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    visible_at: Instant,
    location: LocationHint,
}

#[derive(Debug, Default)]
struct Buckets {
    owned: HashMap<String, Entry>,
    foreign: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    visibility_lag: Duration,
    buckets: Mutex<Buckets>,
}

impl InMemoryBackend {
    /// Buckets are visible as soon as they are created.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buckets become visible `lag` after creation.
    pub fn with_visibility_lag(lag: Duration) -> Self {
        Self { visibility_lag: lag, buckets: Mutex::default() }
    }

    /// Register a name that belongs to another account.
    pub fn with_foreign_bucket(self, name: &str) -> Self {
        self.buckets().foreign.insert(name.to_string());
        self
    }

    /// Whether the bucket is held by this backend, visible or not.
    pub fn contains(&self, name: &str) -> bool {
        self.buckets().owned.contains_key(name)
    }

    /// Location the bucket was created with.
    pub fn location_of(&self, name: &str) -> Option<LocationHint> {
        self.buckets().owned.get(name).map(|entry| entry.location.clone())
    }

    fn buckets(&self) -> MutexGuard<'_, Buckets> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BucketBackend for InMemoryBackend {
    async fn create(
        &self,
        name: &BucketName,
        location: &LocationHint,
    ) -> Result<CreateStatus, BackendError> {
        let mut buckets = self.buckets();
        if buckets.foreign.contains(name.as_str()) {
            return Err(BackendError::already_exists(format!(
                "bucket {name} is owned by another account"
            )));
        }
        if buckets.owned.contains_key(name.as_str()) {
            return Ok(CreateStatus::AlreadyOwned);
        }
        let entry =
            Entry { visible_at: Instant::now() + self.visibility_lag, location: location.clone() };
        buckets.owned.insert(name.to_string(), entry);
        Ok(CreateStatus::Created)
    }

    async fn head(&self, name: &BucketName) -> Result<HeadStatus, BackendError> {
        match self.buckets().owned.get(name.as_str()) {
            Some(entry) if Instant::now() >= entry.visible_at => Ok(HeadStatus::Exists),
            _ => Ok(HeadStatus::NotFound),
        }
    }

    async fn delete(&self, name: &BucketName) -> Result<(), BackendError> {
        match self.buckets().owned.remove(name.as_str()) {
            Some(_) => Ok(()),
            None => Err(BackendError::not_found(format!("bucket {name} does not exist"))),
        }
    }
}
