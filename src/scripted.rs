//! Deterministic backend double driven by pre-programmed replies.
//!
//! Each operation owns a [`Script`]: an ordered list of replies, each optionally delayed. Calls
//! consume replies in order; once a script runs out, its last reply repeats. Every call is counted
//! and logged so tests can assert exact invocation counts and arguments.
//!
//! ```rust
//! use bucketwise::backend::{BackendError, CreateStatus};
//! use bucketwise::scripted::{Operation, Script, ScriptedBackend};
//!
//! // "fail twice then succeed"
//! let backend = ScriptedBackend::builder()
//!     .create(Script::fail_times(2, BackendError::other("mocked create error"))
//!         .then_ok(CreateStatus::Created))
//!     .build();
//! assert_eq!(backend.calls(Operation::Create), 0);
//! ```
//!
//! State lives behind a mutex owned by the double. Share one double only within a single test.

use crate::backend::{
    BackendError, BucketBackend, BucketName, CreateStatus, HeadStatus, LocationHint,
};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Backend operation, used for counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Head,
    Delete,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: Operation,
    pub bucket: String,
    /// Only set for `create`.
    pub location: Option<String>,
}

#[derive(Debug, Clone)]
struct Step<T> {
    delay: Duration,
    reply: Result<T, BackendError>,
}

/// Ordered replies for one operation.
#[derive(Debug, Clone)]
pub struct Script<T> {
    steps: Vec<Step<T>>,
}

impl<T: Clone> Script<T> {
    /// Empty script; the backend substitutes its default reply.
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Every call answers `value`.
    pub fn always_ok(value: T) -> Self {
        Self::new().then_ok(value)
    }

    /// Every call fails with `err`.
    pub fn always_err(err: BackendError) -> Self {
        Self::new().then_err(err)
    }

    /// `times` failures with `err`. Chain a success after it.
    pub fn fail_times(times: usize, err: BackendError) -> Self {
        let mut script = Self::new();
        for _ in 0..times {
            script = script.then_err(err.clone());
        }
        script
    }

    /// Append an immediate success. The last step repeats once the script runs out.
    pub fn then_ok(self, value: T) -> Self {
        self.then(Duration::ZERO, Ok(value))
    }

    /// Append an immediate failure.
    pub fn then_err(self, err: BackendError) -> Self {
        self.then(Duration::ZERO, Err(err))
    }

    /// Reply `value` only after `delay` has elapsed.
    pub fn then_delayed_ok(self, delay: Duration, value: T) -> Self {
        self.then(delay, Ok(value))
    }

    /// Fail with `err` only after `delay` has elapsed.
    pub fn then_delayed_err(self, delay: Duration, err: BackendError) -> Self {
        self.then(delay, Err(err))
    }

    fn then(mut self, delay: Duration, reply: Result<T, BackendError>) -> Self {
        self.steps.push(Step { delay, reply });
        self
    }

    fn or_default(self, value: T) -> Self {
        if self.steps.is_empty() {
            Self::always_ok(value)
        } else {
            self
        }
    }

    fn step(&self, index: usize) -> Step<T> {
        let last = self.steps.len().saturating_sub(1);
        self.steps[index.min(last)].clone()
    }
}

impl<T: Clone> Default for Script<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct Ledger {
    creates: usize,
    heads: usize,
    deletes: usize,
    log: Vec<Call>,
}

impl Ledger {
    /// Count the call and return its 0-based index for the operation.
    fn record(&mut self, call: Call) -> usize {
        let counter = match call.operation {
            Operation::Create => &mut self.creates,
            Operation::Head => &mut self.heads,
            Operation::Delete => &mut self.deletes,
        };
        let index = *counter;
        *counter += 1;
        self.log.push(call);
        index
    }
}

/// Backend double replaying [`Script`]s.
#[derive(Debug)]
pub struct ScriptedBackend {
    create: Script<CreateStatus>,
    head: Script<HeadStatus>,
    delete: Script<()>,
    ledger: Mutex<Ledger>,
}

impl ScriptedBackend {
    /// Every call succeeds immediately.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Script individual operations.
    pub fn builder() -> ScriptedBackendBuilder {
        ScriptedBackendBuilder::default()
    }

    /// Calls made so far to `operation`.
    pub fn calls(&self, operation: Operation) -> usize {
        let ledger = self.ledger();
        match operation {
            Operation::Create => ledger.creates,
            Operation::Head => ledger.heads,
            Operation::Delete => ledger.deletes,
        }
    }

    /// Every call so far, in order.
    pub fn call_log(&self) -> Vec<Call> {
        self.ledger().log.clone()
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn play<T: Clone>(&self, script: &Script<T>, call: Call) -> Result<T, BackendError> {
        let index = self.ledger().record(call);
        let step = script.step(index);
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        step.reply
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BucketBackend for ScriptedBackend {
    async fn create(
        &self,
        name: &BucketName,
        location: &LocationHint,
    ) -> Result<CreateStatus, BackendError> {
        let call = Call {
            operation: Operation::Create,
            bucket: name.to_string(),
            location: Some(location.to_string()),
        };
        self.play(&self.create, call).await
    }

    async fn head(&self, name: &BucketName) -> Result<HeadStatus, BackendError> {
        let call = Call { operation: Operation::Head, bucket: name.to_string(), location: None };
        self.play(&self.head, call).await
    }

    async fn delete(&self, name: &BucketName) -> Result<(), BackendError> {
        let call = Call { operation: Operation::Delete, bucket: name.to_string(), location: None };
        self.play(&self.delete, call).await
    }
}

/// Builder for [`ScriptedBackend`]. Unset operations always succeed.
#[derive(Debug, Default)]
pub struct ScriptedBackendBuilder {
    create: Script<CreateStatus>,
    head: Script<HeadStatus>,
    delete: Script<()>,
}

impl ScriptedBackendBuilder {
    pub fn create(mut self, script: Script<CreateStatus>) -> Self {
        self.create = script;
        self
    }

    pub fn head(mut self, script: Script<HeadStatus>) -> Self {
        self.head = script;
        self
    }

    pub fn delete(mut self, script: Script<()>) -> Self {
        self.delete = script;
        self
    }

    pub fn build(self) -> ScriptedBackend {
        ScriptedBackend {
            create: self.create.or_default(CreateStatus::Created),
            head: self.head.or_default(HeadStatus::Exists),
            delete: self.delete.or_default(()),
            ledger: Mutex::new(Ledger::default()),
        }
    }
}
