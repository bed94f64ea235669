//! Job store wrappers that change timing or failure behavior.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use convhub::jobs::store::Mutator;
use convhub::{Job, JobError, JobStore};

/// Delegates to `inner`, but every `update` first sleeps for `delay`, as a
/// store under heavy load would.
pub struct SlowStore {
    inner: Arc<dyn JobStore>,
    delay: Duration,
}

impl SlowStore {
    pub fn new(inner: Arc<dyn JobStore>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

impl JobStore for SlowStore {
    fn create(&self, job: &Job) -> Result<String, JobError> {
        self.inner.create(job)
    }

    fn get(&self, id: &str) -> Result<Job, JobError> {
        self.inner.get(id)
    }

    fn update(&self, id: &str, mutator: Mutator<'_>) -> Result<Job, JobError> {
        std::thread::sleep(self.delay);
        self.inner.update(id, mutator)
    }
}
