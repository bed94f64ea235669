//! Job store: keyed storage for job records with an atomic update primitive.
//!
//! Every mutation in the crate goes through [`JobStore::update`]. The mutator
//! runs on a copy of the record while the store holds its lock; the copy is
//! written back only if the mutator succeeds, so a rejected mutation leaves
//! the stored record untouched.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::db::job_repo::{self, JobRow};
use crate::db::{Database, DatabaseError};
use crate::error::JobError;
use crate::jobs::model::Job;

/// Mutator passed to [`JobStore::update`].
pub type Mutator<'a> = &'a mut dyn FnMut(&mut Job) -> Result<(), JobError>;

pub trait JobStore: Send + Sync {
    /// Inserts a new record and returns its id.
    fn create(&self, job: &Job) -> Result<String, JobError>;

    /// Returns a snapshot of the record.
    fn get(&self, id: &str) -> Result<Job, JobError>;

    /// Atomic read-modify-write. Serializes with every other `update` on the
    /// same id and returns the record as written.
    fn update(&self, id: &str, mutator: Mutator<'_>) -> Result<Job, JobError>;
}

/// SQLite-backed store. Each update is one transaction under the
/// connection lock.
#[derive(Clone)]
pub struct SqliteJobStore {
    db: Database,
}

impl SqliteJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl JobStore for SqliteJobStore {
    fn create(&self, job: &Job) -> Result<String, JobError> {
        let row = JobRow::from_job(job)?;
        self.db.with_conn(|conn| job_repo::insert(conn, &row))?;
        Ok(job.id.clone())
    }

    fn get(&self, id: &str) -> Result<Job, JobError> {
        let row = self.db.with_conn(|conn| job_repo::find_by_id(conn, id))?;
        match row {
            Some(row) => Ok(row.into_job()?),
            None => Err(JobError::JobNotFound(id.to_string())),
        }
    }

    fn update(&self, id: &str, mutator: Mutator<'_>) -> Result<Job, JobError> {
        // The outer Result carries store failures, the inner one the
        // mutator's verdict. A rejected mutation commits an empty transaction.
        let outcome = self.db.transaction(|tx| {
            let Some(row) = job_repo::find_by_id(tx, id)? else {
                return Ok(Err(JobError::JobNotFound(id.to_string())));
            };
            let mut job = row.into_job()?;
            if let Err(e) = mutator(&mut job) {
                return Ok(Err(e));
            }
            job_repo::update(tx, &JobRow::from_job(&job)?)?;
            Ok(Ok(job))
        })?;
        outcome
    }
}

/// In-memory store, for tests and embedding without persistence.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn create(&self, job: &Job) -> Result<String, JobError> {
        let mut jobs = self.jobs.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        if jobs.contains_key(&job.id) {
            return Err(JobError::Internal(format!("duplicate job id {}", job.id)));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(job.id.clone())
    }

    fn get(&self, id: &str) -> Result<Job, JobError> {
        let jobs = self.jobs.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        jobs.get(id)
            .cloned()
            .ok_or_else(|| JobError::JobNotFound(id.to_string()))
    }

    fn update(&self, id: &str, mutator: Mutator<'_>) -> Result<Job, JobError> {
        let mut jobs = self.jobs.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let stored = jobs
            .get_mut(id)
            .ok_or_else(|| JobError::JobNotFound(id.to_string()))?;

        let mut job = stored.clone();
        mutator(&mut job)?;
        *stored = job.clone();
        Ok(job)
    }
}
