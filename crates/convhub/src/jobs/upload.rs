//! Upload tracker: records one input slot at a time and detects readiness.
//!
//! Uploads to one job are serialized by a per-job lock, so the payload write
//! never holds the store lock and never blocks other jobs. Counting and the
//! readiness transition happen in one [`JobStore::update`], and the upload
//! that commits the last slot is the one that hands the job to the trigger.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use log::{debug, error, info};

use crate::error::JobError;
use crate::jobs::model::{Job, JobStatus};
use crate::jobs::state::JobEvent;
use crate::jobs::store::JobStore;
use crate::jobs::trigger::ConversionTrigger;
use crate::storage::{BlobStore, MediaType};

/// Result of a successful upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Recorded; more slots are outstanding (or the slot was already filled).
    Accepted,
    /// This upload filled the last slot and handed the job to the converter.
    /// Returned to exactly one caller per job.
    Completed,
}

#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub outcome: UploadOutcome,
    /// The record as written by this upload.
    pub job: Job,
    pub status_changed: bool,
}

/// One mutex per job with uploads in flight.
#[derive(Default)]
struct JobLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JobLocks {
    fn acquire(&self, job_id: &str) -> Result<Arc<Mutex<()>>, JobError> {
        let mut locks = self.locks.lock().map_err(|_| poisoned(job_id))?;
        Ok(Arc::clone(locks.entry(job_id.to_string()).or_default()))
    }

    /// Drops the caller's handle and forgets the lock once nobody holds it.
    fn release(&self, job_id: &str, lock: Arc<Mutex<()>>) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        drop(lock);
        if locks
            .get(job_id)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(job_id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}

fn poisoned(job_id: &str) -> JobError {
    JobError::Internal(format!("upload lock for job {} poisoned", job_id))
}

pub struct UploadTracker {
    store: Arc<dyn JobStore>,
    blobs: BlobStore,
    trigger: ConversionTrigger,
    max_upload_bytes: u64,
    locks: JobLocks,
}

impl UploadTracker {
    pub fn new(
        store: Arc<dyn JobStore>,
        blobs: BlobStore,
        trigger: ConversionTrigger,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            store,
            blobs,
            trigger,
            max_upload_bytes,
            locks: JobLocks::default(),
        }
    }

    /// Stores `payload` as input `slot` of the job. Blocking; async callers
    /// run it on a blocking thread, where it completes even if the caller
    /// goes away.
    pub fn submit_file(
        &self,
        job_id: &str,
        slot: u32,
        payload: &[u8],
        content_type: &str,
    ) -> Result<UploadReceipt, JobError> {
        if payload.len() as u64 > self.max_upload_bytes {
            return Err(JobError::PayloadTooLarge {
                size: payload.len(),
                limit: self.max_upload_bytes,
            });
        }

        let lock = self.locks.acquire(job_id)?;
        let receipt = match lock.lock() {
            Ok(_serial) => self.record(job_id, slot, payload, content_type),
            Err(_) => Err(poisoned(job_id)),
        };
        self.locks.release(job_id, lock);
        let receipt = receipt?;

        debug!(
            "Job {}: slot {} stored as {} ({} of {} uploaded)",
            receipt.job.id, slot, content_type, receipt.job.files_uploaded, receipt.job.file_count
        );
        Ok(receipt)
    }

    /// Runs with the job's upload lock held.
    fn record(
        &self,
        job_id: &str,
        slot: u32,
        payload: &[u8],
        content_type: &str,
    ) -> Result<UploadReceipt, JobError> {
        let job = self.store.get(job_id)?;
        if !job.contains_slot(slot) {
            return Err(JobError::InvalidSlot {
                job_id: job.id,
                slot,
                file_count: job.file_count,
            });
        }
        let media = MediaType::parse(content_type)?;

        if !job.status.accepts_uploads() {
            // Inputs are frozen once the conversion has been handed off.
            return if job.has_upload(slot) {
                Ok(UploadReceipt {
                    outcome: UploadOutcome::Accepted,
                    job,
                    status_changed: false,
                })
            } else {
                Err(JobError::UploadsClosed {
                    job_id: job.id,
                    status: job.status,
                })
            };
        }

        // A payload whose record update fails stays on disk unrecorded and
        // is overwritten by the retry.
        self.blobs
            .write_input(&job.id, slot, media.extension(), payload)?;

        let mut outcome = UploadOutcome::Accepted;
        let mut status_changed = false;
        let job = self.store.update(job_id, &mut |job| {
            outcome = UploadOutcome::Accepted;
            status_changed = false;

            if !job.status.accepts_uploads() {
                return Err(JobError::UploadsClosed {
                    job_id: job.id.clone(),
                    status: job.status,
                });
            }
            let now = Utc::now();
            if job.status == JobStatus::Started {
                job.apply(JobEvent::SubmissionAccepted, now)?;
                status_changed = true;
            }
            job.record_upload(slot);
            if job.is_complete() {
                job.apply(JobEvent::AllSlotsUploaded, now)?;
                status_changed = true;
                outcome = UploadOutcome::Completed;
            }
            Ok(())
        })?;

        let job = if outcome == UploadOutcome::Completed {
            info!("Job {}: all {} inputs uploaded", job.id, job.file_count);
            self.hand_off(job)?
        } else {
            job
        };

        Ok(UploadReceipt {
            outcome,
            job,
            status_changed,
        })
    }

    /// Queues a freshly `running` job. If the worker is gone the job is
    /// errored instead.
    fn hand_off(&self, job: Job) -> Result<Job, JobError> {
        let Err(e) = self.trigger.launch(&job.id) else {
            return Ok(job);
        };
        error!("Job {}: hand-off failed: {}", job.id, e);
        let diagnosis = e.to_string();
        self.store.update(&job.id, &mut |job| {
            job.apply(JobEvent::LaunchFailed, Utc::now())?;
            job.error = Some(diagnosis.clone());
            Ok(())
        })
    }
}
