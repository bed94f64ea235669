//! Job status broadcaster for real-time status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::jobs::model::{Job, JobStatus};

/// Emitted whenever a job changes status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusEvent {
    pub job_id: String,
    pub status: JobStatus,
    pub files_uploaded: u32,
    pub file_count: u32,
    pub timestamp: DateTime<Utc>,
    /// Diagnosis (set on `errored` and `failed`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatusEvent {
    /// Snapshot event for the job as currently recorded.
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            files_uploaded: job.files_uploaded,
            file_count: job.file_count,
            timestamp: Utc::now(),
            error: job.error.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Broadcasts job status events to any number of subscribers.
#[derive(Clone)]
pub struct StatusBroadcaster {
    sender: Arc<broadcast::Sender<JobStatusEvent>>,
}

impl StatusBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Publishes the job's current status.
    pub fn publish(&self, job: &Job) {
        // No active receivers is fine
        let _ = self.sender.send(JobStatusEvent::from_job(job));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobStatusEvent> {
        self.sender.subscribe()
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
