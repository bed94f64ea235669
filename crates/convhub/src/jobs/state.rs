//! Job state machine.
//!
//! ```text
//! started ──accepted──▶ waiting ──all uploaded──▶ running ──exit 0──▶ completed
//!    │                                               ├──exit ≠ 0──▶ failed
//!    └──malformed──▶ errored ◀──launch failed────────┘
//! ```
//!
//! Terminal statuses admit no further events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JobError;
use crate::jobs::model::{Job, JobStatus};

/// Something that happened to a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobEvent {
    SubmissionAccepted,
    SubmissionMalformed,
    AllSlotsUploaded,
    StepSucceeded,
    StepFailed,
    LaunchFailed,
}

impl fmt::Display for JobEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobEvent::SubmissionAccepted => "submission accepted",
            JobEvent::SubmissionMalformed => "submission malformed",
            JobEvent::AllSlotsUploaded => "all slots uploaded",
            JobEvent::StepSucceeded => "step succeeded",
            JobEvent::StepFailed => "step failed",
            JobEvent::LaunchFailed => "launch failed",
        };
        f.write_str(s)
    }
}

impl JobStatus {
    /// Returns the status reached from `self` on `event`, or
    /// `InvalidTransition` when the edge does not exist.
    pub fn next(self, event: JobEvent) -> Result<JobStatus, JobError> {
        use JobEvent::*;
        use JobStatus::*;

        match (self, event) {
            (Started, SubmissionAccepted) => Ok(Waiting),
            (Started, SubmissionMalformed) => Ok(Errored),
            (Waiting, AllSlotsUploaded) => Ok(Running),
            (Running, StepSucceeded) => Ok(Completed),
            (Running, StepFailed) => Ok(Failed),
            (Running, LaunchFailed) => Ok(Errored),
            (from, event) => Err(JobError::InvalidTransition { from, event }),
        }
    }
}

impl Job {
    /// Applies `event` to this record. On error nothing is modified.
    ///
    /// `completion_time` is stamped on entry into a terminal status; since
    /// terminal statuses have no outgoing edges it is written at most once.
    pub fn apply(&mut self, event: JobEvent, now: DateTime<Utc>) -> Result<JobStatus, JobError> {
        let next = self.status.next(event)?;
        self.status = next;
        if next.is_terminal() {
            self.completion_time = Some(now);
        }
        Ok(next)
    }
}
