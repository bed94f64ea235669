//! The inbound surface: submit, upload, poll and fetch.

use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::db::Database;
use crate::error::JobError;
use crate::jobs::events::{JobStatusEvent, StatusBroadcaster};
use crate::jobs::model::{Job, JobRequest, OptionBag, OutputFormat};
use crate::jobs::retrieval::{Artifact, LogContent, Retrieval};
use crate::jobs::state::JobEvent;
use crate::jobs::store::{JobStore, SqliteJobStore};
use crate::jobs::trigger::{
    ConversionExecutor, ConversionTrigger, ConversionWorker, ProcessExecutor,
};
use crate::jobs::upload::{UploadOutcome, UploadTracker};
use crate::storage::BlobStore;

/// Log of a finished job, ready to stream.
#[derive(Debug)]
pub enum JobLog {
    Stream { file: tokio::fs::File, len: u64 },
    Errored { message: String },
}

/// A submission that passed validation.
struct ValidSubmission {
    format: OutputFormat,
    file_count: u32,
    component_options: Option<OptionBag>,
    layout_options: Option<OptionBag>,
}

pub struct ConversionService {
    store: Arc<dyn JobStore>,
    tracker: Arc<UploadTracker>,
    retrieval: Arc<Retrieval>,
    events: StatusBroadcaster,
    dispatcher: JoinHandle<()>,
    max_file_count: u32,
}

impl ConversionService {
    /// Opens the SQLite store named in `settings` and runs conversions with
    /// the configured converter executable. Must be called inside a Tokio
    /// runtime.
    pub fn open(settings: &Settings) -> Result<Self, JobError> {
        let db = Database::open(&settings.database_path)?;
        let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(db));
        Ok(Self::start(settings, store, Arc::new(ProcessExecutor)))
    }

    /// Wires the components together and starts the conversion dispatcher.
    pub fn start(
        settings: &Settings,
        store: Arc<dyn JobStore>,
        executor: Arc<dyn ConversionExecutor>,
    ) -> Self {
        let blobs = BlobStore::new(&settings.file_store);
        let events = StatusBroadcaster::default();

        let worker = ConversionWorker::new(
            Arc::clone(&store),
            blobs.clone(),
            settings.converter.clone(),
            executor,
            events.clone(),
            settings.max_concurrent_conversions,
        );
        let (trigger, dispatcher) = ConversionTrigger::start(worker);

        info!(
            "Conversion service started (file store: {}, converter: {})",
            blobs.root().display(),
            settings.converter.program
        );

        Self {
            tracker: Arc::new(UploadTracker::new(
                Arc::clone(&store),
                blobs.clone(),
                trigger,
                settings.max_upload_bytes,
            )),
            retrieval: Arc::new(Retrieval::new(Arc::clone(&store), blobs)),
            store,
            events,
            dispatcher,
            max_file_count: settings.max_file_count,
        }
    }

    /// Records a new job. A malformed request still yields a record, moved
    /// straight to `errored` with the reason in `error`.
    pub async fn submit_job(&self, request: JobRequest) -> Result<Job, JobError> {
        let validated = self.validate(&request);

        let record = match &validated {
            Ok(valid) => {
                let mut job = Job::new(valid.file_count, Some(valid.format));
                job.component_options = valid.component_options.clone();
                job.layout_options = valid.layout_options.clone();
                job
            }
            Err(_) => {
                let format = request
                    .output_format
                    .as_deref()
                    .and_then(|f| f.parse().ok());
                let file_count = request
                    .file_count
                    .and_then(|n| u32::try_from(n).ok())
                    .unwrap_or(0);
                Job::new(file_count, format)
            }
        };

        let (event, diagnosis) = match validated {
            Ok(_) => (JobEvent::SubmissionAccepted, None),
            Err(e) => (JobEvent::SubmissionMalformed, Some(e.to_string())),
        };

        let store = Arc::clone(&self.store);
        let job = run_blocking(move || {
            store.create(&record)?;
            store.update(&record.id, &mut |j| {
                j.apply(event, Utc::now())?;
                j.error = diagnosis.clone();
                Ok(())
            })
        })
        .await?;

        match &job.error {
            Some(reason) => warn!("Job {} rejected: {}", job.id, reason),
            None => info!(
                "Job {} submitted: {} file(s) to {}",
                job.id,
                job.file_count,
                job.output_format.map(|f| f.as_str()).unwrap_or("?")
            ),
        }
        self.events.publish(&job);
        Ok(job)
    }

    fn validate(&self, request: &JobRequest) -> Result<ValidSubmission, JobError> {
        let malformed = |reason: String| JobError::MalformedSubmission(reason);

        let format = match request.output_format.as_deref() {
            None => return Err(malformed("output_format is required".to_string())),
            Some(f) => f.parse::<OutputFormat>().map_err(malformed)?,
        };

        let file_count = match request.file_count {
            None => return Err(malformed("file_count is required".to_string())),
            Some(n) if n < 1 => {
                return Err(malformed(format!("file_count must be at least 1, got {}", n)))
            }
            Some(n) if n > i64::from(self.max_file_count) => {
                return Err(malformed(format!(
                    "file_count {} exceeds the limit of {}",
                    n, self.max_file_count
                )))
            }
            Some(n) => u32::try_from(n).map_err(|e| malformed(e.to_string()))?,
        };

        Ok(ValidSubmission {
            format,
            file_count,
            component_options: option_bag("component_options", &request.component_options)?,
            layout_options: option_bag("layout_options", &request.layout_options)?,
        })
    }

    /// Stores one input slot. The upload that completes the job hands it to
    /// the converter before returning [`UploadOutcome::Completed`]; that
    /// happens on a blocking thread, so dropping this future does not lose
    /// the hand-off.
    pub async fn upload(
        &self,
        job_id: &str,
        slot: u32,
        payload: Vec<u8>,
        content_type: &str,
    ) -> Result<UploadOutcome, JobError> {
        let tracker = Arc::clone(&self.tracker);
        let id = job_id.to_string();
        let declared = content_type.to_string();
        let receipt =
            run_blocking(move || tracker.submit_file(&id, slot, &payload, &declared)).await?;

        if receipt.status_changed {
            self.events.publish(&receipt.job);
        }
        Ok(receipt.outcome)
    }

    pub async fn status(&self, job_id: &str) -> Result<Job, JobError> {
        let retrieval = Arc::clone(&self.retrieval);
        let id = job_id.to_string();
        run_blocking(move || retrieval.status(&id)).await
    }

    pub async fn input(&self, job_id: &str, slot: u32) -> Result<Artifact, JobError> {
        let retrieval = Arc::clone(&self.retrieval);
        let id = job_id.to_string();
        run_blocking(move || retrieval.input(&id, slot)).await
    }

    pub async fn output(&self, job_id: &str, slot: u32) -> Result<Artifact, JobError> {
        let retrieval = Arc::clone(&self.retrieval);
        let id = job_id.to_string();
        run_blocking(move || retrieval.output(&id, slot)).await
    }

    pub async fn log(&self, job_id: &str) -> Result<JobLog, JobError> {
        let retrieval = Arc::clone(&self.retrieval);
        let id = job_id.to_string();
        let content = run_blocking(move || retrieval.log(&id)).await?;

        Ok(match content {
            LogContent::Stream { file, len } => JobLog::Stream {
                file: tokio::fs::File::from_std(file),
                len,
            },
            LogContent::Errored { message } => JobLog::Errored { message },
        })
    }

    /// Status events for every job, starting from now.
    pub fn subscribe(&self) -> broadcast::Receiver<JobStatusEvent> {
        self.events.subscribe()
    }

    /// Waits until `job_id` reaches a terminal status and returns it.
    pub async fn wait_for_terminal(&self, job_id: &str) -> Result<Job, JobError> {
        let mut events = self.subscribe();
        // Subscribe first, then check, so a transition in between is not lost.
        let job = self.status(job_id).await?;
        if job.status.is_terminal() {
            return Ok(job);
        }

        loop {
            match events.recv().await {
                Ok(event) if event.job_id == job_id && event.is_terminal() => {
                    return self.status(job_id).await;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    let job = self.status(job_id).await?;
                    if job.status.is_terminal() {
                        return Ok(job);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(JobError::Internal("status channel closed".to_string()));
                }
            }
        }
    }

    /// Stops accepting conversions and waits for in-flight ones to finish.
    pub async fn shutdown(self) {
        let Self {
            tracker,
            dispatcher,
            ..
        } = self;
        // The tracker holds the last trigger handle; the dispatcher drains
        // once it is gone.
        drop(tracker);
        if let Err(e) = dispatcher.await {
            error!("Conversion dispatcher failed: {}", e);
        }
        info!("Conversion service stopped");
    }
}

fn option_bag(
    name: &str,
    value: &Option<serde_json::Value>,
) -> Result<Option<OptionBag>, JobError> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Object(map)) => Ok(Some(map.clone())),
        Some(_) => Err(JobError::MalformedSubmission(format!(
            "{} must be a JSON object",
            name
        ))),
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, JobError>
where
    F: FnOnce() -> Result<T, JobError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| JobError::Internal(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::JobStatus;
    use crate::jobs::store::MemoryJobStore;
    use crate::error::ConversionError;
    use crate::jobs::trigger::Invocation;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct NeverRuns;

    #[async_trait]
    impl ConversionExecutor for NeverRuns {
        async fn run(&self, _invocation: &Invocation) -> Result<Option<i32>, ConversionError> {
            Ok(Some(0))
        }
    }

    fn service(dir: &TempDir) -> ConversionService {
        let settings = Settings {
            file_store: dir.path().join("files"),
            max_file_count: 4,
            ..Settings::default()
        };
        ConversionService::start(
            &settings,
            Arc::new(MemoryJobStore::new()),
            Arc::new(NeverRuns),
        )
    }

    #[tokio::test]
    async fn test_valid_submission_waits() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);

        let mut request = JobRequest::new(OutputFormat::Escher, 2);
        request.layout_options = Some(serde_json::json!({ "layout_id": "L1" }));
        let job = svc.submit_job(request).await.unwrap();

        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.file_count, 2);
        assert!(job.completion_time.is_none());
        assert_eq!(job.layout_options.unwrap()["layout_id"], "L1");
    }

    #[tokio::test]
    async fn test_malformed_submissions_are_recorded_as_errored() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);

        let requests = [
            JobRequest::default(),
            JobRequest {
                output_format: Some("pdf".to_string()),
                file_count: Some(1),
                ..JobRequest::default()
            },
            JobRequest {
                output_format: Some("sbml".to_string()),
                file_count: Some(0),
                ..JobRequest::default()
            },
            JobRequest {
                output_format: Some("sbml".to_string()),
                file_count: Some(5),
                ..JobRequest::default()
            },
            JobRequest {
                output_format: Some("sbgn".to_string()),
                file_count: Some(1),
                component_options: Some(serde_json::json!([1, 2])),
                ..JobRequest::default()
            },
        ];

        for request in requests {
            let job = svc.submit_job(request).await.unwrap();
            assert_eq!(job.status, JobStatus::Errored);
            assert!(job.completion_time.is_some());
            assert!(job.error.unwrap().starts_with("Malformed submission"));
            assert_eq!(svc.status(&job.id).await.unwrap().status, JobStatus::Errored);
        }
    }

    #[tokio::test]
    async fn test_submission_publishes_event() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let mut rx = svc.subscribe();

        let job = svc
            .submit_job(JobRequest::new(OutputFormat::Sbml, 1))
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id, job.id);
        assert_eq!(event.status, JobStatus::Waiting);
    }

    #[tokio::test]
    async fn test_handoff_failure_errors_job() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        svc.dispatcher.abort();

        let job = svc
            .submit_job(JobRequest::new(OutputFormat::Sbml, 1))
            .await
            .unwrap();
        // Wait until the aborted dispatcher has dropped its receiver.
        while !svc.dispatcher.is_finished() {
            tokio::task::yield_now().await;
        }

        let outcome = svc
            .upload(&job.id, 0, b"<sbml/>".to_vec(), "application/sbml+xml")
            .await
            .unwrap();
        assert_eq!(outcome, UploadOutcome::Completed);

        let job = svc.status(&job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Errored);
        assert_eq!(job.error.as_deref(), Some("Conversion worker is not running"));
    }
}
