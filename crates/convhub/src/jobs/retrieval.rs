//! Read-only access to job status, inputs, outputs and the conversion log.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{JobError, StorageError};
use crate::jobs::model::{Job, JobStatus};
use crate::jobs::store::JobStore;
use crate::storage::{BlobStore, MediaType, Section};

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// A stored file together with the content type it is served as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub content_type: String,
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

/// What `log` yields for a job that has finished.
#[derive(Debug)]
pub enum LogContent {
    /// The converter's log file, opened for streaming.
    Stream { file: std::fs::File, len: u64 },
    /// The conversion never ran; carries the recorded diagnosis.
    Errored { message: String },
}

pub struct Retrieval {
    store: Arc<dyn JobStore>,
    blobs: BlobStore,
}

impl Retrieval {
    pub fn new(store: Arc<dyn JobStore>, blobs: BlobStore) -> Self {
        Self { store, blobs }
    }

    pub fn status(&self, job_id: &str) -> Result<Job, JobError> {
        self.store.get(job_id)
    }

    pub fn input(&self, job_id: &str, slot: u32) -> Result<Artifact, JobError> {
        let job = self.store.get(job_id)?;
        let not_found = || JobError::InputNotFound {
            job_id: job.id.clone(),
            slot,
        };
        if !job.has_upload(slot) {
            return Err(not_found());
        }

        let path = self
            .blobs
            .find(&job.id, Section::Input, slot)
            .ok_or_else(not_found)?;
        let content_type = extension_of(&path)
            .and_then(MediaType::for_extension)
            .map(|m| m.essence())
            .unwrap_or(FALLBACK_CONTENT_TYPE);

        read_artifact(path, content_type)
    }

    /// Output for `slot`. After a `failed` run outputs are best-effort:
    /// whatever the converter managed to write is served.
    pub fn output(&self, job_id: &str, slot: u32) -> Result<Artifact, JobError> {
        let job = self.store.get(job_id)?;
        let not_found = || JobError::OutputNotFound {
            job_id: job.id.clone(),
            slot,
        };
        if !job.contains_slot(slot) {
            return Err(not_found());
        }
        ensure_finished(&job)?;

        let path = self
            .blobs
            .find(&job.id, Section::Output, slot)
            .ok_or_else(not_found)?;
        let content_type = job
            .output_format
            .map(|f| f.content_type())
            .unwrap_or(FALLBACK_CONTENT_TYPE);

        read_artifact(path, content_type)
    }

    pub fn log(&self, job_id: &str) -> Result<LogContent, JobError> {
        let job = self.store.get(job_id)?;
        ensure_finished(&job)?;

        if job.status == JobStatus::Errored {
            return Ok(LogContent::Errored {
                message: job
                    .error
                    .unwrap_or_else(|| "conversion did not run".to_string()),
            });
        }

        let path = self.blobs.log_path(&job.id);
        let file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(JobError::LogNotFound(job.id));
            }
            Err(e) => return Err(StorageError::ReadFile { path, source: e }.into()),
        };
        let len = file
            .metadata()
            .map_err(|e| StorageError::ReadFile {
                path: path.clone(),
                source: e,
            })?
            .len();

        Ok(LogContent::Stream { file, len })
    }
}

fn ensure_finished(job: &Job) -> Result<(), JobError> {
    if job.status.is_terminal() {
        Ok(())
    } else {
        Err(JobError::NotReady {
            job_id: job.id.clone(),
            status: job.status,
        })
    }
}

fn extension_of(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

fn read_artifact(path: PathBuf, content_type: &str) -> Result<Artifact, JobError> {
    let bytes = std::fs::read(&path).map_err(|e| StorageError::ReadFile {
        path: path.clone(),
        source: e,
    })?;
    Ok(Artifact {
        content_type: content_type.to_string(),
        path,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::OutputFormat;
    use crate::jobs::store::MemoryJobStore;
    use std::io::Read;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: Arc<dyn JobStore>,
        blobs: BlobStore,
        retrieval: Retrieval,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let blobs = BlobStore::new(dir.path());
        let retrieval = Retrieval::new(Arc::clone(&store), blobs.clone());
        Fixture {
            _dir: dir,
            store,
            blobs,
            retrieval,
        }
    }

    fn job_with_status(store: &Arc<dyn JobStore>, status: JobStatus) -> Job {
        let mut job = Job::new(2, Some(OutputFormat::Escher));
        job.status = status;
        if status == JobStatus::Errored {
            job.error = Some("Failed to launch converter 'x'".to_string());
        }
        store.create(&job).unwrap();
        job
    }

    fn write_output(blobs: &BlobStore, job_id: &str, name: &str, content: &[u8]) {
        let dir = blobs.create_output_dir(job_id).unwrap();
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_status_unknown_job() {
        let fx = fixture();
        assert!(matches!(
            fx.retrieval.status("missing"),
            Err(JobError::JobNotFound(_))
        ));
    }

    #[test]
    fn test_input_content_type_follows_extension() {
        let fx = fixture();
        let mut job = Job::new(2, Some(OutputFormat::Escher));
        job.status = JobStatus::Waiting;
        job.record_upload(1);
        fx.store.create(&job).unwrap();
        fx.blobs.write_input(&job.id, 1, "json", b"{}").unwrap();

        let artifact = fx.retrieval.input(&job.id, 1).unwrap();
        assert_eq!(artifact.content_type, "application/json");
        assert_eq!(artifact.bytes, b"{}");

        assert!(matches!(
            fx.retrieval.input(&job.id, 0),
            Err(JobError::InputNotFound { slot: 0, .. })
        ));
        assert!(matches!(
            fx.retrieval.input(&job.id, 2),
            Err(JobError::InputNotFound { slot: 2, .. })
        ));
    }

    #[test]
    fn test_unrecorded_payload_is_not_served() {
        let fx = fixture();
        let job = job_with_status(&fx.store, JobStatus::Waiting);
        fx.blobs.write_input(&job.id, 0, "xml", b"<a/>").unwrap();

        assert!(matches!(
            fx.retrieval.input(&job.id, 0),
            Err(JobError::InputNotFound { slot: 0, .. })
        ));
    }

    #[test]
    fn test_output_range_checked_before_status() {
        let fx = fixture();
        let job = job_with_status(&fx.store, JobStatus::Running);

        assert!(matches!(
            fx.retrieval.output(&job.id, 5),
            Err(JobError::OutputNotFound { slot: 5, .. })
        ));
        assert!(matches!(
            fx.retrieval.output(&job.id, 0),
            Err(JobError::NotReady {
                status: JobStatus::Running,
                ..
            })
        ));
    }

    #[test]
    fn test_output_after_completion() {
        let fx = fixture();
        let job = job_with_status(&fx.store, JobStatus::Completed);
        write_output(&fx.blobs, &job.id, "0.escher.json", br#"{"map":[]}"#);

        let artifact = fx.retrieval.output(&job.id, 0).unwrap();
        assert_eq!(artifact.content_type, "application/json");
        assert_eq!(artifact.bytes, br#"{"map":[]}"#);

        assert!(matches!(
            fx.retrieval.output(&job.id, 1),
            Err(JobError::OutputNotFound { slot: 1, .. })
        ));
    }

    #[test]
    fn test_partial_outputs_after_failure() {
        let fx = fixture();
        let job = job_with_status(&fx.store, JobStatus::Failed);
        write_output(&fx.blobs, &job.id, "1.escher.json", b"{}");

        assert!(fx.retrieval.output(&job.id, 1).is_ok());
        assert!(fx.retrieval.output(&job.id, 0).is_err());
    }

    #[test]
    fn test_log_states() {
        let fx = fixture();

        let waiting = job_with_status(&fx.store, JobStatus::Waiting);
        assert!(matches!(
            fx.retrieval.log(&waiting.id),
            Err(JobError::NotReady { .. })
        ));

        let errored = job_with_status(&fx.store, JobStatus::Errored);
        match fx.retrieval.log(&errored.id).unwrap() {
            LogContent::Errored { message } => assert!(message.contains("launch")),
            other => panic!("expected errored payload, got {:?}", other),
        }

        let failed = job_with_status(&fx.store, JobStatus::Failed);
        assert!(matches!(
            fx.retrieval.log(&failed.id),
            Err(JobError::LogNotFound(_))
        ));

        std::fs::create_dir_all(fx.blobs.log_path(&failed.id).parent().unwrap()).unwrap();
        std::fs::write(fx.blobs.log_path(&failed.id), b"line 1\nline 2\n").unwrap();
        match fx.retrieval.log(&failed.id).unwrap() {
            LogContent::Stream { mut file, len } => {
                assert_eq!(len, 14);
                let mut text = String::new();
                file.read_to_string(&mut text).unwrap();
                assert_eq!(text, "line 1\nline 2\n");
            }
            other => panic!("expected stream, got {:?}", other),
        }
    }
}
