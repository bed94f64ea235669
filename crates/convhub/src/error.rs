use std::path::PathBuf;
use thiserror::Error;

use crate::jobs::model::JobStatus;
use crate::jobs::state::JobEvent;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Settings validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{directive}': {reason}")]
    Filter { directive: String, reason: String },

    #[error("Failed to install log subscriber: {0}")]
    Install(String),
}

/// Coarse classification of [`JobError`], for callers that map errors onto
/// a transport (HTTP status codes, CLI exit codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidSlot,
    UnsupportedMediaType,
    MalformedSubmission,
    UploadsClosed,
    PayloadTooLarge,
    NotReady,
    InvalidTransition,
    Unavailable,
    Internal,
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("No input uploaded for slot {slot} of job {job_id}")]
    InputNotFound { job_id: String, slot: u32 },

    #[error("No output produced for slot {slot} of job {job_id}")]
    OutputNotFound { job_id: String, slot: u32 },

    #[error("No conversion log for job {0}")]
    LogNotFound(String),

    #[error("Slot {slot} is out of range for job {job_id} ({file_count} files declared)")]
    InvalidSlot {
        job_id: String,
        slot: u32,
        file_count: u32,
    },

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Malformed submission: {0}")]
    MalformedSubmission(String),

    #[error("Job {job_id} no longer accepts uploads (status: {status})")]
    UploadsClosed { job_id: String, status: JobStatus },

    #[error("Payload of {size} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: u64 },

    #[error("Job {job_id} is not ready (status: {status})")]
    NotReady { job_id: String, status: JobStatus },

    #[error("Invalid transition from {from} on {event}")]
    InvalidTransition { from: JobStatus, event: JobEvent },

    #[error("Job store error: {0}")]
    Store(#[from] crate::db::DatabaseError),

    #[error("Blob storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::JobNotFound(_)
            | JobError::InputNotFound { .. }
            | JobError::OutputNotFound { .. }
            | JobError::LogNotFound(_) => ErrorKind::NotFound,
            JobError::InvalidSlot { .. } => ErrorKind::InvalidSlot,
            JobError::UnsupportedMediaType(_) => ErrorKind::UnsupportedMediaType,
            JobError::MalformedSubmission(_) => ErrorKind::MalformedSubmission,
            JobError::UploadsClosed { .. } => ErrorKind::UploadsClosed,
            JobError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            JobError::NotReady { .. } => ErrorKind::NotReady,
            JobError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            JobError::Store(_) => ErrorKind::Unavailable,
            JobError::Storage(_) | JobError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True for errors caused by the request itself. Store failures and
    /// invalid transitions are server-side and never client-actionable.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotFound
                | ErrorKind::InvalidSlot
                | ErrorKind::UnsupportedMediaType
                | ErrorKind::MalformedSubmission
                | ErrorKind::UploadsClosed
                | ErrorKind::PayloadTooLarge
                | ErrorKind::NotReady
        )
    }
}

pub type Result<T> = std::result::Result<T, JobError>;

/// Outcome of a background conversion run other than success.
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Failed to launch converter '{program}': {source}")]
    LaunchFailure {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Conversion worker is not running")]
    WorkerUnavailable,

    #[error("{}", describe_exit(.code))]
    ExternalStepFailure { code: Option<i32> },

    #[error("Failed to move conversion artifacts: {0}")]
    ArtifactMoveFailure(#[from] StorageError),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("Converter exited with code {}", code),
        None => "Converter was terminated by a signal".to_string(),
    }
}
