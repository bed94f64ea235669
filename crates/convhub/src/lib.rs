pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod storage;
pub mod telemetry;

pub use config::{load_settings, ConverterSettings, Settings};
pub use db::{Database, DatabaseError};
pub use error::{
    ConfigError, ConversionError, ErrorKind, JobError, LoggingError, Result, StorageError,
};
pub use jobs::{
    ConversionExecutor, ConversionService, Invocation, Job, JobLog, JobRequest, JobStatus,
    JobStatusEvent, JobStore, OutputFormat, UploadOutcome,
};
pub use storage::{BlobStore, MediaType};
