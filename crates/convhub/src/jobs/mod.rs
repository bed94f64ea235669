pub mod events;
pub mod model;
pub mod retrieval;
pub mod service;
pub mod state;
pub mod store;
pub mod trigger;
pub mod upload;

pub use events::{JobStatusEvent, StatusBroadcaster};
pub use model::{Job, JobRequest, JobStatus, OptionBag, OutputFormat};
pub use retrieval::{Artifact, LogContent, Retrieval};
pub use service::{ConversionService, JobLog};
pub use state::JobEvent;
pub use store::{JobStore, MemoryJobStore, SqliteJobStore};
pub use trigger::{
    ConversionExecutor, ConversionTrigger, ConversionWorker, Invocation, ProcessExecutor,
};
pub use upload::{UploadOutcome, UploadReceipt, UploadTracker};
