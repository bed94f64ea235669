//! Conversion trigger: hands a `running` job to the external converter.
//!
//! [`ConversionTrigger::launch`] only enqueues the job id. A dedicated
//! dispatcher task drains the queue and spawns one task per job; a semaphore
//! caps how many converter processes run at once.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::Instrument;

use crate::config::ConverterSettings;
use crate::error::{ConversionError, JobError};
use crate::jobs::events::StatusBroadcaster;
use crate::jobs::model::{Job, OptionBag, OutputFormat};
use crate::jobs::state::JobEvent;
use crate::jobs::store::JobStore;
use crate::storage::{BlobStore, Section};

/// A fully resolved converter command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    /// Builds the command line for `job`: configured program and arguments,
    /// then format, directories, log file and every option-bag entry.
    pub fn for_job(
        converter: &ConverterSettings,
        blobs: &BlobStore,
        job: &Job,
        format: OutputFormat,
    ) -> Self {
        let mut args = converter.args.clone();
        args.push(format!("--format={}", format.converter_flag()));
        args.push(dir_flag("input", &blobs.section_dir(&job.id, Section::Input)));
        args.push(dir_flag("output", &blobs.section_dir(&job.id, Section::Output)));
        args.push(format!("--log-file={}", blobs.log_path(&job.id).display()));

        for bag in [&job.component_options, &job.layout_options]
            .into_iter()
            .flatten()
        {
            push_option_flags(&mut args, bag);
        }

        Self {
            program: converter.program.clone(),
            args,
        }
    }
}

fn dir_flag(name: &str, dir: &Path) -> String {
    format!("--{}={}{}", name, dir.display(), std::path::MAIN_SEPARATOR)
}

fn push_option_flags(args: &mut Vec<String>, bag: &OptionBag) {
    for (key, value) in bag {
        let value = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        args.push(format!("--{}={}", key.replace('_', "-"), value));
    }
}

/// Runs a converter invocation to completion.
#[async_trait]
pub trait ConversionExecutor: Send + Sync {
    /// Returns the exit code, or `None` when the process was killed by a
    /// signal. `Err` only when the process could not be started.
    async fn run(&self, invocation: &Invocation) -> Result<Option<i32>, ConversionError>;
}

/// Spawns the converter as a child process with detached stdio.
#[derive(Debug, Default, Clone)]
pub struct ProcessExecutor;

#[async_trait]
impl ConversionExecutor for ProcessExecutor {
    async fn run(&self, invocation: &Invocation) -> Result<Option<i32>, ConversionError> {
        let status = tokio::process::Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| ConversionError::LaunchFailure {
                program: invocation.program.clone(),
                source: e,
            })?;
        Ok(status.code())
    }
}

/// Everything a conversion run needs, shared by all runs.
pub struct ConversionWorker {
    store: Arc<dyn JobStore>,
    blobs: BlobStore,
    converter: ConverterSettings,
    executor: Arc<dyn ConversionExecutor>,
    events: StatusBroadcaster,
    permits: Arc<Semaphore>,
}

impl ConversionWorker {
    pub fn new(
        store: Arc<dyn JobStore>,
        blobs: BlobStore,
        converter: ConverterSettings,
        executor: Arc<dyn ConversionExecutor>,
        events: StatusBroadcaster,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            blobs,
            converter,
            executor,
            events,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    async fn convert(self: Arc<Self>, job_id: String) {
        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            error!("Job {}: conversion permits closed", job_id);
            return;
        };

        let job = match self.load(&job_id).await {
            Ok(job) => job,
            Err(e) => {
                error!("Job {}: cannot load record for conversion: {}", job_id, e);
                let diagnosis = Some(format!("Cannot load job record: {}", e));
                self.finish(&job_id, JobEvent::LaunchFailed, diagnosis, false)
                    .await;
                return;
            }
        };
        let Some(format) = job.output_format else {
            let diagnosis = Some("job has no output format".to_string());
            self.finish(&job_id, JobEvent::LaunchFailed, diagnosis, false)
                .await;
            return;
        };

        if let Err(e) = self.blobs.create_output_dir(&job_id) {
            self.finish(&job_id, JobEvent::LaunchFailed, Some(e.to_string()), false)
                .await;
            return;
        }

        let invocation = Invocation::for_job(&self.converter, &self.blobs, &job, format);
        info!("Job {}: launching {}", job_id, invocation.program);
        debug!("Job {}: arguments {:?}", job_id, invocation.args);

        let (event, diagnosis) = match self.executor.run(&invocation).await {
            Ok(Some(0)) => (JobEvent::StepSucceeded, None),
            Ok(code) => (
                JobEvent::StepFailed,
                Some(ConversionError::ExternalStepFailure { code }.to_string()),
            ),
            Err(e) => (JobEvent::LaunchFailed, Some(e.to_string())),
        };

        let launched = event != JobEvent::LaunchFailed;
        self.finish(&job_id, event, diagnosis, launched).await;
    }

    async fn load(&self, job_id: &str) -> Result<Job, JobError> {
        let store = Arc::clone(&self.store);
        let id = job_id.to_string();
        tokio::task::spawn_blocking(move || store.get(&id))
            .await
            .map_err(|e| JobError::Internal(e.to_string()))?
    }

    /// Records the terminal status, then moves any artifacts out of the
    /// transient directory. The event goes out last, so subscribers find the
    /// artifacts in place. A failed move never touches the recorded status.
    async fn finish(
        &self,
        job_id: &str,
        event: JobEvent,
        diagnosis: Option<String>,
        promote: bool,
    ) {
        let job = match record_outcome(Arc::clone(&self.store), job_id, event, diagnosis).await {
            Ok(job) => job,
            Err(e) => {
                error!("Job {}: failed to record {}: {}", job_id, event, e);
                return;
            }
        };
        info!("Job {}: {}", job_id, job.status);

        if promote {
            match self.blobs.promote_outputs(job_id) {
                Ok(moved) => debug!("Job {}: moved {} artifacts", job_id, moved),
                Err(e) => warn!("Job {}: {}", job_id, ConversionError::from(e)),
            }
        }
        self.events.publish(&job);
    }
}

/// Applies a background outcome to the job, recording `diagnosis` as its
/// error. Runs the store update on a blocking thread.
async fn record_outcome(
    store: Arc<dyn JobStore>,
    job_id: &str,
    event: JobEvent,
    diagnosis: Option<String>,
) -> Result<Job, JobError> {
    let id = job_id.to_string();
    tokio::task::spawn_blocking(move || {
        store.update(&id, &mut |job| {
            job.apply(event, Utc::now())?;
            if diagnosis.is_some() {
                job.error = diagnosis.clone();
            }
            Ok(())
        })
    })
    .await
    .map_err(|e| JobError::Internal(e.to_string()))?
}

/// Handle used to hand jobs to the conversion worker.
#[derive(Clone)]
pub struct ConversionTrigger {
    sender: mpsc::UnboundedSender<String>,
}

impl ConversionTrigger {
    /// Starts the dispatcher task. It runs until every trigger handle has
    /// been dropped, then waits for in-flight conversions before exiting.
    pub fn start(worker: ConversionWorker) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(dispatch(Arc::new(worker), receiver));
        (Self { sender }, handle)
    }

    /// Enqueues a job that has just entered `running`. Never blocks, so it
    /// is safe to call from synchronous code.
    pub fn launch(&self, job_id: &str) -> Result<(), ConversionError> {
        self.sender
            .send(job_id.to_string())
            .map_err(|_| ConversionError::WorkerUnavailable)
    }

    /// A trigger whose queue is read by the caller instead of a dispatcher.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

async fn dispatch(worker: Arc<ConversionWorker>, mut receiver: mpsc::UnboundedReceiver<String>) {
    let mut running = JoinSet::new();

    loop {
        tokio::select! {
            next = receiver.recv() => match next {
                Some(job_id) => {
                    let span = tracing::info_span!("conversion", job_id = %job_id);
                    running.spawn(Arc::clone(&worker).convert(job_id).instrument(span));
                }
                None => break,
            },
            Some(result) = running.join_next(), if !running.is_empty() => {
                if let Err(e) = result {
                    error!("Conversion task panicked: {}", e);
                }
            }
        }
    }

    while let Some(result) = running.join_next().await {
        if let Err(e) = result {
            error!("Conversion task panicked: {}", e);
        }
    }
    debug!("Conversion dispatcher stopped");
}
