//! Job records and the closed enumerations they are built from.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque pass-through parameters for the converter. Never interpreted here.
pub type OptionBag = serde_json::Map<String, serde_json::Value>;

/// Status of a conversion job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Record created, submission not yet validated.
    Started,
    /// Waiting for input files to be uploaded.
    Waiting,
    /// External converter has been handed the job.
    Running,
    /// Converter exited with code 0.
    Completed,
    /// Converter exited with a non-zero code.
    Failed,
    /// Conversion never ran (malformed submission or launch failure).
    Errored,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Started => "started",
            JobStatus::Waiting => "waiting",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Errored => "errored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Errored
        )
    }

    /// Uploads are recorded only before the conversion is handed off.
    pub fn accepts_uploads(&self) -> bool {
        matches!(self, JobStatus::Started | JobStatus::Waiting)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(JobStatus::Started),
            "waiting" => Ok(JobStatus::Waiting),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "errored" => Ok(JobStatus::Errored),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Target format of a conversion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Sbml,
    Sbgn,
    Escher,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Sbml => "sbml",
            OutputFormat::Sbgn => "sbgn",
            OutputFormat::Escher => "escher",
        }
    }

    /// Value of the converter's `--format` flag.
    pub fn converter_flag(&self) -> &'static str {
        match self {
            OutputFormat::Sbml => "SBML",
            OutputFormat::Sbgn => "SBGN",
            OutputFormat::Escher => "Escher",
        }
    }

    /// Suffix the converter appends to produced artifacts.
    pub fn artifact_extension(&self) -> &'static str {
        match self {
            OutputFormat::Sbml => "sbml.xml",
            OutputFormat::Sbgn => "sbgn.xml",
            OutputFormat::Escher => "escher.json",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Sbml | OutputFormat::Sbgn => "application/xml",
            OutputFormat::Escher => "application/json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sbml" => Ok(OutputFormat::Sbml),
            "sbgn" => Ok(OutputFormat::Sbgn),
            "escher" => Ok(OutputFormat::Escher),
            other => Err(format!("unknown output format '{}'", other)),
        }
    }
}

/// A conversion job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub file_count: u32,
    pub files_uploaded: u32,
    /// Slots with a recorded upload. `files_uploaded` is its size.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub uploaded_slots: BTreeSet<u32>,
    pub submission_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    /// Absent only for jobs rejected at submission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<OutputFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_options: Option<OptionBag>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout_options: Option<OptionBag>,
    /// Diagnosis recorded when the job ends `errored` or `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    /// Creates a fresh `started` record with a new random id.
    pub fn new(file_count: u32, output_format: Option<OutputFormat>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::Started,
            file_count,
            files_uploaded: 0,
            uploaded_slots: BTreeSet::new(),
            submission_time: Utc::now(),
            completion_time: None,
            output_format,
            component_options: None,
            layout_options: None,
            error: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.files_uploaded == self.file_count
    }

    pub fn contains_slot(&self, slot: u32) -> bool {
        slot < self.file_count
    }

    pub fn has_upload(&self, slot: u32) -> bool {
        self.uploaded_slots.contains(&slot)
    }

    /// Marks `slot` as uploaded. Returns false if it already was.
    pub fn record_upload(&mut self, slot: u32) -> bool {
        let added = self.uploaded_slots.insert(slot);
        self.files_uploaded = self.uploaded_slots.len() as u32;
        added
    }
}

/// Job submission as received from a client. Deliberately loose so that a
/// malformed submission can still be recorded as an `errored` job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(default)]
    pub output_format: Option<String>,
    #[serde(default)]
    pub file_count: Option<i64>,
    #[serde(default)]
    pub component_options: Option<serde_json::Value>,
    #[serde(default)]
    pub layout_options: Option<serde_json::Value>,
}

impl JobRequest {
    pub fn new(output_format: OutputFormat, file_count: u32) -> Self {
        Self {
            output_format: Some(output_format.as_str().to_string()),
            file_count: Some(i64::from(file_count)),
            component_options: None,
            layout_options: None,
        }
    }
}
