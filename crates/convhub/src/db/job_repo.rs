//! Job repository: row mapping and statements for the `jobs` table.
//!
//! Functions take a `&Connection` so they compose inside a transaction
//! opened by the caller.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;
use crate::jobs::model::{Job, JobStatus, OptionBag, OutputFormat};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub status: String,
    pub output_format: Option<String>,
    pub file_count: u32,
    pub files_uploaded: u32,
    /// JSON array of uploaded slot indices.
    pub uploaded_slots: String,
    pub submission_time: String,
    pub completion_time: Option<String>,
    pub component_options: Option<String>,
    pub layout_options: Option<String>,
    pub error: Option<String>,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            status: row.get("status")?,
            output_format: row.get("output_format")?,
            file_count: row.get("file_count")?,
            files_uploaded: row.get("files_uploaded")?,
            uploaded_slots: row.get("uploaded_slots")?,
            submission_time: row.get("submission_time")?,
            completion_time: row.get("completion_time")?,
            component_options: row.get("component_options")?,
            layout_options: row.get("layout_options")?,
            error: row.get("error")?,
            updated_at: row.get("updated_at")?,
        })
    }

    pub fn from_job(job: &Job) -> Result<Self, DatabaseError> {
        Ok(Self {
            id: job.id.clone(),
            status: job.status.as_str().to_string(),
            output_format: job.output_format.map(|f| f.as_str().to_string()),
            file_count: job.file_count,
            files_uploaded: job.files_uploaded,
            uploaded_slots: serde_json::to_string(&job.uploaded_slots).map_err(|e| {
                DatabaseError::CorruptRow {
                    id: job.id.clone(),
                    reason: e.to_string(),
                }
            })?,
            submission_time: job.submission_time.to_rfc3339(),
            completion_time: job.completion_time.map(|t| t.to_rfc3339()),
            component_options: encode_bag(&job.id, job.component_options.as_ref())?,
            layout_options: encode_bag(&job.id, job.layout_options.as_ref())?,
            error: job.error.clone(),
            updated_at: Utc::now().to_rfc3339(),
        })
    }

    pub fn into_job(self) -> Result<Job, DatabaseError> {
        let corrupt = |reason: String| DatabaseError::CorruptRow {
            id: self.id.clone(),
            reason,
        };

        let status: JobStatus = self.status.parse().map_err(corrupt)?;
        let output_format = match self.output_format.as_deref() {
            Some(s) => Some(s.parse::<OutputFormat>().map_err(corrupt)?),
            None => None,
        };
        let submission_time = parse_timestamp(&self.submission_time).map_err(corrupt)?;
        let completion_time = match self.completion_time.as_deref() {
            Some(s) => Some(parse_timestamp(s).map_err(corrupt)?),
            None => None,
        };
        let uploaded_slots = serde_json::from_str(&self.uploaded_slots)
            .map_err(|e| corrupt(format!("bad slot list: {}", e)))?;
        let component_options = decode_bag(self.component_options.as_deref()).map_err(corrupt)?;
        let layout_options = decode_bag(self.layout_options.as_deref()).map_err(corrupt)?;

        Ok(Job {
            id: self.id,
            status,
            file_count: self.file_count,
            files_uploaded: self.files_uploaded,
            uploaded_slots,
            submission_time,
            completion_time,
            output_format,
            component_options,
            layout_options,
            error: self.error,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{}': {}", s, e))
}

fn encode_bag(id: &str, bag: Option<&OptionBag>) -> Result<Option<String>, DatabaseError> {
    bag.map(serde_json::to_string)
        .transpose()
        .map_err(|e| DatabaseError::CorruptRow {
            id: id.to_string(),
            reason: e.to_string(),
        })
}

fn decode_bag(s: Option<&str>) -> Result<Option<OptionBag>, String> {
    s.map(serde_json::from_str::<OptionBag>)
        .transpose()
        .map_err(|e| format!("bad option bag: {}", e))
}

/// Inserts a new job row.
pub fn insert(conn: &Connection, job: &JobRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO jobs (id, status, output_format, file_count, files_uploaded, uploaded_slots,
         submission_time, completion_time, component_options, layout_options, error, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            job.id,
            job.status,
            job.output_format,
            job.file_count,
            job.files_uploaded,
            job.uploaded_slots,
            job.submission_time,
            job.completion_time,
            job.component_options,
            job.layout_options,
            job.error,
            job.updated_at,
        ],
    )?;
    Ok(())
}

/// Writes back the mutable columns of a job. `id`, `file_count`,
/// `output_format` and `submission_time` are fixed at creation.
/// Returns the number of rows touched.
pub fn update(conn: &Connection, job: &JobRow) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET status=?2, files_uploaded=?3, uploaded_slots=?4, completion_time=?5,
         component_options=?6, layout_options=?7, error=?8, updated_at=?9
         WHERE id=?1",
        params![
            job.id,
            job.status,
            job.files_uploaded,
            job.uploaded_slots,
            job.completion_time,
            job.component_options,
            job.layout_options,
            job.error,
            job.updated_at,
        ],
    )?;
    Ok(changed)
}

/// Finds a job by its ID.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], JobRow::from_row)
        .optional()?;
    Ok(row)
}
