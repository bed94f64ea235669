use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Sub-area of a job's directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Input,
    Output,
}

impl Section {
    fn dir_name(&self) -> &'static str {
        match self {
            Section::Input => "input",
            Section::Output => "output",
        }
    }
}

/// Name of the directory the converter mirrors its input directory into,
/// underneath the output directory.
const TRANSIENT_DIR: &str = "input";

const LOG_FILE: &str = "conversion.log";

/// Move a file from `src` to `dst`. Uses `rename` first (fast, atomic on same
/// filesystem). Falls back to copy + delete when rename fails, which handles
/// cross-device moves.
fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    std::fs::copy(src, dst).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    std::fs::remove_file(src).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Filesystem area holding job inputs, outputs and logs:
///
/// ```text
/// <root>/<job>/input/<slot>.<ext>
/// <root>/<job>/output/<slot>.<artifact ext>
/// <root>/<job>/conversion.log
/// ```
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn section_dir(&self, job_id: &str, section: Section) -> PathBuf {
        self.root.join(job_id).join(section.dir_name())
    }

    pub fn log_path(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id).join(LOG_FILE)
    }

    /// Finds the stored file for `slot`, whatever its extension.
    pub fn find(&self, job_id: &str, section: Section, slot: u32) -> Option<PathBuf> {
        let dir = self.section_dir(job_id, section);
        let prefix = format!("{}.", slot);
        let entries = std::fs::read_dir(&dir).ok()?;

        let mut matches: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
            .map(|e| e.path())
            .collect();
        // Deterministic pick if the converter produced several artifacts.
        matches.sort();
        matches.into_iter().next()
    }

    /// Writes the payload for an input slot, replacing any earlier upload to
    /// the same slot (including one stored under a different extension).
    /// The payload lands in a temporary sibling first and is renamed into
    /// place, so a reader never observes a partially written slot.
    pub fn write_input(
        &self,
        job_id: &str,
        slot: u32,
        extension: &str,
        content: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let dir = self.section_dir(job_id, Section::Input);
        ensure_directory(&dir)?;

        let target = dir.join(format!("{}.{}", slot, extension));
        let staging = dir.join(format!(".{}.{}.partial", slot, extension));

        let mut file = std::fs::File::create(&staging).map_err(|e| StorageError::WriteFile {
            path: staging.clone(),
            source: e,
        })?;
        file.write_all(content)
            .and_then(|_| file.sync_all())
            .map_err(|e| StorageError::WriteFile {
                path: staging.clone(),
                source: e,
            })?;
        drop(file);

        if let Some(previous) = self.find(job_id, Section::Input, slot) {
            if previous != target {
                std::fs::remove_file(&previous).map_err(|e| StorageError::WriteFile {
                    path: previous.clone(),
                    source: e,
                })?;
            }
        }

        std::fs::rename(&staging, &target).map_err(|e| StorageError::MoveFile {
            from: staging,
            to: target.clone(),
            source: e,
        })?;

        Ok(target)
    }

    /// Creates the output directory for a conversion run.
    pub fn create_output_dir(&self, job_id: &str) -> Result<PathBuf, StorageError> {
        let dir = self.section_dir(job_id, Section::Output);
        ensure_directory(&dir)?;
        Ok(dir)
    }

    /// Moves artifacts the converter left in `output/input/` up into
    /// `output/` and removes the transient directory. Returns how many files
    /// were moved; a missing transient directory is not an error.
    pub fn promote_outputs(&self, job_id: &str) -> Result<usize, StorageError> {
        let output_dir = self.section_dir(job_id, Section::Output);
        let transient = output_dir.join(TRANSIENT_DIR);

        let entries = match std::fs::read_dir(&transient) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(StorageError::ReadFile {
                    path: transient,
                    source: e,
                })
            }
        };

        let mut moved = 0;
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::ReadFile {
                path: transient.clone(),
                source: e,
            })?;
            let src = entry.path();
            if !src.is_file() {
                continue;
            }
            let dst = output_dir.join(entry.file_name());
            move_file(&src, &dst)?;
            moved += 1;
        }

        std::fs::remove_dir(&transient).map_err(|e| StorageError::MoveFile {
            from: transient.clone(),
            to: output_dir,
            source: e,
        })?;

        Ok(moved)
    }
}

fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}
