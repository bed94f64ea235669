//! Test harness for isolated service instances.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use convhub::db::Database;
use convhub::jobs::SqliteJobStore;
use convhub::{ConversionExecutor, ConversionService, JobStore, Settings};

use super::executor::{FakeExecutor, FakeOutcome};

pub struct TestHarness {
    /// Holds the database file and blob area.
    temp_dir: TempDir,
    pub settings: Settings,
    pub store: Arc<dyn JobStore>,
    pub executor: Arc<FakeExecutor>,
    pub service: ConversionService,
}

impl TestHarness {
    /// Service backed by SQLite in a temp directory and a converter that
    /// behaves as `outcome` says. Must be called inside a Tokio runtime.
    pub fn new(outcome: FakeOutcome) -> Self {
        Self::with_executor(FakeExecutor::new(outcome))
    }

    pub fn with_executor(executor: FakeExecutor) -> Self {
        Self::with_store(executor, |store| store)
    }

    /// Like [`TestHarness::with_executor`], with the SQLite store passed
    /// through `wrap` before the service sees it.
    pub fn with_store<W>(executor: FakeExecutor, wrap: W) -> Self
    where
        W: FnOnce(Arc<dyn JobStore>) -> Arc<dyn JobStore>,
    {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let settings = Self::settings_in(temp_dir.path());
        let executor = Arc::new(executor);
        let store = wrap(Self::open_store(&settings.database_path));

        let service = ConversionService::start(
            &settings,
            Arc::clone(&store),
            Arc::clone(&executor) as Arc<dyn ConversionExecutor>,
        );

        Self {
            temp_dir,
            settings,
            store,
            executor,
            service,
        }
    }

    pub fn settings_in(base: &Path) -> Settings {
        Settings {
            database_path: base.join("data").join("convhub.db"),
            file_store: base.join("files"),
            max_file_count: 16,
            max_upload_bytes: 1024 * 1024,
            ..Settings::default()
        }
    }

    pub fn open_store(path: &Path) -> Arc<dyn JobStore> {
        let db = Database::open(path).expect("Failed to open test database");
        Arc::new(SqliteJobStore::new(db))
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.settings.file_store.join(job_id)
    }

    /// Splits the harness so the service can be shared across tasks while
    /// the temp directory stays alive.
    pub fn into_parts(self) -> (TempDir, Arc<FakeExecutor>, ConversionService) {
        (self.temp_dir, self.executor, self.service)
    }
}
