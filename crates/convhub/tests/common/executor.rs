//! Scripted converter used in place of the real executable.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use convhub::{ConversionError, ConversionExecutor, Invocation, OutputFormat};

/// What the fake converter does when run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeOutcome {
    /// Converts every input and exits 0.
    Succeed,
    /// Converts only slot 0, then exits with the given code.
    FailWith(i32),
    /// Refuses to start.
    CannotLaunch,
}

pub struct FakeExecutor {
    outcome: FakeOutcome,
    delay: Duration,
    calls: AtomicUsize,
    invocations: Mutex<Vec<Invocation>>,
}

impl FakeExecutor {
    pub fn new(outcome: FakeOutcome) -> Self {
        Self {
            outcome,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Keeps the fake "running" for `delay` before it writes anything.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }
}

fn flag<'a>(invocation: &'a Invocation, name: &str) -> &'a str {
    let prefix = format!("--{}=", name);
    invocation
        .args
        .iter()
        .find_map(|a| a.strip_prefix(&prefix))
        .unwrap_or_else(|| panic!("missing --{} in {:?}", name, invocation.args))
}

fn slot_of(path: &Path) -> Option<u32> {
    path.file_name()?
        .to_str()?
        .split('.')
        .next()?
        .parse()
        .ok()
}

#[async_trait]
impl ConversionExecutor for FakeExecutor {
    async fn run(&self, invocation: &Invocation) -> Result<Option<i32>, ConversionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.invocations.lock().unwrap().push(invocation.clone());

        if self.outcome == FakeOutcome::CannotLaunch {
            return Err(ConversionError::LaunchFailure {
                program: invocation.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let format: OutputFormat = flag(invocation, "format").parse().unwrap();
        let input_dir = PathBuf::from(flag(invocation, "input"));
        let transient = PathBuf::from(flag(invocation, "output")).join("input");
        let log_file = PathBuf::from(flag(invocation, "log-file"));
        std::fs::create_dir_all(&transient).unwrap();

        let mut log = String::new();
        let mut inputs: Vec<PathBuf> = std::fs::read_dir(&input_dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        inputs.sort();

        for input in inputs {
            let Some(slot) = slot_of(&input) else { continue };
            if matches!(self.outcome, FakeOutcome::FailWith(_)) && slot != 0 {
                log.push_str(&format!("slot {}: conversion error\n", slot));
                continue;
            }
            let content = std::fs::read(&input).unwrap();
            let artifact = transient.join(format!("{}.{}", slot, format.artifact_extension()));
            let converted = [b"converted:".as_slice(), content.as_slice()].concat();
            std::fs::write(&artifact, converted).unwrap();
            log.push_str(&format!("slot {}: converted to {}\n", slot, format));
        }
        std::fs::write(&log_file, log).unwrap();

        Ok(match self.outcome {
            FakeOutcome::FailWith(code) => Some(code),
            _ => Some(0),
        })
    }
}
