//! Job plans: YAML descriptions of work to push through a queue.
//!
//! ```yaml
//! jobs:
//!   - label: save-model
//!     priority: high
//!     sleep_ms: 5
//!   - label: refresh-icons
//!     priority: low
//!     fail: declared
//!     handled: true
//! ```

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serialq_core::{CancelToken, Cancelled, Failure, Priority, QueueAction};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    /// Return the job's declared error.
    Declared,
    /// Panic inside the work function.
    Panic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub label: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub sleep_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<FailMode>,
    /// The job's failure handler absorbs declared failures.
    #[serde(default)]
    pub handled: bool,
    /// Kill the job before the queue starts dispatching.
    #[serde(default)]
    pub kill: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub jobs: Vec<JobSpec>,
}

impl Plan {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read plan {}", path.display()))?;
        let plan: Plan = serde_yaml::from_str(&data)
            .with_context(|| format!("failed to parse plan {}", path.display()))?;
        if plan.jobs.is_empty() {
            anyhow::bail!("plan {} has no jobs", path.display());
        }
        Ok(plan)
    }
}

// ---------------------------------------------------------------------------
// JobAction
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job '{0}' failed")]
    Failed(String),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Shared record of the order in which jobs actually ran, as plan indices.
pub type RunLog = Arc<Mutex<Vec<usize>>>;

pub struct JobAction {
    index: usize,
    spec: JobSpec,
    log: RunLog,
}

impl JobAction {
    pub fn new(index: usize, spec: JobSpec, log: RunLog) -> Self {
        Self { index, spec, log }
    }
}

impl QueueAction for JobAction {
    /// Milliseconds the job slept.
    type Output = u64;
    type Error = JobError;

    fn run(&mut self, cancel: &CancelToken) -> Result<u64, JobError> {
        self.log.lock().push(self.index);
        for _ in 0..self.spec.sleep_ms {
            cancel.check()?;
            thread::sleep(Duration::from_millis(1));
        }
        match self.spec.fail {
            None => Ok(self.spec.sleep_ms),
            Some(FailMode::Declared) => Err(JobError::Failed(self.spec.label.clone())),
            Some(FailMode::Panic) => panic!("job '{}' panicked", self.spec.label),
        }
    }

    fn failure_handler(&mut self, failure: &Failure<JobError>) -> bool {
        self.spec.handled && !failure.is_fault()
    }
}
