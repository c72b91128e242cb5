//! Outcome of a sync cycle.

use crate::task::TaskSummary;
use std::fmt;

/// Every task of a cycle with its outcome, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResult {
    pub tasks: Vec<TaskSummary>,
    pub failed: Vec<TaskSummary>,
}

impl SyncResult {
    pub(crate) fn new(mut tasks: Vec<TaskSummary>) -> Self {
        tasks.sort_by_key(|t| t.id);
        let failed = tasks.iter().filter(|t| t.error.is_some()).cloned().collect();
        Self { tasks, failed }
    }

    /// Whether every task succeeded.
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Returned by [`crate::SyncClient::sync`] when any task failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailed {
    pub result: SyncResult,
}

impl SyncFailed {
    pub fn failed(&self) -> &[TaskSummary] {
        &self.result.failed
    }
}

impl fmt::Display for SyncFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sync() failed with task errors. Count: {}", self.result.failed.len())?;
        for task in &self.result.failed {
            if let Some(error) = &task.error {
                write!(f, "\n|- {} # {}", task.label, error)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for SyncFailed {}
