use std::fmt;

use crate::verify::VerificationResult;

/// A row key sorted past the last bounded region end key of the boundary
/// snapshot in hand. The caller retries with fresh boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleRegionTopology {
    pub table: String,
    pub row_key: Vec<u8>,
    pub last_end_key: Vec<u8>,
}

impl fmt::Display for StaleRegionTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "row key {:02x?} of '{}' is beyond the last known region end {:02x?}; region boundaries are stale",
            self.row_key, self.table, self.last_end_key
        )
    }
}

impl std::error::Error for StaleRegionTopology {}

/// Failures that abort one reconciliation task or the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// A repair batch was rejected by the index table. Nothing is retried.
    BatchMutateFailed {
        table: String,
        region: usize,
        rows: usize,
        reason: String,
    },
    /// A task ended without a result (panicked or was aborted).
    TaskFailed { task: usize, reason: String },
    /// The hosting region is closing or splitting; work stopped at a page
    /// boundary.
    RegionClosing,
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::BatchMutateFailed {
                table,
                region,
                rows,
                reason,
            } => write!(
                f,
                "repair batch of {rows} rows for region {region} of '{table}' failed: {reason}"
            ),
            ReconcileError::TaskFailed { task, reason } => {
                write!(f, "reconcile task {task} failed: {reason}")
            }
            ReconcileError::RegionClosing => {
                write!(f, "region is closing; index reconciliation aborted")
            }
        }
    }
}

impl std::error::Error for ReconcileError {}

/// One or more tasks of a batch failed. Results of the tasks that finished
/// are still reported in `completed`.
#[derive(Debug)]
pub struct TaskBatchFailure {
    pub failures: Vec<anyhow::Error>,
    pub completed: VerificationResult,
}

impl fmt::Display for TaskBatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} reconcile task(s) failed", self.failures.len())?;
        if let Some(first) = self.failures.first() {
            write!(f, "; first failure: {first:#}")?;
        }
        Ok(())
    }
}

impl std::error::Error for TaskBatchFailure {}
