//! Secondary-index verification, repair and rebuild.
//!
//! [`IndexReconciler`] recomputes, from raw data-row history, the versions each
//! index row must hold ([`compute_expected_mutations`]), classifies every index
//! row against them ([`verify_index_row`]) and writes corrective batches. Work
//! is partitioned per region ([`per_task_row_keys`]) and fanned out to a
//! bounded set of tokio tasks whose [`VerificationResult`]s are merged after
//! they all finish.

mod clock;
mod config;
mod error;
mod expected;
mod maintainer;
mod partition;
mod reconcile;
mod verify;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ReconcileConfig, DEFAULT_MAX_CONCURRENT_TASKS, DEFAULT_MAX_LOOKBACK_MS,
    DEFAULT_MAX_ROWS_PER_TASK, DEFAULT_PAGE_SIZE,
};
pub use error::{ReconcileError, StaleRegionTopology, TaskBatchFailure};
pub use expected::{
    compute_expected_mutations, ExpectedIndexRow, ExpectedKind, ExpectedVersion, TtlExpr,
};
pub use maintainer::{
    Columns, CoveredIndexMaintainer, IndexDefinition, IndexMaintainer, IndexRowState,
    IndexedColumn, VERIFIED_QUALIFIER, VERIFIED_VALUE,
};
pub use partition::{per_task_row_keys, TaskRowKeys};
pub use reconcile::{IndexPage, IndexReconciler};
pub use verify::{
    rebuild_mutations, repair_mutations, verify_index_row, PhaseCounters, RowVerdict,
    VerificationResult, VerifyContext, VerifyMode,
};
