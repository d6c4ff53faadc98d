use anyhow::Result;
use holo_scan::{parse_bool, parse_u64, parse_usize, ScanPlannerConfig};

pub const DEFAULT_PAGE_SIZE: usize = 1_000;
pub const DEFAULT_MAX_ROWS_PER_TASK: usize = 2_048;
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 8;
pub const DEFAULT_MAX_LOOKBACK_MS: u64 = 24 * 60 * 60 * 1_000;

/// Paging, fan-out and history limits of index reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Rows read per page by the region drivers.
    pub page_size: usize,
    /// Largest row-key subset handed to one task.
    pub max_rows_per_task: usize,
    pub max_concurrent_tasks: usize,
    /// Width of the window in which row history is guaranteed to be retained.
    pub max_lookback_ms: u64,
    pub strict_ttl: bool,
    pub planner: ScanPlannerConfig,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_rows_per_task: DEFAULT_MAX_ROWS_PER_TASK,
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            max_lookback_ms: DEFAULT_MAX_LOOKBACK_MS,
            strict_ttl: true,
            planner: ScanPlannerConfig::default(),
        }
    }
}

impl ReconcileConfig {
    /// Loads settings from `HOLO_INDEX_RECONCILE_*` (and the planner's
    /// `HOLO_SCAN_*`) environment variables.
    pub fn from_env() -> Result<Self> {
        let page_size = parse_usize(
            std::env::var("HOLO_INDEX_RECONCILE_PAGE_SIZE").ok(),
            DEFAULT_PAGE_SIZE,
        )?
        .max(1);
        let max_rows_per_task = parse_usize(
            std::env::var("HOLO_INDEX_RECONCILE_MAX_ROWS_PER_TASK").ok(),
            DEFAULT_MAX_ROWS_PER_TASK,
        )?
        .max(1);
        let max_concurrent_tasks = parse_usize(
            std::env::var("HOLO_INDEX_RECONCILE_MAX_CONCURRENT_TASKS").ok(),
            DEFAULT_MAX_CONCURRENT_TASKS,
        )?
        .max(1);
        let max_lookback_ms = parse_u64(
            std::env::var("HOLO_INDEX_RECONCILE_MAX_LOOKBACK_MS").ok(),
            DEFAULT_MAX_LOOKBACK_MS,
        )?;
        let strict_ttl = parse_bool(std::env::var("HOLO_INDEX_RECONCILE_STRICT_TTL").ok(), true)?;
        let planner = ScanPlannerConfig::from_env()?;

        Ok(Self {
            page_size,
            max_rows_per_task,
            max_concurrent_tasks,
            max_lookback_ms,
            strict_ttl,
            planner,
        })
    }
}
