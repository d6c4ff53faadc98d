use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::cell::{Mutation, Row, TimeRange};
use crate::filter::RowFilter;

/// Cell-visibility options shared by scans and gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadOptions {
    pub time_range: TimeRange,
    /// Return every visible version instead of only the newest per column.
    pub read_all_versions: bool,
    /// Return delete markers and masked cells untouched.
    pub raw: bool,
}

impl ReadOptions {
    /// Raw, all-version read bounded by `time_range`; what verification uses
    /// to see full row history.
    pub fn raw_history(time_range: TimeRange) -> Self {
        Self {
            time_range,
            read_all_versions: true,
            raw: true,
        }
    }
}

/// One physical scan request.
#[derive(Debug, Default)]
pub struct ScanRequest {
    /// Inclusive start row; empty starts at the beginning of the table.
    pub start_row: Vec<u8>,
    /// Exclusive stop row; empty scans to the end of the table.
    pub stop_row: Vec<u8>,
    pub filter: Option<Box<dyn RowFilter>>,
    pub time_range: TimeRange,
    pub read_all_versions: bool,
    pub raw: bool,
    /// Maximum number of rows returned; `None` is unlimited.
    pub limit: Option<usize>,
    /// Opaque request attributes (serialized filter descriptors and the like).
    pub attributes: BTreeMap<String, Vec<u8>>,
}

impl ScanRequest {
    pub fn new(start_row: impl Into<Vec<u8>>, stop_row: impl Into<Vec<u8>>) -> Self {
        Self {
            start_row: start_row.into(),
            stop_row: stop_row.into(),
            ..Self::default()
        }
    }

    pub fn with_read_options(mut self, options: ReadOptions) -> Self {
        self.time_range = options.time_range;
        self.read_all_versions = options.read_all_versions;
        self.raw = options.raw;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit.max(1));
        self
    }

    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            time_range: self.time_range,
            read_all_versions: self.read_all_versions,
            raw: self.raw,
        }
    }
}

/// Sorted key-value table service.
///
/// Implementations must be safe for concurrent reads from independent tasks;
/// `batch_mutate` is atomic per call and never across calls.
#[async_trait]
pub trait KvTable: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Returns rows in ascending key order.
    async fn scan(&self, request: ScanRequest) -> Result<Vec<Row>>;

    /// Multi-get; the output is positionally aligned with `keys`.
    async fn get(&self, keys: &[Vec<u8>], options: ReadOptions) -> Result<Vec<Option<Row>>>;

    async fn batch_mutate(&self, mutations: Vec<Mutation>) -> Result<()>;

    /// Sorted exclusive region end keys; the final entry is empty when the last
    /// region is unbounded.
    async fn region_end_keys(&self) -> Result<Vec<Vec<u8>>>;
}
