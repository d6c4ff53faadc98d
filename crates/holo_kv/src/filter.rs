use std::fmt::Debug;

use anyhow::Result;

/// Decision returned by a [`RowFilter`] for one physical row key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    /// Emit the row (subject to cell visibility).
    Include,
    /// Skip forward: the next row worth looking at is the first one at or
    /// after the hint. Hints must be strictly greater than the current key.
    SeekTo(Vec<u8>),
    /// No later row can match; the scan terminates.
    Done,
}

/// Server-side row-key filter driven by the table while it iterates rows in
/// key order.
///
/// Filters are stateful per scan and see keys in strictly ascending order.
/// Errors are fatal to the scan.
pub trait RowFilter: Send + Debug {
    fn filter_row_key(&mut self, key: &[u8]) -> Result<FilterDecision>;

    fn name(&self) -> &'static str;
}
