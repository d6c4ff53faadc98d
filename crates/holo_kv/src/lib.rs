//! Sorted key-value table abstraction consumed by the HoloScan planner and the
//! HoloIndex reconciliation engine.
//!
//! The core never talks to a storage engine directly. It consumes:
//! - [`KvTable`]: ordered range scans with an optional server-side row filter,
//!   multi-gets, atomic per-call batch mutations and region boundary lookups,
//! - [`RowFilter`]: the seam through which a reconstructed filter (for example
//!   the skip-scan filter) steers a scan with include/seek/done decisions,
//! - [`MemTable`]: an in-process multi-version implementation with region
//!   splits, compaction and failure injection used by tests and embedders.

mod bounds;
mod cell;
mod filter;
mod memtable;
mod table;

pub use bounds::{
    key_in_range, max_bytes, min_end_bound, next_key, prefix_end, region_index_for_key,
};
pub use cell::{Cell, CellKind, Mutation, Row, TimeRange};
pub use filter::{FilterDecision, RowFilter};
pub use memtable::MemTable;
pub use table::{KvTable, ReadOptions, ScanRequest};
