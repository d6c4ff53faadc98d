//! Composite row keys and the scans planned over them.
//!
//! - [`RowKeySchema`] encodes typed slot values into one order-preserving key,
//!   with per-slot ascending or descending collation.
//! - [`KeyRange`] and the list helpers implement the interval algebra used to
//!   describe candidate values per slot.
//! - [`ScanRanges`] turns per-slot range lists into a degenerate, full,
//!   point-lookup or skip-scan plan and installs it on a
//!   [`holo_kv::ScanRequest`].
//! - [`SkipScanFilter`] replays a serialized plan against the keys a table
//!   iterates, seeking past everything that cannot match.

mod config;
mod datum;
mod descriptor;
mod key_range;
mod scan_ranges;
mod schema;
mod skip_scan;

pub use config::{parse_bool, parse_u64, parse_usize, ScanPlannerConfig, DEFAULT_MAX_SCAN_RANGES};
pub use datum::{ColumnType, Datum};
pub use descriptor::{SkipScanDescriptor, SKIP_SCAN_ATTRIBUTE};
pub use key_range::{coalesce, complement, intersect_lists, KeyRange};
pub use scan_ranges::{ScanKind, ScanRanges};
pub use schema::{RowKeyCorruption, RowKeySchema, SlotDescriptor, SlotIter, SlotSpan, SortOrder};
pub use skip_scan::SkipScanFilter;
