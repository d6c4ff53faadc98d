use std::ops::Bound;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use holo_kv::{key_in_range, max_bytes, min_end_bound, next_key, prefix_end, ScanRequest, TimeRange};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::datum::ColumnType;
use crate::descriptor::{SkipScanDescriptor, SKIP_SCAN_ATTRIBUTE};
use crate::key_range::{coalesce, intersect_lists, KeyRange};
use crate::schema::RowKeySchema;
use crate::skip_scan::SkipScanFilter;

/// Shape of a compiled scan. Exactly one holds for any plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanKind {
    /// Matches nothing; no physical scan is issued.
    Degenerate,
    /// Full table scan.
    Everything,
    /// A finite set of fully specified row keys.
    PointLookup,
    SkipScan,
}

/// Per-slot candidate ranges for a composite row key, compiled into the
/// physical scan that visits them.
///
/// Slot lists are sorted and disjoint in encoded-byte order, so descending
/// slots list their values in reverse. Only a prefix of leading slots is kept:
/// planning stops at the first unconstrained slot.
#[derive(Debug, Clone)]
pub struct ScanRanges {
    schema: Arc<RowKeySchema>,
    ranges: Vec<Vec<KeyRange>>,
    kind: ScanKind,
    scan_maximum: usize,
    time_range: TimeRange,
    widened: bool,
}

impl ScanRanges {
    pub fn create(
        per_slot_ranges: Vec<Vec<KeyRange>>,
        schema: Arc<RowKeySchema>,
        scan_maximum: usize,
    ) -> Result<Self> {
        let scan_maximum = scan_maximum.max(1);
        if per_slot_ranges.len() > schema.len() {
            return Err(anyhow!(
                "{} constrained slots supplied for a {}-slot row key",
                per_slot_ranges.len(),
                schema.len()
            ));
        }

        let mut ranges = Vec::with_capacity(per_slot_ranges.len());
        for slot in &per_slot_ranges {
            let merged = coalesce(slot);
            if merged.is_empty() {
                return Ok(Self::with_kind(schema, scan_maximum, ScanKind::Degenerate));
            }
            ranges.push(merged);
        }

        truncate_at_everything(&mut ranges);
        if ranges.is_empty() {
            return Ok(Self::with_kind(schema, scan_maximum, ScanKind::Everything));
        }

        let count = cross_product_size(&ranges);
        let mut widened = false;
        if count > scan_maximum {
            let constrained_slots = ranges.len();
            ranges.truncate(1);
            if ranges[0].len() > scan_maximum {
                ranges[0] = vec![KeyRange::hull(&ranges[0])];
            }
            truncate_at_everything(&mut ranges);
            widened = true;
            debug!(
                count,
                scan_maximum,
                constrained_slots,
                kept_ranges = ranges.first().map_or(0, Vec::len),
                "widened skip-scan plan to its leading slot"
            );
            if ranges.is_empty() {
                let mut plan = Self::with_kind(schema, scan_maximum, ScanKind::Everything);
                plan.widened = true;
                return Ok(plan);
            }
        }

        let kind = if ranges.len() == schema.len()
            && ranges
                .iter()
                .all(|slot| slot.iter().all(KeyRange::is_single_key))
        {
            ScanKind::PointLookup
        } else {
            ScanKind::SkipScan
        };

        Ok(Self {
            schema,
            ranges,
            kind,
            scan_maximum,
            time_range: TimeRange::all(),
            widened,
        })
    }

    /// Point lookup of whole, already-encoded row keys.
    pub fn for_row_keys(keys: Vec<Vec<u8>>, scan_maximum: usize) -> Result<Self> {
        let points = keys.into_iter().map(KeyRange::point).collect();
        Self::create(vec![points], Arc::new(RowKeySchema::raw_key()), scan_maximum)
    }

    fn with_kind(schema: Arc<RowKeySchema>, scan_maximum: usize, kind: ScanKind) -> Self {
        Self {
            schema,
            ranges: Vec::new(),
            kind,
            scan_maximum,
            time_range: TimeRange::all(),
            widened: false,
        }
    }

    pub fn with_time_range(mut self, time_range: TimeRange) -> Self {
        self.time_range = time_range;
        self
    }

    pub fn kind(&self) -> ScanKind {
        self.kind
    }

    pub fn is_degenerate(&self) -> bool {
        self.kind == ScanKind::Degenerate
    }

    pub fn is_everything(&self) -> bool {
        self.kind == ScanKind::Everything
    }

    pub fn is_point_lookup(&self) -> bool {
        self.kind == ScanKind::PointLookup
    }

    pub fn is_skip_scan(&self) -> bool {
        self.kind == ScanKind::SkipScan
    }

    pub fn schema(&self) -> &Arc<RowKeySchema> {
        &self.schema
    }

    pub fn ranges(&self) -> &[Vec<KeyRange>] {
        &self.ranges
    }

    pub fn scan_maximum(&self) -> usize {
        self.scan_maximum
    }

    pub fn time_range(&self) -> TimeRange {
        self.time_range
    }

    /// Whether trailing slot constraints were dropped to respect the maximum.
    /// A widened plan still covers every matching key.
    pub fn widened(&self) -> bool {
        self.widened
    }

    /// Number of slot-range combinations in the plan.
    pub fn range_count(&self) -> usize {
        match self.kind {
            ScanKind::Degenerate => 0,
            ScanKind::Everything => 1,
            _ => cross_product_size(&self.ranges),
        }
    }

    /// Sorted exact row keys of a point-lookup plan; empty otherwise.
    pub fn point_lookup_keys(&self) -> Vec<Vec<u8>> {
        if !self.is_point_lookup() {
            return Vec::new();
        }
        let mut keys = Vec::with_capacity(self.range_count());
        let mut odometer = vec![0usize; self.ranges.len()];
        loop {
            let mut key = Vec::new();
            for (slot, position) in self.ranges.iter().zip(&odometer) {
                key.extend_from_slice(slot[*position].lower());
            }
            keys.push(key);

            let mut slot = self.ranges.len();
            loop {
                if slot == 0 {
                    return keys;
                }
                slot -= 1;
                odometer[slot] += 1;
                if odometer[slot] < self.ranges[slot].len() {
                    break;
                }
                odometer[slot] = 0;
            }
        }
    }

    /// Inclusive physical start row; empty starts at the beginning.
    pub fn scan_start(&self) -> Vec<u8> {
        let mut start = Vec::new();
        for (idx, slot) in self.ranges.iter().enumerate() {
            let Some(first) = slot.first() else {
                break;
            };
            match first.lower_bound() {
                Bound::Unbounded => break,
                Bound::Included(lower) => {
                    start.extend_from_slice(lower);
                    if !first.is_single_key() {
                        break;
                    }
                }
                Bound::Excluded(lower) => {
                    start.extend_from_slice(lower);
                    return self.successor_of_slot_prefix(idx, &start);
                }
            }
        }
        start
    }

    /// Exclusive physical stop row; empty scans to the end.
    ///
    /// A raw slot is not prefix-free: keys extending an inclusive raw upper
    /// bound sort after it, so the stop is its immediate successor rather
    /// than its prefix end.
    pub fn scan_stop(&self) -> Vec<u8> {
        let mut stop = Vec::new();
        let mut ends_in_raw = false;
        for (idx, slot) in self.ranges.iter().enumerate() {
            let Some(last) = slot.last() else {
                break;
            };
            match last.upper_bound() {
                Bound::Unbounded => break,
                Bound::Included(upper) => {
                    stop.extend_from_slice(upper);
                    ends_in_raw = self
                        .schema
                        .slot(idx)
                        .is_some_and(|slot| slot.column_type == ColumnType::Raw);
                    if !last.is_single_key() {
                        break;
                    }
                }
                Bound::Excluded(upper) => {
                    stop.extend_from_slice(upper);
                    return stop;
                }
            }
        }
        if ends_in_raw {
            return next_key(&stop);
        }
        prefix_end(&stop).unwrap_or_default()
    }

    /// Smallest key whose slot `idx` sorts after the span ending `prefix`.
    fn successor_of_slot_prefix(&self, idx: usize, prefix: &[u8]) -> Vec<u8> {
        if idx + 1 == self.schema.len() {
            return next_key(prefix);
        }
        prefix_end(prefix).unwrap_or_else(|| next_key(prefix))
    }

    /// Intersects two plans over the same schema slot by slot and re-plans.
    pub fn intersect(&self, other: &ScanRanges) -> Result<ScanRanges> {
        if self.schema != other.schema {
            return Err(anyhow!("cannot intersect scan ranges over different row-key schemas"));
        }
        let scan_maximum = self.scan_maximum.min(other.scan_maximum);
        let time_range = intersect_time_ranges(self.time_range, other.time_range);
        if self.is_degenerate() || other.is_degenerate() {
            return Ok(
                Self::with_kind(self.schema.clone(), scan_maximum, ScanKind::Degenerate)
                    .with_time_range(time_range),
            );
        }

        let width = self.ranges.len().max(other.ranges.len());
        let everything = vec![KeyRange::EVERYTHING];
        let per_slot = (0..width)
            .map(|idx| {
                let left = self.ranges.get(idx).unwrap_or(&everything);
                let right = other.ranges.get(idx).unwrap_or(&everything);
                intersect_lists(left, right)
            })
            .collect();
        let mut plan = Self::create(per_slot, self.schema.clone(), scan_maximum)?;
        plan.widened |= self.widened || other.widened;
        Ok(plan.with_time_range(time_range))
    }

    /// Whether the plan can match any key in the region `[start, stop)`.
    pub fn overlaps(&self, start: &[u8], stop: &[u8]) -> bool {
        match self.kind {
            ScanKind::Degenerate => false,
            ScanKind::Everything => true,
            ScanKind::PointLookup => self
                .point_lookup_keys()
                .iter()
                .any(|key| key_in_range(key, start, stop)),
            ScanKind::SkipScan => {
                let scan_start = self.scan_start();
                let scan_stop = self.scan_stop();
                let starts_before_stop = stop.is_empty() || scan_start.as_slice() < stop;
                let ends_after_start = scan_stop.is_empty() || start < scan_stop.as_slice();
                starts_before_stop && ends_after_start
            }
        }
    }

    /// False when `[scan_start, scan_stop)` alone is exact, i.e. every slot
    /// before the last is one point and the last holds one range.
    pub fn use_skip_scan_filter(&self) -> bool {
        match self.kind {
            ScanKind::Degenerate | ScanKind::Everything => false,
            ScanKind::PointLookup | ScanKind::SkipScan => match self.ranges.split_last() {
                Some((last, leading)) => {
                    last.len() != 1
                        || !leading
                            .iter()
                            .all(|slot| slot.len() == 1 && slot[0].is_single_key())
                }
                None => false,
            },
        }
    }

    pub fn descriptor(&self) -> SkipScanDescriptor {
        SkipScanDescriptor {
            schema: self.schema.as_ref().clone(),
            slots: self.ranges.clone(),
        }
    }

    /// Narrows `request` to this plan: start/stop rows, time range, and when
    /// needed the serialized descriptor plus the filter rebuilt from it.
    ///
    /// Returns `false` for a degenerate plan, which needs no scan at all.
    pub fn install_on(&self, request: &mut ScanRequest) -> Result<bool> {
        if self.is_degenerate() {
            return Ok(false);
        }
        request.start_row = max_bytes(&request.start_row, &self.scan_start());
        request.stop_row = min_end_bound(&request.stop_row, &self.scan_stop());
        request.time_range = self.time_range;
        if self.use_skip_scan_filter() {
            let bytes = self.descriptor().encode()?;
            let filter = SkipScanFilter::from_bytes(&bytes)?;
            request
                .attributes
                .insert(SKIP_SCAN_ATTRIBUTE.to_string(), bytes);
            request.filter = Some(Box::new(filter));
        }
        Ok(true)
    }
}

fn truncate_at_everything(ranges: &mut Vec<Vec<KeyRange>>) {
    if let Some(idx) = ranges
        .iter()
        .position(|slot| slot.len() == 1 && slot[0].is_everything())
    {
        ranges.truncate(idx);
    }
}

fn cross_product_size(ranges: &[Vec<KeyRange>]) -> usize {
    ranges
        .iter()
        .fold(1usize, |acc, slot| acc.saturating_mul(slot.len()))
}

fn intersect_time_ranges(left: TimeRange, right: TimeRange) -> TimeRange {
    let min = left.min.max(right.min);
    let max = left.max.min(right.max).max(min);
    TimeRange { min, max }
}
