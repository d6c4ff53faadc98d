use std::ops::Bound;

use anyhow::{anyhow, Result};
use holo_kv::{prefix_end, FilterDecision, RowFilter};
use tracing::debug;

use crate::descriptor::SkipScanDescriptor;
use crate::key_range::KeyRange;
use crate::schema::{RowKeySchema, SlotSpan};

/// Row-key driven interval skipping over per-slot range lists.
///
/// For each physical row the filter decodes the constrained slots and either
/// accepts the row, names the smallest key that could match next, or reports
/// that nothing further can match. Once done it stays done.
#[derive(Debug, Clone)]
pub struct SkipScanFilter {
    schema: RowKeySchema,
    slots: Vec<Vec<KeyRange>>,
    done: bool,
}

impl SkipScanFilter {
    pub fn new(schema: RowKeySchema, slots: Vec<Vec<KeyRange>>) -> Result<Self> {
        if slots.len() > schema.len() {
            return Err(anyhow!(
                "skip scan constrains {} slots of a {}-slot schema",
                slots.len(),
                schema.len()
            ));
        }
        if let Some(idx) = slots.iter().position(Vec::is_empty) {
            return Err(anyhow!("skip scan slot {} has no ranges", idx));
        }
        Ok(Self {
            schema,
            slots,
            done: false,
        })
    }

    pub fn from_descriptor(descriptor: SkipScanDescriptor) -> Result<Self> {
        Self::new(descriptor.schema, descriptor.slots)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_descriptor(SkipScanDescriptor::decode(bytes)?)
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Spans of the constrained slots; absent slots are empty spans at the end
    /// of the key. The whole key is validated.
    fn spans(&self, key: &[u8]) -> Result<Vec<SlotSpan>> {
        let mut spans = Vec::with_capacity(self.slots.len());
        for span in self.schema.slots(key) {
            let span = span?;
            if span.slot < self.slots.len() {
                spans.push(span);
            }
        }
        while spans.len() < self.slots.len() {
            spans.push(SlotSpan {
                slot: spans.len(),
                offset: key.len(),
                len: 0,
            });
        }
        Ok(spans)
    }

    /// Hint for the first key at or after range `idx` of `slot`, keeping the
    /// current values of earlier slots.
    fn seek_to_range(&self, key: &[u8], spans: &[SlotSpan], slot: usize, idx: usize) -> Vec<u8> {
        let mut hint = key[..spans[slot].offset].to_vec();
        if !self.append_lower(&mut hint, slot, &self.slots[slot][idx]) {
            return hint;
        }
        for next in slot + 1..self.slots.len() {
            if !self.append_lower(&mut hint, next, &self.slots[next][0]) {
                break;
            }
        }
        hint
    }

    /// Appends the smallest span of `range` for `slot`. Returns whether later
    /// slots may extend the hint further.
    fn append_lower(&self, hint: &mut Vec<u8>, slot: usize, range: &KeyRange) -> bool {
        match range.lower_bound() {
            Bound::Unbounded => false,
            Bound::Included(lower) => {
                hint.extend_from_slice(lower);
                range.is_single_key()
            }
            Bound::Excluded(lower) => {
                hint.extend_from_slice(lower);
                let successor = if slot + 1 == self.schema.len() {
                    None
                } else {
                    prefix_end(hint)
                };
                match successor {
                    Some(next) => *hint = next,
                    None => hint.push(0x00),
                }
                false
            }
        }
    }

    /// Called when `slot` of the current key sorts past its last range: moves
    /// the previous slot forward, odometer style.
    fn carry(&mut self, key: &[u8], spans: &[SlotSpan], slot: usize) -> FilterDecision {
        let mut slot = slot;
        loop {
            if slot == 0 {
                self.done = true;
                debug!(slots = self.slots.len(), "skip scan exhausted");
                return FilterDecision::Done;
            }
            let prev = slot - 1;
            let span = spans[prev].bytes(key);
            let ranges = &self.slots[prev];
            let idx = ranges.partition_point(|range| range.is_above(span));
            match ranges.get(idx) {
                Some(current) if current.is_single_key() => {
                    if idx + 1 < ranges.len() {
                        return FilterDecision::SeekTo(self.seek_to_range(key, spans, prev, idx + 1));
                    }
                }
                _ => {
                    if let Some(hint) = prefix_end(&key[..spans[prev].end()]) {
                        return FilterDecision::SeekTo(hint);
                    }
                }
            }
            slot = prev;
        }
    }

    /// Replaces a hint that would not move the scan forward.
    fn ensure_progress(
        &mut self,
        key: &[u8],
        spans: &[SlotSpan],
        slot: usize,
        decision: FilterDecision,
    ) -> FilterDecision {
        match decision {
            FilterDecision::SeekTo(hint) if hint.as_slice() <= key => {
                match prefix_end(&key[..spans[slot].end()]) {
                    Some(next) => FilterDecision::SeekTo(next),
                    None => {
                        self.done = true;
                        FilterDecision::Done
                    }
                }
            }
            other => other,
        }
    }
}

impl RowFilter for SkipScanFilter {
    fn filter_row_key(&mut self, key: &[u8]) -> Result<FilterDecision> {
        if self.done {
            return Ok(FilterDecision::Done);
        }
        let spans = self.spans(key)?;
        for slot in 0..self.slots.len() {
            let span = spans[slot].bytes(key);
            let ranges = &self.slots[slot];
            let idx = ranges.partition_point(|range| range.is_above(span));
            if ranges.get(idx).is_some_and(|range| range.contains(span)) {
                continue;
            }
            let decision = if idx < ranges.len() {
                FilterDecision::SeekTo(self.seek_to_range(key, &spans, slot, idx))
            } else {
                self.carry(key, &spans, slot)
            };
            return Ok(self.ensure_progress(key, &spans, slot, decision));
        }
        Ok(FilterDecision::Include)
    }

    fn name(&self) -> &'static str {
        "skip_scan"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datum::{ColumnType, Datum};
    use crate::schema::SlotDescriptor;

    fn schema() -> RowKeySchema {
        RowKeySchema::new(vec![
            SlotDescriptor::asc("a", ColumnType::FixedBinary(1)),
            SlotDescriptor::asc("b", ColumnType::FixedBinary(1)),
        ])
        .expect("schema")
    }

    fn key(a: u8, b: u8) -> Vec<u8> {
        vec![a, b]
    }

    #[test]
    fn seeks_between_points_and_carries_into_earlier_slots() {
        let schema = schema();
        let point = |slot: usize, v: u8| {
            schema
                .point(slot, &Datum::Binary(vec![v]))
                .expect("point")
        };
        let mut filter = SkipScanFilter::new(
            schema.clone(),
            vec![vec![point(0, 2), point(0, 5)], vec![point(1, 3), point(1, 7)]],
        )
        .expect("filter");

        assert_eq!(
            filter.filter_row_key(&key(1, 9)).expect("filter"),
            FilterDecision::SeekTo(key(2, 3))
        );
        assert_eq!(
            filter.filter_row_key(&key(2, 3)).expect("filter"),
            FilterDecision::Include
        );
        assert_eq!(
            filter.filter_row_key(&key(2, 4)).expect("filter"),
            FilterDecision::SeekTo(key(2, 7))
        );
        assert_eq!(
            filter.filter_row_key(&key(2, 8)).expect("filter"),
            FilterDecision::SeekTo(key(5, 3))
        );
        assert_eq!(
            filter.filter_row_key(&key(5, 8)).expect("filter"),
            FilterDecision::Done
        );
        assert!(filter.is_done());
        assert_eq!(
            filter.filter_row_key(&key(0, 0)).expect("filter"),
            FilterDecision::Done
        );
    }

    #[test]
    fn wide_ranges_carry_to_the_next_value() {
        let schema = schema();
        let mut filter = SkipScanFilter::new(
            schema.clone(),
            vec![
                vec![KeyRange::new(vec![2], true, vec![4], true)],
                vec![KeyRange::new(vec![1], true, vec![2], true)],
            ],
        )
        .expect("filter");
        assert_eq!(
            filter.filter_row_key(&key(3, 9)).expect("filter"),
            FilterDecision::SeekTo(vec![4])
        );
        assert_eq!(
            filter.filter_row_key(&key(4, 0)).expect("filter"),
            FilterDecision::SeekTo(key(4, 1))
        );
    }

    #[test]
    fn absent_slots_are_compared_as_empty() {
        let schema = RowKeySchema::new(vec![
            SlotDescriptor::asc("a", ColumnType::Utf8),
            SlotDescriptor::asc("b", ColumnType::Utf8),
        ])
        .expect("schema");
        let a = schema.encode_slot(0, &Datum::utf8("a")).expect("encode");
        let mut filter = SkipScanFilter::new(
            schema.clone(),
            vec![vec![KeyRange::point(a.clone())], vec![KeyRange::IS_NULL]],
        )
        .expect("filter");
        assert_eq!(filter.filter_row_key(&a).expect("filter"), FilterDecision::Include);
        let with_b = schema
            .encode(&[Some(Datum::utf8("a")), Some(Datum::utf8("x"))])
            .expect("encode");
        assert_eq!(
            filter.filter_row_key(&with_b).expect("filter"),
            FilterDecision::Done
        );
    }

    #[test]
    fn corrupt_keys_surface_codec_errors() {
        let schema = RowKeySchema::new(vec![SlotDescriptor::asc("a", ColumnType::Utf8)])
            .expect("schema");
        let mut filter =
            SkipScanFilter::new(schema, vec![vec![KeyRange::EVERYTHING]]).expect("filter");
        let err = filter.filter_row_key(b"abc").expect_err("corrupt");
        assert!(err
            .downcast_ref::<crate::schema::RowKeyCorruption>()
            .is_some());
    }
}
