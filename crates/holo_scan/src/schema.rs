//! Composite row-key codec.
//!
//! A row key is the concatenation of one encoded span per slot:
//!
//! * fixed-width slots occupy exactly their declared width,
//! * variable-width slots escape embedded `0x00` as `0x00 0xFF` and end with the
//!   terminator `0x00 0x01`, last slot included,
//! * a `Raw` final slot is the unescaped remainder of the key,
//! * descending slots byte-complement the whole span after escaping.
//!
//! Spans are prefix-free, so comparing two keys slot by slot gives the same
//! answer as comparing the raw bytes. Trailing absent (NULL) slots are simply
//! truncated.

use std::fmt;
use std::ops::Bound;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::datum::{ColumnType, Datum};
use crate::key_range::{invert_bytes, KeyRange};

const SEPARATOR: u8 = 0x00;
const ESCAPE: u8 = 0xFF;
const TERMINATOR: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub(crate) fn tag(self) -> u8 {
        match self {
            SortOrder::Asc => 0,
            SortOrder::Desc => 1,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(SortOrder::Asc),
            1 => Ok(SortOrder::Desc),
            other => Err(anyhow!("unknown sort order tag {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDescriptor {
    pub name: String,
    pub column_type: ColumnType,
    pub sort_order: SortOrder,
}

impl SlotDescriptor {
    pub fn asc(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            sort_order: SortOrder::Asc,
        }
    }

    pub fn desc(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            sort_order: SortOrder::Desc,
        }
    }

    pub fn is_fixed_width(&self) -> bool {
        self.column_type.is_fixed_width()
    }

    pub fn byte_length(&self) -> Option<usize> {
        self.column_type.byte_length()
    }
}

/// Raised when key bytes do not decode under the schema. Always fatal to the
/// scan or task that hit it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowKeyCorruption {
    pub slot: usize,
    pub offset: usize,
    pub reason: &'static str,
}

impl fmt::Display for RowKeyCorruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "corrupt row key at slot {} offset {}: {}",
            self.slot, self.offset, self.reason
        )
    }
}

impl std::error::Error for RowKeyCorruption {}

/// Zero-copy view of one encoded slot inside a key. `len` includes the
/// variable-width terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSpan {
    pub slot: usize,
    pub offset: usize,
    pub len: usize,
}

impl SlotSpan {
    pub fn bytes<'k>(&self, key: &'k [u8]) -> &'k [u8] {
        &key[self.offset..self.offset + self.len]
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowKeySchema {
    slots: Vec<SlotDescriptor>,
}

impl RowKeySchema {
    pub fn new(slots: Vec<SlotDescriptor>) -> Result<Self> {
        if slots.is_empty() {
            return Err(anyhow!("row key schema requires at least one slot"));
        }
        if let Some(idx) = slots
            .iter()
            .position(|slot| slot.column_type == ColumnType::Raw)
        {
            if idx + 1 != slots.len() {
                return Err(anyhow!(
                    "raw slot '{}' must be the last slot of the row key",
                    slots[idx].name
                ));
            }
        }
        Ok(Self { slots })
    }

    /// Single-slot schema treating the whole key as opaque bytes.
    pub fn raw_key() -> Self {
        Self {
            slots: vec![SlotDescriptor::asc("row_key", ColumnType::Raw)],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, idx: usize) -> Option<&SlotDescriptor> {
        self.slots.get(idx)
    }

    pub fn descriptors(&self) -> &[SlotDescriptor] {
        &self.slots
    }

    fn descriptor(&self, idx: usize) -> Result<&SlotDescriptor> {
        self.slots
            .get(idx)
            .ok_or_else(|| anyhow!("slot {} out of range for {}-slot schema", idx, self.slots.len()))
    }

    /// Encodes one value into the span it occupies in a key.
    pub fn encode_slot(&self, idx: usize, value: &Datum) -> Result<Vec<u8>> {
        let slot = self.descriptor(idx)?;
        let payload = value.encode_payload(slot.column_type)?;
        Ok(encode_span(slot, &payload))
    }

    /// Encodes a full key. Trailing `None`s are truncated; a `None` followed by
    /// a value is rejected.
    pub fn encode(&self, values: &[Option<Datum>]) -> Result<Vec<u8>> {
        if values.len() > self.slots.len() {
            return Err(anyhow!(
                "{} values supplied for {}-slot row key",
                values.len(),
                self.slots.len()
            ));
        }
        let present = values
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |idx| idx + 1);
        let mut out = Vec::new();
        for (idx, value) in values[..present].iter().enumerate() {
            let value = value.as_ref().ok_or_else(|| {
                anyhow!(
                    "null value for slot '{}' precedes a non-null slot",
                    self.slots[idx].name
                )
            })?;
            out.extend_from_slice(&self.encode_slot(idx, value)?);
        }
        Ok(out)
    }

    /// Walks the encoded spans of `key`. Iteration ends at the end of the key;
    /// bytes left over after the last slot are reported as corruption.
    pub fn slots<'a>(&'a self, key: &'a [u8]) -> SlotIter<'a> {
        SlotIter {
            schema: self,
            key,
            slot: 0,
            offset: 0,
            failed: false,
        }
    }

    /// Unescaped, un-inverted payload per slot; `None` for absent slots.
    pub fn decode_raw(&self, key: &[u8]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut out = vec![None; self.slots.len()];
        for span in self.slots(key) {
            let span = span?;
            let slot = &self.slots[span.slot];
            out[span.slot] = Some(decode_span(slot, span.bytes(key)));
        }
        Ok(out)
    }

    pub fn decode(&self, key: &[u8]) -> Result<Vec<Option<Datum>>> {
        self.decode_raw(key)?
            .into_iter()
            .zip(&self.slots)
            .map(|(payload, slot)| {
                payload
                    .map(|payload| Datum::decode_payload(slot.column_type, &payload))
                    .transpose()
            })
            .collect()
    }

    /// Range over encoded spans of slot `idx` matching values within the given
    /// bounds. Descending slots swap the bounds. An unbounded value side never
    /// matches an absent slot.
    pub fn slot_range(
        &self,
        idx: usize,
        lower: Bound<&Datum>,
        upper: Bound<&Datum>,
    ) -> Result<KeyRange> {
        let slot = self.descriptor(idx)?;
        let encode = |bound: Bound<&Datum>| -> Result<Bound<Vec<u8>>> {
            Ok(match bound {
                Bound::Included(value) => Bound::Included(self.encode_slot(idx, value)?),
                Bound::Excluded(value) => Bound::Excluded(self.encode_slot(idx, value)?),
                Bound::Unbounded => Bound::Unbounded,
            })
        };
        let (low, high) = match slot.sort_order {
            SortOrder::Asc => (encode(lower)?, encode(upper)?),
            SortOrder::Desc => (encode(upper)?, encode(lower)?),
        };
        let low = match low {
            Bound::Unbounded => Bound::Included(vec![0x00]),
            other => other,
        };
        Ok(KeyRange::from_bounds(low, high))
    }

    pub fn point(&self, idx: usize, value: &Datum) -> Result<KeyRange> {
        Ok(KeyRange::point(self.encode_slot(idx, value)?))
    }
}

fn encode_span(slot: &SlotDescriptor, payload: &[u8]) -> Vec<u8> {
    let mut span = match slot.column_type {
        ColumnType::Utf8 | ColumnType::Binary => {
            let mut out = Vec::with_capacity(payload.len() + 2);
            for byte in payload {
                out.push(*byte);
                if *byte == SEPARATOR {
                    out.push(ESCAPE);
                }
            }
            out.push(SEPARATOR);
            out.push(TERMINATOR);
            out
        }
        _ => payload.to_vec(),
    };
    if slot.sort_order == SortOrder::Desc {
        for byte in &mut span {
            *byte = !*byte;
        }
    }
    span
}

fn decode_span(slot: &SlotDescriptor, span: &[u8]) -> Vec<u8> {
    let span = match slot.sort_order {
        SortOrder::Asc => span.to_vec(),
        SortOrder::Desc => invert_bytes(span),
    };
    match slot.column_type {
        ColumnType::Utf8 | ColumnType::Binary => {
            let body = &span[..span.len().saturating_sub(2)];
            let mut out = Vec::with_capacity(body.len());
            let mut idx = 0;
            while idx < body.len() {
                out.push(body[idx]);
                // Span boundaries were validated while iterating.
                idx += if body[idx] == SEPARATOR { 2 } else { 1 };
            }
            out
        }
        _ => span,
    }
}

pub struct SlotIter<'a> {
    schema: &'a RowKeySchema,
    key: &'a [u8],
    slot: usize,
    offset: usize,
    failed: bool,
}

impl<'a> SlotIter<'a> {
    fn corruption(&mut self, reason: &'static str) -> Option<Result<SlotSpan, RowKeyCorruption>> {
        self.failed = true;
        Some(Err(RowKeyCorruption {
            slot: self.slot,
            offset: self.offset,
            reason,
        }))
    }
}

impl<'a> Iterator for SlotIter<'a> {
    type Item = Result<SlotSpan, RowKeyCorruption>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.key.len() {
            return None;
        }
        let schema = self.schema;
        let Some(slot) = schema.slots.get(self.slot) else {
            return self.corruption("trailing bytes after the last slot");
        };
        let remaining = &self.key[self.offset..];
        let len = match slot.column_type {
            ColumnType::Raw => remaining.len(),
            ColumnType::Utf8 | ColumnType::Binary => {
                match variable_span_len(remaining, slot.sort_order) {
                    Ok(len) => len,
                    Err(reason) => return self.corruption(reason),
                }
            }
            fixed => {
                let width = fixed.byte_length().unwrap_or(0);
                if remaining.len() < width {
                    return self.corruption("fixed-width slot is truncated");
                }
                width
            }
        };
        let span = SlotSpan {
            slot: self.slot,
            offset: self.offset,
            len,
        };
        self.slot += 1;
        self.offset += len;
        Some(Ok(span))
    }
}

/// Length of a terminated variable-width span at the start of `bytes`.
fn variable_span_len(bytes: &[u8], order: SortOrder) -> Result<usize, &'static str> {
    let (separator, escape, terminator) = match order {
        SortOrder::Asc => (SEPARATOR, ESCAPE, TERMINATOR),
        SortOrder::Desc => (!SEPARATOR, !ESCAPE, !TERMINATOR),
    };
    let mut idx = 0;
    loop {
        let Some(pos) = bytes[idx..].iter().position(|b| *b == separator) else {
            return Err("missing variable-width terminator");
        };
        let marker = idx + pos + 1;
        match bytes.get(marker) {
            None => return Err("separator at end of key"),
            Some(b) if *b == escape => idx = marker + 1,
            Some(b) if *b == terminator => return Ok(marker + 1),
            Some(_) => return Err("invalid byte after separator"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant_id_schema() -> RowKeySchema {
        RowKeySchema::new(vec![
            SlotDescriptor::asc("tenant", ColumnType::Utf8),
            SlotDescriptor::desc("id", ColumnType::Int64),
        ])
        .expect("schema")
    }

    #[test]
    fn variable_slots_escape_zero_and_terminate() {
        let schema = RowKeySchema::new(vec![SlotDescriptor::asc("name", ColumnType::Binary)])
            .expect("schema");
        let key = schema
            .encode(&[Some(Datum::Binary(vec![b'a', 0x00, b'b']))])
            .expect("encode");
        assert_eq!(key, vec![b'a', 0x00, 0xFF, b'b', 0x00, 0x01]);
        assert_eq!(
            schema.decode(&key).expect("decode"),
            vec![Some(Datum::Binary(vec![b'a', 0x00, b'b']))]
        );
    }

    #[test]
    fn descending_slots_invert_the_escaped_span() {
        let schema = RowKeySchema::new(vec![SlotDescriptor::desc("name", ColumnType::Utf8)])
            .expect("schema");
        let span = schema.encode_slot(0, &Datum::utf8("a")).expect("encode");
        assert_eq!(span, vec![!b'a', 0xFF, 0xFE]);
        let shorter = schema.encode_slot(0, &Datum::utf8("")).expect("encode");
        let longer = schema.encode_slot(0, &Datum::utf8("ab")).expect("encode");
        assert!(longer < span && span < shorter);
    }

    #[test]
    fn spans_cover_the_key_and_trailing_nulls_are_absent() {
        let schema = tenant_id_schema();
        let key = schema
            .encode(&[Some(Datum::utf8("acme")), None])
            .expect("encode");
        let spans = schema
            .slots(&key)
            .collect::<Result<Vec<_>, _>>()
            .expect("spans");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].end(), key.len());
        assert_eq!(
            schema.decode(&key).expect("decode"),
            vec![Some(Datum::utf8("acme")), None]
        );
        assert!(schema.encode(&[None, Some(Datum::Int64(1))]).is_err());
    }

    #[test]
    fn malformed_keys_are_corruption() {
        let schema = tenant_id_schema();
        let cases: [&[u8]; 4] = [
            b"acme",
            &[b'a', 0x00],
            &[b'a', 0x00, 0x07],
            &[b'a', 0x00, 0x01, 0x01, 0x02],
        ];
        for key in cases {
            let err = schema.decode(key).expect_err("corrupt key");
            assert!(
                err.downcast_ref::<RowKeyCorruption>().is_some(),
                "unexpected error for {key:?}: {err}"
            );
        }
        let full = schema
            .encode(&[Some(Datum::utf8("a")), Some(Datum::Int64(1))])
            .expect("encode");
        let mut trailing = full.clone();
        trailing.push(0x42);
        let err = schema.decode(&trailing).expect_err("trailing bytes");
        assert!(err.to_string().contains("trailing bytes"));
    }

    #[test]
    fn slot_ranges_follow_value_order_for_descending_slots() {
        let schema = tenant_id_schema();
        let range = schema
            .slot_range(1, Bound::Included(&Datum::Int64(5)), Bound::Included(&Datum::Int64(9)))
            .expect("range");
        for id in [5, 7, 9] {
            let span = schema.encode_slot(1, &Datum::Int64(id)).expect("encode");
            assert!(range.contains(&span), "id {id} should be inside");
        }
        for id in [4, 10] {
            let span = schema.encode_slot(1, &Datum::Int64(id)).expect("encode");
            assert!(!range.contains(&span), "id {id} should be outside");
        }
        let open = schema
            .slot_range(1, Bound::Unbounded, Bound::Included(&Datum::Int64(0)))
            .expect("range");
        assert!(!open.contains(b""), "open value ranges exclude absent slots");
    }

    #[test]
    fn raw_slot_must_be_last() {
        assert!(RowKeySchema::new(vec![
            SlotDescriptor::asc("raw", ColumnType::Raw),
            SlotDescriptor::asc("id", ColumnType::Int64),
        ])
        .is_err());
        let raw = RowKeySchema::raw_key();
        let key = raw.encode(&[Some(Datum::Binary(vec![0, 1, 0]))]).expect("encode");
        assert_eq!(key, vec![0, 1, 0]);
    }
}
