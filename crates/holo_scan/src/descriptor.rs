//! Wire form of a skip-scan plan.
//!
//! The descriptor carries the slot layout and the per-slot range lists, which
//! is everything a remote filter needs to rebuild an identical
//! [`crate::SkipScanFilter`]. Layout (big-endian integers):
//!
//! ```text
//! "HSK" | version u8
//! slot_count u16 | { type_tag u8 | width u32 | sort_order u8 } * slot_count
//! range_slot_count u16 | { range_count u32 | { flags u8 | lower_len u32 | lower
//!                                            | upper_len u32 | upper } * range_count } * range_slot_count
//! ```

use anyhow::{anyhow, Result};

use crate::datum::ColumnType;
use crate::key_range::KeyRange;
use crate::schema::{RowKeySchema, SlotDescriptor, SortOrder};

/// Request attribute the serialized descriptor is stored under.
pub const SKIP_SCAN_ATTRIBUTE: &str = "holo.skip_scan";

const MAGIC: &[u8; 3] = b"HSK";
const VERSION: u8 = 1;
const FLAG_LOWER_INCLUSIVE: u8 = 0x01;
const FLAG_UPPER_INCLUSIVE: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipScanDescriptor {
    pub schema: RowKeySchema,
    /// Slot-major sorted range lists; may cover fewer slots than the schema.
    pub slots: Vec<Vec<KeyRange>>,
}

impl SkipScanDescriptor {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(MAGIC);
        out.push(VERSION);

        write_u16(&mut out, self.schema.len(), "slot count")?;
        for slot in self.schema.descriptors() {
            out.push(slot.column_type.tag());
            let width = match slot.column_type {
                ColumnType::FixedBinary(width) => width,
                _ => 0,
            };
            out.extend_from_slice(&width.to_be_bytes());
            out.push(slot.sort_order.tag());
        }

        write_u16(&mut out, self.slots.len(), "range slot count")?;
        for ranges in &self.slots {
            write_u32(&mut out, ranges.len(), "range count")?;
            for range in ranges {
                let mut flags = 0u8;
                if range.lower_inclusive() {
                    flags |= FLAG_LOWER_INCLUSIVE;
                }
                if range.upper_inclusive() {
                    flags |= FLAG_UPPER_INCLUSIVE;
                }
                out.push(flags);
                write_u32(&mut out, range.lower().len(), "lower bound length")?;
                out.extend_from_slice(range.lower());
                write_u32(&mut out, range.upper().len(), "upper bound length")?;
                out.extend_from_slice(range.upper());
            }
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MAGIC.len() + 1 || &bytes[..MAGIC.len()] != MAGIC {
            return Err(anyhow!("skip-scan descriptor has an invalid header"));
        }
        let version = bytes[MAGIC.len()];
        if version != VERSION {
            return Err(anyhow!(
                "unsupported skip-scan descriptor version {}",
                version
            ));
        }
        let mut cursor = MAGIC.len() + 1;

        let slot_count = read_u16(bytes, &mut cursor)? as usize;
        let mut slots = Vec::with_capacity(slot_count);
        for idx in 0..slot_count {
            let tag = read_u8(bytes, &mut cursor)?;
            let width = read_u32(bytes, &mut cursor)?;
            let sort_order = SortOrder::from_tag(read_u8(bytes, &mut cursor)?)?;
            slots.push(SlotDescriptor {
                name: format!("slot_{idx}"),
                column_type: ColumnType::from_tag(tag, width)?,
                sort_order,
            });
        }
        let schema = RowKeySchema::new(slots)?;

        let range_slot_count = read_u16(bytes, &mut cursor)? as usize;
        if range_slot_count > schema.len() {
            return Err(anyhow!(
                "skip-scan descriptor constrains {} slots of a {}-slot schema",
                range_slot_count,
                schema.len()
            ));
        }
        let mut range_slots = Vec::with_capacity(range_slot_count);
        for _ in 0..range_slot_count {
            let count = read_u32(bytes, &mut cursor)? as usize;
            let mut ranges = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                let flags = read_u8(bytes, &mut cursor)?;
                let lower = read_bytes(bytes, &mut cursor)?;
                let upper = read_bytes(bytes, &mut cursor)?;
                ranges.push(KeyRange::new(
                    lower,
                    flags & FLAG_LOWER_INCLUSIVE != 0,
                    upper,
                    flags & FLAG_UPPER_INCLUSIVE != 0,
                ));
            }
            range_slots.push(ranges);
        }
        if cursor != bytes.len() {
            return Err(anyhow!(
                "skip-scan descriptor has {} trailing bytes",
                bytes.len() - cursor
            ));
        }
        Ok(Self {
            schema,
            slots: range_slots,
        })
    }
}

fn write_u16(out: &mut Vec<u8>, value: usize, what: &str) -> Result<()> {
    let value = u16::try_from(value).map_err(|_| anyhow!("{} {} exceeds u16", what, value))?;
    out.extend_from_slice(&value.to_be_bytes());
    Ok(())
}

fn write_u32(out: &mut Vec<u8>, value: usize, what: &str) -> Result<()> {
    let value = u32::try_from(value).map_err(|_| anyhow!("{} {} exceeds u32", what, value))?;
    out.extend_from_slice(&value.to_be_bytes());
    Ok(())
}

fn read_u8(bytes: &[u8], cursor: &mut usize) -> Result<u8> {
    let value = *bytes
        .get(*cursor)
        .ok_or_else(|| anyhow!("buffer underflow while decoding u8"))?;
    *cursor += 1;
    Ok(value)
}

fn read_u16(bytes: &[u8], cursor: &mut usize) -> Result<u16> {
    if bytes.len() < *cursor + 2 {
        return Err(anyhow!("buffer underflow while decoding u16"));
    }
    let mut out = [0u8; 2];
    out.copy_from_slice(&bytes[*cursor..*cursor + 2]);
    *cursor += 2;
    Ok(u16::from_be_bytes(out))
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    if bytes.len() < *cursor + 4 {
        return Err(anyhow!("buffer underflow while decoding u32"));
    }
    let mut out = [0u8; 4];
    out.copy_from_slice(&bytes[*cursor..*cursor + 4]);
    *cursor += 4;
    Ok(u32::from_be_bytes(out))
}

fn read_bytes(bytes: &[u8], cursor: &mut usize) -> Result<Vec<u8>> {
    let len = read_u32(bytes, cursor)? as usize;
    if bytes.len() < *cursor + len {
        return Err(anyhow!("buffer underflow while decoding {} bytes", len));
    }
    let out = bytes[*cursor..*cursor + len].to_vec();
    *cursor += len;
    Ok(out)
}
