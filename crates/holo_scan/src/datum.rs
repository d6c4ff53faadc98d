use anyhow::{anyhow, Result};

const SIGN_FLIP_MASK_64: u64 = 1u64 << 63;
const SIGN_FLIP_MASK_32: u32 = 1u32 << 31;

/// Row-key column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Boolean,
    Int32,
    Int64,
    UInt64,
    /// Milliseconds since the Unix epoch, signed.
    Timestamp,
    FixedBinary(u32),
    Utf8,
    Binary,
    /// Unescaped remainder of the key. Only legal as the final slot.
    Raw,
}

impl ColumnType {
    pub fn is_fixed_width(self) -> bool {
        self.byte_length().is_some()
    }

    pub fn byte_length(self) -> Option<usize> {
        match self {
            ColumnType::Boolean => Some(1),
            ColumnType::Int32 => Some(4),
            ColumnType::Int64 | ColumnType::UInt64 | ColumnType::Timestamp => Some(8),
            ColumnType::FixedBinary(width) => Some(width as usize),
            ColumnType::Utf8 | ColumnType::Binary | ColumnType::Raw => None,
        }
    }

    pub(crate) fn tag(self) -> u8 {
        match self {
            ColumnType::Boolean => 1,
            ColumnType::Int32 => 2,
            ColumnType::Int64 => 3,
            ColumnType::UInt64 => 4,
            ColumnType::Timestamp => 5,
            ColumnType::FixedBinary(_) => 6,
            ColumnType::Utf8 => 7,
            ColumnType::Binary => 8,
            ColumnType::Raw => 9,
        }
    }

    pub(crate) fn from_tag(tag: u8, width: u32) -> Result<Self> {
        let column_type = match tag {
            1 => ColumnType::Boolean,
            2 => ColumnType::Int32,
            3 => ColumnType::Int64,
            4 => ColumnType::UInt64,
            5 => ColumnType::Timestamp,
            6 => ColumnType::FixedBinary(width),
            7 => ColumnType::Utf8,
            8 => ColumnType::Binary,
            9 => ColumnType::Raw,
            other => return Err(anyhow!("unknown column type tag {}", other)),
        };
        Ok(column_type)
    }
}

/// A typed row-key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Datum {
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    UInt64(u64),
    Timestamp(i64),
    Binary(Vec<u8>),
    Utf8(String),
}

impl Datum {
    pub fn utf8(value: impl Into<String>) -> Self {
        Datum::Utf8(value.into())
    }

    /// Order-preserving, unescaped payload bytes for `column_type`.
    pub fn encode_payload(&self, column_type: ColumnType) -> Result<Vec<u8>> {
        let payload = match (column_type, self) {
            (ColumnType::Boolean, Datum::Boolean(v)) => vec![u8::from(*v)],
            (ColumnType::Int32, Datum::Int32(v)) => {
                ((*v as u32) ^ SIGN_FLIP_MASK_32).to_be_bytes().to_vec()
            }
            (ColumnType::Int64, Datum::Int64(v)) | (ColumnType::Timestamp, Datum::Timestamp(v)) => {
                encode_i64_ordered(*v).to_vec()
            }
            (ColumnType::UInt64, Datum::UInt64(v)) => v.to_be_bytes().to_vec(),
            (ColumnType::FixedBinary(width), Datum::Binary(bytes)) => {
                let mut out = bytes.clone();
                out.resize(width as usize, 0x00);
                out
            }
            (ColumnType::Utf8, Datum::Utf8(v)) => v.as_bytes().to_vec(),
            (ColumnType::Binary | ColumnType::Raw, Datum::Binary(bytes)) => bytes.clone(),
            (column_type, datum) => {
                return Err(anyhow!(
                    "value {:?} does not match column type {:?}",
                    datum,
                    column_type
                ));
            }
        };
        Ok(payload)
    }

    pub fn decode_payload(column_type: ColumnType, payload: &[u8]) -> Result<Self> {
        let fixed = |width: usize| fixed_payload(column_type, payload, width);
        let datum = match column_type {
            ColumnType::Boolean => Datum::Boolean(fixed(1)?[0] != 0),
            ColumnType::Int32 => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(fixed(4)?);
                Datum::Int32((u32::from_be_bytes(raw) ^ SIGN_FLIP_MASK_32) as i32)
            }
            ColumnType::Int64 | ColumnType::Timestamp => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(fixed(8)?);
                let value = decode_i64_ordered(raw);
                if column_type == ColumnType::Timestamp {
                    Datum::Timestamp(value)
                } else {
                    Datum::Int64(value)
                }
            }
            ColumnType::UInt64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(fixed(8)?);
                Datum::UInt64(u64::from_be_bytes(raw))
            }
            ColumnType::FixedBinary(width) => Datum::Binary(fixed(width as usize)?.to_vec()),
            ColumnType::Utf8 => Datum::Utf8(
                String::from_utf8(payload.to_vec())
                    .map_err(|err| anyhow!("invalid utf8 row-key payload: {}", err))?,
            ),
            ColumnType::Binary | ColumnType::Raw => Datum::Binary(payload.to_vec()),
        };
        Ok(datum)
    }
}

fn fixed_payload(column_type: ColumnType, payload: &[u8], width: usize) -> Result<&[u8]> {
    if payload.len() != width {
        return Err(anyhow!(
            "expected {} payload bytes for {:?}, found {}",
            width,
            column_type,
            payload.len()
        ));
    }
    Ok(payload)
}

fn encode_i64_ordered(value: i64) -> [u8; 8] {
    (value as u64 ^ SIGN_FLIP_MASK_64).to_be_bytes()
}

fn decode_i64_ordered(bytes: [u8; 8]) -> i64 {
    (u64::from_be_bytes(bytes) ^ SIGN_FLIP_MASK_64) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_integers_encode_in_numeric_order() {
        let values = [i64::MIN, -7, -1, 0, 1, 42, i64::MAX];
        let encoded = values
            .iter()
            .map(|v| Datum::Int64(*v).encode_payload(ColumnType::Int64))
            .collect::<Result<Vec<_>>>()
            .expect("encode");
        assert!(encoded.windows(2).all(|pair| pair[0] < pair[1]));

        let small = Datum::Int32(-3).encode_payload(ColumnType::Int32).expect("encode");
        assert_eq!(
            Datum::decode_payload(ColumnType::Int32, &small).expect("decode"),
            Datum::Int32(-3)
        );
    }

    #[test]
    fn fixed_binary_is_padded_and_truncated() {
        let padded = Datum::Binary(b"ab".to_vec())
            .encode_payload(ColumnType::FixedBinary(4))
            .expect("encode");
        assert_eq!(padded, b"ab\0\0".to_vec());
        let truncated = Datum::Binary(b"abcdef".to_vec())
            .encode_payload(ColumnType::FixedBinary(3))
            .expect("encode");
        assert_eq!(truncated, b"abc".to_vec());
    }

    #[test]
    fn mismatched_types_are_rejected() {
        let err = Datum::utf8("x")
            .encode_payload(ColumnType::Int64)
            .expect_err("type mismatch");
        assert!(err.to_string().contains("does not match"));
        assert!(Datum::decode_payload(ColumnType::Int64, &[1, 2]).is_err());
        assert!(ColumnType::from_tag(99, 0).is_err());
    }
}
