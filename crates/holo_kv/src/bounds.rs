//! Byte-key boundary helpers shared by scan planning and region routing.
//!
//! Throughout the workspace an empty byte string used as a range end means
//! "unbounded".

/// Returns the lexicographically larger of two start keys.
pub fn max_bytes(left: &[u8], right: &[u8]) -> Vec<u8> {
    // An empty `right` is unbounded, so `left` is already the tighter start.
    if right.is_empty() || left >= right {
        left.to_vec()
    } else {
        right.to_vec()
    }
}

/// Returns the tighter exclusive end bound across two optional bounds.
pub fn min_end_bound(left: &[u8], right: &[u8]) -> Vec<u8> {
    match (left.is_empty(), right.is_empty()) {
        (true, true) => Vec::new(),
        (true, false) => right.to_vec(),
        (false, true) => left.to_vec(),
        (false, false) => {
            if left <= right {
                left.to_vec()
            } else {
                right.to_vec()
            }
        }
    }
}

/// Checks whether `key` is within `[start, end)` where empty bounds are open.
pub fn key_in_range(key: &[u8], start: &[u8], end: &[u8]) -> bool {
    let in_start = start.is_empty() || key >= start;
    let in_end = end.is_empty() || key < end;
    in_start && in_end
}

/// Smallest key strictly greater than every key that starts with `prefix`.
///
/// Returns `None` when the prefix is empty or consists only of `0xFF` bytes,
/// in which case no such key exists and the caller must treat the end as
/// unbounded.
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    for idx in (0..out.len()).rev() {
        if out[idx] != 0xFF {
            out[idx] = out[idx].saturating_add(1);
            out.truncate(idx + 1);
            return Some(out);
        }
    }
    None
}

/// Immediate successor of `key` in byte order.
pub fn next_key(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + 1);
    out.extend_from_slice(key);
    out.push(0);
    out
}

/// Locates the region owning `key` given sorted region end keys.
///
/// The last end key may be empty (unbounded). Returns `None` when the key sorts
/// at or after the last bounded end key, which means the boundary snapshot is
/// stale.
pub fn region_index_for_key(end_keys: &[Vec<u8>], key: &[u8]) -> Option<usize> {
    let idx = end_keys.partition_point(|end| !end.is_empty() && end.as_slice() <= key);
    if idx < end_keys.len() {
        Some(idx)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_end_increments_last_non_ff_byte() {
        assert_eq!(prefix_end(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_end(&[0x01, 0xFF]), Some(vec![0x02]));
        assert_eq!(prefix_end(&[0xFF, 0xFF]), None);
        assert_eq!(prefix_end(&[]), None);
    }

    #[test]
    fn end_bounds_treat_empty_as_unbounded() {
        assert_eq!(min_end_bound(b"", b"m"), b"m".to_vec());
        assert_eq!(min_end_bound(b"k", b"m"), b"k".to_vec());
        assert_eq!(max_bytes(b"k", b""), b"k".to_vec());
        assert!(key_in_range(b"z", b"m", b""));
        assert!(!key_in_range(b"a", b"m", b""));
    }

    #[test]
    fn region_lookup_respects_exclusive_end_keys() {
        let ends = vec![b"g".to_vec(), b"p".to_vec(), Vec::new()];
        assert_eq!(region_index_for_key(&ends, b"a"), Some(0));
        assert_eq!(region_index_for_key(&ends, b"g"), Some(1));
        assert_eq!(region_index_for_key(&ends, b"zz"), Some(2));

        let bounded = vec![b"g".to_vec(), b"p".to_vec()];
        assert_eq!(region_index_for_key(&bounded, b"p"), None);
    }
}
