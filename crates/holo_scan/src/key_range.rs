//! Byte-string interval algebra.
//!
//! Comparisons are unsigned lexicographic and know nothing about sort order:
//! descending slots are expected to arrive with their bounds already inverted.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

use holo_kv::next_key;

const DEGENERATE_KEY: &[u8] = &[0x01];

/// Interval of byte strings with independently inclusive bounds.
///
/// An empty byte string as a bound means unbounded; unbounded bounds are kept
/// exclusive. The one exception is [`KeyRange::IS_NULL`], whose empty inclusive
/// bounds denote the single zero-length key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct KeyRange {
    lower: Vec<u8>,
    lower_inclusive: bool,
    upper: Vec<u8>,
    upper_inclusive: bool,
}

impl KeyRange {
    pub const EVERYTHING: KeyRange = KeyRange {
        lower: Vec::new(),
        lower_inclusive: false,
        upper: Vec::new(),
        upper_inclusive: false,
    };

    /// Matches the zero-length key only, i.e. an absent trailing slot.
    pub const IS_NULL: KeyRange = KeyRange {
        lower: Vec::new(),
        lower_inclusive: true,
        upper: Vec::new(),
        upper_inclusive: true,
    };

    pub fn empty() -> Self {
        Self {
            lower: DEGENERATE_KEY.to_vec(),
            lower_inclusive: false,
            upper: DEGENERATE_KEY.to_vec(),
            upper_inclusive: false,
        }
    }

    /// Every non-empty key.
    pub fn is_not_null() -> Self {
        Self {
            lower: vec![0x00],
            lower_inclusive: true,
            upper: Vec::new(),
            upper_inclusive: false,
        }
    }

    pub fn new(
        lower: impl Into<Vec<u8>>,
        lower_inclusive: bool,
        upper: impl Into<Vec<u8>>,
        upper_inclusive: bool,
    ) -> Self {
        let lower = lower.into();
        let upper = upper.into();
        if lower.is_empty() && upper.is_empty() {
            if lower_inclusive && upper_inclusive {
                return Self::IS_NULL;
            }
            return Self::EVERYTHING;
        }
        let lower_bound = if lower.is_empty() {
            Bound::Unbounded
        } else if lower_inclusive {
            Bound::Included(lower)
        } else {
            Bound::Excluded(lower)
        };
        let upper_bound = if upper.is_empty() {
            Bound::Unbounded
        } else if upper_inclusive {
            Bound::Included(upper)
        } else {
            Bound::Excluded(upper)
        };
        Self::from_bounds(lower_bound, upper_bound)
    }

    pub fn point(key: impl Into<Vec<u8>>) -> Self {
        let key = key.into();
        if key.is_empty() {
            return Self::IS_NULL;
        }
        Self {
            lower: key.clone(),
            lower_inclusive: true,
            upper: key,
            upper_inclusive: true,
        }
    }

    /// Builds a normalized range from standard bounds.
    ///
    /// `Included(empty)` as the upper bound denotes the zero-length key, which
    /// is how [`KeyRange::IS_NULL`] round-trips through this constructor.
    pub fn from_bounds(lower: Bound<Vec<u8>>, upper: Bound<Vec<u8>>) -> Self {
        let lower = match lower {
            Bound::Included(key) if key.is_empty() => Bound::Unbounded,
            // Nothing sorts between the empty key and 0x00.
            Bound::Excluded(key) if key.is_empty() => Bound::Included(vec![0x00]),
            other => other,
        };
        let upper = match upper {
            Bound::Excluded(key) if key.is_empty() => return Self::empty(),
            other => other,
        };
        if !bounds_overlap(as_ref_bound(&lower), as_ref_bound(&upper)) {
            return Self::empty();
        }
        match (lower, upper) {
            (Bound::Unbounded, Bound::Included(upper)) if upper.is_empty() => Self::IS_NULL,
            (lower, upper) => {
                let (lower, lower_inclusive) = match lower {
                    Bound::Included(key) => (key, true),
                    Bound::Excluded(key) => (key, false),
                    Bound::Unbounded => (Vec::new(), false),
                };
                let (upper, upper_inclusive) = match upper {
                    Bound::Included(key) => (key, true),
                    Bound::Excluded(key) => (key, false),
                    Bound::Unbounded => (Vec::new(), false),
                };
                Self {
                    lower,
                    lower_inclusive,
                    upper,
                    upper_inclusive,
                }
            }
        }
    }

    pub fn lower(&self) -> &[u8] {
        &self.lower
    }

    pub fn upper(&self) -> &[u8] {
        &self.upper
    }

    pub fn lower_inclusive(&self) -> bool {
        self.lower_inclusive
    }

    pub fn upper_inclusive(&self) -> bool {
        self.upper_inclusive
    }

    pub fn lower_bound(&self) -> Bound<&[u8]> {
        if self.lower.is_empty() {
            Bound::Unbounded
        } else if self.lower_inclusive {
            Bound::Included(self.lower.as_slice())
        } else {
            Bound::Excluded(self.lower.as_slice())
        }
    }

    pub fn upper_bound(&self) -> Bound<&[u8]> {
        if self.upper.is_empty() && !self.upper_inclusive {
            Bound::Unbounded
        } else if self.upper_inclusive {
            Bound::Included(self.upper.as_slice())
        } else {
            Bound::Excluded(self.upper.as_slice())
        }
    }

    pub fn is_everything(&self) -> bool {
        *self == Self::EVERYTHING
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::empty()
    }

    pub fn is_null_range(&self) -> bool {
        *self == Self::IS_NULL
    }

    pub fn is_single_key(&self) -> bool {
        self.lower_inclusive && self.upper_inclusive && self.lower == self.upper
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        !self.is_below(key) && !self.is_above(key)
    }

    /// True when `key` sorts before the lower bound.
    pub fn is_below(&self, key: &[u8]) -> bool {
        match self.lower_bound() {
            Bound::Unbounded => false,
            Bound::Included(lower) => key < lower,
            Bound::Excluded(lower) => key <= lower,
        }
    }

    /// True when `key` sorts after the upper bound.
    pub fn is_above(&self, key: &[u8]) -> bool {
        match self.upper_bound() {
            Bound::Unbounded => false,
            Bound::Included(upper) => key > upper,
            Bound::Excluded(upper) => key >= upper,
        }
    }

    /// Compares `key`, taken as a lower bound with the given inclusivity,
    /// against this range's upper bound. `Greater` means the bound starts past
    /// the end of the range.
    pub fn compare_lower_to_upper(&self, key: &[u8], inclusive: bool) -> Ordering {
        let lower = if inclusive {
            Bound::Included(key)
        } else {
            Bound::Excluded(key)
        };
        if bounds_overlap(lower, self.upper_bound()) {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    }

    pub fn intersect(&self, other: &KeyRange) -> KeyRange {
        if self.is_empty() || other.is_empty() {
            return Self::empty();
        }
        let lower = max_lower(self.lower_bound(), other.lower_bound());
        let upper = min_upper(self.upper_bound(), other.upper_bound());
        Self::from_bounds(owned_bound(lower), owned_bound(upper))
    }

    /// Merges two overlapping or adjacent ranges; `None` when a gap separates
    /// them.
    pub fn union(&self, other: &KeyRange) -> Option<KeyRange> {
        if self.is_empty() {
            return Some(other.clone());
        }
        if other.is_empty() {
            return Some(self.clone());
        }
        let (first, second) = if cmp_lower(self.lower_bound(), other.lower_bound()) == Ordering::Greater {
            (other, self)
        } else {
            (self, other)
        };
        if !touches(first.upper_bound(), second.lower_bound()) {
            return None;
        }
        let upper = max_upper(first.upper_bound(), second.upper_bound());
        Some(Self::from_bounds(
            owned_bound(first.lower_bound()),
            owned_bound(upper),
        ))
    }

    /// Byte-complements both bounds and swaps them, translating a range over
    /// ascending encodings into the equivalent range over descending ones.
    pub fn invert(&self) -> KeyRange {
        if self.is_empty()
            || self.is_everything()
            || self.is_null_range()
            || *self == Self::is_not_null()
        {
            return self.clone();
        }
        let lower = match self.upper_bound() {
            Bound::Unbounded => Bound::Unbounded,
            Bound::Included(key) => Bound::Included(invert_bytes(key)),
            Bound::Excluded(key) => Bound::Excluded(invert_bytes(key)),
        };
        let upper = match self.lower_bound() {
            Bound::Unbounded => Bound::Unbounded,
            Bound::Included(key) => Bound::Included(invert_bytes(key)),
            Bound::Excluded(key) => Bound::Excluded(invert_bytes(key)),
        };
        Self::from_bounds(lower, upper)
    }

    /// Smallest key contained in the range, if one can be named.
    pub fn first_key(&self) -> Vec<u8> {
        match self.lower_bound() {
            Bound::Unbounded => Vec::new(),
            Bound::Included(key) => key.to_vec(),
            Bound::Excluded(key) => next_key(key),
        }
    }

    /// Exclusive key bounding every key in the range from above; empty when
    /// unbounded.
    pub fn end_key(&self) -> Vec<u8> {
        match self.upper_bound() {
            Bound::Unbounded => Vec::new(),
            Bound::Included(key) => next_key(key),
            Bound::Excluded(key) => key.to_vec(),
        }
    }

    /// Covering range from the first range's lower bound to the last range's
    /// upper bound of a sorted list.
    pub fn hull(sorted: &[KeyRange]) -> KeyRange {
        match (sorted.first(), sorted.last()) {
            (Some(first), Some(last)) => Self::from_bounds(
                owned_bound(first.lower_bound()),
                owned_bound(last.upper_bound()),
            ),
            _ => Self::empty(),
        }
    }
}

impl fmt::Debug for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_everything() {
            return f.write_str("EVERYTHING");
        }
        if self.is_empty() {
            return f.write_str("EMPTY");
        }
        if self.is_null_range() {
            return f.write_str("IS_NULL");
        }
        let open = if self.lower_inclusive { '[' } else { '(' };
        let close = if self.upper_inclusive { ']' } else { ')' };
        write!(
            f,
            "{open}{}, {}{close}",
            hex_or_star(&self.lower),
            hex_or_star(&self.upper)
        )
    }
}

fn hex_or_star(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "*".to_string();
    }
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Sorts and merges a list into sorted, disjoint, non-empty ranges.
pub fn coalesce(ranges: &[KeyRange]) -> Vec<KeyRange> {
    let mut sorted = ranges
        .iter()
        .filter(|range| !range.is_empty())
        .cloned()
        .collect::<Vec<_>>();
    if sorted.iter().any(KeyRange::is_everything) {
        return vec![KeyRange::EVERYTHING];
    }
    sorted.sort_by(|left, right| {
        cmp_lower(left.lower_bound(), right.lower_bound())
            .then_with(|| cmp_upper(left.upper_bound(), right.upper_bound()))
    });

    let mut out: Vec<KeyRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        if let Some(last) = out.last_mut() {
            if let Some(merged) = last.union(&range) {
                *last = merged;
                continue;
            }
        }
        out.push(range);
    }
    out
}

/// Intersects two sorted disjoint lists.
pub fn intersect_lists(left: &[KeyRange], right: &[KeyRange]) -> Vec<KeyRange> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    while i < left.len() && j < right.len() {
        let overlap = left[i].intersect(&right[j]);
        if !overlap.is_empty() {
            out.push(overlap);
        }
        match cmp_upper(left[i].upper_bound(), right[j].upper_bound()) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                i += 1;
                j += 1;
            }
        }
    }
    out
}

/// Set complement of a list within [`KeyRange::EVERYTHING`].
pub fn complement(ranges: &[KeyRange]) -> Vec<KeyRange> {
    let ranges = coalesce(ranges);
    let mut out = Vec::new();
    let mut gap_lower: Option<Bound<Vec<u8>>> = Some(Bound::Unbounded);
    for range in &ranges {
        if let Some(lower) = gap_lower.take() {
            let gap_upper = match range.lower_bound() {
                Bound::Unbounded => None,
                Bound::Included(key) => Some(Bound::Excluded(key.to_vec())),
                Bound::Excluded(key) => Some(Bound::Included(key.to_vec())),
            };
            if let Some(upper) = gap_upper {
                let gap = KeyRange::from_bounds(lower, upper);
                if !gap.is_empty() {
                    out.push(gap);
                }
            }
        }
        gap_lower = match range.upper_bound() {
            Bound::Unbounded => None,
            Bound::Included(key) => Some(Bound::Excluded(key.to_vec())),
            Bound::Excluded(key) => Some(Bound::Included(key.to_vec())),
        };
    }
    if let Some(lower) = gap_lower {
        let gap = KeyRange::from_bounds(lower, Bound::Unbounded);
        if !gap.is_empty() {
            out.push(gap);
        }
    }
    out
}

pub(crate) fn invert_bytes(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().map(|b| !b).collect()
}

fn as_ref_bound(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(key) => Bound::Included(key.as_slice()),
        Bound::Excluded(key) => Bound::Excluded(key.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn owned_bound(bound: Bound<&[u8]>) -> Bound<Vec<u8>> {
    match bound {
        Bound::Included(key) => Bound::Included(key.to_vec()),
        Bound::Excluded(key) => Bound::Excluded(key.to_vec()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

pub(crate) fn cmp_lower(left: Bound<&[u8]>, right: Bound<&[u8]>) -> Ordering {
    match (left, right) {
        (Bound::Unbounded, Bound::Unbounded) => Ordering::Equal,
        (Bound::Unbounded, _) => Ordering::Less,
        (_, Bound::Unbounded) => Ordering::Greater,
        (Bound::Included(l), Bound::Included(r)) | (Bound::Excluded(l), Bound::Excluded(r)) => {
            l.cmp(r)
        }
        (Bound::Included(l), Bound::Excluded(r)) => l.cmp(r).then(Ordering::Less),
        (Bound::Excluded(l), Bound::Included(r)) => l.cmp(r).then(Ordering::Greater),
    }
}

pub(crate) fn cmp_upper(left: Bound<&[u8]>, right: Bound<&[u8]>) -> Ordering {
    match (left, right) {
        (Bound::Unbounded, Bound::Unbounded) => Ordering::Equal,
        (Bound::Unbounded, _) => Ordering::Greater,
        (_, Bound::Unbounded) => Ordering::Less,
        (Bound::Included(l), Bound::Included(r)) | (Bound::Excluded(l), Bound::Excluded(r)) => {
            l.cmp(r)
        }
        (Bound::Included(l), Bound::Excluded(r)) => l.cmp(r).then(Ordering::Greater),
        (Bound::Excluded(l), Bound::Included(r)) => l.cmp(r).then(Ordering::Less),
    }
}

fn max_lower<'a>(left: Bound<&'a [u8]>, right: Bound<&'a [u8]>) -> Bound<&'a [u8]> {
    if cmp_lower(left, right) == Ordering::Less {
        right
    } else {
        left
    }
}

fn min_upper<'a>(left: Bound<&'a [u8]>, right: Bound<&'a [u8]>) -> Bound<&'a [u8]> {
    if cmp_upper(left, right) == Ordering::Greater {
        right
    } else {
        left
    }
}

fn max_upper<'a>(left: Bound<&'a [u8]>, right: Bound<&'a [u8]>) -> Bound<&'a [u8]> {
    if cmp_upper(left, right) == Ordering::Less {
        right
    } else {
        left
    }
}

/// True when some key satisfies both a lower and an upper bound.
fn bounds_overlap(lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> bool {
    match (lower, upper) {
        (Bound::Unbounded, _) | (_, Bound::Unbounded) => true,
        (Bound::Included(l), Bound::Included(u)) => l <= u,
        (Bound::Included(l), Bound::Excluded(u)) => l < u,
        (Bound::Excluded(l), Bound::Included(u)) => l < u,
        (Bound::Excluded(l), Bound::Excluded(u)) => l < u,
    }
}

/// True when no key sits between `upper` and a following range's `lower`.
fn touches(upper: Bound<&[u8]>, lower: Bound<&[u8]>) -> bool {
    match (upper, lower) {
        (Bound::Unbounded, _) | (_, Bound::Unbounded) => true,
        (Bound::Excluded(u), Bound::Excluded(l)) => l < u,
        (Bound::Included(u), Bound::Included(l))
        | (Bound::Included(u), Bound::Excluded(l))
        | (Bound::Excluded(u), Bound::Included(l)) => l <= u,
    }
}
