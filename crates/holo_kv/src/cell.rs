use std::cmp::Reverse;
use std::collections::BTreeMap;

/// Kind of a stored cell.
///
/// Variant order is significant: at equal timestamps delete markers sort ahead
/// of puts so a single newest-first pass sees every marker before the puts it
/// masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CellKind {
    /// Row tombstone masking every cell with `timestamp <= marker`.
    DeleteFamily,
    /// Row tombstone masking only cells at exactly the marker timestamp.
    DeleteFamilyVersion,
    /// Masks the put of its qualifier at exactly the marker timestamp.
    DeleteColumn,
    Put,
}

impl CellKind {
    pub fn is_delete(self) -> bool {
        !matches!(self, CellKind::Put)
    }
}

/// One versioned cell of a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    /// Column qualifier; empty for row tombstones.
    pub qualifier: Vec<u8>,
    pub timestamp: u64,
    pub kind: CellKind,
    pub value: Vec<u8>,
}

impl Cell {
    pub fn put(qualifier: impl Into<Vec<u8>>, timestamp: u64, value: impl Into<Vec<u8>>) -> Self {
        Self {
            qualifier: qualifier.into(),
            timestamp,
            kind: CellKind::Put,
            value: value.into(),
        }
    }

    pub fn delete_family(timestamp: u64) -> Self {
        Self {
            qualifier: Vec::new(),
            timestamp,
            kind: CellKind::DeleteFamily,
            value: Vec::new(),
        }
    }

    pub fn delete_family_version(timestamp: u64) -> Self {
        Self {
            qualifier: Vec::new(),
            timestamp,
            kind: CellKind::DeleteFamilyVersion,
            value: Vec::new(),
        }
    }

    pub fn delete_column(qualifier: impl Into<Vec<u8>>, timestamp: u64) -> Self {
        Self {
            qualifier: qualifier.into(),
            timestamp,
            kind: CellKind::DeleteColumn,
            value: Vec::new(),
        }
    }

    /// Storage order: newest first, markers before puts, then qualifier.
    pub(crate) fn sort_key(&self) -> (Reverse<u64>, CellKind, &[u8]) {
        (Reverse(self.timestamp), self.kind, self.qualifier.as_slice())
    }
}

/// Sorts cells into storage order.
pub(crate) fn sort_cells(cells: &mut [Cell]) {
    cells.sort_by(|left, right| left.sort_key().cmp(&right.sort_key()));
}

/// A row as returned by scans and gets.
///
/// Cells are in storage order (newest first). Raw reads include delete
/// markers; non-raw reads only carry visible puts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub key: Vec<u8>,
    pub cells: Vec<Cell>,
}

impl Row {
    pub fn new(key: impl Into<Vec<u8>>, mut cells: Vec<Cell>) -> Self {
        sort_cells(&mut cells);
        Self {
            key: key.into(),
            cells,
        }
    }

    /// Newest timestamp carried by any cell of the row.
    pub fn latest_timestamp(&self) -> Option<u64> {
        self.cells.iter().map(|cell| cell.timestamp).max()
    }

    /// Newest put value for `qualifier`, ignoring delete markers.
    pub fn value(&self, qualifier: &[u8]) -> Option<&[u8]> {
        self.cells
            .iter()
            .find(|cell| cell.kind == CellKind::Put && cell.qualifier == qualifier)
            .map(|cell| cell.value.as_slice())
    }

    pub fn has_delete_markers(&self) -> bool {
        self.cells.iter().any(|cell| cell.kind.is_delete())
    }
}

/// Half-open `[min, max)` timestamp window applied to reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub min: u64,
    pub max: u64,
}

impl TimeRange {
    pub const fn all() -> Self {
        Self {
            min: 0,
            max: u64::MAX,
        }
    }

    /// Every timestamp up to and including `ts`.
    pub fn up_to(ts: u64) -> Self {
        Self {
            min: 0,
            max: ts.saturating_add(1),
        }
    }

    pub fn contains(&self, ts: u64) -> bool {
        ts >= self.min && ts < self.max
    }

    pub fn is_all(&self) -> bool {
        *self == Self::all()
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::all()
    }
}

/// A write against one row. Batches of mutations are applied atomically by
/// [`crate::KvTable::batch_mutate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Put {
        row: Vec<u8>,
        timestamp: u64,
        columns: BTreeMap<Vec<u8>, Vec<u8>>,
    },
    /// Masks every cell of the row at or below `timestamp`.
    DeleteRow { row: Vec<u8>, timestamp: u64 },
    /// Masks only the row version written at exactly `timestamp`.
    DeleteRowVersion { row: Vec<u8>, timestamp: u64 },
    /// Masks the named columns of the version written at exactly `timestamp`.
    DeleteColumns {
        row: Vec<u8>,
        timestamp: u64,
        qualifiers: Vec<Vec<u8>>,
    },
}

impl Mutation {
    pub fn put(
        row: impl Into<Vec<u8>>,
        timestamp: u64,
        columns: impl IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    ) -> Self {
        Mutation::Put {
            row: row.into(),
            timestamp,
            columns: columns.into_iter().collect(),
        }
    }

    pub fn delete_row(row: impl Into<Vec<u8>>, timestamp: u64) -> Self {
        Mutation::DeleteRow {
            row: row.into(),
            timestamp,
        }
    }

    pub fn delete_row_version(row: impl Into<Vec<u8>>, timestamp: u64) -> Self {
        Mutation::DeleteRowVersion {
            row: row.into(),
            timestamp,
        }
    }

    pub fn delete_columns(
        row: impl Into<Vec<u8>>,
        timestamp: u64,
        qualifiers: impl IntoIterator<Item = Vec<u8>>,
    ) -> Self {
        Mutation::DeleteColumns {
            row: row.into(),
            timestamp,
            qualifiers: qualifiers.into_iter().collect(),
        }
    }

    pub fn row(&self) -> &[u8] {
        match self {
            Mutation::Put { row, .. }
            | Mutation::DeleteRow { row, .. }
            | Mutation::DeleteRowVersion { row, .. }
            | Mutation::DeleteColumns { row, .. } => row,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Mutation::Put { timestamp, .. }
            | Mutation::DeleteRow { timestamp, .. }
            | Mutation::DeleteRowVersion { timestamp, .. }
            | Mutation::DeleteColumns { timestamp, .. } => *timestamp,
        }
    }

    pub fn is_delete(&self) -> bool {
        !matches!(self, Mutation::Put { .. })
    }

    pub(crate) fn into_cells(self) -> (Vec<u8>, Vec<Cell>) {
        match self {
            Mutation::Put {
                row,
                timestamp,
                columns,
            } => {
                let cells = columns
                    .into_iter()
                    .map(|(qualifier, value)| Cell::put(qualifier, timestamp, value))
                    .collect();
                (row, cells)
            }
            Mutation::DeleteRow { row, timestamp } => (row, vec![Cell::delete_family(timestamp)]),
            Mutation::DeleteRowVersion { row, timestamp } => {
                (row, vec![Cell::delete_family_version(timestamp)])
            }
            Mutation::DeleteColumns {
                row,
                timestamp,
                qualifiers,
            } => {
                let cells = qualifiers
                    .into_iter()
                    .map(|qualifier| Cell::delete_column(qualifier, timestamp))
                    .collect();
                (row, cells)
            }
        }
    }
}
