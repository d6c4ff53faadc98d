//! Expected index contents derived from data-row history.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{anyhow, Result};
use holo_kv::{Cell, CellKind, Row};
use serde::{Deserialize, Serialize};

use crate::maintainer::{Columns, IndexMaintainer};

/// Time-to-live policy of the data table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TtlExpr {
    Forever,
    Fixed { ttl_ms: u64 },
    /// TTL read per row from a column holding a big-endian `u64` of
    /// milliseconds; rows without it use `default_ttl_ms`.
    Column {
        qualifier: Vec<u8>,
        default_ttl_ms: Option<u64>,
    },
}

impl TtlExpr {
    /// Timestamps strictly below the returned horizon are expired.
    pub fn horizon(&self, columns: &Columns, now: u64) -> Result<Option<u64>> {
        let ttl_ms = match self {
            TtlExpr::Forever => None,
            TtlExpr::Fixed { ttl_ms } => Some(*ttl_ms),
            TtlExpr::Column {
                qualifier,
                default_ttl_ms,
            } => match columns.get(qualifier) {
                Some(raw) => {
                    let bytes: [u8; 8] = raw.as_slice().try_into().map_err(|_| {
                        anyhow!(
                            "ttl column {:?} holds {} bytes, expected 8",
                            String::from_utf8_lossy(qualifier),
                            raw.len()
                        )
                    })?;
                    Some(u64::from_be_bytes(bytes))
                }
                None => *default_ttl_ms,
            },
        };
        Ok(ttl_ms.map(|ttl| now.saturating_sub(ttl)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedKind {
    Put,
    Delete,
}

/// One version an index row is expected to hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedVersion {
    pub timestamp: u64,
    pub kind: ExpectedKind,
    /// Covered cells of a put; empty for deletes.
    pub cells: Columns,
    /// Past the TTL horizon: the store may already have purged it.
    pub expired: bool,
}

/// Expected versions of one index row, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedIndexRow {
    pub key: Vec<u8>,
    pub versions: Vec<ExpectedVersion>,
}

impl ExpectedIndexRow {
    pub fn newest(&self) -> Option<&ExpectedVersion> {
        self.versions.first()
    }

    pub fn is_expired(&self) -> bool {
        self.newest().is_some_and(|version| version.expired)
    }
}

/// Replays the raw history of one data row and returns, per index row key,
/// the versions the index must hold, sorted by index key.
///
/// Versions are replayed in timestamp order: a family delete clears the row
/// (and masks puts at its own timestamp), a version delete masks the puts at
/// exactly its timestamp, puts overwrite columns. Every surviving data version
/// yields an index put at the same timestamp; when the index key changes the
/// previous key receives a delete at that timestamp.
///
/// With `strict_ttl` each version older than the TTL horizon is flagged
/// expired. Otherwise expiry is all or nothing: every version is flagged once
/// the newest data cell is past the horizon.
pub fn compute_expected_mutations(
    data_row_key: &[u8],
    data_row: Option<&Row>,
    maintainer: &dyn IndexMaintainer,
    ttl: &TtlExpr,
    strict_ttl: bool,
    now: u64,
) -> Result<Vec<ExpectedIndexRow>> {
    let Some(data_row) = data_row else {
        return Ok(Vec::new());
    };

    let mut by_timestamp: BTreeMap<u64, Vec<&Cell>> = BTreeMap::new();
    for cell in &data_row.cells {
        by_timestamp.entry(cell.timestamp).or_default().push(cell);
    }

    let mut state = Columns::new();
    let mut current_key: Option<Vec<u8>> = None;
    let mut history: BTreeMap<Vec<u8>, Vec<ExpectedVersion>> = BTreeMap::new();
    for (timestamp, cells) in &by_timestamp {
        let family_delete = cells
            .iter()
            .any(|cell| cell.kind == CellKind::DeleteFamily);
        let version_delete = cells
            .iter()
            .any(|cell| cell.kind == CellKind::DeleteFamilyVersion);
        if family_delete {
            state.clear();
        }
        let masked_columns = cells
            .iter()
            .filter(|cell| cell.kind == CellKind::DeleteColumn)
            .map(|cell| cell.qualifier.as_slice())
            .collect::<BTreeSet<_>>();
        let mut wrote = false;
        if !family_delete && !version_delete {
            for cell in cells.iter().filter(|cell| {
                cell.kind == CellKind::Put && !masked_columns.contains(cell.qualifier.as_slice())
            }) {
                state.insert(cell.qualifier.clone(), cell.value.clone());
                wrote = true;
            }
        }
        if !family_delete && !wrote {
            continue;
        }

        let next = if state.is_empty() {
            None
        } else {
            maintainer.build_index_row(data_row_key, &state)?
        };
        if let Some(previous) = current_key.take() {
            if next.as_ref().map_or(true, |row| row.key != previous) {
                history.entry(previous).or_default().push(ExpectedVersion {
                    timestamp: *timestamp,
                    kind: ExpectedKind::Delete,
                    cells: Columns::new(),
                    expired: false,
                });
            }
        }
        if let Some(row) = next {
            history.entry(row.key.clone()).or_default().push(ExpectedVersion {
                timestamp: *timestamp,
                kind: ExpectedKind::Put,
                cells: row.cells,
                expired: false,
            });
            current_key = Some(row.key);
        }
    }

    let newest_data_ts = by_timestamp.keys().next_back().copied().unwrap_or(0);
    let horizon = ttl.horizon(&state, now)?;
    let row_expired = horizon.is_some_and(|horizon| newest_data_ts < horizon);

    Ok(history
        .into_iter()
        .map(|(key, mut versions)| {
            versions.reverse();
            for version in &mut versions {
                version.expired = if strict_ttl {
                    horizon.is_some_and(|horizon| version.timestamp < horizon)
                } else {
                    row_expired
                };
            }
            ExpectedIndexRow { key, versions }
        })
        .collect())
}
