use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use holo_kv::{CellKind, Mutation, Row};
use serde::{Deserialize, Serialize};

use crate::expected::{ExpectedIndexRow, ExpectedKind, ExpectedVersion};
use crate::maintainer::Columns;

/// How a reconciliation pass compares and repairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerifyMode {
    /// Repair unconditionally, record nothing.
    None,
    /// Compare and record, never mutate.
    Only,
    /// Compare, then repair mismatches.
    Before,
    /// Repair unconditionally, then re-read and compare.
    After,
    /// Compare, repair mismatches, re-read and compare again.
    Both,
}

impl VerifyMode {
    pub fn verifies_before(self) -> bool {
        matches!(self, VerifyMode::Only | VerifyMode::Before | VerifyMode::Both)
    }

    pub fn verifies_after(self) -> bool {
        matches!(self, VerifyMode::After | VerifyMode::Both)
    }

    pub fn repairs(self) -> bool {
        !matches!(self, VerifyMode::Only)
    }

    /// Whether repair writes every expected row instead of only mismatches.
    pub fn repairs_unconditionally(self) -> bool {
        matches!(self, VerifyMode::None | VerifyMode::After)
    }
}

/// Classification of one index row. Exactly one applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowVerdict {
    Valid,
    /// Past the TTL horizon; absence or presence is acceptable.
    Expired,
    Missing,
    /// Extra, different cells, newer than the data row, or history mismatch.
    Invalid,
    /// A stale version is current while a newer one is expected.
    Old,
    BeyondMaxLookBackMissing,
    BeyondMaxLookBackInvalid,
}

impl RowVerdict {
    pub fn needs_repair(self) -> bool {
        matches!(
            self,
            RowVerdict::Missing
                | RowVerdict::Invalid
                | RowVerdict::Old
                | RowVerdict::Expired
                | RowVerdict::BeyondMaxLookBackMissing
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseCounters {
    pub valid: u64,
    pub expired: u64,
    pub missing: u64,
    pub invalid: u64,
    pub beyond_max_look_back_missing: u64,
    pub beyond_max_look_back_invalid: u64,
    pub old: u64,
}

impl PhaseCounters {
    pub fn record(&mut self, verdict: RowVerdict) {
        let counter = match verdict {
            RowVerdict::Valid => &mut self.valid,
            RowVerdict::Expired => &mut self.expired,
            RowVerdict::Missing => &mut self.missing,
            RowVerdict::Invalid => &mut self.invalid,
            RowVerdict::Old => &mut self.old,
            RowVerdict::BeyondMaxLookBackMissing => &mut self.beyond_max_look_back_missing,
            RowVerdict::BeyondMaxLookBackInvalid => &mut self.beyond_max_look_back_invalid,
        };
        *counter += 1;
    }

    pub fn merge(&mut self, other: &PhaseCounters) {
        self.valid += other.valid;
        self.expired += other.expired;
        self.missing += other.missing;
        self.invalid += other.invalid;
        self.beyond_max_look_back_missing += other.beyond_max_look_back_missing;
        self.beyond_max_look_back_invalid += other.beyond_max_look_back_invalid;
        self.old += other.old;
    }

    pub fn total(&self) -> u64 {
        self.valid
            + self.expired
            + self.missing
            + self.invalid
            + self.beyond_max_look_back_missing
            + self.beyond_max_look_back_invalid
            + self.old
    }

    /// Hard failures. Beyond-max-lookback outcomes are not counted.
    pub fn failures(&self) -> u64 {
        self.missing + self.invalid + self.old
    }
}

/// Verification outcome of one task, or the merge of several.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub scanned_data_row_count: u64,
    pub rebuilt_index_row_count: u64,
    pub before: PhaseCounters,
    pub after: PhaseCounters,
}

impl VerificationResult {
    pub fn merge(&mut self, other: &VerificationResult) {
        self.scanned_data_row_count += other.scanned_data_row_count;
        self.rebuilt_index_row_count += other.rebuilt_index_row_count;
        self.before.merge(&other.before);
        self.after.merge(&other.after);
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("serialize verification result")
    }
}

/// Time inputs of a verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyContext {
    pub now: u64,
    pub max_lookback_ms: u64,
}

impl VerifyContext {
    /// History older than this may have been compacted away.
    pub fn lookback_horizon(&self) -> u64 {
        self.now.saturating_sub(self.max_lookback_ms)
    }
}

/// Raw history of an actual index row.
#[derive(Debug, Default)]
struct ActualHistory {
    puts: BTreeMap<u64, Columns>,
    family_deletes: BTreeSet<u64>,
    version_deletes: BTreeSet<u64>,
    column_deletes: BTreeSet<(u64, Vec<u8>)>,
}

impl ActualHistory {
    fn from_row(row: Option<&Row>) -> Self {
        let mut history = Self::default();
        for cell in row.map_or(&[][..], |row| row.cells.as_slice()) {
            match cell.kind {
                CellKind::Put => {
                    history
                        .puts
                        .entry(cell.timestamp)
                        .or_default()
                        .insert(cell.qualifier.clone(), cell.value.clone());
                }
                CellKind::DeleteFamily => {
                    history.family_deletes.insert(cell.timestamp);
                }
                CellKind::DeleteFamilyVersion => {
                    history.version_deletes.insert(cell.timestamp);
                }
                CellKind::DeleteColumn => {
                    history
                        .column_deletes
                        .insert((cell.timestamp, cell.qualifier.clone()));
                }
            }
        }
        for (timestamp, qualifier) in &history.column_deletes {
            if let Some(columns) = history.puts.get_mut(timestamp) {
                columns.remove(qualifier);
            }
        }
        history.puts.retain(|_, columns| !columns.is_empty());
        history
    }

    fn is_empty(&self) -> bool {
        self.puts.is_empty()
            && self.family_deletes.is_empty()
            && self.version_deletes.is_empty()
            && self.column_deletes.is_empty()
    }

    /// Qualifiers present in the put at `timestamp` that `cells` lacks.
    fn stray_qualifiers(&self, timestamp: u64, cells: &Columns) -> Vec<Vec<u8>> {
        self.puts.get(&timestamp).map_or_else(Vec::new, |columns| {
            columns
                .keys()
                .filter(|qualifier| !cells.contains_key(*qualifier))
                .cloned()
                .collect()
        })
    }

    fn is_visible(&self, timestamp: u64) -> bool {
        !self.version_deletes.contains(&timestamp)
            && self.family_deletes.range(timestamp..).next().is_none()
    }

    /// Visible put versions, newest first.
    fn visible(&self) -> impl Iterator<Item = (u64, &Columns)> + '_ {
        self.puts
            .iter()
            .rev()
            .filter(|(timestamp, _)| self.is_visible(**timestamp))
            .map(|(timestamp, cells)| (*timestamp, cells))
    }

    fn latest(&self) -> Option<(u64, &Columns)> {
        self.visible().next()
    }

    fn matches(&self, version: &ExpectedVersion) -> bool {
        match version.kind {
            ExpectedKind::Put => self.puts.get(&version.timestamp) == Some(&version.cells),
            ExpectedKind::Delete => self.family_deletes.contains(&version.timestamp),
        }
    }
}

/// Classifies one index row against the versions its data row implies.
///
/// `expected` is `None` when no data row maps to the index row. The newest
/// expected version decides the verdict; older versions inside the look-back
/// window must also be present in the actual history.
pub fn verify_index_row(
    expected: Option<&ExpectedIndexRow>,
    actual: Option<&Row>,
    ctx: &VerifyContext,
) -> RowVerdict {
    let history = ActualHistory::from_row(actual);
    let horizon = ctx.lookback_horizon();
    let latest = history.latest();

    let versions = expected.map_or(&[][..], |row| row.versions.as_slice());
    let Some(newest) = versions.first() else {
        return match latest {
            None => RowVerdict::Valid,
            Some((timestamp, _)) if timestamp < horizon => RowVerdict::BeyondMaxLookBackInvalid,
            Some(_) => RowVerdict::Invalid,
        };
    };
    if newest.kind == ExpectedKind::Delete && history.is_empty() {
        return RowVerdict::Valid;
    }
    if newest.expired {
        return RowVerdict::Expired;
    }

    let beyond = newest.timestamp < horizon;
    let invalid = if beyond {
        RowVerdict::BeyondMaxLookBackInvalid
    } else {
        RowVerdict::Invalid
    };
    let old = if beyond {
        RowVerdict::BeyondMaxLookBackInvalid
    } else {
        RowVerdict::Old
    };

    match (newest.kind, latest) {
        (ExpectedKind::Delete, None) if history.is_empty() => return RowVerdict::Valid,
        (ExpectedKind::Delete, None) => {}
        (ExpectedKind::Delete, Some((timestamp, _))) => {
            return if timestamp < newest.timestamp {
                old
            } else {
                invalid
            };
        }
        (ExpectedKind::Put, None) => {
            return if beyond {
                RowVerdict::BeyondMaxLookBackMissing
            } else {
                RowVerdict::Missing
            };
        }
        (ExpectedKind::Put, Some((timestamp, cells))) => {
            if timestamp < newest.timestamp {
                return old;
            }
            if timestamp > newest.timestamp || cells != &newest.cells {
                return invalid;
            }
        }
    }

    let history_intact = versions
        .iter()
        .filter(|version| !version.expired && version.timestamp >= horizon)
        .all(|version| history.matches(version));
    if history_intact {
        RowVerdict::Valid
    } else {
        RowVerdict::Invalid
    }
}

/// Mutations that make the index row match `expected`, whatever it holds
/// now: newer versions are masked one by one, every unexpired expected version
/// is rewritten with any stray columns of that version masked, and rows with
/// no expected versions are deleted. Expired rows
/// are only deleted under strict TTL.
pub fn rebuild_mutations(
    key: &[u8],
    expected: Option<&ExpectedIndexRow>,
    actual: Option<&Row>,
    strict_ttl: bool,
) -> Vec<Mutation> {
    let history = ActualHistory::from_row(actual);
    let Some(newest) = expected.and_then(ExpectedIndexRow::newest) else {
        return history
            .latest()
            .map(|(timestamp, _)| vec![Mutation::delete_row(key.to_vec(), timestamp)])
            .unwrap_or_default();
    };
    if newest.expired {
        if !strict_ttl {
            return Vec::new();
        }
        return history
            .latest()
            .map(|(timestamp, _)| vec![Mutation::delete_row(key.to_vec(), timestamp)])
            .unwrap_or_default();
    }

    let mut out = history
        .visible()
        .take_while(|(timestamp, _)| *timestamp > newest.timestamp)
        .map(|(timestamp, _)| Mutation::delete_row_version(key.to_vec(), timestamp))
        .collect::<Vec<_>>();
    if let Some(expected) = expected {
        for version in expected.versions.iter().rev().filter(|version| !version.expired) {
            out.push(match version.kind {
                ExpectedKind::Put => {
                    Mutation::put(key.to_vec(), version.timestamp, version.cells.clone())
                }
                ExpectedKind::Delete => Mutation::delete_row(key.to_vec(), version.timestamp),
            });
            if version.kind == ExpectedKind::Put {
                let stray = history.stray_qualifiers(version.timestamp, &version.cells);
                if !stray.is_empty() {
                    out.push(Mutation::delete_columns(key.to_vec(), version.timestamp, stray));
                }
            }
        }
    }
    out
}

/// Corrective mutations for a row classified as `verdict`; empty when the
/// verdict needs no repair.
pub fn repair_mutations(
    key: &[u8],
    expected: Option<&ExpectedIndexRow>,
    actual: Option<&Row>,
    verdict: RowVerdict,
    strict_ttl: bool,
) -> Vec<Mutation> {
    if !verdict.needs_repair() {
        return Vec::new();
    }
    rebuild_mutations(key, expected, actual, strict_ttl)
}
