use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::bounds::region_index_for_key;
use crate::cell::{sort_cells, Cell, CellKind, Mutation, Row};
use crate::filter::FilterDecision;
use crate::table::{KvTable, ReadOptions, ScanRequest};

/// In-process, multi-version, region-partitioned [`KvTable`].
///
/// Rows live in one ordered map; regions are only a routing overlay defined by
/// split keys. Batches that touch more than one region are rejected, mirroring
/// region-local atomic batch mutation in the real store.
pub struct MemTable {
    name: String,
    rows: RwLock<BTreeMap<Vec<u8>, Vec<Cell>>>,
    split_keys: RwLock<Vec<Vec<u8>>>,
    injected_batch_failures: AtomicUsize,
    applied_batches: AtomicU64,
}

impl MemTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: RwLock::new(BTreeMap::new()),
            split_keys: RwLock::new(Vec::new()),
            injected_batch_failures: AtomicUsize::new(0),
            applied_batches: AtomicU64::new(0),
        }
    }

    /// Splits the table into regions ending at each of `split_keys`.
    pub fn with_split_keys(self, split_keys: impl IntoIterator<Item = Vec<u8>>) -> Self {
        let keys = split_keys
            .into_iter()
            .filter(|key| !key.is_empty())
            .collect::<BTreeSet<_>>();
        if let Ok(mut guard) = self.split_keys.write() {
            *guard = keys.into_iter().collect();
        }
        self
    }

    /// Adds a region boundary at runtime, as a region split would.
    pub fn split_at(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            bail!("split key must not be empty");
        }
        let mut guard = self
            .split_keys
            .write()
            .map_err(|_| anyhow!("memtable '{}' split lock poisoned", self.name))?;
        if let Err(idx) = guard.binary_search_by(|probe| probe.as_slice().cmp(key)) {
            guard.insert(idx, key.to_vec());
        }
        Ok(())
    }

    /// Makes the next `count` batch mutations fail without applying anything.
    pub fn inject_batch_failures(&self, count: usize) {
        self.injected_batch_failures.store(count, Ordering::SeqCst);
    }

    /// Number of batch mutations applied so far.
    pub fn applied_batches(&self) -> u64 {
        self.applied_batches.load(Ordering::SeqCst)
    }

    pub fn row_count(&self) -> usize {
        self.rows.read().map(|guard| guard.len()).unwrap_or(0)
    }

    /// Raw snapshot of every stored cell of one row.
    pub fn raw_row(&self, key: &[u8]) -> Option<Row> {
        let guard = self.rows.read().ok()?;
        guard.get(key).map(|cells| Row {
            key: key.to_vec(),
            cells: cells.clone(),
        })
    }

    /// Applies mutations directly, bypassing region checks and failure
    /// injection. Used to seed fixtures.
    pub fn load(&self, mutations: Vec<Mutation>) -> Result<()> {
        let mut guard = self
            .rows
            .write()
            .map_err(|_| anyhow!("memtable '{}' lock poisoned", self.name))?;
        for mutation in mutations {
            apply_mutation(&mut guard, mutation);
        }
        Ok(())
    }

    /// Purges history older than `horizon`, keeping for each column only the
    /// newest visible version below it. Delete markers below the horizon and
    /// the cells they mask are dropped.
    pub fn compact_before(&self, horizon: u64) -> Result<usize> {
        let mut guard = self
            .rows
            .write()
            .map_err(|_| anyhow!("memtable '{}' lock poisoned", self.name))?;
        let mut purged = 0usize;
        let mut emptied = Vec::new();
        for (key, cells) in guard.iter_mut() {
            let below = cells
                .iter()
                .filter(|cell| cell.timestamp < horizon)
                .cloned()
                .collect::<Vec<_>>();
            let visible = visible_cells(&below, false)
                .into_iter()
                .map(|cell| (cell.qualifier.clone(), cell.timestamp))
                .collect::<HashSet<_>>();
            let before = cells.len();
            cells.retain(|cell| {
                cell.timestamp >= horizon
                    || (cell.kind == CellKind::Put
                        && visible.contains(&(cell.qualifier.clone(), cell.timestamp)))
            });
            purged += before - cells.len();
            if cells.is_empty() {
                emptied.push(key.clone());
            }
        }
        for key in emptied {
            guard.remove(&key);
        }
        debug!(table = %self.name, horizon, purged, "memtable compaction finished");
        Ok(purged)
    }

    fn region_of(&self, key: &[u8]) -> Result<usize> {
        let guard = self
            .split_keys
            .read()
            .map_err(|_| anyhow!("memtable '{}' split lock poisoned", self.name))?;
        let mut end_keys = guard.clone();
        end_keys.push(Vec::new());
        region_index_for_key(&end_keys, key)
            .ok_or_else(|| anyhow!("key does not map to any region of '{}'", self.name))
    }
}

#[async_trait]
impl KvTable for MemTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn scan(&self, mut request: ScanRequest) -> Result<Vec<Row>> {
        let guard = self
            .rows
            .read()
            .map_err(|_| anyhow!("memtable '{}' lock poisoned", self.name))?;
        let options = request.read_options();
        let stop: Bound<Vec<u8>> = if request.stop_row.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(request.stop_row.clone())
        };
        let mut cursor = Bound::Included(request.start_row.clone());
        let mut out = Vec::new();

        'pages: loop {
            if let (Bound::Included(start), Bound::Excluded(stop)) = (&cursor, &stop) {
                if start >= stop {
                    break;
                }
            }
            for (key, cells) in guard.range((cursor.clone(), stop.clone())) {
                if let Some(filter) = request.filter.as_mut() {
                    match filter.filter_row_key(key)? {
                        FilterDecision::Include => {}
                        FilterDecision::SeekTo(hint) => {
                            if hint <= *key {
                                bail!(
                                    "filter '{}' seek hint does not advance past current row",
                                    filter.name()
                                );
                            }
                            cursor = Bound::Included(hint);
                            continue 'pages;
                        }
                        FilterDecision::Done => break 'pages,
                    }
                }
                if let Some(row) = materialize(key, cells, options) {
                    out.push(row);
                    if request.limit.is_some_and(|limit| out.len() >= limit) {
                        break 'pages;
                    }
                }
            }
            break;
        }

        Ok(out)
    }

    async fn get(&self, keys: &[Vec<u8>], options: ReadOptions) -> Result<Vec<Option<Row>>> {
        let guard = self
            .rows
            .read()
            .map_err(|_| anyhow!("memtable '{}' lock poisoned", self.name))?;
        Ok(keys
            .iter()
            .map(|key| {
                guard
                    .get(key)
                    .and_then(|cells| materialize(key, cells, options))
            })
            .collect())
    }

    async fn batch_mutate(&self, mutations: Vec<Mutation>) -> Result<()> {
        if mutations.is_empty() {
            return Ok(());
        }
        let injected = self
            .injected_batch_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| {
                pending.checked_sub(1)
            })
            .is_ok();
        if injected {
            warn!(table = %self.name, rows = mutations.len(), "rejecting batch (injected failure)");
            bail!("injected batch mutation failure on '{}'", self.name);
        }

        let first_region = self.region_of(mutations[0].row())?;
        for mutation in &mutations[1..] {
            let region = self.region_of(mutation.row())?;
            if region != first_region {
                bail!(
                    "batch mutation on '{}' spans regions {} and {}",
                    self.name,
                    first_region,
                    region
                );
            }
        }

        let mut guard = self
            .rows
            .write()
            .map_err(|_| anyhow!("memtable '{}' lock poisoned", self.name))?;
        for mutation in mutations {
            apply_mutation(&mut guard, mutation);
        }
        self.applied_batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn region_end_keys(&self) -> Result<Vec<Vec<u8>>> {
        let guard = self
            .split_keys
            .read()
            .map_err(|_| anyhow!("memtable '{}' split lock poisoned", self.name))?;
        let mut end_keys = guard.clone();
        end_keys.push(Vec::new());
        Ok(end_keys)
    }
}

fn apply_mutation(rows: &mut BTreeMap<Vec<u8>, Vec<Cell>>, mutation: Mutation) {
    let (key, cells) = mutation.into_cells();
    let entry = rows.entry(key).or_default();
    for cell in cells {
        // A rewrite of the same coordinate replaces the stored value.
        entry.retain(|existing| {
            !(existing.timestamp == cell.timestamp
                && existing.kind == cell.kind
                && existing.qualifier == cell.qualifier)
        });
        entry.push(cell);
    }
    sort_cells(entry);
}

/// Applies delete markers to storage-ordered cells, returning the visible puts.
fn visible_cells(cells: &[Cell], all_versions: bool) -> Vec<&Cell> {
    let mut family_delete: Option<u64> = None;
    let mut version_deletes = HashSet::new();
    let mut column_deletes = HashSet::new();
    let mut seen_qualifiers = HashSet::new();
    let mut out = Vec::new();
    for cell in cells {
        match cell.kind {
            CellKind::DeleteFamily => {
                family_delete = Some(family_delete.map_or(cell.timestamp, |ts| ts.max(cell.timestamp)));
            }
            CellKind::DeleteFamilyVersion => {
                version_deletes.insert(cell.timestamp);
            }
            CellKind::DeleteColumn => {
                column_deletes.insert((cell.timestamp, cell.qualifier.as_slice()));
            }
            CellKind::Put => {
                if family_delete.is_some_and(|ts| cell.timestamp <= ts)
                    || version_deletes.contains(&cell.timestamp)
                    || column_deletes.contains(&(cell.timestamp, cell.qualifier.as_slice()))
                {
                    continue;
                }
                if !all_versions && !seen_qualifiers.insert(cell.qualifier.as_slice()) {
                    continue;
                }
                out.push(cell);
            }
        }
    }
    out
}

fn materialize(key: &[u8], cells: &[Cell], options: ReadOptions) -> Option<Row> {
    let in_range = cells
        .iter()
        .filter(|cell| options.time_range.contains(cell.timestamp))
        .cloned()
        .collect::<Vec<_>>();
    let cells = if options.raw {
        in_range
    } else {
        visible_cells(&in_range, options.read_all_versions)
            .into_iter()
            .cloned()
            .collect()
    };
    if cells.is_empty() {
        return None;
    }
    Some(Row {
        key: key.to_vec(),
        cells,
    })
}
