//! Bounded fan-out verification and repair of index rows.
//!
//! Both entry points share one shape: group the page into per-region row-key
//! subsets, run one task per subset under a semaphore, wait for every task,
//! then merge the per-task results. A task compares each index row with the
//! versions its data row implies and commits its repairs as at most one batch
//! per index region.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::stream::{FuturesUnordered, StreamExt};
use holo_kv::{
    key_in_range, next_key, region_index_for_key, KvTable, Mutation, ReadOptions, Row,
    ScanRequest, TimeRange,
};
use holo_scan::ScanRanges;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::ReconcileConfig;
use crate::error::{ReconcileError, StaleRegionTopology, TaskBatchFailure};
use crate::expected::{compute_expected_mutations, ExpectedIndexRow, TtlExpr};
use crate::maintainer::IndexMaintainer;
use crate::partition::per_task_row_keys;
use crate::verify::{
    rebuild_mutations, repair_mutations, verify_index_row, VerificationResult, VerifyContext,
    VerifyMode,
};

/// A contiguous slice `[start, end)` of the index key space together with
/// every raw index row it holds. An empty `end` is unbounded.
#[derive(Debug, Clone, Default)]
pub struct IndexPage {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
    pub rows: Vec<Row>,
}

/// One index row under comparison.
#[derive(Debug)]
struct Candidate {
    key: Vec<u8>,
    expected: Option<ExpectedIndexRow>,
    actual: Option<Row>,
}

enum TaskJob {
    /// Index rows of a page grouped by the data row they point at.
    IndexRows {
        start: Vec<u8>,
        end: Vec<u8>,
        groups: Vec<(Vec<u8>, Vec<Row>)>,
    },
    /// Expected rows of one index region, computed from data rows.
    ExpectedRows { expected: Vec<ExpectedIndexRow> },
}

impl TaskJob {
    fn len(&self) -> usize {
        match self {
            TaskJob::IndexRows { groups, .. } => groups.len(),
            TaskJob::ExpectedRows { expected } => expected.len(),
        }
    }
}

/// State shared read-only by the tasks of one batch.
struct TaskContext {
    data_table: Arc<dyn KvTable>,
    index_table: Arc<dyn KvTable>,
    maintainer: Arc<dyn IndexMaintainer>,
    ttl: TtlExpr,
    strict_ttl: bool,
    verify: VerifyContext,
    scan_maximum: usize,
    index_end_keys: Vec<Vec<u8>>,
}

pub struct IndexReconciler {
    data_table: Arc<dyn KvTable>,
    index_table: Arc<dyn KvTable>,
    maintainer: Arc<dyn IndexMaintainer>,
    ttl: TtlExpr,
    config: ReconcileConfig,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    permits: Arc<Semaphore>,
}

impl IndexReconciler {
    pub fn new(
        data_table: Arc<dyn KvTable>,
        index_table: Arc<dyn KvTable>,
        maintainer: Arc<dyn IndexMaintainer>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            data_table,
            index_table,
            maintainer,
            ttl: TtlExpr::Forever,
            permits: Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1))),
            config,
            clock: Arc::new(SystemClock),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_ttl(mut self, ttl: TtlExpr) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Token the hosting region cancels when it closes or splits.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    fn check_open(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            warn!(index = self.maintainer.index_name(), "region closing; stopping reconciliation");
            return Err(ReconcileError::RegionClosing.into());
        }
        Ok(())
    }

    async fn task_context(&self) -> Result<Arc<TaskContext>> {
        let index_end_keys = self
            .index_table
            .region_end_keys()
            .await
            .with_context(|| format!("load region boundaries of '{}'", self.index_table.name()))?;
        Ok(Arc::new(TaskContext {
            data_table: self.data_table.clone(),
            index_table: self.index_table.clone(),
            maintainer: self.maintainer.clone(),
            ttl: self.ttl.clone(),
            strict_ttl: self.config.strict_ttl,
            verify: VerifyContext {
                now: self.clock.now_ms(),
                max_lookback_ms: self.config.max_lookback_ms,
            },
            scan_maximum: self.config.planner.max_scan_ranges,
            index_end_keys,
        }))
    }

    /// Verifies and repairs one page of index rows.
    ///
    /// Index rows are grouped by data row, the data rows are partitioned by
    /// data region, and each subset is handled by its own task. Expected index
    /// keys outside `[page.start, page.end)` are left to the page owning them.
    pub async fn reconcile(&self, page: IndexPage, mode: VerifyMode) -> Result<VerificationResult> {
        self.check_open()?;
        let IndexPage { start, end, rows } = page;

        let mut groups: BTreeMap<Vec<u8>, Vec<Row>> = BTreeMap::new();
        for row in rows {
            let data_key = self
                .maintainer
                .data_row_key(&row.key)
                .with_context(|| format!("index '{}' row", self.maintainer.index_name()))?;
            groups.entry(data_key).or_default().push(row);
        }
        if groups.is_empty() {
            return Ok(VerificationResult::default());
        }

        let data_end_keys = self
            .data_table
            .region_end_keys()
            .await
            .with_context(|| format!("load region boundaries of '{}'", self.data_table.name()))?;
        let subsets = per_task_row_keys(
            self.data_table.name(),
            groups.keys().cloned().collect(),
            &data_end_keys,
            self.config.max_rows_per_task,
        )?;
        let jobs: Vec<TaskJob> = subsets
            .into_iter()
            .map(|subset| TaskJob::IndexRows {
                start: start.clone(),
                end: end.clone(),
                groups: subset
                    .keys
                    .into_iter()
                    .map(|key| {
                        let rows = groups.remove(&key).unwrap_or_default();
                        (key, rows)
                    })
                    .collect(),
            })
            .collect();

        let context = self.task_context().await?;
        self.run_tasks(context, jobs, mode).await
    }

    /// Rebuilds or verifies the index rows implied by a page of raw data rows.
    ///
    /// Expected index keys are partitioned by index region and each subset is
    /// compared against a point-lookup read of the index table.
    pub async fn rebuild(&self, data_rows: Vec<Row>, mode: VerifyMode) -> Result<VerificationResult> {
        self.check_open()?;
        let context = self.task_context().await?;

        let mut expected: BTreeMap<Vec<u8>, ExpectedIndexRow> = BTreeMap::new();
        for row in &data_rows {
            let rows = compute_expected_mutations(
                &row.key,
                Some(row),
                self.maintainer.as_ref(),
                &self.ttl,
                self.config.strict_ttl,
                context.verify.now,
            )?;
            for index_row in rows {
                expected.insert(index_row.key.clone(), index_row);
            }
        }

        let subsets = per_task_row_keys(
            self.index_table.name(),
            expected.keys().cloned().collect(),
            &context.index_end_keys,
            self.config.max_rows_per_task,
        )?;
        let jobs: Vec<TaskJob> = subsets
            .into_iter()
            .map(|subset| TaskJob::ExpectedRows {
                expected: subset
                    .keys
                    .iter()
                    .filter_map(|key| expected.remove(key))
                    .collect(),
            })
            .collect();

        let mut result = self.run_tasks(context, jobs, mode).await?;
        result.scanned_data_row_count += data_rows.len() as u64;
        Ok(result)
    }

    /// Pages through `[start, stop)` of the index table, reconciling page by
    /// page. Cancellation is checked before every page.
    pub async fn reconcile_index_range(
        &self,
        start: &[u8],
        stop: &[u8],
        mode: VerifyMode,
    ) -> Result<VerificationResult> {
        let mut total = VerificationResult::default();
        let mut cursor = start.to_vec();
        let mut pages = 0usize;
        loop {
            self.check_open()?;
            let (rows, page_end, more) = self.read_page(&self.index_table, &cursor, stop).await?;
            if rows.is_empty() {
                break;
            }
            let page = IndexPage {
                start: cursor,
                end: page_end.clone(),
                rows,
            };
            total.merge(&self.reconcile(page, mode).await?);
            pages += 1;
            if !more {
                break;
            }
            cursor = page_end;
        }
        info!(
            index = self.maintainer.index_name(),
            pages,
            valid = total.before.valid,
            failures = total.before.failures(),
            rebuilt = total.rebuilt_index_row_count,
            "index range reconciled"
        );
        Ok(total)
    }

    /// Pages through `[start, stop)` of the data table, rebuilding the index
    /// rows each page implies. Cancellation is checked before every page.
    pub async fn rebuild_data_range(
        &self,
        start: &[u8],
        stop: &[u8],
        mode: VerifyMode,
    ) -> Result<VerificationResult> {
        let mut total = VerificationResult::default();
        let mut cursor = start.to_vec();
        loop {
            self.check_open()?;
            let (rows, page_end, more) = self.read_page(&self.data_table, &cursor, stop).await?;
            if rows.is_empty() {
                break;
            }
            total.merge(&self.rebuild(rows, mode).await?);
            if !more {
                break;
            }
            cursor = page_end;
        }
        info!(
            index = self.maintainer.index_name(),
            scanned = total.scanned_data_row_count,
            rebuilt = total.rebuilt_index_row_count,
            "data range rebuilt"
        );
        Ok(total)
    }

    /// Reads one page of raw rows. Returns the rows, the exclusive end of the
    /// key space the page covers, and whether more rows may follow.
    async fn read_page(
        &self,
        table: &Arc<dyn KvTable>,
        cursor: &[u8],
        stop: &[u8],
    ) -> Result<(Vec<Row>, Vec<u8>, bool)> {
        let page_size = self.config.page_size.max(1);
        let request = ScanRequest::new(cursor.to_vec(), stop.to_vec())
            .with_read_options(ReadOptions::raw_history(TimeRange::all()))
            .with_limit(page_size);
        let rows = table
            .scan(request)
            .await
            .with_context(|| format!("scan page of '{}'", table.name()))?;
        let full_page_end = match rows.last() {
            Some(last) if rows.len() >= page_size => Some(next_key(&last.key)),
            _ => None,
        };
        match full_page_end {
            Some(end) => Ok((rows, end, true)),
            None => Ok((rows, stop.to_vec(), false)),
        }
    }

    /// Spawns one task per job and waits for all of them.
    async fn run_tasks(
        &self,
        context: Arc<TaskContext>,
        jobs: Vec<TaskJob>,
        mode: VerifyMode,
    ) -> Result<VerificationResult> {
        let mut handles = FuturesUnordered::new();
        for (task, job) in jobs.into_iter().enumerate() {
            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .context("reconcile task pool closed")?;
            let context = context.clone();
            debug!(task, rows = job.len(), ?mode, "spawning reconcile task");
            let handle = tokio::spawn(async move {
                let _permit = permit;
                run_job(&context, job, mode).await
            });
            handles.push(async move { (task, handle.await) });
        }

        let mut merged = VerificationResult::default();
        let mut failures = Vec::new();
        while let Some((task, joined)) = handles.next().await {
            match joined {
                Ok(Ok(result)) => {
                    debug!(task, rebuilt = result.rebuilt_index_row_count, "reconcile task finished");
                    merged.merge(&result);
                }
                Ok(Err(err)) => {
                    warn!(task, error = %err, "reconcile task failed");
                    failures.push(err);
                }
                Err(err) => {
                    warn!(task, error = %err, "reconcile task did not complete");
                    failures.push(
                        ReconcileError::TaskFailed {
                            task,
                            reason: err.to_string(),
                        }
                        .into(),
                    );
                }
            }
        }

        if failures.is_empty() {
            Ok(merged)
        } else {
            Err(TaskBatchFailure {
                failures,
                completed: merged,
            }
            .into())
        }
    }
}

async fn run_job(context: &TaskContext, job: TaskJob, mode: VerifyMode) -> Result<VerificationResult> {
    match job {
        TaskJob::IndexRows { start, end, groups } => {
            let data_keys = groups.iter().map(|(key, _)| key.clone()).collect();
            let data_rows = fetch_rows(context.data_table.as_ref(), data_keys, context.scan_maximum)
                .await?;
            let scanned = groups.len() as u64;

            let mut candidates = Vec::new();
            for (data_key, actual_rows) in groups {
                let expected = compute_expected_mutations(
                    &data_key,
                    data_rows.get(&data_key),
                    context.maintainer.as_ref(),
                    &context.ttl,
                    context.strict_ttl,
                    context.verify.now,
                )?;
                let mut by_key: BTreeMap<Vec<u8>, Candidate> = expected
                    .into_iter()
                    .filter(|row| key_in_range(&row.key, &start, &end))
                    .map(|row| {
                        let key = row.key.clone();
                        (
                            key.clone(),
                            Candidate {
                                key,
                                expected: Some(row),
                                actual: None,
                            },
                        )
                    })
                    .collect();
                for row in actual_rows {
                    let key = row.key.clone();
                    let candidate = by_key.entry(key.clone()).or_insert_with(|| Candidate {
                        key,
                        expected: None,
                        actual: None,
                    });
                    candidate.actual = Some(row);
                }
                candidates.extend(by_key.into_values());
            }

            let mut result = settle(context, candidates, mode).await?;
            result.scanned_data_row_count = scanned;
            Ok(result)
        }
        TaskJob::ExpectedRows { expected } => {
            let keys = expected.iter().map(|row| row.key.clone()).collect();
            let mut actual = fetch_rows(context.index_table.as_ref(), keys, context.scan_maximum)
                .await?;
            let candidates = expected
                .into_iter()
                .map(|row| Candidate {
                    key: row.key.clone(),
                    actual: actual.remove(&row.key),
                    expected: Some(row),
                })
                .collect();
            settle(context, candidates, mode).await
        }
    }
}

/// Compares, repairs and re-verifies the candidates of one task.
async fn settle(
    context: &TaskContext,
    candidates: Vec<Candidate>,
    mode: VerifyMode,
) -> Result<VerificationResult> {
    let mut result = VerificationResult::default();
    let mut batches: BTreeMap<usize, Vec<Mutation>> = BTreeMap::new();

    for candidate in &candidates {
        let expected = candidate.expected.as_ref();
        let actual = candidate.actual.as_ref();
        let mutations = if mode.repairs_unconditionally() {
            rebuild_mutations(&candidate.key, expected, actual, context.strict_ttl)
        } else {
            let verdict = verify_index_row(expected, actual, &context.verify);
            if mode.verifies_before() {
                result.before.record(verdict);
            }
            if mode.repairs() {
                repair_mutations(&candidate.key, expected, actual, verdict, context.strict_ttl)
            } else {
                Vec::new()
            }
        };
        if mutations.is_empty() {
            continue;
        }
        let region = region_index_for_key(&context.index_end_keys, &candidate.key).ok_or_else(
            || StaleRegionTopology {
                table: context.index_table.name().to_string(),
                row_key: candidate.key.clone(),
                last_end_key: context.index_end_keys.last().cloned().unwrap_or_default(),
            },
        )?;
        batches.entry(region).or_default().extend(mutations);
        result.rebuilt_index_row_count += 1;
    }

    for (region, batch) in batches {
        let rows = batch.len();
        context
            .index_table
            .batch_mutate(batch)
            .await
            .map_err(|err| ReconcileError::BatchMutateFailed {
                table: context.index_table.name().to_string(),
                region,
                rows,
                reason: format!("{err:#}"),
            })?;
        debug!(table = context.index_table.name(), region, rows, "applied index repair batch");
    }

    if mode.verifies_after() {
        let keys = candidates
            .iter()
            .map(|candidate| candidate.key.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let reread = fetch_rows(context.index_table.as_ref(), keys, context.scan_maximum).await?;
        for candidate in &candidates {
            let verdict = verify_index_row(
                candidate.expected.as_ref(),
                reread.get(&candidate.key),
                &context.verify,
            );
            result.after.record(verdict);
        }
    }
    Ok(result)
}

/// Raw, all-version rows for `keys` read with a point-lookup scan.
async fn fetch_rows(
    table: &dyn KvTable,
    keys: Vec<Vec<u8>>,
    scan_maximum: usize,
) -> Result<BTreeMap<Vec<u8>, Row>> {
    if keys.is_empty() {
        return Ok(BTreeMap::new());
    }
    let wanted = keys.iter().cloned().collect::<BTreeSet<_>>();
    let plan = ScanRanges::for_row_keys(keys, scan_maximum)?;
    let mut request =
        ScanRequest::default().with_read_options(ReadOptions::raw_history(TimeRange::all()));
    if !plan.install_on(&mut request)? {
        return Ok(BTreeMap::new());
    }
    let rows = table
        .scan(request)
        .await
        .with_context(|| format!("point lookup on '{}'", table.name()))?;
    Ok(rows
        .into_iter()
        .filter(|row| wanted.contains(&row.key))
        .map(|row| (row.key.clone(), row))
        .collect())
}
