#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use holo_index::{
    Columns, CoveredIndexMaintainer, IndexDefinition, IndexMaintainer, IndexPage, IndexReconciler,
    ManualClock, ReconcileConfig,
};
use holo_kv::{KvTable, MemTable, Mutation, ReadOptions, Row, ScanRequest, TimeRange};
use holo_scan::{ColumnType, Datum, RowKeySchema, SlotDescriptor};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("holo_index=debug,holo_scan=debug,warn")),
        )
        .with_test_writer()
        .try_init();
}

/// `users` data table keyed by `(tenant ASC, id DESC)` with a covered
/// `by_city` index over `city` that carries `name`.
pub struct TestHarness {
    pub data: Arc<MemTable>,
    pub index: Arc<MemTable>,
    pub maintainer: Arc<CoveredIndexMaintainer>,
    pub clock: Arc<ManualClock>,
    pub data_schema: RowKeySchema,
}

impl TestHarness {
    pub fn new() -> Result<Self> {
        Self::with_tables(MemTable::new("users"), MemTable::new("users_by_city"))
    }

    pub fn with_tables(data: MemTable, index: MemTable) -> Result<Self> {
        init_tracing();
        let data_schema = RowKeySchema::new(vec![
            SlotDescriptor::asc("tenant", ColumnType::Utf8),
            SlotDescriptor::desc("id", ColumnType::Int64),
        ])?;
        let maintainer = CoveredIndexMaintainer::new(
            IndexDefinition::new("users_by_city")
                .indexed("city", SlotDescriptor::asc("city", ColumnType::Utf8))
                .covering("name"),
        )?;
        Ok(Self {
            data: Arc::new(data),
            index: Arc::new(index),
            maintainer: Arc::new(maintainer),
            clock: Arc::new(ManualClock::new(1_000)),
            data_schema,
        })
    }

    pub fn config() -> ReconcileConfig {
        ReconcileConfig {
            page_size: 100,
            max_rows_per_task: 16,
            max_concurrent_tasks: 4,
            ..ReconcileConfig::default()
        }
    }

    pub fn reconciler(&self, config: ReconcileConfig) -> IndexReconciler {
        self.reconciler_over(self.data.clone(), self.index.clone(), config)
    }

    pub fn reconciler_over(
        &self,
        data: Arc<dyn KvTable>,
        index: Arc<dyn KvTable>,
        config: ReconcileConfig,
    ) -> IndexReconciler {
        IndexReconciler::new(data, index, self.maintainer.clone(), config)
            .with_clock(self.clock.clone())
    }

    pub fn user_key(&self, tenant: &str, id: i64) -> Vec<u8> {
        self.data_schema
            .encode(&[Some(Datum::utf8(tenant)), Some(Datum::Int64(id))])
            .unwrap_or_default()
    }

    /// Writes the given `(qualifier, value)` columns of a user at `ts`.
    pub fn put_user(&self, tenant: &str, id: i64, ts: u64, columns: &[(&str, &str)]) -> Result<()> {
        self.data.load(vec![Mutation::put(
            self.user_key(tenant, id),
            ts,
            to_columns(columns),
        )])
    }

    pub fn delete_user(&self, tenant: &str, id: i64, ts: u64) -> Result<()> {
        self.data
            .load(vec![Mutation::delete_row(self.user_key(tenant, id), ts)])
    }

    /// Index row the maintainer builds for a user holding `columns`.
    pub fn index_row(&self, tenant: &str, id: i64, columns: &[(&str, &str)]) -> Result<(Vec<u8>, Columns)> {
        let state = self
            .maintainer
            .build_index_row(&self.user_key(tenant, id), &to_columns(columns))?
            .ok_or_else(|| anyhow!("user {tenant}/{id} is not indexed"))?;
        Ok((state.key, state.cells))
    }

    /// Writes an index row directly, as a stale or correct writer would have.
    pub fn put_index_row(
        &self,
        tenant: &str,
        id: i64,
        ts: u64,
        columns: &[(&str, &str)],
    ) -> Result<Vec<u8>> {
        let (key, cells) = self.index_row(tenant, id, columns)?;
        self.index.load(vec![Mutation::put(key.clone(), ts, cells)])?;
        Ok(key)
    }

    /// Every raw index row as a single unbounded page.
    pub async fn index_page(&self) -> Result<IndexPage> {
        let rows = self
            .index
            .scan(
                ScanRequest::default()
                    .with_read_options(ReadOptions::raw_history(TimeRange::all())),
            )
            .await?;
        Ok(IndexPage {
            start: Vec::new(),
            end: Vec::new(),
            rows,
        })
    }

    /// Newest visible index row for `key`, if any.
    pub async fn visible_index_row(&self, key: &[u8]) -> Result<Option<Row>> {
        let mut rows = self
            .index
            .get(&[key.to_vec()], ReadOptions::default())
            .await?;
        Ok(rows.pop().flatten())
    }
}

pub fn to_columns(columns: &[(&str, &str)]) -> Columns {
    columns
        .iter()
        .map(|(qualifier, value)| (qualifier.as_bytes().to_vec(), value.as_bytes().to_vec()))
        .collect()
}

/// Table wrapper reporting a fixed, possibly outdated, set of region ends.
pub struct FrozenBoundaries {
    pub inner: Arc<MemTable>,
    pub end_keys: Vec<Vec<u8>>,
}

#[async_trait]
impl KvTable for FrozenBoundaries {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn scan(&self, request: ScanRequest) -> Result<Vec<Row>> {
        self.inner.scan(request).await
    }

    async fn get(&self, keys: &[Vec<u8>], options: ReadOptions) -> Result<Vec<Option<Row>>> {
        self.inner.get(keys, options).await
    }

    async fn batch_mutate(&self, mutations: Vec<Mutation>) -> Result<()> {
        self.inner.batch_mutate(mutations).await
    }

    async fn region_end_keys(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self.end_keys.clone())
    }
}

/// Table wrapper that cancels `token` when the `cancel_on_scan`-th scan
/// starts, simulating a region closing while pages are being processed.
pub struct ClosingRegion {
    pub inner: Arc<MemTable>,
    pub token: CancellationToken,
    pub cancel_on_scan: usize,
    pub scans: AtomicUsize,
}

#[async_trait]
impl KvTable for ClosingRegion {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn scan(&self, request: ScanRequest) -> Result<Vec<Row>> {
        let scan = self.scans.fetch_add(1, Ordering::SeqCst) + 1;
        if scan == self.cancel_on_scan {
            self.token.cancel();
        }
        self.inner.scan(request).await
    }

    async fn get(&self, keys: &[Vec<u8>], options: ReadOptions) -> Result<Vec<Option<Row>>> {
        self.inner.get(keys, options).await
    }

    async fn batch_mutate(&self, mutations: Vec<Mutation>) -> Result<()> {
        self.inner.batch_mutate(mutations).await
    }

    async fn region_end_keys(&self) -> Result<Vec<Vec<u8>>> {
        self.inner.region_end_keys().await
    }
}
