use std::collections::BTreeMap;
use std::fmt::Debug;

use anyhow::{anyhow, Result};
use holo_scan::{ColumnType, Datum, RowKeySchema, SlotDescriptor};

/// Qualifier of the empty marker column every index row carries.
pub const VERIFIED_QUALIFIER: &[u8] = b"_0";
/// Value of the marker column on a verified index row.
pub const VERIFIED_VALUE: &[u8] = &[0x01];

/// Column values of one data-row version, keyed by qualifier.
pub type Columns = BTreeMap<Vec<u8>, Vec<u8>>;

/// The index row one data-row version maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRowState {
    pub key: Vec<u8>,
    pub cells: Columns,
}

/// Maps data rows to index rows and index row keys back to data row keys.
pub trait IndexMaintainer: Send + Sync + Debug {
    fn index_name(&self) -> &str;

    /// Index row for a data row holding `columns`; `None` when that state is
    /// not indexed.
    fn build_index_row(&self, data_row_key: &[u8], columns: &Columns)
        -> Result<Option<IndexRowState>>;

    fn data_row_key(&self, index_row_key: &[u8]) -> Result<Vec<u8>>;
}

/// One indexed column: the data qualifier holding the value and how it sorts
/// in the index key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedColumn {
    pub qualifier: Vec<u8>,
    pub slot: SlotDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: String,
    pub indexed_columns: Vec<IndexedColumn>,
    /// Data qualifiers copied verbatim into the index row.
    pub covered_columns: Vec<Vec<u8>>,
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexed_columns: Vec::new(),
            covered_columns: Vec::new(),
        }
    }

    pub fn indexed(mut self, qualifier: impl Into<Vec<u8>>, slot: SlotDescriptor) -> Self {
        self.indexed_columns.push(IndexedColumn {
            qualifier: qualifier.into(),
            slot,
        });
        self
    }

    pub fn covering(mut self, qualifier: impl Into<Vec<u8>>) -> Self {
        self.covered_columns.push(qualifier.into());
        self
    }
}

/// Covered secondary index.
///
/// The index row key is the indexed values encoded with their slot collation,
/// followed by the data row key as a raw suffix. Data columns hold
/// [`Datum::encode_payload`] bytes. A data row missing any indexed column has
/// no index row.
#[derive(Debug, Clone)]
pub struct CoveredIndexMaintainer {
    definition: IndexDefinition,
    key_schema: RowKeySchema,
}

impl CoveredIndexMaintainer {
    pub fn new(definition: IndexDefinition) -> Result<Self> {
        if definition.indexed_columns.is_empty() {
            return Err(anyhow!(
                "index '{}' must index at least one column",
                definition.name
            ));
        }
        if let Some(column) = definition
            .indexed_columns
            .iter()
            .find(|column| column.slot.column_type == ColumnType::Raw)
        {
            return Err(anyhow!(
                "indexed column '{}' of '{}' cannot use the raw column type",
                column.slot.name,
                definition.name
            ));
        }
        let mut slots = definition
            .indexed_columns
            .iter()
            .map(|column| column.slot.clone())
            .collect::<Vec<_>>();
        slots.push(SlotDescriptor::asc("data_row_key", ColumnType::Raw));
        let key_schema = RowKeySchema::new(slots)?;
        Ok(Self {
            definition,
            key_schema,
        })
    }

    pub fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    pub fn key_schema(&self) -> &RowKeySchema {
        &self.key_schema
    }
}

impl IndexMaintainer for CoveredIndexMaintainer {
    fn index_name(&self) -> &str {
        &self.definition.name
    }

    fn build_index_row(
        &self,
        data_row_key: &[u8],
        columns: &Columns,
    ) -> Result<Option<IndexRowState>> {
        let mut values = Vec::with_capacity(self.key_schema.len());
        for column in &self.definition.indexed_columns {
            let Some(payload) = columns.get(&column.qualifier) else {
                return Ok(None);
            };
            values.push(Some(Datum::decode_payload(column.slot.column_type, payload)?));
        }
        values.push(Some(Datum::Binary(data_row_key.to_vec())));
        let key = self.key_schema.encode(&values)?;

        let mut cells = Columns::new();
        for qualifier in &self.definition.covered_columns {
            if let Some(value) = columns.get(qualifier) {
                cells.insert(qualifier.clone(), value.clone());
            }
        }
        cells.insert(VERIFIED_QUALIFIER.to_vec(), VERIFIED_VALUE.to_vec());
        Ok(Some(IndexRowState { key, cells }))
    }

    fn data_row_key(&self, index_row_key: &[u8]) -> Result<Vec<u8>> {
        let raw_slot = self.key_schema.len() - 1;
        for span in self.key_schema.slots(index_row_key) {
            let span = span?;
            if span.slot == raw_slot {
                return Ok(span.bytes(index_row_key).to_vec());
            }
        }
        Err(anyhow!(
            "index row key {:02x?} of '{}' carries no data row key",
            index_row_key,
            self.definition.name
        ))
    }
}
