//! Persisted metadata records.
//!
//! Three JSON records live in the store next to the column files:
//! per-column metadata inside each container, one `SHARD_METADATA.armor`
//! per committed shard generation, and one `TABLE_METADATA.armor` per
//! committed table generation.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{ArmorError, Result};
use crate::schema::{ColumnId, DataType};
use crate::shard::ShardId;

// ── Column Metadata ────────────────────────────────────────────────

/// Per-column metadata stored in the container's metadata section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub column_name: String,
    pub data_type: DataType,
    /// Live (non-tombstoned) entity count.
    pub entity_count: u32,
    /// Highest version seen across all records, tombstones included.
    pub max_version: u64,
    /// Marks the distinguished entity-id column; bulk loaders skip it.
    #[serde(default)]
    pub entity_id: bool,
    /// Transaction id of the last full rewrite, if any.
    #[serde(default)]
    pub last_compaction: Option<String>,
}

impl ColumnMetadata {
    pub fn new(column_id: &ColumnId) -> Self {
        Self {
            column_name: column_id.name.clone(),
            data_type: column_id.data_type,
            entity_count: 0,
            max_version: 0,
            entity_id: false,
            last_compaction: None,
        }
    }

    pub fn column_id(&self) -> ColumnId {
        ColumnId::new(self.column_name.clone(), self.data_type)
    }
}

// ── Shard Metadata ─────────────────────────────────────────────────

/// Per-shard metadata persisted once per committed shard transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardMetadata {
    pub tenant: String,
    pub table: String,
    pub interval: String,
    pub interval_start: String,
    pub shard_num: i32,
    /// Columns actually present in this generation.
    pub column_ids: Vec<ColumnId>,
    /// Write transactions applied since the last compaction; drives the
    /// compaction trigger across writer restarts.
    #[serde(default)]
    pub write_transactions: u32,
}

impl ShardMetadata {
    pub fn new(shard_id: &ShardId, column_ids: Vec<ColumnId>, write_transactions: u32) -> Self {
        Self {
            tenant: shard_id.tenant.clone(),
            table: shard_id.table.clone(),
            interval: shard_id.interval.clone(),
            interval_start: shard_id.interval_start.clone(),
            shard_num: shard_id.shard_num,
            column_ids,
            write_transactions,
        }
    }

    pub fn shard_id(&self) -> ShardId {
        ShardId::new(
            self.tenant.clone(),
            self.table.clone(),
            self.interval.clone(),
            self.interval_start.clone(),
            self.shard_num,
        )
    }
}

// ── Table Metadata ─────────────────────────────────────────────────

/// Per-table metadata persisted once per committed table transaction.
///
/// The entity-id column name and type are immutable for the life of the
/// table; any disagreement is a fatal consistency error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub tenant: String,
    pub table: String,
    pub entity_column_id: String,
    pub entity_column_id_type: DataType,
    #[serde(default)]
    pub column_ids: BTreeSet<ColumnId>,
}

impl TableMetadata {
    pub fn new(
        tenant: impl Into<String>,
        table: impl Into<String>,
        entity_column: &ColumnId,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            table: table.into(),
            entity_column_id: entity_column.name.clone(),
            entity_column_id_type: entity_column.data_type,
            column_ids: BTreeSet::new(),
        }
    }

    pub fn entity_column(&self) -> ColumnId {
        ColumnId::new(self.entity_column_id.clone(), self.entity_column_id_type)
    }

    pub fn add_column_ids(&mut self, columns: impl IntoIterator<Item = ColumnId>) {
        self.column_ids.extend(columns);
    }

    /// Enforce the immutable entity-column invariant.
    pub fn verify_entity_column(&self, entity_column: &ColumnId) -> Result<()> {
        if self.entity_column_id != entity_column.name
            || self.entity_column_id_type != entity_column.data_type
        {
            return Err(ArmorError::SchemaDrift(format!(
                "entity id column changed on {}/{}: expected {} ({:?}), got {} ({:?})",
                self.tenant,
                self.table,
                self.entity_column_id,
                self.entity_column_id_type,
                entity_column.name,
                entity_column.data_type,
            )));
        }
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────
