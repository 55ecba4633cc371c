//! Per-shard transactional write buffer.
//!
//! A `ShardWriter` owns the in-memory column buffers of one shard across
//! one transaction: it lazily loads the current generation's columns on
//! first touch, applies writes and deletes, triggers full rewrites when
//! the compaction counter fires, and commits the whole shard through the
//! store's marker protocol. Concurrent use for *different* columns of
//! the same shard is serialized by the orchestrator handing the whole
//! shard to one task at a time.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::column_file::{ColumnFileWriter, EntityRecord, FORMAT_V2};
use crate::compression::Compression;
use crate::entity::{Column, EntityId, WriteRequest};
use crate::error::{ArmorError, Result};
use crate::meta::{ColumnMetadata, ShardMetadata};
use crate::schema::ColumnId;
use crate::shard::{ColumnShardId, ShardId};
use crate::store::WriteStore;

/// Compaction policy: full rewrite once this many write transactions
/// have accumulated on a shard.
pub type CompactionTrigger = Arc<dyn Fn() -> u32 + Send + Sync>;

/// Default compaction threshold.
pub const DEFAULT_COMPACTION_TRIGGER: u32 = 50;

/// Predicate deciding whether a component's writes should be captured
/// to the store's audit sink.
pub type WriteCapture = Arc<dyn Fn(&ShardId, &str) -> bool + Send + Sync>;

/// Write buffer for one shard across one transaction.
pub struct ShardWriter {
    shard_id: ShardId,
    store: Arc<dyn WriteStore>,
    compression: Compression,
    compaction_trigger: CompactionTrigger,
    capture_writes: Option<WriteCapture>,
    columns: HashMap<ColumnId, ColumnFileWriter>,
    pending_deletes: Vec<(EntityId, u64, String)>,
    write_transactions: u32,
    loaded: bool,
}

impl ShardWriter {
    pub fn new(
        shard_id: ShardId,
        store: Arc<dyn WriteStore>,
        compression: Compression,
        compaction_trigger: CompactionTrigger,
        capture_writes: Option<WriteCapture>,
    ) -> Self {
        Self {
            shard_id,
            store,
            compression,
            compaction_trigger,
            capture_writes,
            columns: HashMap::new(),
            pending_deletes: Vec::new(),
            write_transactions: 0,
            loaded: false,
        }
    }

    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    pub fn is_dirty(&self) -> bool {
        self.columns.values().any(|writer| writer.is_dirty())
    }

    /// Index records of one loaded column, tombstones included. None if
    /// the column has not been touched by this writer.
    pub fn entities(&self, column_name: &str) -> Option<HashMap<EntityId, EntityRecord>> {
        self.columns
            .iter()
            .find(|(column_id, _)| column_id.name == column_name)
            .map(|(_, writer)| writer.entities().clone())
    }

    /// Metadata of one loaded column. None if not loaded.
    pub fn metadata(&self, column_name: &str) -> Option<ColumnMetadata> {
        self.columns
            .iter()
            .find(|(column_id, _)| column_id.name == column_name)
            .map(|(_, writer)| writer.metadata().clone())
    }

    // ── Write Path ─────────────────────────────────────────────────

    /// Apply one column's batch. Counts one write transaction against
    /// the compaction trigger; once the counter exceeds the threshold
    /// the whole shard is rewritten from logical state and the counter
    /// resets.
    pub fn write(
        &mut self,
        transaction: &str,
        column_id: &ColumnId,
        requests: Vec<WriteRequest>,
    ) -> Result<()> {
        if let Some(capture) = &self.capture_writes {
            if capture(&self.shard_id, "ShardWriter") {
                self.store
                    .capture_writes(transaction, &self.shard_id, None, Some(&requests), None);
            }
        }
        self.ensure_loaded()?;
        self.column_writer(column_id)?.write(&requests)?;
        self.write_transactions += 1;
        if self.write_transactions > (self.compaction_trigger)() {
            self.compact(transaction)?;
        }
        Ok(())
    }

    /// Tombstone one entity across every column of the shard. Columns
    /// loaded later replay the delete before taking new writes.
    pub fn delete(
        &mut self,
        transaction: &str,
        entity_id: &EntityId,
        version: u64,
        instance_id: &str,
    ) -> Result<()> {
        if let Some(capture) = &self.capture_writes {
            if capture(&self.shard_id, "ShardWriter") {
                self.store
                    .capture_writes(transaction, &self.shard_id, None, None, Some(entity_id));
            }
        }
        self.ensure_loaded()?;
        for writer in self.columns.values_mut() {
            writer.delete(entity_id, version, instance_id);
        }
        self.pending_deletes
            .push((entity_id.clone(), version, instance_id.to_string()));
        Ok(())
    }

    /// Full rewrite of every loaded column from its logical state.
    fn compact(&mut self, transaction: &str) -> Result<()> {
        debug!(shard = %self.shard_id, transaction, "compaction trigger fired, rewriting shard");
        for writer in self.columns.values_mut() {
            writer.compact(transaction)?;
        }
        self.write_transactions = 0;
        Ok(())
    }

    // ── Commit ─────────────────────────────────────────────────────

    /// Serialize every column plus the entity-id column, persist shard
    /// metadata, then flip the shard's marker. A serialization or save
    /// failure rolls the transaction's partial output back and leaves
    /// the previous generation current.
    pub fn commit(
        &mut self,
        transaction: &str,
        entity_column_id: &ColumnId,
    ) -> Result<ShardMetadata> {
        self.ensure_loaded()?;

        let entity_writer = self.build_entity_column(entity_column_id)?;
        let mut column_ids: Vec<ColumnId> = self.columns.keys().cloned().collect();
        column_ids.push(entity_column_id.clone());
        let metadata = ShardMetadata::new(&self.shard_id, column_ids, self.write_transactions);

        let save_all = || -> Result<()> {
            for writer in self.columns.values().chain(std::iter::once(&entity_writer)) {
                self.persist_column(transaction, writer)?;
            }
            self.store.save_shard_metadata(transaction, &metadata)
        };
        if let Err(err) = save_all() {
            // No marker flip happened; drop the partial generation.
            if let Err(rollback_err) = self.store.rollback(transaction, &self.shard_id) {
                warn!(shard = %self.shard_id, error = %rollback_err,
                    "rollback after failed save did not complete");
            }
            return Err(err);
        }

        // Marker flip. Failures here (e.g. a duplicate transaction id)
        // must not delete the generation the marker may already name.
        self.store.commit(transaction, &self.shard_id)?;

        for writer in self.columns.values_mut() {
            writer.mark_clean();
        }
        Ok(metadata)
    }

    // ── Internal ───────────────────────────────────────────────────

    /// First touch loads every committed column and the persisted
    /// compaction counter.
    fn ensure_loaded(&mut self) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        for writer in self.store.load_column_writers(&self.shard_id)? {
            self.columns.insert(writer.metadata().column_id(), writer);
        }
        if let Some(metadata) = self.store.load_shard_metadata(&self.shard_id)? {
            self.write_transactions = metadata.write_transactions;
        }
        self.loaded = true;
        Ok(())
    }

    fn column_writer(&mut self, column_id: &ColumnId) -> Result<&mut ColumnFileWriter> {
        if !self.columns.contains_key(column_id) {
            let mut writer = self
                .store
                .load_column_writer(&ColumnShardId::new(self.shard_id.clone(), column_id.clone()))?;
            for (entity_id, version, instance_id) in &self.pending_deletes {
                writer.delete(entity_id, *version, instance_id);
            }
            self.columns.insert(column_id.clone(), writer);
        }
        Ok(self
            .columns
            .get_mut(column_id)
            .expect("column writer inserted above"))
    }

    /// Entity-id column derived from the union of live records across
    /// every column: one row per live entity at its highest version.
    fn build_entity_column(&self, entity_column_id: &ColumnId) -> Result<ColumnFileWriter> {
        let mut newest: HashMap<EntityId, (u64, String)> = HashMap::new();
        for writer in self.columns.values() {
            for record in writer.entities().values() {
                if record.tombstoned {
                    continue;
                }
                let entry = newest
                    .entry(record.entity_id.clone())
                    .or_insert((record.version, record.instance_id.clone()));
                if record.version > entry.0 {
                    *entry = (record.version, record.instance_id.clone());
                }
            }
        }

        let mut writer = ColumnFileWriter::new(ColumnShardId::new(
            self.shard_id.clone(),
            entity_column_id.clone(),
        ));
        writer.set_entity_id_column(true);
        let requests: Vec<WriteRequest> = newest
            .into_iter()
            .map(|(entity_id, (version, instance_id))| {
                let value = entity_id.to_value_as(entity_column_id.data_type)?;
                Ok(WriteRequest {
                    entity_id,
                    version,
                    instance_id,
                    column: Column::new(entity_column_id.clone(), value),
                })
            })
            .collect::<Result<_>>()?;
        writer.write(&requests)?;
        Ok(writer)
    }

    fn persist_column(&self, transaction: &str, writer: &ColumnFileWriter) -> Result<()> {
        let column_shard_id = writer.column_shard_id();
        let product = match writer.build_bytes(FORMAT_V2, self.compression) {
            Ok(product) => product,
            Err(err) => {
                if let ArmorError::EntityOffset { .. } = &err {
                    self.store
                        .save_error(transaction, column_shard_id, &[], &err.to_string());
                }
                return Err(err);
            }
        };
        if product.byte_size != product.bytes.len() {
            warn!(
                column = %column_shard_id,
                declared = product.byte_size,
                produced = product.bytes.len(),
                "serialized column length disagrees with its declared size"
            );
        }
        self.store
            .save_column(transaction, column_shard_id, product.byte_size, &product.bytes)
    }
}

// ── Tests ──────────────────────────────────────────────────────────
