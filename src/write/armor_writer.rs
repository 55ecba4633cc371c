//! Public entry point of the write path.
//!
//! `ArmorWriter` routes incoming entity batches to shards via the
//! store's shard strategy, fans the per-shard work out over a bounded
//! worker pool, and drives the persist-then-mark-current sequence for a
//! whole table (plus any linked diff tables) in one `commit` call.
//!
//! Fan-out submits one task per distinct shard, fan-in drains every
//! task in arbitrary order: all failures are logged, the first fatal
//! one is what the caller sees. Already-dispatched tasks run to
//! completion even when another shard failed; each shard is
//! independently atomic.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use crossbeam_channel::unbounded;
use tracing::{debug, error, warn};

use crate::column_file::EntityRecord;
use crate::compression::Compression;
use crate::entity::{Entity, EntityId, WriteRequest};
use crate::error::{ArmorError, Result};
use crate::interval::{Interval, SINGLE_INTERVAL_START};
use crate::meta::{ColumnMetadata, TableMetadata};
use crate::schema::{ColumnId, TableId};
use crate::shard::{ShardId, TABLE_SCOPE_SHARD};
use crate::store::WriteStore;
use crate::write::diff_writer::ColumnShardDiffWriter;
use crate::write::shard_writer::{
    CompactionTrigger, ShardWriter, WriteCapture, DEFAULT_COMPACTION_TRIGGER,
};
use crate::write::table_writer::TableWriter;

/// Root orchestrator; the public entry point of the write path.
pub struct ArmorWriter {
    name: String,
    store: Arc<dyn WriteStore>,
    compression: Compression,
    pool: Arc<rayon::ThreadPool>,
    compaction_trigger: CompactionTrigger,
    capture_writes: Option<WriteCapture>,
    table_writers: RwLock<HashMap<TableId, Arc<TableWriter>>>,
    entity_columns: RwLock<HashMap<TableId, ColumnId>>,
    diff_tables: RwLock<HashMap<TableId, HashSet<TableId>>>,
}

impl ArmorWriter {
    /// Writer with a self-owned pool of `threads` workers.
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn WriteStore>,
        compression: Compression,
        threads: usize,
    ) -> Result<Self> {
        let name = name.into();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("armor-writer-{i}"))
            .build()
            .map_err(|e| ArmorError::WorkerPool(e.to_string()))?;
        Ok(Self::with_pool(name, store, compression, Arc::new(pool)))
    }

    /// Writer over a caller-supplied pool. The pool is shared, never
    /// shut down by `close`.
    pub fn with_pool(
        name: impl Into<String>,
        store: Arc<dyn WriteStore>,
        compression: Compression,
        pool: Arc<rayon::ThreadPool>,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            compression,
            pool,
            compaction_trigger: Arc::new(|| DEFAULT_COMPACTION_TRIGGER),
            capture_writes: None,
            table_writers: RwLock::new(HashMap::new()),
            entity_columns: RwLock::new(HashMap::new()),
            diff_tables: RwLock::new(HashMap::new()),
        }
    }

    /// Override the compaction trigger.
    pub fn with_compaction_trigger(mut self, trigger: CompactionTrigger) -> Self {
        self.compaction_trigger = trigger;
        self
    }

    /// Enable write capture for shards the predicate selects.
    pub fn with_write_capture(mut self, capture: WriteCapture) -> Self {
        self.capture_writes = Some(capture);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fresh transaction id for a logical commit.
    pub fn start_transaction(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    // ── Introspection ──────────────────────────────────────────────

    /// Index records for one column of an already-loaded shard.
    /// Returns None for shards this writer has not touched.
    pub fn column_entity_records(
        &self,
        tenant: &str,
        table: &str,
        interval: Interval,
        timestamp: DateTime<Utc>,
        column_name: &str,
        shard_num: i32,
    ) -> Option<HashMap<EntityId, EntityRecord>> {
        let table_writer = self
            .table_writers
            .read()
            .unwrap()
            .get(&TableId::new(tenant, table))
            .cloned()?;
        let shard_id = ShardId::build(tenant, table, interval, timestamp, shard_num);
        let writer = table_writer.get_shard(&shard_id)?;
        let guard = writer.lock().unwrap();
        guard.entities(column_name)
    }

    /// Column metadata of an already-loaded shard, None otherwise.
    pub fn column_metadata(
        &self,
        tenant: &str,
        table: &str,
        interval: Interval,
        timestamp: DateTime<Utc>,
        column_name: &str,
        shard_num: i32,
    ) -> Option<ColumnMetadata> {
        let table_writer = self
            .table_writers
            .read()
            .unwrap()
            .get(&TableId::new(tenant, table))
            .cloned()?;
        let shard_id = ShardId::build(tenant, table, interval, timestamp, shard_num);
        let writer = table_writer.get_shard(&shard_id)?;
        let guard = writer.lock().unwrap();
        guard.metadata(column_name)
    }

    // ── Write ──────────────────────────────────────────────────────

    /// Route a batch to its shards and apply it in parallel, one task
    /// per distinct shard. Each task groups its entities per column so
    /// the serialize-append loop runs against a single coherent buffer.
    pub fn write(
        &self,
        transaction: &str,
        tenant: &str,
        table: &str,
        interval: Interval,
        timestamp: DateTime<Utc>,
        entities: Vec<Entity>,
    ) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        if let Some(capture) = &self.capture_writes {
            let scope = ShardId::build(tenant, table, interval, timestamp, TABLE_SCOPE_SHARD);
            if capture(&scope, "ArmorWriter") {
                self.store
                    .capture_writes(transaction, &scope, Some(&entities), None, None);
            }
        }

        let (table_writer, _) = self.resolve_table(tenant, table, &entities)?;

        let mut shard_batches: HashMap<ShardId, Vec<Entity>> = HashMap::new();
        for entity in entities {
            let shard_id =
                self.store
                    .find_shard_id(tenant, table, interval, timestamp, &entity.entity_id);
            shard_batches.entry(shard_id).or_default().push(entity);
        }

        let (tx, rx) = unbounded();
        self.pool.scope(|scope| {
            for (shard_id, batch) in shard_batches {
                let tx = tx.clone();
                let table_writer = Arc::clone(&table_writer);
                scope.spawn(move |_| {
                    let result = self.write_shard_batch(&table_writer, transaction, &shard_id, batch);
                    let _ = tx.send((shard_id, result));
                });
            }
        });
        drop(tx);

        let mut first_error = None;
        for (shard_id, result) in rx {
            if let Err(err) = result {
                error!(shard = %shard_id, error = %err, "shard write failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Delete one entity, following the same shard routing as `write`.
    /// A no-op when the table has never been written nor persisted.
    pub fn delete(
        &self,
        transaction: &str,
        tenant: &str,
        table: &str,
        interval: Interval,
        timestamp: DateTime<Utc>,
        entity_id: EntityId,
        version: u64,
        instance_id: &str,
    ) -> Result<()> {
        let shard_id = self
            .store
            .find_shard_id(tenant, table, interval, timestamp, &entity_id);
        if let Some(capture) = &self.capture_writes {
            if capture(&shard_id, "ArmorWriter") {
                self.store
                    .capture_writes(transaction, &shard_id, None, None, Some(&entity_id));
            }
        }

        let table_id = TableId::new(tenant, table);
        let existing = self.table_writers.read().unwrap().get(&table_id).cloned();
        if let Some(table_writer) = &existing {
            // A write happened first; the shard may already be loaded.
            if let Some(writer) = table_writer.get_shard(&shard_id) {
                return writer
                    .lock()
                    .unwrap()
                    .delete(transaction, &entity_id, version, instance_id);
            }
        }

        // Table unknown in memory: only persisted tables accept deletes.
        let Some(metadata) = self.store.load_table_metadata(tenant, table)? else {
            return Ok(());
        };
        self.entity_columns
            .write()
            .unwrap()
            .insert(table_id.clone(), metadata.entity_column());
        let table_writer = self.table_writer(&table_id);
        let writer = match table_writer.get_shard(&shard_id) {
            Some(writer) => writer,
            None => table_writer.add_shard(self.new_shard_writer(shard_id.clone())),
        };
        let result = writer
            .lock()
            .unwrap()
            .delete(transaction, &entity_id, version, instance_id);
        result
    }

    // ── Diff Tables ────────────────────────────────────────────────

    /// Write diff results for one column into the `<table>_<column>_plus`
    /// and `<table>_<column>_minus` tables, each diffed against the
    /// previous interval slice of the base table.
    pub fn write_column_diff(
        &self,
        transaction: &str,
        tenant: &str,
        table: &str,
        interval: Interval,
        timestamp: DateTime<Utc>,
        column_id: &ColumnId,
        entities: Vec<Entity>,
    ) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let plus_table = format!("{table}_{}_plus", column_id.name);
        let minus_table = format!("{table}_{}_minus", column_id.name);

        let base_id = TableId::new(tenant, table);
        let plus_id = TableId::new(tenant, plus_table.clone());
        let minus_id = TableId::new(tenant, minus_table.clone());
        {
            let mut links = self.diff_tables.write().unwrap();
            let linked = links.entry(base_id).or_default();
            linked.insert(plus_id);
            linked.insert(minus_id);
        }

        self.write_diff_table(
            transaction, tenant, table, &plus_table, true, column_id, interval, timestamp,
            &entities,
        )?;
        self.write_diff_table(
            transaction, tenant, table, &minus_table, false, column_id, interval, timestamp,
            &entities,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn write_diff_table(
        &self,
        transaction: &str,
        tenant: &str,
        base_table: &str,
        diff_table: &str,
        plus: bool,
        column_id: &ColumnId,
        interval: Interval,
        timestamp: DateTime<Utc>,
        entities: &[Entity],
    ) -> Result<()> {
        let (table_writer, _) = self.resolve_table(tenant, diff_table, entities)?;

        let mut shard_batches: HashMap<ShardId, Vec<&Entity>> = HashMap::new();
        for entity in entities {
            let shard_id = self.store.find_shard_id(
                tenant,
                diff_table,
                interval,
                timestamp,
                &entity.entity_id,
            );
            shard_batches.entry(shard_id).or_default().push(entity);
        }

        let (tx, rx) = unbounded();
        self.pool.scope(|scope| {
            for (shard_id, batch) in shard_batches {
                let tx = tx.clone();
                let table_writer = Arc::clone(&table_writer);
                scope.spawn(move |_| {
                    let result = self.write_diff_shard_batch(
                        &table_writer,
                        transaction,
                        base_table,
                        plus,
                        column_id,
                        &shard_id,
                        batch,
                    );
                    let _ = tx.send((shard_id, result));
                });
            }
        });
        drop(tx);

        let mut first_error = None;
        for (shard_id, result) in rx {
            if let Err(err) = result {
                error!(shard = %shard_id, error = %err, "diff shard write failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn write_diff_shard_batch(
        &self,
        table_writer: &TableWriter,
        transaction: &str,
        base_table: &str,
        plus: bool,
        column_id: &ColumnId,
        shard_id: &ShardId,
        batch: Vec<&Entity>,
    ) -> Result<()> {
        let writer = match table_writer.get_diff_shard(shard_id) {
            Some(writer) => writer,
            None => {
                // Baseline: the previous interval slice of the base table.
                let baseline = shard_id.previous_interval()?.with_table(base_table);
                let diff_writer = ColumnShardDiffWriter::new(
                    shard_id.clone(),
                    baseline,
                    plus,
                    column_id.clone(),
                    Arc::clone(&self.store),
                    self.compression,
                    Arc::clone(&self.compaction_trigger),
                )?;
                table_writer.add_diff_shard(diff_writer)
            }
        };
        let mut requests = Vec::new();
        for entity in batch {
            for request in entity.write_requests() {
                if request.column_id() == column_id {
                    requests.push(request);
                }
            }
        }
        let result = writer.lock().unwrap().write_diff(transaction, requests);
        result
    }

    // ── Commit ─────────────────────────────────────────────────────

    /// Persist the table (if it has any writers) and every linked diff
    /// table, each under its own per-table marker flip. Diff tables are
    /// committed after the base table in the same call; this ordering
    /// is best-effort, not a cross-table transactional guarantee.
    pub fn commit(&self, transaction: &str, tenant: &str, table: &str) -> Result<()> {
        let table_id = TableId::new(tenant, table);
        let table_writer = self.table_writers.read().unwrap().get(&table_id).cloned();
        let linked: Vec<TableId> = self
            .diff_tables
            .read()
            .unwrap()
            .get(&table_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        if let Some(writer) = table_writer {
            self.persist_table(transaction, &table_id, &writer)?;
        }
        for diff_id in linked {
            let diff_writer = self.table_writers.read().unwrap().get(&diff_id).cloned();
            if let Some(writer) = diff_writer {
                self.persist_table(transaction, &diff_id, &writer)?;
            }
        }
        Ok(())
    }

    fn persist_table(
        &self,
        transaction: &str,
        table_id: &TableId,
        table_writer: &Arc<TableWriter>,
    ) -> Result<()> {
        let entity_column = match self.entity_columns.read().unwrap().get(table_id).cloned() {
            Some(column) => column,
            None => self
                .store
                .load_table_metadata(&table_id.tenant, &table_id.table)?
                .map(|meta| meta.entity_column())
                .ok_or_else(|| {
                    ArmorError::Commit(format!(
                        "unable to determine the entity id column for {table_id} from store or memory, cannot commit"
                    ))
                })?,
        };

        let mut table_metadata = match self
            .store
            .load_table_metadata(&table_id.tenant, &table_id.table)?
        {
            Some(metadata) => {
                metadata.verify_entity_column(&entity_column)?;
                metadata
            }
            None => TableMetadata::new(&table_id.tenant, &table_id.table, &entity_column),
        };

        let shard_writers = table_writer.shard_writers();
        let diff_writers = table_writer.diff_shard_writers();

        let (tx, rx) = unbounded();
        self.pool.scope(|scope| {
            for (shard_id, writer) in shard_writers {
                let tx = tx.clone();
                let entity_column = entity_column.clone();
                scope.spawn(move |_| {
                    let result = writer.lock().unwrap().commit(transaction, &entity_column);
                    let _ = tx.send((shard_id, result));
                });
            }
            for (shard_id, writer) in diff_writers {
                let tx = tx.clone();
                let entity_column = entity_column.clone();
                scope.spawn(move |_| {
                    let result = writer.lock().unwrap().commit(transaction, &entity_column);
                    let _ = tx.send((shard_id, result));
                });
            }
        });
        drop(tx);

        // Drain every shard's result; prefer the first offset error so
        // data-corruption signals are never masked by generic failures.
        let mut offset_error = None;
        let mut first_error = None;
        for (shard_id, result) in rx {
            match result {
                Ok(metadata) => table_metadata.add_column_ids(metadata.column_ids),
                Err(err) if err.is_benign() => {
                    warn!(shard = %shard_id, error = %err,
                        "shard vanished mid-commit, nothing to commit");
                }
                Err(err @ ArmorError::EntityOffset { .. }) => {
                    error!(shard = %shard_id, error = %err, "shard commit failed");
                    offset_error.get_or_insert(err);
                }
                Err(err) => {
                    error!(shard = %shard_id, error = %err, "shard commit failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(err) = offset_error.or(first_error) {
            return Err(err);
        }

        self.store.save_table_metadata(transaction, &table_metadata)
    }

    // ── Snapshots ──────────────────────────────────────────────────

    /// Clone every shard of the table's `single` slice into the given
    /// interval slice. Idempotent per destination shard.
    pub fn snapshot_current_to_interval(
        &self,
        tenant: &str,
        table: &str,
        interval: Interval,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let sources =
            self.store
                .find_shard_ids(tenant, table, Interval::Single, SINGLE_INTERVAL_START)?;
        for src in sources {
            let dst = ShardId::build(tenant, table, interval, timestamp, src.shard_num);
            self.store.copy_shard(&dst, &src)?;
        }
        Ok(())
    }

    /// Seed the current interval slice from the immediately preceding
    /// one, unless the destination already holds data.
    pub fn copy_previous_interval_slice_if_new_destination(
        &self,
        tenant: &str,
        table: &str,
        interval: Interval,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let previous_start = interval.interval_start_offset(timestamp, -1);
        let sources = self
            .store
            .find_shard_ids(tenant, table, interval, &previous_start)?;
        for src in sources {
            let dst = ShardId::build(tenant, table, interval, timestamp, src.shard_num);
            self.store.copy_shard(&dst, &src)?;
        }
        Ok(())
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Drop all buffered table state. A caller-supplied pool is left
    /// untouched.
    pub fn close(&self) {
        for table_writer in self.table_writers.read().unwrap().values() {
            table_writer.close();
        }
        self.table_writers.write().unwrap().clear();
        self.entity_columns.write().unwrap().clear();
        self.diff_tables.write().unwrap().clear();
        debug!(writer = %self.name, "armor writer closed");
    }

    // ── Internal ───────────────────────────────────────────────────

    fn table_writer(&self, table_id: &TableId) -> Arc<TableWriter> {
        let mut writers = self.table_writers.write().unwrap();
        writers
            .entry(table_id.clone())
            .or_insert_with(|| {
                Arc::new(TableWriter::new(
                    table_id.tenant.clone(),
                    table_id.table.clone(),
                ))
            })
            .clone()
    }

    fn new_shard_writer(&self, shard_id: ShardId) -> ShardWriter {
        ShardWriter::new(
            shard_id,
            Arc::clone(&self.store),
            self.compression,
            Arc::clone(&self.compaction_trigger),
            self.capture_writes.clone(),
        )
    }

    /// Resolve the table writer and entity-id column for a batch.
    /// First-write-wins schema inference: a table never seen before
    /// takes its entity column from persisted metadata, or failing
    /// that, from the first incoming entity. Any entity disagreeing
    /// with the resolved column fails the whole batch.
    fn resolve_table(
        &self,
        tenant: &str,
        table: &str,
        entities: &[Entity],
    ) -> Result<(Arc<TableWriter>, ColumnId)> {
        let table_id = TableId::new(tenant, table);
        let cached = self.entity_columns.read().unwrap().get(&table_id).cloned();
        let entity_column = match cached {
            Some(column) => column,
            None => match self.store.load_table_metadata(tenant, table)? {
                Some(metadata) => metadata.entity_column(),
                None => entities
                    .first()
                    .ok_or_else(|| {
                        ArmorError::Commit(format!(
                            "cannot infer the entity id column of {table_id} from an empty batch"
                        ))
                    })?
                    .entity_column_id(),
            },
        };

        for entity in entities {
            let declared = entity.entity_column_id();
            if declared != entity_column {
                return Err(ArmorError::SchemaDrift(format!(
                    "inconsistent entity id column on {table_id}: expected {} ({:?}), \
                     detected an entity declaring {} ({:?})",
                    entity_column.name,
                    entity_column.data_type,
                    declared.name,
                    declared.data_type,
                )));
            }
        }

        self.entity_columns
            .write()
            .unwrap()
            .insert(table_id.clone(), entity_column.clone());
        Ok((self.table_writer(&table_id), entity_column))
    }

    fn write_shard_batch(
        &self,
        table_writer: &TableWriter,
        transaction: &str,
        shard_id: &ShardId,
        batch: Vec<Entity>,
    ) -> Result<()> {
        let writer = match table_writer.get_shard(shard_id) {
            Some(writer) => writer,
            None => table_writer.add_shard(self.new_shard_writer(shard_id.clone())),
        };
        let mut guard = writer.lock().unwrap();

        // Group per column so each column's buffer is written once.
        let mut by_column: HashMap<ColumnId, Vec<WriteRequest>> = HashMap::new();
        for entity in &batch {
            for request in entity.write_requests() {
                by_column
                    .entry(request.column_id().clone())
                    .or_default()
                    .push(request);
            }
        }
        for (column_id, requests) in by_column {
            guard.write(transaction, &column_id, requests)?;
        }
        Ok(())
    }
}
