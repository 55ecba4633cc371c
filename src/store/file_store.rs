//! File-system backed `WriteStore`.
//!
//! Layout under the base directory, order-significant:
//!
//! ```text
//! tenant/table/interval/intervalStart/shardNum/<txn>/<column>.<code>   column files
//! tenant/table/interval/intervalStart/shardNum/<txn>/SHARD_METADATA.armor
//! tenant/table/interval/intervalStart/shardNum/CURRENT                 shard marker
//! tenant/table/interval/intervalStart/shardNum/LAST_ERROR/<txn>/...    diagnostics
//! tenant/table/<txn>/TABLE_METADATA.armor                              table metadata
//! tenant/table/CURRENT                                                 table marker
//! tenant/CAPTURE/<correlationId>/...                                   write capture
//! ```
//!
//! Commits flip the scope's marker and reclaim the old previous
//! generation on a detached thread; reclamation failures are logged,
//! never escalated.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use crate::column_file::ColumnFileWriter;
use crate::entity::{Entity, EntityId, WriteRequest};
use crate::error::{ArmorError, Result};
use crate::interval::Interval;
use crate::meta::{ShardMetadata, TableMetadata};
use crate::schema::ColumnId;
use crate::shard::{ColumnShardId, ShardId, ShardStrategy};
use crate::store::retry::{with_backoff, DEFAULT_ATTEMPTS};
use crate::store::xact::{TransactionMarker, CURRENT_MARKER};
use crate::store::{WriteStore, CAPTURE, LAST_ERROR, METADATA_SUFFIX, SHARD_METADATA, TABLE_METADATA};

/// `WriteStore` over a local directory tree.
pub struct FileWriteStore {
    base_path: PathBuf,
    shard_strategy: Arc<dyn ShardStrategy>,
}

impl FileWriteStore {
    pub fn new(base_path: impl Into<PathBuf>, shard_strategy: Arc<dyn ShardStrategy>) -> Self {
        Self {
            base_path: base_path.into(),
            shard_strategy,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    // ── Path Helpers ───────────────────────────────────────────────

    fn shard_dir(&self, shard_id: &ShardId) -> PathBuf {
        self.base_path.join(shard_id.path())
    }

    fn table_dir(&self, tenant: &str, table: &str) -> PathBuf {
        self.base_path.join(tenant).join(table)
    }

    /// Directory of the shard's current generation, None when nothing
    /// has been committed yet.
    fn current_dir(&self, shard_id: &ShardId) -> Result<Option<PathBuf>> {
        let dir = self.shard_dir(shard_id);
        Ok(read_marker(&dir)?.map(|marker| dir.join(marker.current)))
    }

    // ── Reclamation ────────────────────────────────────────────────

    /// Best-effort deletion of a stale generation, detached from the
    /// commit's critical path.
    fn reclaim_detached(scope_dir: PathBuf, generation: String) {
        thread::spawn(move || {
            let target = scope_dir.join(&generation);
            if let Err(err) = fs::remove_dir_all(&target) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %target.display(), error = %err,
                        "unable to reclaim previous generation");
                }
            }
        });
    }
}

impl WriteStore for FileWriteStore {
    // ── Shard Routing ──────────────────────────────────────────────

    fn shard_num(&self, entity_id: &EntityId) -> u32 {
        self.shard_strategy.shard_num(entity_id)
    }

    fn find_shard_ids(
        &self,
        tenant: &str,
        table: &str,
        interval: Interval,
        interval_start: &str,
    ) -> Result<Vec<ShardId>> {
        let slice_dir = self
            .table_dir(tenant, table)
            .join(interval.as_str())
            .join(interval_start);
        let entries = match fs::read_dir(&slice_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut shard_ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Ok(shard_num) = entry.file_name().to_string_lossy().parse::<i32>() {
                shard_ids.push(ShardId::new(
                    tenant,
                    table,
                    interval.as_str(),
                    interval_start,
                    shard_num,
                ));
            }
        }
        Ok(shard_ids)
    }

    fn find_shard_ids_with_column(
        &self,
        tenant: &str,
        table: &str,
        interval: Interval,
        interval_start: &str,
        column_name: &str,
    ) -> Result<Vec<ShardId>> {
        let prefix = format!("{column_name}.");
        let mut matching = Vec::new();
        for shard_id in self.find_shard_ids(tenant, table, interval, interval_start)? {
            let Some(current) = self.current_dir(&shard_id)? else {
                continue;
            };
            let has_column = fs::read_dir(&current)?.any(|entry| {
                entry
                    .map(|e| e.file_name().to_string_lossy().starts_with(&prefix))
                    .unwrap_or(false)
            });
            if has_column {
                matching.push(shard_id);
            }
        }
        Ok(matching)
    }

    // ── Column Data ────────────────────────────────────────────────

    fn resolve_current_path(&self, shard_id: &ShardId) -> Result<Option<String>> {
        Ok(read_marker(&self.shard_dir(shard_id))?
            .map(|marker| format!("{}/{}", shard_id.path(), marker.current)))
    }

    fn save_column(
        &self,
        transaction: &str,
        column_shard_id: &ColumnShardId,
        byte_size: usize,
        bytes: &[u8],
    ) -> Result<()> {
        let target = self
            .shard_dir(&column_shard_id.shard_id)
            .join(transaction)
            .join(column_shard_id.column_id.full_name());
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, bytes)?;
        let copied = fs::metadata(&target)?.len();
        if copied != byte_size as u64 {
            warn!(
                column = %column_shard_id,
                expected = byte_size,
                copied,
                "expected byte count differs from what was copied"
            );
        }
        Ok(())
    }

    fn load_column_writer(&self, column_shard_id: &ColumnShardId) -> Result<ColumnFileWriter> {
        let Some(current) = self.current_dir(&column_shard_id.shard_id)? else {
            return Ok(ColumnFileWriter::new(column_shard_id.clone()));
        };
        let path = current.join(column_shard_id.column_id.full_name());
        if !path.exists() {
            return Ok(ColumnFileWriter::new(column_shard_id.clone()));
        }
        let bytes = fs::read(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                // Existed a moment ago: a concurrent task already tore
                // this generation down.
                ArmorError::BenignRace(format!("column file vanished: {}", path.display()))
            } else {
                err.into()
            }
        })?;
        ColumnFileWriter::from_bytes(&bytes, column_shard_id.clone())
    }

    fn load_column_writers(&self, shard_id: &ShardId) -> Result<Vec<ColumnFileWriter>> {
        let mut writers = Vec::new();
        for column_id in self.column_ids(shard_id)? {
            let writer =
                self.load_column_writer(&ColumnShardId::new(shard_id.clone(), column_id))?;
            if writer.metadata().entity_id {
                continue;
            }
            writers.push(writer);
        }
        Ok(writers)
    }

    fn column_ids(&self, shard_id: &ShardId) -> Result<Vec<ColumnId>> {
        let Some(current) = self.current_dir(shard_id)? else {
            return Ok(Vec::new());
        };
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut column_ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.contains(SHARD_METADATA) {
                continue;
            }
            match ColumnId::from_file_name(&name) {
                Ok(column_id) => column_ids.push(column_id),
                Err(_) => debug!(file = %name, "skipping non-column file in generation"),
            }
        }
        Ok(column_ids)
    }

    // ── Metadata ───────────────────────────────────────────────────

    fn load_shard_metadata(&self, shard_id: &ShardId) -> Result<Option<ShardMetadata>> {
        let Some(current) = self.current_dir(shard_id)? else {
            return Ok(None);
        };
        let path = current.join(format!("{SHARD_METADATA}{METADATA_SUFFIX}"));
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn save_shard_metadata(&self, transaction: &str, metadata: &ShardMetadata) -> Result<()> {
        let target = self
            .shard_dir(&metadata.shard_id())
            .join(transaction)
            .join(format!("{SHARD_METADATA}{METADATA_SUFFIX}"));
        with_backoff("save_shard_metadata", DEFAULT_ATTEMPTS, || {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, serde_json::to_vec(metadata)?)?;
            Ok(())
        })
    }

    fn load_table_metadata(&self, tenant: &str, table: &str) -> Result<Option<TableMetadata>> {
        let table_dir = self.table_dir(tenant, table);
        let Some(marker) = read_marker(&table_dir)? else {
            return Ok(None);
        };
        let path = table_dir
            .join(&marker.current)
            .join(format!("{TABLE_METADATA}{METADATA_SUFFIX}"));
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn save_table_metadata(&self, transaction: &str, metadata: &TableMetadata) -> Result<()> {
        let table_dir = self.table_dir(&metadata.tenant, &metadata.table);
        let scope = format!("{}/{}", metadata.tenant, metadata.table);
        let prior = read_marker(&table_dir)?;
        if let Some(marker) = &prior {
            marker.validate(transaction, &scope)?;
        }

        let target = table_dir
            .join(transaction)
            .join(format!("{TABLE_METADATA}{METADATA_SUFFIX}"));
        with_backoff("save_table_metadata", DEFAULT_ATTEMPTS, || {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, serde_json::to_vec(metadata)?)?;
            Ok(())
        })?;
        write_marker(&table_dir, &TransactionMarker::advance(prior.as_ref(), transaction))?;

        if let Some(previous) = prior.and_then(|m| m.previous) {
            let stale = table_dir.join(&previous);
            if let Err(err) = fs::remove_dir_all(&stale) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %stale.display(), error = %err,
                        "unable to reclaim previous table metadata generation");
                }
            }
        }
        Ok(())
    }

    // ── Commit Protocol ────────────────────────────────────────────

    fn commit(&self, transaction: &str, shard_id: &ShardId) -> Result<()> {
        let shard_dir = self.shard_dir(shard_id);
        let prior = read_marker(&shard_dir)?;
        if let Some(marker) = &prior {
            marker.validate(transaction, &shard_id.path())?;
        }
        write_marker(&shard_dir, &TransactionMarker::advance(prior.as_ref(), transaction))?;

        if let Some(previous) = prior.and_then(|m| m.previous) {
            Self::reclaim_detached(shard_dir, previous);
        }
        Ok(())
    }

    fn rollback(&self, transaction: &str, shard_id: &ShardId) -> Result<()> {
        let target = self.shard_dir(shard_id).join(transaction);
        if let Err(err) = fs::remove_dir_all(&target) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %target.display(), error = %err,
                    "unable to roll back transaction output");
            }
        }
        Ok(())
    }

    // ── Diagnostics ────────────────────────────────────────────────

    fn save_error(
        &self,
        transaction: &str,
        column_shard_id: &ColumnShardId,
        bytes: &[u8],
        message: &str,
    ) {
        let error_dir = self.shard_dir(&column_shard_id.shard_id).join(LAST_ERROR);

        // Retain only the newest transaction's errors.
        if let Ok(entries) = fs::read_dir(&error_dir) {
            for entry in entries.flatten() {
                if entry.file_name().to_string_lossy() != transaction {
                    if let Err(err) = fs::remove_dir_all(entry.path()) {
                        warn!(path = %entry.path().display(), error = %err,
                            "unable to prune older error capture");
                    }
                }
            }
        }

        let target_dir = error_dir.join(transaction);
        let full_name = column_shard_id.column_id.full_name();
        let write_capture = || -> Result<()> {
            fs::create_dir_all(&target_dir)?;
            fs::write(target_dir.join(&full_name), bytes)?;
            fs::write(
                target_dir.join(format!("{full_name}_msg")),
                message.as_bytes(),
            )?;
            Ok(())
        };
        if let Err(err) = write_capture() {
            warn!(column = %column_shard_id, error = %err, "unable to capture failed write");
        }
    }

    fn capture_writes(
        &self,
        correlation_id: &str,
        shard_id: &ShardId,
        entities: Option<&[Entity]>,
        requests: Option<&[WriteRequest]>,
        deleted: Option<&EntityId>,
    ) {
        let mut dir = self
            .base_path
            .join(&shard_id.tenant)
            .join(CAPTURE)
            .join(correlation_id)
            .join(&shard_id.table)
            .join(&shard_id.interval)
            .join(&shard_id.interval_start);
        if shard_id.shard_num >= 0 {
            dir = dir.join(shard_id.shard_num.to_string());
        }
        let write_all = || -> Result<()> {
            fs::create_dir_all(&dir)?;
            if let Some(entities) = entities {
                fs::write(dir.join("entities"), serde_json::to_vec(entities)?)?;
            }
            if let Some(requests) = requests {
                fs::write(dir.join("writeRequests"), serde_json::to_vec(requests)?)?;
            }
            if let Some(deleted) = deleted {
                fs::write(dir.join(deleted.to_string()), b"deleted")?;
            }
            Ok(())
        };
        if let Err(err) = write_all() {
            warn!(correlation = correlation_id, error = %err, "unable to capture writes");
        }
    }

    // ── Bulk Operations ────────────────────────────────────────────

    fn copy_shard(&self, dst: &ShardId, src: &ShardId) -> Result<()> {
        if dst == src {
            return Ok(());
        }
        let dst_dir = self.shard_dir(dst);
        if dir_has_entries(&dst_dir)? {
            return Ok(());
        }
        let src_dir = self.shard_dir(src);
        let Some(marker) = read_marker(&src_dir)? else {
            return Ok(());
        };

        let copy = || -> Result<()> {
            copy_dir_recursive(&src_dir.join(&marker.current), &dst_dir.join(&marker.current))?;
            // Marker goes last so a torn copy never looks committed.
            write_marker(&dst_dir, &TransactionMarker::new(marker.current.clone(), None))?;
            Ok(())
        };
        if let Err(err) = copy() {
            if let Err(cleanup) = fs::remove_dir_all(&dst_dir) {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %dst_dir.display(), error = %cleanup,
                        "unable to clean up partial shard copy");
                }
            }
            return Err(err);
        }
        Ok(())
    }

    fn delete_tenant(&self, tenant: &str) -> Result<()> {
        remove_prefix(&self.base_path.join(tenant))
    }

    fn delete_table(&self, tenant: &str, table: &str) -> Result<()> {
        remove_prefix(&self.table_dir(tenant, table))
    }

    fn delete_interval(&self, tenant: &str, table: &str, interval: Interval) -> Result<()> {
        remove_prefix(&self.table_dir(tenant, table).join(interval.as_str()))
    }

    fn delete_interval_start(
        &self,
        tenant: &str,
        table: &str,
        interval: Interval,
        interval_start: &str,
    ) -> Result<()> {
        remove_prefix(
            &self
                .table_dir(tenant, table)
                .join(interval.as_str())
                .join(interval_start),
        )
    }

    fn table_exists(&self, tenant: &str, table: &str) -> Result<bool> {
        dir_has_entries(&self.table_dir(tenant, table))
    }

    fn interval_exists(&self, tenant: &str, table: &str, interval: Interval) -> Result<bool> {
        dir_has_entries(&self.table_dir(tenant, table).join(interval.as_str()))
    }

    fn interval_start_exists(
        &self,
        tenant: &str,
        table: &str,
        interval: Interval,
        interval_start: &str,
    ) -> Result<bool> {
        dir_has_entries(
            &self
                .table_dir(tenant, table)
                .join(interval.as_str())
                .join(interval_start),
        )
    }

    fn column_shard_exists(&self, column_shard_id: &ColumnShardId) -> Result<bool> {
        let Some(current) = self.current_dir(&column_shard_id.shard_id)? else {
            return Ok(false);
        };
        Ok(current.join(column_shard_id.column_id.full_name()).exists())
    }

    fn tenants(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.base_path) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut tenants = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                tenants.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        Ok(tenants)
    }
}

// ── Free Helpers ───────────────────────────────────────────────────

fn read_marker(scope_dir: &Path) -> Result<Option<TransactionMarker>> {
    let path = scope_dir.join(CURRENT_MARKER);
    match fs::read(&path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn write_marker(scope_dir: &Path, marker: &TransactionMarker) -> Result<()> {
    fs::create_dir_all(scope_dir)?;
    fs::write(scope_dir.join(CURRENT_MARKER), serde_json::to_vec(marker)?)?;
    Ok(())
}

fn dir_has_entries(dir: &Path) -> Result<bool> {
    match fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

fn remove_prefix(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_file::FORMAT_V2;
    use crate::compression::Compression;
    use crate::entity::{Column, ColumnValue, WriteRequest};
    use crate::interval::SINGLE_INTERVAL_START;
    use crate::schema::DataType;
    use crate::shard::ModShardStrategy;
    use std::time::Duration;

    fn store() -> (tempfile::TempDir, FileWriteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileWriteStore::new(dir.path(), Arc::new(ModShardStrategy::new(10)));
        (dir, store)
    }

    fn shard() -> ShardId {
        ShardId::new("a", "t", "single", SINGLE_INTERVAL_START, 0)
    }

    fn column_shard() -> ColumnShardId {
        ColumnShardId::new(shard(), ColumnId::new("status", DataType::Integer))
    }

    fn request(id: i64, version: u64, value: i32) -> WriteRequest {
        WriteRequest {
            entity_id: EntityId::Number(id),
            version,
            instance_id: "inst".into(),
            column: Column::new(
                ColumnId::new("status", DataType::Integer),
                ColumnValue::Integer(value),
            ),
        }
    }

    fn save_generation(store: &FileWriteStore, transaction: &str, values: &[(i64, u64, i32)]) {
        let mut writer = ColumnFileWriter::new(column_shard());
        let requests: Vec<WriteRequest> =
            values.iter().map(|(id, v, val)| request(*id, *v, *val)).collect();
        writer.write(&requests).unwrap();
        let product = writer.build_bytes(FORMAT_V2, Compression::Lz4).unwrap();
        store
            .save_column(transaction, &column_shard(), product.byte_size, &product.bytes)
            .unwrap();
        store
            .save_shard_metadata(
                transaction,
                &ShardMetadata::new(&shard(), vec![column_shard().column_id], 1),
            )
            .unwrap();
    }

    /// Reclamation runs detached; poll briefly instead of racing it.
    fn wait_until_gone(path: &Path) -> bool {
        for _ in 0..100 {
            if !path.exists() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_commit_flips_marker_and_resolves_path() {
        let (_dir, store) = store();
        assert!(store.resolve_current_path(&shard()).unwrap().is_none());

        save_generation(&store, "tx1", &[(1, 1, 10)]);
        store.commit("tx1", &shard()).unwrap();
        assert_eq!(
            store.resolve_current_path(&shard()).unwrap().unwrap(),
            format!("{}/tx1", shard().path())
        );

        save_generation(&store, "tx2", &[(1, 2, 20)]);
        store.commit("tx2", &shard()).unwrap();
        assert_eq!(
            store.resolve_current_path(&shard()).unwrap().unwrap(),
            format!("{}/tx2", shard().path())
        );
    }

    #[test]
    fn test_duplicate_transaction_rejected_and_marker_unchanged() {
        let (_dir, store) = store();
        save_generation(&store, "tx1", &[(1, 1, 10)]);
        store.commit("tx1", &shard()).unwrap();

        let err = store.commit("tx1", &shard()).unwrap_err();
        assert!(matches!(err, ArmorError::DuplicateTransaction { .. }));
        assert_eq!(
            store.resolve_current_path(&shard()).unwrap().unwrap(),
            format!("{}/tx1", shard().path())
        );
    }

    #[test]
    fn test_previous_generation_reclaimed_after_two_flips() {
        let (dir, store) = store();
        save_generation(&store, "tx1", &[(1, 1, 10)]);
        store.commit("tx1", &shard()).unwrap();
        save_generation(&store, "tx2", &[(1, 2, 20)]);
        store.commit("tx2", &shard()).unwrap();
        save_generation(&store, "tx3", &[(1, 3, 30)]);
        store.commit("tx3", &shard()).unwrap();

        // tx1 became "previous" at the tx2 flip and is reclaimed by tx3.
        let tx1_dir = dir.path().join(shard().path()).join("tx1");
        assert!(wait_until_gone(&tx1_dir), "tx1 generation not reclaimed");
        // The current generation stays put.
        assert!(dir.path().join(shard().path()).join("tx3").exists());
    }

    #[test]
    fn test_rollback_removes_transaction_keeps_current() {
        let (dir, store) = store();
        save_generation(&store, "tx1", &[(1, 1, 10)]);
        store.commit("tx1", &shard()).unwrap();

        save_generation(&store, "tx2", &[(1, 2, 20)]);
        store.rollback("tx2", &shard()).unwrap();

        assert!(!dir.path().join(shard().path()).join("tx2").exists());
        assert_eq!(
            store.resolve_current_path(&shard()).unwrap().unwrap(),
            format!("{}/tx1", shard().path())
        );
        // Rolling back a transaction that never wrote is a no-op.
        store.rollback("tx9", &shard()).unwrap();
    }

    #[test]
    fn test_load_column_writer_roundtrip() {
        let (_dir, store) = store();
        // Nothing committed: a fresh writer comes back.
        let fresh = store.load_column_writer(&column_shard()).unwrap();
        assert!(fresh.entities().is_empty());

        save_generation(&store, "tx1", &[(1, 1, 10), (2, 1, 20)]);
        store.commit("tx1", &shard()).unwrap();

        let loaded = store.load_column_writer(&column_shard()).unwrap();
        assert_eq!(loaded.entities().len(), 2);
        assert!(!loaded.is_dirty());
    }

    #[test]
    fn test_column_ids_exclude_shard_metadata() {
        let (_dir, store) = store();
        save_generation(&store, "tx1", &[(1, 1, 10)]);
        store.commit("tx1", &shard()).unwrap();

        let columns = store.column_ids(&shard()).unwrap();
        assert_eq!(columns, vec![ColumnId::new("status", DataType::Integer)]);
    }

    #[test]
    fn test_shard_metadata_roundtrip() {
        let (_dir, store) = store();
        assert!(store.load_shard_metadata(&shard()).unwrap().is_none());
        save_generation(&store, "tx1", &[(1, 1, 10)]);
        store.commit("tx1", &shard()).unwrap();

        let meta = store.load_shard_metadata(&shard()).unwrap().unwrap();
        assert_eq!(meta.shard_id(), shard());
        assert_eq!(meta.write_transactions, 1);
    }

    #[test]
    fn test_table_metadata_marker_protocol() {
        let (dir, store) = store();
        assert!(store.load_table_metadata("a", "t").unwrap().is_none());

        let meta = TableMetadata::new("a", "t", &ColumnId::new("assetId", DataType::Long));
        store.save_table_metadata("tx1", &meta).unwrap();
        assert_eq!(store.load_table_metadata("a", "t").unwrap().unwrap(), meta);

        // Same transaction cannot flip the table marker twice.
        let err = store.save_table_metadata("tx1", &meta).unwrap_err();
        assert!(matches!(err, ArmorError::DuplicateTransaction { .. }));

        store.save_table_metadata("tx2", &meta).unwrap();
        store.save_table_metadata("tx3", &meta).unwrap();
        // tx1's generation was previous at the tx2 flip; tx3 reclaims it.
        assert!(!dir.path().join("a/t/tx1").exists());
        assert_eq!(store.load_table_metadata("a", "t").unwrap().unwrap(), meta);
    }

    #[test]
    fn test_save_error_keeps_only_newest_transaction() {
        let (dir, store) = store();
        store.save_error("tx1", &column_shard(), b"payload-1", "boom 1");
        store.save_error("tx2", &column_shard(), b"payload-2", "boom 2");

        let error_dir = dir.path().join(shard().path()).join(LAST_ERROR);
        assert!(!error_dir.join("tx1").exists());
        assert!(error_dir.join("tx2").join("status.I").exists());
        let msg = fs::read_to_string(error_dir.join("tx2").join("status.I_msg")).unwrap();
        assert_eq!(msg, "boom 2");
    }

    #[test]
    fn test_copy_shard_idempotent() {
        let (_dir, store) = store();
        let dst = ShardId::new("a", "t", "daily", "2023-06-15T00:00:00Z", 0);

        // Source empty: nothing happens.
        store.copy_shard(&dst, &shard()).unwrap();
        assert!(store.resolve_current_path(&dst).unwrap().is_none());

        save_generation(&store, "tx1", &[(1, 1, 10)]);
        store.commit("tx1", &shard()).unwrap();
        store.copy_shard(&dst, &shard()).unwrap();

        let copied = store
            .load_column_writer(&ColumnShardId::new(dst.clone(), column_shard().column_id))
            .unwrap();
        assert_eq!(copied.entities().len(), 1);

        // Destination already populated: second copy is a no-op even if
        // the source advanced.
        save_generation(&store, "tx2", &[(1, 2, 99)]);
        store.commit("tx2", &shard()).unwrap();
        store.copy_shard(&dst, &shard()).unwrap();
        assert_eq!(
            store.resolve_current_path(&dst).unwrap().unwrap(),
            format!("{}/tx1", dst.path())
        );
    }

    #[test]
    fn test_find_shard_ids_and_exists() {
        let (_dir, store) = store();
        assert!(store
            .find_shard_ids("a", "t", Interval::Single, SINGLE_INTERVAL_START)
            .unwrap()
            .is_empty());
        assert!(!store.table_exists("a", "t").unwrap());

        save_generation(&store, "tx1", &[(1, 1, 10)]);
        store.commit("tx1", &shard()).unwrap();

        let shards = store
            .find_shard_ids("a", "t", Interval::Single, SINGLE_INTERVAL_START)
            .unwrap();
        assert_eq!(shards, vec![shard()]);
        assert!(store.table_exists("a", "t").unwrap());
        assert!(store.interval_exists("a", "t", Interval::Single).unwrap());
        assert!(!store.interval_exists("a", "t", Interval::Daily).unwrap());
        assert!(store.column_shard_exists(&column_shard()).unwrap());
        assert_eq!(store.tenants().unwrap(), vec!["a".to_string()]);

        let with_column = store
            .find_shard_ids_with_column("a", "t", Interval::Single, SINGLE_INTERVAL_START, "status")
            .unwrap();
        assert_eq!(with_column, vec![shard()]);
        assert!(store
            .find_shard_ids_with_column("a", "t", Interval::Single, SINGLE_INTERVAL_START, "other")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_delete_prefixes() {
        let (_dir, store) = store();
        save_generation(&store, "tx1", &[(1, 1, 10)]);
        store.commit("tx1", &shard()).unwrap();

        store
            .delete_interval_start("a", "t", Interval::Single, SINGLE_INTERVAL_START)
            .unwrap();
        assert!(!store
            .interval_start_exists("a", "t", Interval::Single, SINGLE_INTERVAL_START)
            .unwrap());

        store.delete_table("a", "t").unwrap();
        assert!(!store.table_exists("a", "t").unwrap());

        store.delete_tenant("a").unwrap();
        assert!(store.tenants().unwrap().is_empty());
        // Deleting what is already gone stays quiet.
        store.delete_tenant("a").unwrap();
    }

    #[test]
    fn test_capture_writes_layout() {
        let (dir, store) = store();
        let entity = Entity::new(1i64, 1, "inst", "assetId", vec![]);
        store.capture_writes("corr-1", &shard(), Some(&[entity]), None, None);
        store.capture_writes(
            "corr-1",
            &shard(),
            None,
            None,
            Some(&EntityId::Number(7)),
        );

        let capture_dir = dir
            .path()
            .join("a")
            .join(CAPTURE)
            .join("corr-1")
            .join("t")
            .join("single")
            .join(SINGLE_INTERVAL_START)
            .join("0");
        assert!(capture_dir.join("entities").exists());
        assert!(capture_dir.join("7").exists());
    }
}
