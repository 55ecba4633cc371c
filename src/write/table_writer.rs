//! Concurrent registry of shard writers for one table.
//!
//! Registration follows a create-if-absent discipline: when two shard
//! tasks race to register a writer for the same shard, the first one in
//! wins and both get the same instance back. One shard never ends up
//! with two writers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::shard::ShardId;
use crate::write::diff_writer::ColumnShardDiffWriter;
use crate::write::shard_writer::ShardWriter;

/// Registry of shard writers (and diff shard writers) for one table;
/// the unit at which a commit batch is assembled.
pub struct TableWriter {
    tenant: String,
    table: String,
    shards: RwLock<HashMap<ShardId, Arc<Mutex<ShardWriter>>>>,
    diff_shards: RwLock<HashMap<ShardId, Arc<Mutex<ColumnShardDiffWriter>>>>,
}

impl TableWriter {
    pub fn new(tenant: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            table: table.into(),
            shards: RwLock::new(HashMap::new()),
            diff_shards: RwLock::new(HashMap::new()),
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    // ── Shard Writers ──────────────────────────────────────────────

    pub fn get_shard(&self, shard_id: &ShardId) -> Option<Arc<Mutex<ShardWriter>>> {
        self.shards.read().unwrap().get(shard_id).cloned()
    }

    /// Register a writer; if another task already registered one for
    /// the same shard, the existing instance wins and is returned.
    pub fn add_shard(&self, writer: ShardWriter) -> Arc<Mutex<ShardWriter>> {
        let mut shards = self.shards.write().unwrap();
        shards
            .entry(writer.shard_id().clone())
            .or_insert_with(|| Arc::new(Mutex::new(writer)))
            .clone()
    }

    /// Snapshot of all registered shard writers.
    pub fn shard_writers(&self) -> Vec<(ShardId, Arc<Mutex<ShardWriter>>)> {
        self.shards
            .read()
            .unwrap()
            .iter()
            .map(|(shard_id, writer)| (shard_id.clone(), Arc::clone(writer)))
            .collect()
    }

    // ── Diff Shard Writers ─────────────────────────────────────────

    pub fn get_diff_shard(&self, shard_id: &ShardId) -> Option<Arc<Mutex<ColumnShardDiffWriter>>> {
        self.diff_shards.read().unwrap().get(shard_id).cloned()
    }

    pub fn add_diff_shard(
        &self,
        writer: ColumnShardDiffWriter,
    ) -> Arc<Mutex<ColumnShardDiffWriter>> {
        let mut diff_shards = self.diff_shards.write().unwrap();
        diff_shards
            .entry(writer.shard_id().clone())
            .or_insert_with(|| Arc::new(Mutex::new(writer)))
            .clone()
    }

    pub fn diff_shard_writers(&self) -> Vec<(ShardId, Arc<Mutex<ColumnShardDiffWriter>>)> {
        self.diff_shards
            .read()
            .unwrap()
            .iter()
            .map(|(shard_id, writer)| (shard_id.clone(), Arc::clone(writer)))
            .collect()
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    pub fn shard_count(&self) -> usize {
        self.shards.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.read().unwrap().is_empty() && self.diff_shards.read().unwrap().is_empty()
    }

    /// Drop all buffered writers.
    pub fn close(&self) {
        self.shards.write().unwrap().clear();
        self.diff_shards.write().unwrap().clear();
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::Compression;
    use crate::interval::SINGLE_INTERVAL_START;
    use crate::shard::ModShardStrategy;
    use crate::store::{FileWriteStore, WriteStore};

    fn shard(num: i32) -> ShardId {
        ShardId::new("a", "t", "single", SINGLE_INTERVAL_START, num)
    }

    fn make_writer(store: &Arc<dyn WriteStore>, num: i32) -> ShardWriter {
        ShardWriter::new(
            shard(num),
            Arc::clone(store),
            Compression::Lz4,
            Arc::new(|| 50),
            None,
        )
    }

    fn store() -> (tempfile::TempDir, Arc<dyn WriteStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn WriteStore> = Arc::new(FileWriteStore::new(
            dir.path(),
            Arc::new(ModShardStrategy::new(10)),
        ));
        (dir, store)
    }

    #[test]
    fn test_add_shard_first_writer_wins() {
        let (_dir, store) = store();
        let table = TableWriter::new("a", "t");

        let first = table.add_shard(make_writer(&store, 0));
        let second = table.add_shard(make_writer(&store, 0));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(table.shard_count(), 1);
    }

    #[test]
    fn test_get_shard_roundtrip() {
        let (_dir, store) = store();
        let table = TableWriter::new("a", "t");
        assert!(table.get_shard(&shard(0)).is_none());

        let added = table.add_shard(make_writer(&store, 0));
        let got = table.get_shard(&shard(0)).unwrap();
        assert!(Arc::ptr_eq(&added, &got));
        assert!(table.get_shard(&shard(1)).is_none());
    }

    #[test]
    fn test_concurrent_registration_single_winner() {
        let (_dir, store) = store();
        let table = Arc::new(TableWriter::new("a", "t"));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let table = Arc::clone(&table);
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                table.add_shard(make_writer(&store, 0))
            }));
        }
        let registered: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(registered
            .windows(2)
            .all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert_eq!(table.shard_count(), 1);
    }

    #[test]
    fn test_close_drops_writers() {
        let (_dir, store) = store();
        let table = TableWriter::new("a", "t");
        table.add_shard(make_writer(&store, 0));
        table.add_shard(make_writer(&store, 1));
        assert!(!table.is_empty());

        table.close();
        assert!(table.is_empty());
    }
}
