//! Incremental diff writer for plus/minus tables.
//!
//! A `ColumnShardDiffWriter` shares the shard writer's commit lifecycle
//! but persists values relative to a **baseline** shard, typically the
//! immediately preceding interval slice of the base table. The "plus"
//! instance records entities whose value is newly present or changed;
//! the "minus" instance records the baseline value of entities whose
//! value changed away from it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::compression::Compression;
use crate::entity::{Column, ColumnValue, EntityId, WriteRequest};
use crate::error::Result;
use crate::meta::ShardMetadata;
use crate::schema::ColumnId;
use crate::shard::{ColumnShardId, ShardId};
use crate::store::WriteStore;
use crate::write::shard_writer::{CompactionTrigger, ShardWriter};

/// Diff writer for exactly one column of one shard.
pub struct ColumnShardDiffWriter {
    inner: ShardWriter,
    baseline: HashMap<EntityId, ColumnValue>,
    column_id: ColumnId,
    plus: bool,
}

impl ColumnShardDiffWriter {
    /// Load the baseline column state and prepare a writer for the
    /// target shard. A baseline shard with nothing committed yields an
    /// empty baseline, so every incoming value counts as newly present.
    pub fn new(
        target: ShardId,
        baseline_shard: ShardId,
        plus: bool,
        column_id: ColumnId,
        store: Arc<dyn WriteStore>,
        compression: Compression,
        compaction_trigger: CompactionTrigger,
    ) -> Result<Self> {
        let baseline_writer = store
            .load_column_writer(&ColumnShardId::new(baseline_shard, column_id.clone()))?;
        let baseline = baseline_writer.live_values()?;
        Ok(Self {
            inner: ShardWriter::new(target, store, compression, compaction_trigger, None),
            baseline,
            column_id,
            plus,
        })
    }

    pub fn shard_id(&self) -> &ShardId {
        self.inner.shard_id()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.is_dirty()
    }

    /// Apply one batch of requests, keeping only the entities that
    /// actually diff against the baseline for this writer's column.
    pub fn write_diff(&mut self, transaction: &str, requests: Vec<WriteRequest>) -> Result<()> {
        let mut diffs = Vec::new();
        for request in requests {
            if request.column_id() != &self.column_id {
                continue;
            }
            let base = self.baseline.get(&request.entity_id);
            if self.plus {
                // Newly present or changed: persist the new value.
                if base != Some(request.value()) {
                    diffs.push(request);
                }
            } else if let Some(old) = base {
                // Changed away from the baseline: persist the old value.
                if old != request.value() {
                    let column = Column::new(self.column_id.clone(), old.clone());
                    diffs.push(WriteRequest { column, ..request });
                }
            }
        }
        if diffs.is_empty() {
            return Ok(());
        }
        let column_id = self.column_id.clone();
        self.inner.write(transaction, &column_id, diffs)
    }

    /// Same commit sequence as a plain shard writer.
    pub fn commit(
        &mut self,
        transaction: &str,
        entity_column_id: &ColumnId,
    ) -> Result<ShardMetadata> {
        self.inner.commit(transaction, entity_column_id)
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ColumnValue;
    use crate::error::ArmorError;
    use crate::interval::SINGLE_INTERVAL_START;
    use crate::schema::DataType;
    use crate::shard::ModShardStrategy;
    use crate::store::FileWriteStore;

    fn status_column() -> ColumnId {
        ColumnId::new("status", DataType::Integer)
    }

    fn entity_column() -> ColumnId {
        ColumnId::new("assetId", DataType::Long)
    }

    fn base_shard() -> ShardId {
        ShardId::new("a", "t", "single", SINGLE_INTERVAL_START, 0)
    }

    fn plus_shard() -> ShardId {
        ShardId::new("a", "t_status_plus", "single", SINGLE_INTERVAL_START, 0)
    }

    fn minus_shard() -> ShardId {
        ShardId::new("a", "t_status_minus", "single", SINGLE_INTERVAL_START, 0)
    }

    fn store() -> (tempfile::TempDir, Arc<dyn WriteStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn WriteStore> = Arc::new(FileWriteStore::new(
            dir.path(),
            Arc::new(ModShardStrategy::new(10)),
        ));
        (dir, store)
    }

    fn request(id: i64, version: u64, value: i32) -> WriteRequest {
        WriteRequest {
            entity_id: EntityId::Number(id),
            version,
            instance_id: "inst".into(),
            column: Column::new(status_column(), ColumnValue::Integer(value)),
        }
    }

    /// Commit a baseline shard holding E=5 for entity 1.
    fn seed_baseline(store: &Arc<dyn WriteStore>) {
        let mut writer = ShardWriter::new(
            base_shard(),
            Arc::clone(store),
            Compression::Lz4,
            Arc::new(|| 50),
            None,
        );
        writer
            .write("tx0", &status_column(), vec![request(1, 1, 5)])
            .unwrap();
        writer.commit("tx0", &entity_column()).unwrap();
    }

    fn diff_writer(
        store: &Arc<dyn WriteStore>,
        target: ShardId,
        plus: bool,
    ) -> ColumnShardDiffWriter {
        ColumnShardDiffWriter::new(
            target,
            base_shard(),
            plus,
            status_column(),
            Arc::clone(store),
            Compression::Lz4,
            Arc::new(|| 50),
        )
        .unwrap()
    }

    fn committed_value(store: &Arc<dyn WriteStore>, shard: ShardId, id: i64) -> Option<ColumnValue> {
        let writer = store
            .load_column_writer(&ColumnShardId::new(shard, status_column()))
            .unwrap();
        writer.live_values().unwrap().remove(&EntityId::Number(id))
    }

    #[test]
    fn test_changed_value_lands_in_both_diffs() {
        let (_dir, store) = store();
        seed_baseline(&store);

        // Baseline has E=5; the new batch carries E=7.
        let mut plus = diff_writer(&store, plus_shard(), true);
        plus.write_diff("tx1", vec![request(1, 2, 7)]).unwrap();
        plus.commit("tx1", &entity_column()).unwrap();

        let mut minus = diff_writer(&store, minus_shard(), false);
        minus.write_diff("tx1", vec![request(1, 2, 7)]).unwrap();
        minus.commit("tx1", &entity_column()).unwrap();

        assert_eq!(
            committed_value(&store, plus_shard(), 1),
            Some(ColumnValue::Integer(7))
        );
        assert_eq!(
            committed_value(&store, minus_shard(), 1),
            Some(ColumnValue::Integer(5))
        );
    }

    #[test]
    fn test_unchanged_value_is_no_diff() {
        let (_dir, store) = store();
        seed_baseline(&store);

        let mut plus = diff_writer(&store, plus_shard(), true);
        plus.write_diff("tx1", vec![request(1, 2, 5)]).unwrap();
        assert!(!plus.is_dirty());

        let mut minus = diff_writer(&store, minus_shard(), false);
        minus.write_diff("tx1", vec![request(1, 2, 5)]).unwrap();
        assert!(!minus.is_dirty());
    }

    #[test]
    fn test_new_entity_only_in_plus() {
        let (_dir, store) = store();
        seed_baseline(&store);

        let mut plus = diff_writer(&store, plus_shard(), true);
        plus.write_diff("tx1", vec![request(2, 1, 9)]).unwrap();
        plus.commit("tx1", &entity_column()).unwrap();
        assert_eq!(
            committed_value(&store, plus_shard(), 2),
            Some(ColumnValue::Integer(9))
        );

        let mut minus = diff_writer(&store, minus_shard(), false);
        minus.write_diff("tx1", vec![request(2, 1, 9)]).unwrap();
        assert!(!minus.is_dirty());
    }

    #[test]
    fn test_empty_baseline_treats_all_as_new() {
        let (_dir, store) = store();
        // No baseline committed at all.
        let mut plus = diff_writer(&store, plus_shard(), true);
        plus.write_diff("tx1", vec![request(1, 1, 3)]).unwrap();
        assert!(plus.is_dirty());

        let mut minus = diff_writer(&store, minus_shard(), false);
        minus.write_diff("tx1", vec![request(1, 1, 3)]).unwrap();
        assert!(!minus.is_dirty());
    }

    #[test]
    fn test_other_columns_ignored() {
        let (_dir, store) = store();
        seed_baseline(&store);
        let other = WriteRequest {
            entity_id: EntityId::Number(1),
            version: 2,
            instance_id: "inst".into(),
            column: Column::new(
                ColumnId::new("time", DataType::Long),
                ColumnValue::Long(99),
            ),
        };
        let mut plus = diff_writer(&store, plus_shard(), true);
        plus.write_diff("tx1", vec![other]).unwrap();
        assert!(!plus.is_dirty());
    }

    #[test]
    fn test_diff_commit_uses_marker_protocol() {
        let (_dir, store) = store();
        seed_baseline(&store);
        let mut plus = diff_writer(&store, plus_shard(), true);
        plus.write_diff("tx1", vec![request(1, 2, 7)]).unwrap();
        plus.commit("tx1", &entity_column()).unwrap();

        let mut plus = diff_writer(&store, plus_shard(), true);
        plus.write_diff("tx1", vec![request(1, 3, 8)]).unwrap();
        let err = plus.commit("tx1", &entity_column()).unwrap_err();
        assert!(matches!(err, ArmorError::DuplicateTransaction { .. }));
    }
}
