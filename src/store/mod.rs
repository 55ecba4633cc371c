//! Backing-store abstraction for the write path.
//!
//! `WriteStore` is the capability boundary between the writers and
//! "where bytes live": column save/load, metadata save/load, the
//! commit/rollback marker protocol, and bulk prefix-scoped enumeration
//! and deletion. Writers hold it as `Arc<dyn WriteStore>` so a file
//! system or object-store backend can slot in interchangeably.

pub mod file_store;
pub mod retry;
pub mod xact;

use chrono::{DateTime, Utc};

use crate::column_file::ColumnFileWriter;
use crate::entity::{Entity, EntityId, WriteRequest};
use crate::error::Result;
use crate::interval::Interval;
use crate::meta::{ShardMetadata, TableMetadata};
use crate::schema::ColumnId;
use crate::shard::{ColumnShardId, ShardId};

pub use file_store::FileWriteStore;
pub use xact::{TransactionMarker, CURRENT_MARKER};

/// File name of the per-shard metadata record inside a generation.
pub const SHARD_METADATA: &str = "SHARD_METADATA";

/// File name of the per-table metadata record inside a generation.
pub const TABLE_METADATA: &str = "TABLE_METADATA";

/// Directory holding the most recent failed write per shard.
pub const LAST_ERROR: &str = "LAST_ERROR";

/// Directory holding captured write batches per tenant.
pub const CAPTURE: &str = "CAPTURE";

/// Suffix of persisted metadata records.
pub const METADATA_SUFFIX: &str = ".armor";

/// Capability interface abstracting the backing store.
pub trait WriteStore: Send + Sync {
    // ── Shard Routing ──────────────────────────────────────────────

    /// Shard number for an entity, via the injected shard strategy.
    fn shard_num(&self, entity_id: &EntityId) -> u32;

    /// Full shard id for an entity at a point in time.
    fn find_shard_id(
        &self,
        tenant: &str,
        table: &str,
        interval: Interval,
        timestamp: DateTime<Utc>,
        entity_id: &EntityId,
    ) -> ShardId {
        ShardId::new(
            tenant,
            table,
            interval.as_str(),
            interval.interval_start(timestamp),
            self.shard_num(entity_id) as i32,
        )
    }

    /// All shards present for one interval slice.
    fn find_shard_ids(
        &self,
        tenant: &str,
        table: &str,
        interval: Interval,
        interval_start: &str,
    ) -> Result<Vec<ShardId>>;

    /// Shards whose current generation contains the named column.
    fn find_shard_ids_with_column(
        &self,
        tenant: &str,
        table: &str,
        interval: Interval,
        interval_start: &str,
        column_name: &str,
    ) -> Result<Vec<ShardId>>;

    // ── Column Data ────────────────────────────────────────────────

    /// Store-relative prefix of the current generation, None when
    /// nothing has been committed for this scope yet.
    fn resolve_current_path(&self, shard_id: &ShardId) -> Result<Option<String>>;

    /// Persist one serialized column under the given transaction.
    /// `byte_size` is the writer-declared length; backends verify the
    /// copied size against it and log any disagreement.
    fn save_column(
        &self,
        transaction: &str,
        column_shard_id: &ColumnShardId,
        byte_size: usize,
        bytes: &[u8],
    ) -> Result<()>;

    /// Column writer seeded from the current generation's bytes, or an
    /// empty writer when the column has never been committed.
    fn load_column_writer(&self, column_shard_id: &ColumnShardId) -> Result<ColumnFileWriter>;

    /// All non-entity-id column writers of a shard's current generation.
    fn load_column_writers(&self, shard_id: &ShardId) -> Result<Vec<ColumnFileWriter>>;

    /// Columns present in the current generation, excluding the shard
    /// metadata record.
    fn column_ids(&self, shard_id: &ShardId) -> Result<Vec<ColumnId>>;

    // ── Metadata ───────────────────────────────────────────────────

    fn load_shard_metadata(&self, shard_id: &ShardId) -> Result<Option<ShardMetadata>>;

    fn save_shard_metadata(&self, transaction: &str, metadata: &ShardMetadata) -> Result<()>;

    fn load_table_metadata(&self, tenant: &str, table: &str) -> Result<Option<TableMetadata>>;

    /// Persist table metadata under its own table-scope marker flip;
    /// the previous generation's record is reclaimed best-effort.
    fn save_table_metadata(&self, transaction: &str, metadata: &TableMetadata) -> Result<()>;

    // ── Commit Protocol ────────────────────────────────────────────

    /// Flip the shard's marker to `transaction` and reclaim the old
    /// previous generation off the caller's critical path. Fails with
    /// `DuplicateTransaction` when the id is already current.
    fn commit(&self, transaction: &str, shard_id: &ShardId) -> Result<()>;

    /// Delete everything written under `transaction` for this shard.
    /// Used when an upstream step fails before the marker flip.
    fn rollback(&self, transaction: &str, shard_id: &ShardId) -> Result<()>;

    // ── Diagnostics ────────────────────────────────────────────────

    /// Capture the last failed write for diagnosis, erasing older
    /// transactions' errors first. Best-effort: never fails the caller.
    fn save_error(
        &self,
        transaction: &str,
        column_shard_id: &ColumnShardId,
        bytes: &[u8],
        message: &str,
    );

    /// Optional write-ahead audit sink.
    fn capture_writes(
        &self,
        correlation_id: &str,
        shard_id: &ShardId,
        entities: Option<&[Entity]>,
        requests: Option<&[WriteRequest]>,
        deleted: Option<&EntityId>,
    );

    // ── Bulk Operations ────────────────────────────────────────────

    /// Clone `src`'s current generation (marker included) into `dst`.
    /// No-op when `dst` already holds data or `src` holds none; partial
    /// output is deleted before any failure propagates.
    fn copy_shard(&self, dst: &ShardId, src: &ShardId) -> Result<()>;

    fn delete_tenant(&self, tenant: &str) -> Result<()>;

    fn delete_table(&self, tenant: &str, table: &str) -> Result<()>;

    fn delete_interval(&self, tenant: &str, table: &str, interval: Interval) -> Result<()>;

    fn delete_interval_start(
        &self,
        tenant: &str,
        table: &str,
        interval: Interval,
        interval_start: &str,
    ) -> Result<()>;

    fn table_exists(&self, tenant: &str, table: &str) -> Result<bool>;

    fn interval_exists(&self, tenant: &str, table: &str, interval: Interval) -> Result<bool>;

    fn interval_start_exists(
        &self,
        tenant: &str,
        table: &str,
        interval: Interval,
        interval_start: &str,
    ) -> Result<bool>;

    fn column_shard_exists(&self, column_shard_id: &ColumnShardId) -> Result<bool>;

    fn tenants(&self) -> Result<Vec<String>>;
}
