//! Shard identity and deterministic shard assignment.
//!
//! A `ShardId` names one physical shard prefix in the backing store:
//! `tenant/table/interval/intervalStart/shardNum`. Assignment of an
//! entity to a shard number is a capability (`ShardStrategy`) injected
//! at store construction; the provided `ModShardStrategy` hashes text
//! ids with blake3 and takes numeric ids modulo the shard count.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::error::{ArmorError, Result};
use crate::interval::Interval;
use crate::schema::ColumnId;

/// Shard number reserved for table-scoped (not shard-scoped) operations,
/// e.g. write-capture of a whole incoming batch.
pub const TABLE_SCOPE_SHARD: i32 = -1;

// ── Shard Id ───────────────────────────────────────────────────────

/// Identifies one physical shard prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardId {
    pub tenant: String,
    pub table: String,
    pub interval: String,
    pub interval_start: String,
    pub shard_num: i32,
}

impl ShardId {
    pub fn new(
        tenant: impl Into<String>,
        table: impl Into<String>,
        interval: impl Into<String>,
        interval_start: impl Into<String>,
        shard_num: i32,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            table: table.into(),
            interval: interval.into(),
            interval_start: interval_start.into(),
            shard_num,
        }
    }

    /// Build a shard id from an interval policy and timestamp.
    pub fn build(
        tenant: &str,
        table: &str,
        interval: Interval,
        timestamp: DateTime<Utc>,
        shard_num: i32,
    ) -> Self {
        Self::new(
            tenant,
            table,
            interval.as_str(),
            interval.interval_start(timestamp),
            shard_num,
        )
    }

    /// Store-relative path prefix for this shard.
    pub fn path(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.tenant, self.table, self.interval, self.interval_start, self.shard_num
        )
    }

    /// Shard id of the immediately preceding interval slice, used as the
    /// baseline for diff writers. The shard number is preserved.
    pub fn previous_interval(&self) -> Result<ShardId> {
        let interval = Interval::from_str(&self.interval).ok_or_else(|| {
            ArmorError::InvalidFormat(format!("unknown interval '{}'", self.interval))
        })?;
        let start = Interval::parse_interval_start(&self.interval_start)?;
        Ok(ShardId::new(
            self.tenant.clone(),
            self.table.clone(),
            self.interval.clone(),
            interval.interval_start_offset(start, -1),
            self.shard_num,
        ))
    }

    /// Same shard id pointed at a different table.
    pub fn with_table(&self, table: impl Into<String>) -> ShardId {
        ShardId {
            table: table.into(),
            ..self.clone()
        }
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

// ── Column Shard Id ────────────────────────────────────────────────

/// The unit of a single binary column file: one column of one shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnShardId {
    pub shard_id: ShardId,
    pub column_id: ColumnId,
}

impl ColumnShardId {
    pub fn new(shard_id: ShardId, column_id: ColumnId) -> Self {
        Self {
            shard_id,
            column_id,
        }
    }
}

impl fmt::Display for ColumnShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.shard_id, self.column_id)
    }
}

// ── Shard Strategy ─────────────────────────────────────────────────

/// Deterministic entity-to-shard assignment.
pub trait ShardStrategy: Send + Sync {
    fn shard_num(&self, entity_id: &EntityId) -> u32;
}

/// Modulo strategy: numeric ids mod shard count, text ids hashed with
/// blake3 then reduced mod shard count.
pub struct ModShardStrategy {
    shard_count: u32,
}

impl ModShardStrategy {
    /// # Panics
    ///
    /// Panics if `shard_count` is 0.
    pub fn new(shard_count: u32) -> Self {
        assert!(shard_count > 0, "shard_count must be > 0");
        Self { shard_count }
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }
}

impl ShardStrategy for ModShardStrategy {
    fn shard_num(&self, entity_id: &EntityId) -> u32 {
        match entity_id {
            EntityId::Number(n) => (n.unsigned_abs() % self.shard_count as u64) as u32,
            EntityId::Text(s) => {
                let hash = blake3::hash(s.as_bytes());
                let hash_u64 = u64::from_le_bytes(hash.as_bytes()[0..8].try_into().unwrap());
                (hash_u64 % self.shard_count as u64) as u32
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
