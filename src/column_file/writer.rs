//! Column container writer.
//!
//! Accumulates one column's (entity, value, version, instance) tuples in
//! memory with last-write-wins semantics, then serializes the container
//! on demand. The value payload is an append log: superseded bytes stay
//! behind until a compaction rewrites the payload from logical state.

use std::collections::HashMap;

use crate::column_file::format::{
    ColumnFileHeader, ColumnFileSection, EntityRecord, FORMAT_V1, FORMAT_V2, HEADER_SIZE,
    SECTION_FRAME_SIZE, SECTION_TABLE_ENTRY_SIZE,
};
use crate::column_file::reader::ColumnFileReader;
use crate::compression::Compression;
use crate::entity::{ColumnValue, EntityId, WriteRequest};
use crate::error::{ArmorError, Result};
use crate::meta::ColumnMetadata;
use crate::shard::ColumnShardId;

/// A serialized container plus its exact length. The contract is
/// `byte_size == bytes.len()`; the caller re-verifies before handing the
/// bytes to a store, because a mismatch means a non-atomic copy.
#[derive(Debug)]
pub struct StreamProduct {
    pub byte_size: usize,
    pub bytes: Vec<u8>,
}

/// In-memory writer for one column of one shard.
pub struct ColumnFileWriter {
    column_shard_id: ColumnShardId,
    metadata: ColumnMetadata,
    records: HashMap<EntityId, EntityRecord>,
    payload: Vec<u8>,
    dirty: bool,
}

impl ColumnFileWriter {
    /// Fresh writer with no committed bytes behind it.
    pub fn new(column_shard_id: ColumnShardId) -> Self {
        let metadata = ColumnMetadata::new(&column_shard_id.column_id);
        Self {
            column_shard_id,
            metadata,
            records: HashMap::new(),
            payload: Vec::new(),
            dirty: false,
        }
    }

    /// Reconstruct a writer from a committed container's bytes.
    pub fn from_bytes(bytes: &[u8], column_shard_id: ColumnShardId) -> Result<Self> {
        let reader = ColumnFileReader::read(bytes)?;
        let (_, metadata, records, payload) = reader.into_parts();
        if metadata.column_id() != column_shard_id.column_id {
            return Err(ArmorError::InvalidFormat(format!(
                "container holds column {}, expected {}",
                metadata.column_id(),
                column_shard_id.column_id
            )));
        }
        let records = records
            .into_iter()
            .map(|record| (record.entity_id.clone(), record))
            .collect();
        Ok(Self {
            column_shard_id,
            metadata,
            records,
            payload,
            dirty: false,
        })
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn column_shard_id(&self) -> &ColumnShardId {
        &self.column_shard_id
    }

    pub fn metadata(&self) -> &ColumnMetadata {
        &self.metadata
    }

    /// Mark this writer's column as the distinguished entity-id column.
    pub fn set_entity_id_column(&mut self, entity_id: bool) {
        self.metadata.entity_id = entity_id;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// All index records, tombstones included.
    pub fn entities(&self) -> &HashMap<EntityId, EntityRecord> {
        &self.records
    }

    /// Decode the current value of one index record.
    pub fn value_of(&self, record: &EntityRecord) -> Result<ColumnValue> {
        if record.tombstoned {
            return Ok(ColumnValue::Null);
        }
        let start = record.offset as usize;
        let end = start + record.length as usize;
        if end > self.payload.len() {
            return Err(self.offset_error(end as u64));
        }
        ColumnValue::decode(self.metadata.data_type, &self.payload[start..end])
    }

    /// Logical entity-to-value view: live records only.
    pub fn live_values(&self) -> Result<HashMap<EntityId, ColumnValue>> {
        let mut out = HashMap::with_capacity(self.records.len());
        for record in self.records.values() {
            if !record.tombstoned {
                out.insert(record.entity_id.clone(), self.value_of(record)?);
            }
        }
        Ok(out)
    }

    // ── Write Path ─────────────────────────────────────────────────

    /// Apply a batch of write requests. Per entity the higher version
    /// wins; on equal versions the later-applied write wins. Stale
    /// writes (lower version than the current record or its tombstone)
    /// are dropped.
    pub fn write(&mut self, requests: &[WriteRequest]) -> Result<()> {
        for request in requests {
            if let Some(dt) = request.value().data_type() {
                if dt != self.metadata.data_type {
                    return Err(ArmorError::InvalidFormat(format!(
                        "value type {dt:?} does not match column {}",
                        self.column_shard_id.column_id
                    )));
                }
            }
            if let Some(existing) = self.records.get(&request.entity_id) {
                if existing.version > request.version {
                    continue;
                }
            }
            let encoded = request.value().encode();
            let offset = self.payload.len() as u32;
            self.payload.extend_from_slice(&encoded);
            self.records.insert(
                request.entity_id.clone(),
                EntityRecord::new(
                    request.entity_id.clone(),
                    offset,
                    encoded.len() as u32,
                    request.version,
                    request.instance_id.clone(),
                ),
            );
            self.metadata.max_version = self.metadata.max_version.max(request.version);
            self.dirty = true;
        }
        self.metadata.entity_count = self.live_count();
        Ok(())
    }

    /// Tombstone one entity. A delete for an entity never written is
    /// still recorded so a later compaction removes it for good.
    pub fn delete(&mut self, entity_id: &EntityId, version: u64, instance_id: &str) {
        if let Some(existing) = self.records.get(entity_id) {
            if existing.version > version {
                return;
            }
        }
        self.records.insert(
            entity_id.clone(),
            EntityRecord::tombstone(entity_id.clone(), version, instance_id),
        );
        self.metadata.max_version = self.metadata.max_version.max(version);
        self.metadata.entity_count = self.live_count();
        self.dirty = true;
    }

    /// Full rewrite from logical state: drops superseded payload bytes
    /// and tombstoned records.
    pub fn compact(&mut self, transaction: &str) -> Result<()> {
        let mut live: Vec<EntityRecord> = self
            .records
            .values()
            .filter(|record| !record.tombstoned)
            .cloned()
            .collect();
        live.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));

        let mut payload = Vec::with_capacity(self.payload.len());
        let mut records = HashMap::with_capacity(live.len());
        for mut record in live {
            let start = record.offset as usize;
            let end = start + record.length as usize;
            if end > self.payload.len() {
                return Err(self.offset_error(end as u64));
            }
            let offset = payload.len() as u32;
            payload.extend_from_slice(&self.payload[start..end]);
            record.offset = offset;
            records.insert(record.entity_id.clone(), record);
        }

        self.payload = payload;
        self.records = records;
        self.metadata.entity_count = self.live_count();
        self.metadata.last_compaction = Some(transaction.to_string());
        self.dirty = true;
        Ok(())
    }

    /// Called after a successful commit; buffered state is now the
    /// committed generation.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    // ── Serialization ──────────────────────────────────────────────

    /// Serialize the container. The returned `byte_size` is computed
    /// independently of the byte buffer; any disagreement between the
    /// two surfaces as an `EntityOffset` error instead of silent
    /// truncation.
    pub fn build_bytes(&self, version: u16, compression: Compression) -> Result<StreamProduct> {
        // Offset accounting must hold before anything is framed.
        for record in self.records.values() {
            let end = record.offset as u64 + record.length as u64;
            if !record.tombstoned && end > self.payload.len() as u64 {
                return Err(self.offset_error(end));
            }
        }

        let mut ordered: Vec<&EntityRecord> = self.records.values().collect();
        ordered.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        let index: Vec<EntityRecord> = ordered.into_iter().cloned().collect();

        let metadata_bytes = serde_json::to_vec(&self.metadata)?;
        let index_bytes = bincode::serialize(&index)?;

        let sections: Vec<(ColumnFileSection, Vec<u8>, usize)> = [
            (ColumnFileSection::Metadata, metadata_bytes),
            (ColumnFileSection::EntityIndex, index_bytes),
            (ColumnFileSection::Values, self.payload.clone()),
        ]
        .into_iter()
        .map(|(kind, raw)| {
            let uncompressed_len = raw.len();
            (kind, compression.compress(&raw), uncompressed_len)
        })
        .collect();

        let expected = match version {
            FORMAT_V1 => {
                HEADER_SIZE
                    + sections
                        .iter()
                        .map(|(_, compressed, _)| SECTION_FRAME_SIZE + compressed.len())
                        .sum::<usize>()
            }
            FORMAT_V2 => {
                HEADER_SIZE
                    + 2
                    + sections
                        .iter()
                        .map(|(_, compressed, _)| SECTION_TABLE_ENTRY_SIZE + compressed.len())
                        .sum::<usize>()
            }
            other => {
                return Err(ArmorError::InvalidFormat(format!(
                    "unsupported container version: {other}"
                )))
            }
        };

        let mut bytes = Vec::with_capacity(expected);
        ColumnFileHeader::new(version, compression).write_to(&mut bytes)?;
        match version {
            FORMAT_V1 => {
                for (_, compressed, uncompressed_len) in &sections {
                    bytes.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
                    bytes.extend_from_slice(&(*uncompressed_len as u32).to_le_bytes());
                    bytes.extend_from_slice(compressed);
                }
            }
            _ => {
                bytes.extend_from_slice(&(sections.len() as u16).to_le_bytes());
                for (kind, compressed, uncompressed_len) in &sections {
                    bytes.push(*kind as u8);
                    bytes.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
                    bytes.extend_from_slice(&(*uncompressed_len as u32).to_le_bytes());
                }
                for (_, compressed, _) in &sections {
                    bytes.extend_from_slice(compressed);
                }
            }
        }

        if bytes.len() != expected {
            return Err(ArmorError::EntityOffset {
                column: self.column_shard_id.column_id.full_name(),
                expected: expected as u64,
                actual: bytes.len() as u64,
            });
        }
        Ok(StreamProduct {
            byte_size: expected,
            bytes,
        })
    }

    // ── Internal ───────────────────────────────────────────────────

    fn live_count(&self) -> u32 {
        self.records.values().filter(|r| !r.tombstoned).count() as u32
    }

    fn offset_error(&self, actual: u64) -> ArmorError {
        ArmorError::EntityOffset {
            column: self.column_shard_id.column_id.full_name(),
            expected: self.payload.len() as u64,
            actual,
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
