//! Column container reader.
//!
//! Parses a container produced by `ColumnFileWriter`, visiting sections
//! in their mandatory order (metadata, entity index, values) through an
//! optional listener. The listener may stop the read early, in which
//! case later sections are never decompressed.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::column_file::format::{
    read_u16_at, read_u32_at, ColumnFileHeader, ColumnFileSection, EntityRecord, FORMAT_V1,
    HEADER_SIZE, SECTION_COUNT, SECTION_FRAME_SIZE, SECTION_TABLE_ENTRY_SIZE,
};
use crate::entity::ColumnValue;
use crate::error::{ArmorError, Result};
use crate::meta::ColumnMetadata;

/// Listener verdict after visiting one section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionAction {
    Continue,
    Stop,
}

/// Parsed container: header, per-column metadata, the entity-offset
/// index, and the decompressed value payload.
#[derive(Debug)]
pub struct ColumnFileReader {
    header: ColumnFileHeader,
    metadata: ColumnMetadata,
    records: Vec<EntityRecord>,
    values: Vec<u8>,
}

impl ColumnFileReader {
    /// Read a container fully.
    pub fn read(bytes: &[u8]) -> Result<Self> {
        Self::read_with(bytes, |_, _, _| Ok(SectionAction::Continue))
    }

    /// Read a container, handing each decompressed section to `listener`
    /// in order. Returning `Stop` skips the remaining sections; the
    /// reader then carries whatever was parsed up to that point.
    pub fn read_with<F>(bytes: &[u8], mut listener: F) -> Result<Self>
    where
        F: FnMut(ColumnFileSection, &ColumnMetadata, &[u8]) -> Result<SectionAction>,
    {
        let header = ColumnFileHeader::from_bytes(bytes)?;
        let sections = match header.version {
            FORMAT_V1 => Self::read_v1_layout(bytes)?,
            _ => Self::read_v2_layout(bytes)?,
        };

        let mut metadata: Option<ColumnMetadata> = None;
        let mut records: Vec<EntityRecord> = Vec::new();
        let mut values: Vec<u8> = Vec::new();

        for (index, (kind, compressed, uncompressed_len)) in sections.into_iter().enumerate() {
            // Metadata must lead so later sections can be interpreted.
            if index == 0 && kind != ColumnFileSection::Metadata {
                return Err(ArmorError::InvalidFormat(
                    "metadata section must come first".into(),
                ));
            }
            let data = header.compression.decompress(compressed, uncompressed_len)?;
            match kind {
                ColumnFileSection::Metadata => {
                    metadata = Some(serde_json::from_slice(&data)?);
                }
                ColumnFileSection::EntityIndex => {
                    records = bincode::deserialize(&data)?;
                }
                ColumnFileSection::Values => {
                    values = data.clone();
                }
            }
            let meta = metadata
                .as_ref()
                .ok_or_else(|| ArmorError::InvalidFormat("missing metadata section".into()))?;
            if listener(kind, meta, &data)? == SectionAction::Stop {
                break;
            }
        }

        let metadata = metadata
            .ok_or_else(|| ArmorError::InvalidFormat("container has no metadata section".into()))?;
        Ok(Self {
            header,
            metadata,
            records,
            values,
        })
    }

    /// Open a committed container from disk via memory mapping.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file) }?;
        Self::read(&mmap)
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn header(&self) -> &ColumnFileHeader {
        &self.header
    }

    pub fn metadata(&self) -> &ColumnMetadata {
        &self.metadata
    }

    pub fn entity_records(&self) -> &[EntityRecord] {
        &self.records
    }

    pub fn values(&self) -> &[u8] {
        &self.values
    }

    /// Random access to one entity's value via its index record; the
    /// rest of the payload is never touched.
    pub fn value_of(&self, record: &EntityRecord) -> Result<ColumnValue> {
        if record.tombstoned {
            return Ok(ColumnValue::Null);
        }
        let start = record.offset as usize;
        let end = start + record.length as usize;
        if end > self.values.len() {
            return Err(ArmorError::EntityOffset {
                column: self.metadata.column_name.clone(),
                expected: self.values.len() as u64,
                actual: end as u64,
            });
        }
        ColumnValue::decode(self.metadata.data_type, &self.values[start..end])
    }

    /// Tear the reader apart for writer reconstruction.
    pub fn into_parts(self) -> (ColumnFileHeader, ColumnMetadata, Vec<EntityRecord>, Vec<u8>) {
        (self.header, self.metadata, self.records, self.values)
    }

    // ── Layout Parsing ─────────────────────────────────────────────

    /// V1: sections framed inline, one after another.
    fn read_v1_layout(bytes: &[u8]) -> Result<Vec<(ColumnFileSection, &[u8], usize)>> {
        let mut sections = Vec::with_capacity(SECTION_COUNT);
        let mut cursor = HEADER_SIZE;
        for kind in ColumnFileSection::ordered() {
            let compressed_len = read_u32_at(bytes, cursor)? as usize;
            let uncompressed_len = read_u32_at(bytes, cursor + 4)? as usize;
            let start = cursor + SECTION_FRAME_SIZE;
            let end = start
                .checked_add(compressed_len)
                .filter(|end| *end <= bytes.len())
                .ok_or_else(|| ArmorError::InvalidFormat("truncated section payload".into()))?;
            sections.push((kind, &bytes[start..end], uncompressed_len));
            cursor = end;
        }
        Ok(sections)
    }

    /// V2: section table up front, payloads packed behind it.
    fn read_v2_layout(bytes: &[u8]) -> Result<Vec<(ColumnFileSection, &[u8], usize)>> {
        let count = read_u16_at(bytes, HEADER_SIZE)? as usize;
        if count != SECTION_COUNT {
            return Err(ArmorError::InvalidFormat(format!(
                "unexpected section count: {count}"
            )));
        }
        let mut entries = Vec::with_capacity(count);
        let mut cursor = HEADER_SIZE + 2;
        for _ in 0..count {
            if cursor + SECTION_TABLE_ENTRY_SIZE > bytes.len() {
                return Err(ArmorError::InvalidFormat("truncated section table".into()));
            }
            let kind = ColumnFileSection::from_u8(bytes[cursor]).ok_or_else(|| {
                ArmorError::InvalidFormat(format!("unknown section kind: {}", bytes[cursor]))
            })?;
            let compressed_len = read_u32_at(bytes, cursor + 1)? as usize;
            let uncompressed_len = read_u32_at(bytes, cursor + 5)? as usize;
            entries.push((kind, compressed_len, uncompressed_len));
            cursor = cursor + SECTION_TABLE_ENTRY_SIZE;
        }
        let mut sections = Vec::with_capacity(count);
        for (kind, compressed_len, uncompressed_len) in entries {
            let end = cursor
                .checked_add(compressed_len)
                .filter(|end| *end <= bytes.len())
                .ok_or_else(|| ArmorError::InvalidFormat("truncated section payload".into()))?;
            sections.push((kind, &bytes[cursor..end], uncompressed_len));
            cursor = end;
        }
        Ok(sections)
    }
}

// ── Tests ──────────────────────────────────────────────────────────
