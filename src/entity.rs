//! Entity records and per-column write requests.
//!
//! An `Entity` is the caller-facing input unit: one id, one version, and
//! a set of column values. The write path explodes each entity into one
//! `WriteRequest` per column before handing work to a shard writer.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ArmorError, Result};
use crate::schema::{ColumnId, DataType};

// ── Entity Id ──────────────────────────────────────────────────────

/// Entity identifier: numeric or text. Ordered so index sections
/// serialize deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityId {
    Number(i64),
    Text(String),
}

impl EntityId {
    /// Data type of the distinguished entity-id column for this id.
    pub fn data_type(&self) -> DataType {
        match self {
            EntityId::Number(_) => DataType::Long,
            EntityId::Text(_) => DataType::String,
        }
    }

    /// The id expressed as a column value, for the entity-id column.
    pub fn to_value(&self) -> ColumnValue {
        match self {
            EntityId::Number(n) => ColumnValue::Long(*n),
            EntityId::Text(s) => ColumnValue::String(s.clone()),
        }
    }

    /// The id expressed as a value of the table's declared entity-id
    /// column type. An id that cannot be represented in that type is a
    /// schema drift error.
    pub fn to_value_as(&self, data_type: DataType) -> Result<ColumnValue> {
        match (self, data_type) {
            (EntityId::Number(n), DataType::Long) => Ok(ColumnValue::Long(*n)),
            (EntityId::Number(n), DataType::Integer) => i32::try_from(*n)
                .map(ColumnValue::Integer)
                .map_err(|_| {
                    ArmorError::SchemaDrift(format!("entity id {n} exceeds integer id column"))
                }),
            (EntityId::Text(s), DataType::String) => Ok(ColumnValue::String(s.clone())),
            (id, dt) => Err(ArmorError::SchemaDrift(format!(
                "entity id {id} cannot be stored in a {dt:?} id column"
            ))),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Number(n) => write!(f, "{n}"),
            EntityId::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for EntityId {
    fn from(v: i64) -> Self {
        EntityId::Number(v)
    }
}

impl From<&str> for EntityId {
    fn from(v: &str) -> Self {
        EntityId::Text(v.to_string())
    }
}

// ── Column Value ───────────────────────────────────────────────────

/// One column value. `Null` encodes to zero bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnValue {
    Null,
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Boolean(bool),
}

impl ColumnValue {
    /// Data type of a non-null value.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            ColumnValue::Null => None,
            ColumnValue::Integer(_) => Some(DataType::Integer),
            ColumnValue::Long(_) => Some(DataType::Long),
            ColumnValue::Float(_) => Some(DataType::Float),
            ColumnValue::Double(_) => Some(DataType::Double),
            ColumnValue::String(_) => Some(DataType::String),
            ColumnValue::Boolean(_) => Some(DataType::Boolean),
        }
    }

    /// Encode into the value payload representation (little-endian for
    /// numerics, raw UTF-8 for strings, empty for null).
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ColumnValue::Null => Vec::new(),
            ColumnValue::Integer(v) => v.to_le_bytes().to_vec(),
            ColumnValue::Long(v) => v.to_le_bytes().to_vec(),
            ColumnValue::Float(v) => v.to_le_bytes().to_vec(),
            ColumnValue::Double(v) => v.to_le_bytes().to_vec(),
            ColumnValue::String(v) => v.as_bytes().to_vec(),
            ColumnValue::Boolean(v) => vec![u8::from(*v)],
        }
    }

    /// Decode a value of `data_type` from its payload bytes. Zero bytes
    /// decode to `Null` for every type.
    pub fn decode(data_type: DataType, bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(ColumnValue::Null);
        }
        let wrong_width = || {
            ArmorError::InvalidFormat(format!(
                "value of {data_type:?} has unexpected length {}",
                bytes.len()
            ))
        };
        match data_type {
            DataType::Integer => Ok(ColumnValue::Integer(i32::from_le_bytes(
                bytes.try_into().map_err(|_| wrong_width())?,
            ))),
            DataType::Long => Ok(ColumnValue::Long(i64::from_le_bytes(
                bytes.try_into().map_err(|_| wrong_width())?,
            ))),
            DataType::Float => Ok(ColumnValue::Float(f32::from_le_bytes(
                bytes.try_into().map_err(|_| wrong_width())?,
            ))),
            DataType::Double => Ok(ColumnValue::Double(f64::from_le_bytes(
                bytes.try_into().map_err(|_| wrong_width())?,
            ))),
            DataType::Boolean => match bytes {
                [0] => Ok(ColumnValue::Boolean(false)),
                [1] => Ok(ColumnValue::Boolean(true)),
                _ => Err(wrong_width()),
            },
            DataType::String => String::from_utf8(bytes.to_vec())
                .map(ColumnValue::String)
                .map_err(|e| ArmorError::InvalidFormat(format!("invalid utf-8 value: {e}"))),
        }
    }
}

// ── Column / Entity ────────────────────────────────────────────────

/// One column's value on one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub column_id: ColumnId,
    pub value: ColumnValue,
}

impl Column {
    pub fn new(column_id: ColumnId, value: ColumnValue) -> Self {
        Self { column_id, value }
    }
}

/// Caller-facing input unit: one entity's id, version, and column values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: EntityId,
    pub version: u64,
    pub instance_id: String,
    /// Name of the distinguished entity-id column for the target table.
    pub entity_id_column: String,
    pub columns: Vec<Column>,
}

impl Entity {
    pub fn new(
        entity_id: impl Into<EntityId>,
        version: u64,
        instance_id: impl Into<String>,
        entity_id_column: impl Into<String>,
        columns: Vec<Column>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            version,
            instance_id: instance_id.into(),
            entity_id_column: entity_id_column.into(),
            columns,
        }
    }

    /// Entity-id column id implied by this entity (name + id type).
    pub fn entity_column_id(&self) -> ColumnId {
        ColumnId::new(self.entity_id_column.clone(), self.entity_id.data_type())
    }

    /// Explode into one write request per column.
    pub fn write_requests(&self) -> Vec<WriteRequest> {
        self.columns
            .iter()
            .map(|column| WriteRequest {
                entity_id: self.entity_id.clone(),
                version: self.version,
                instance_id: self.instance_id.clone(),
                column: column.clone(),
            })
            .collect()
    }
}

// ── Write Request ──────────────────────────────────────────────────

/// The per-column-per-entity unit fed into a shard writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub entity_id: EntityId,
    pub version: u64,
    pub instance_id: String,
    pub column: Column,
}

impl WriteRequest {
    pub fn column_id(&self) -> &ColumnId {
        &self.column.column_id
    }

    pub fn value(&self) -> &ColumnValue {
        &self.column.value
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_encode_decode_roundtrip() {
        let cases = vec![
            ColumnValue::Integer(-42),
            ColumnValue::Long(1 << 40),
            ColumnValue::Float(2.5),
            ColumnValue::Double(-0.125),
            ColumnValue::String("hello".into()),
            ColumnValue::Boolean(true),
            ColumnValue::Boolean(false),
        ];
        for value in cases {
            let dt = value.data_type().unwrap();
            let bytes = value.encode();
            assert_eq!(ColumnValue::decode(dt, &bytes).unwrap(), value);
        }
    }

    #[test]
    fn test_null_roundtrip_for_every_type() {
        for dt in [
            DataType::Integer,
            DataType::Long,
            DataType::Float,
            DataType::Double,
            DataType::String,
            DataType::Boolean,
        ] {
            assert!(ColumnValue::Null.encode().is_empty());
            assert_eq!(ColumnValue::decode(dt, &[]).unwrap(), ColumnValue::Null);
        }
    }

    #[test]
    fn test_decode_rejects_wrong_width() {
        assert!(ColumnValue::decode(DataType::Integer, &[1, 2]).is_err());
        assert!(ColumnValue::decode(DataType::Boolean, &[7]).is_err());
    }

    #[test]
    fn test_entity_explodes_to_requests() {
        let entity = Entity::new(
            7i64,
            3,
            "inst-1",
            "assetId",
            vec![
                Column::new(
                    ColumnId::new("status", DataType::Integer),
                    ColumnValue::Integer(1),
                ),
                Column::new(
                    ColumnId::new("name", DataType::String),
                    ColumnValue::String("web-01".into()),
                ),
            ],
        );
        let requests = entity.write_requests();
        assert_eq!(requests.len(), 2);
        assert!(requests
            .iter()
            .all(|r| r.entity_id == EntityId::Number(7) && r.version == 3));
        assert_eq!(requests[0].column_id().name, "status");
    }

    #[test]
    fn test_entity_column_id_type_inference() {
        let numeric = Entity::new(1i64, 1, "i", "assetId", vec![]);
        assert_eq!(
            numeric.entity_column_id(),
            ColumnId::new("assetId", DataType::Long)
        );
        let text = Entity::new("host-a", 1, "i", "hostname", vec![]);
        assert_eq!(
            text.entity_column_id(),
            ColumnId::new("hostname", DataType::String)
        );
    }
}
