//! Column and table identifiers.
//!
//! A `ColumnId` names one column and its data type; the pair maps to a
//! single file per shard named `<name>.<typeCode>`. A `TableId` is the
//! process-local registry key for one tenant's table.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ArmorError, Result};

// ── Data Type ──────────────────────────────────────────────────────

/// Column value type. The one-letter code is part of the on-store file
/// name, so it must stay stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Long,
    Float,
    Double,
    String,
    Boolean,
}

impl DataType {
    /// One-letter path code used in column file names.
    pub fn code(&self) -> &'static str {
        match self {
            DataType::Integer => "I",
            DataType::Long => "L",
            DataType::Float => "F",
            DataType::Double => "D",
            DataType::String => "S",
            DataType::Boolean => "B",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "I" => Some(DataType::Integer),
            "L" => Some(DataType::Long),
            "F" => Some(DataType::Float),
            "D" => Some(DataType::Double),
            "S" => Some(DataType::String),
            "B" => Some(DataType::Boolean),
            _ => None,
        }
    }

    /// Fixed byte width of an encoded value, None for variable-width.
    pub fn byte_width(&self) -> Option<usize> {
        match self {
            DataType::Integer | DataType::Float => Some(4),
            DataType::Long | DataType::Double => Some(8),
            DataType::Boolean => Some(1),
            DataType::String => None,
        }
    }
}

// ── Column Id ──────────────────────────────────────────────────────

/// Identifies one column within a shard: name plus data type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnId {
    pub name: String,
    pub data_type: DataType,
}

impl ColumnId {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    /// File name for this column: `<name>.<typeCode>`.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.name, self.data_type.code())
    }

    /// Parse a column id back from its file name.
    pub fn from_file_name(file_name: &str) -> Result<Self> {
        let mut parts = file_name.rsplitn(2, '.');
        let code = parts.next().unwrap_or_default();
        let name = parts.next().ok_or_else(|| {
            ArmorError::InvalidFormat(format!("not a column file name: {file_name}"))
        })?;
        let data_type = DataType::from_code(code).ok_or_else(|| {
            ArmorError::InvalidFormat(format!("unknown data type code in {file_name}"))
        })?;
        Ok(Self::new(name, data_type))
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

// ── Table Id ───────────────────────────────────────────────────────

/// Process-local key for one tenant's table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableId {
    pub tenant: String,
    pub table: String,
}

impl TableId {
    pub fn new(tenant: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.table)
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_codes_roundtrip() {
        for dt in [
            DataType::Integer,
            DataType::Long,
            DataType::Float,
            DataType::Double,
            DataType::String,
            DataType::Boolean,
        ] {
            assert_eq!(DataType::from_code(dt.code()), Some(dt));
        }
        assert_eq!(DataType::from_code("X"), None);
    }

    #[test]
    fn test_column_file_name_roundtrip() {
        let column = ColumnId::new("status", DataType::Integer);
        assert_eq!(column.full_name(), "status.I");
        assert_eq!(ColumnId::from_file_name("status.I").unwrap(), column);
    }

    #[test]
    fn test_column_name_with_dots() {
        let column = ColumnId::new("asset.score", DataType::Double);
        assert_eq!(column.full_name(), "asset.score.D");
        assert_eq!(
            ColumnId::from_file_name("asset.score.D").unwrap(),
            column
        );
    }

    #[test]
    fn test_bad_file_names_rejected() {
        assert!(ColumnId::from_file_name("noseparator").is_err());
        assert!(ColumnId::from_file_name("status.Z").is_err());
    }
}
