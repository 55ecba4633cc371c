//! Self-describing binary container for one column of one shard.
//!
//! Pure serialization/deserialization, no I/O besides the reader's
//! memory-mapped `open`. Two body layouts (V1, V2) round-trip through
//! one reader, selected by the header's format-version tag.

pub mod format;
pub mod reader;
pub mod writer;

pub use format::{
    ColumnFileHeader, ColumnFileSection, EntityRecord, FORMAT_V1, FORMAT_V2, HEADER_SIZE, MAGIC,
};
pub use reader::{ColumnFileReader, SectionAction};
pub use writer::{ColumnFileWriter, StreamProduct};
