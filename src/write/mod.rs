//! Write-path orchestration: shard writers, diff writers, the per-table
//! registry, and the `ArmorWriter` entry point.

pub mod armor_writer;
pub mod diff_writer;
pub mod shard_writer;
pub mod table_writer;

pub use armor_writer::ArmorWriter;
pub use diff_writer::ColumnShardDiffWriter;
pub use shard_writer::{CompactionTrigger, ShardWriter, WriteCapture, DEFAULT_COMPACTION_TRIGGER};
pub use table_writer::TableWriter;
