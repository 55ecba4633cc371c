//! Error types for the armor write path

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ArmorError>;

#[derive(Error, Debug)]
pub enum ArmorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    /// A transaction id attempted to commit twice against the same scope.
    /// Fatal: signals a caller bug, the marker is left unchanged.
    #[error("Transaction '{transaction}' is already current for {scope}, create another transaction")]
    DuplicateTransaction { transaction: String, scope: String },

    /// Entity-id column name or type disagreement within a batch or against
    /// persisted table metadata. The table is considered inconsistent.
    #[error("Schema drift: {0}")]
    SchemaDrift(String),

    /// A column serialization produced an unexpected byte count or offset.
    /// Fatal for that shard's commit; never wrapped so callers can tell
    /// data corruption apart from generic I/O failure.
    #[error("Entity offset mismatch in {column}: expected {expected} bytes, got {actual}")]
    EntityOffset {
        column: String,
        expected: u64,
        actual: u64,
    },

    /// Retryable store availability issue. Retried with backoff up to a
    /// fixed attempt cap, then surfaced as fatal.
    #[error("Transient store error: {0}")]
    TransientStore(String),

    /// A shard's underlying file vanished mid-commit because a concurrent
    /// task already tore it down. Logged and treated as nothing-to-commit.
    #[error("Benign race: {0}")]
    BenignRace(String),

    #[error("Compaction error: {0}")]
    Compaction(String),

    #[error("Commit error: {0}")]
    Commit(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

impl ArmorError {
    /// True for errors the retry layer may re-attempt with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            ArmorError::TransientStore(_) => true,
            ArmorError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// True for races that mean "nothing left to commit", not failure.
    pub fn is_benign(&self) -> bool {
        matches!(self, ArmorError::BenignRace(_))
    }
}
