use thiserror::Error;
use std::io;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("missing or invalid file header")]
    InvalidHeader,
    #[error("file is marked inconsistent; a previous session did not close cleanly")]
    Inconsistent,
    #[error("file was opened read-only")]
    ReadOnly,
    #[error("duplicate record id {0}")]
    DuplicateId(u32),
    #[error("no live record at offset {0}")]
    NoRecord(u64),
    #[error("corrupt record at offset {0}: {1}")]
    CorruptRecord(u64, String),
    #[error("csv ingest failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("bad field value '{0}'")]
    BadValue(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type DbResult<T> = Result<T, DbError>;
