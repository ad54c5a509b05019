pub mod engine;
pub mod error;
pub mod query;
pub mod records;
pub mod storage;
