pub mod blob;
pub mod records;
pub mod redis_store;

pub use blob::{BlobStore, LocalFileStorage};
pub use records::{FileRecordStore, MemoryRecordStore, RecordStore};
pub use redis_store::RedisRecordStore;
