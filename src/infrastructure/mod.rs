pub mod clock;
pub mod in_memory;
pub mod log_sink;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod sandbox;
