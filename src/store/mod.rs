pub mod datastore;
pub mod through;

pub use datastore::CacheDataStore;
pub use through::{CopyOptions, RepackCompression, ThroughStore};
