//! In-memory fakes, fixtures and SQLite helpers for tests. Enabled with the `test_utils` feature.
mod fixtures;
mod memory_kv;
mod memory_store;
pub mod prepare_env;
mod transport;

pub use fixtures::*;
pub use memory_kv::MemoryKeyValueStore;
pub use memory_store::MemoryStore;
pub use transport::RecordingTransport;
