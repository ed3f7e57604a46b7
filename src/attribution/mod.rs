//! Client-side state of the attribution page: the in-memory snapshot, the persisted
//! TTL cache, favorites with their sync, and the page controller tying them together.

pub mod favorites;
pub mod page;
pub mod single_flight;
pub mod snapshot;
pub mod storage;
pub mod ttl_cache;

pub use page::{AdjustDataPage, AttributionBackend, AttributionFilter, MountOutcome, PageError};
pub use storage::{KvStore, MemoryStore, RedbStore, StoreError};
