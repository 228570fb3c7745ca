pub mod kv;
pub mod membership_cache;
pub mod membership_store;

pub use kv::{FileKvStore, KvStore, MemoryKvStore, StoreError};
pub use membership_cache::MembershipCache;
pub use membership_store::{MembershipStore, Snapshot, SnapshotOrigin};
