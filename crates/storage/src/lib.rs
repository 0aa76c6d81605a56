mod persistence;
mod snapshot;
mod store;

pub use persistence::{
    PersistenceController, PersistenceOptions, DEFAULT_FLUSH_DELAY, DEFAULT_WRITE_TIMEOUT,
};
pub use snapshot::{
    decode_entries, encode_entries, FileSnapshotStore, MemorySnapshotStore, SnapshotStore,
};
pub use store::{BatchOutcome, OrderedStore, PositionViolation};
