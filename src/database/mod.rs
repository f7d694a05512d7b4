pub mod snapshot;

pub use snapshot::{JsonFileStorage, MemoryStorage, SnapshotStorage};
