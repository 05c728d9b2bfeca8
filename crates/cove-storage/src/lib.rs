mod error;
mod snapshot;
mod storage;

pub use error::StorageError;
pub use snapshot::EntitySnapshot;
pub use storage::{EntityStore, EntityStoreAccessor};
