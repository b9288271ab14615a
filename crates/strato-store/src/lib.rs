mod backend;
mod error;
mod file;
mod memory;
mod state;
mod store;

pub use backend::{StorageBackend, TenantAwareBackend};
pub use error::StoreError;
pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use state::{
    compute_checksum, state_key, ResourceStatus, State, StateMetadata, StateResource,
    STATE_VERSION,
};
pub use store::StateStore;
