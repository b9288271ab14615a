mod error;
mod heartbeat;
mod lock;
mod memory;
mod tenant;

pub use error::LockError;
pub use heartbeat::Heartbeat;
pub use lock::{lock_key, Lock, LockManager};
pub use memory::MemoryLockManager;
pub use tenant::TenantAwareLockManager;
