use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock '{key}' already held by {owner} until {expires_at}")]
    AlreadyHeld {
        key: String,
        owner: String,
        acquired_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },

    #[error("lock '{key}' has expired")]
    Expired { key: String },

    #[error("lock id mismatch for '{key}': holder does not own this lease")]
    InvalidLockId { key: String },

    #[error("lock '{key}' not found")]
    NotFound { key: String },

    #[error("cross-tenant access refused: lock key '{key}' is outside prefix '{prefix}'")]
    CrossTenant { key: String, prefix: String },

    #[error("internal lock error: {0}")]
    Internal(String),
}
