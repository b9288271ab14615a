use thiserror::Error;

#[derive(Debug, Error)]
pub enum TenantError {
    #[error("tenant not found: {0}")]
    NotFound(String),

    #[error("tenant '{0}' already exists")]
    Duplicate(String),

    #[error("invalid tenant name '{0}': must match ^[a-z][a-z0-9-]*$ and be at most 63 characters")]
    InvalidName(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("tenant '{0}' is suspended")]
    Suspended(String),

    #[error("tenant '{0}' is deleted")]
    Deleted(String),

    #[error("tenant '{tenant}' is not allowed to provision kind {kind}")]
    KindNotAllowed { tenant: String, kind: String },

    #[error("tenant '{tenant}' exceeds limit: {detail}")]
    LimitExceeded { tenant: String, detail: String },

    #[error("session expired")]
    SessionExpired,

    #[error("operation requires a {required} session, got {actual}")]
    WrongSessionMode { required: String, actual: String },

    #[error("credential hashing failed: {0}")]
    Hash(String),

    #[error("registry parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("store error: {0}")]
    Store(#[from] strato_store::StoreError),
}
