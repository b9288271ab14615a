use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state not found at key: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error on key {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cross-tenant access refused: key '{key}' is outside prefix '{prefix}'")]
    CrossTenant { key: String, prefix: String },

    #[error("internal store error: {0}")]
    Internal(String),
}
