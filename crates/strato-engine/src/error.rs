use thiserror::Error;

use crate::journal::RollbackResult;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(#[from] strato_config::ConfigError),

    #[error("planning error: {0}")]
    Graph(#[from] strato_graph::GraphError),

    #[error("store error: {0}")]
    Store(#[from] strato_store::StoreError),

    #[error("authentication error: {0}")]
    Auth(#[from] strato_tenant::TenantError),

    #[error("lock error: {0}")]
    Lock(#[from] strato_lock::LockError),

    #[error("lock lost during apply of stack '{stack}'")]
    LockLost { stack: String },

    #[error("apply of '{resource}' failed: {source}")]
    ApplyFailed {
        resource: String,
        #[source]
        source: strato_provider::ProviderError,
        /// Rollback outcome, when one ran.
        rollback: Option<RollbackResult>,
        /// Where the surviving partial state was persisted.
        state_key: String,
    },

    #[error("apply cancelled during stack '{stack}'")]
    Cancelled { stack: String },

    #[error("integrity error: {0}")]
    Integrity(String),
}

impl EngineError {
    /// The CLI exit code this failure surfaces as:
    /// 1 validation/parse, 2 planning, 3 provider failure after rollback,
    /// 4 lock conflict, 5 authentication.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Config(_) | EngineError::Store(_) | EngineError::Integrity(_) => 1,
            EngineError::Graph(_) => 2,
            EngineError::ApplyFailed { .. } | EngineError::Cancelled { .. } => 3,
            EngineError::Lock(_) | EngineError::LockLost { .. } => 4,
            EngineError::Auth(_) => 5,
        }
    }
}
