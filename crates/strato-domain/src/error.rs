use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("unknown kind: {0}")]
    UnknownKind(String),

    #[error("invalid name '{0}': must match ^[a-z][a-z0-9-]*$ and be at most 63 characters")]
    InvalidName(String),

    #[error("bucket '{name}': unsupported acl '{acl}'")]
    InvalidAcl { name: String, acl: String },

    #[error("table '{name}': unsupported billing mode '{mode}'")]
    InvalidBillingMode { name: String, mode: String },

    #[error("table '{name}': provisioned billing requires positive read and write capacity")]
    MissingProvisionedCapacity { name: String },

    #[error("table '{name}': unsupported key type '{key_type}' for attribute '{attribute}'")]
    InvalidKeyType {
        name: String,
        attribute: String,
        key_type: String,
    },

    #[error("{kind} '{name}': content-based deduplication requires fifo")]
    DeduplicationWithoutFifo { kind: String, name: String },

    #[error("database '{name}': allocated storage must be at least 20 GiB (got {got})")]
    StorageTooSmall { name: String, got: u32 },

    #[error("service '{name}': unsupported runtime platform '{platform}'")]
    InvalidPlatform { name: String, platform: String },

    #[error("{kind} '{name}': field '{field}' must not be empty")]
    MissingReference {
        kind: String,
        name: String,
        field: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
