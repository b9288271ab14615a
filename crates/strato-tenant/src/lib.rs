mod credentials;
mod error;
mod registry;
mod session;
mod tenant;

pub use credentials::{derive_prefix, generate_secret, hash_secret, verify_secret, ALGORITHM};
pub use error::TenantError;
pub use registry::{
    CreateTenantRequest, Registry, RegistryConfig, RegistryMetadata, TenantRegistry, REGISTRY_KEY,
};
pub use session::{Session, SessionAws, SessionBackend, SessionLocks, SessionMode, SessionTenant};
pub use tenant::{
    AwsConfig, Credentials, LocksConfig, NetworkingConfig, StorageConfig, Tenant, TenantLimits,
    TenantStatus,
};
