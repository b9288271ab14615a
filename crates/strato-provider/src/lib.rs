mod error;
mod local;
mod provider;
mod registry;

pub use error::{ProviderError, ProviderErrorKind};
pub use local::LocalProvider;
pub use provider::{ResourceOptions, ResourceProvider, ResourceResult, ResourceState};
pub use registry::ProviderRegistry;
