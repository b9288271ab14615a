use std::collections::HashMap;
use std::sync::Arc;

use strato_domain::Kind;

use crate::error::{ProviderError, ProviderErrorKind};
use crate::provider::ResourceProvider;

/// Dispatches engine calls to the [`ResourceProvider`] registered for a kind.
///
/// A default provider, when set, serves any kind without an explicit entry.
pub struct ProviderRegistry {
    providers: HashMap<Kind, Arc<dyn ResourceProvider>>,
    default: Option<Arc<dyn ResourceProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self { providers: HashMap::new(), default: None }
    }

    /// Register one provider for every kind. Convenient for the local
    /// simulator and tests.
    pub fn with_default(provider: Arc<dyn ResourceProvider>) -> Self {
        Self { providers: HashMap::new(), default: Some(provider) }
    }

    /// Register a provider for a kind. Returns `&mut self` for chaining.
    pub fn register(&mut self, kind: Kind, provider: Arc<dyn ResourceProvider>) -> &mut Self {
        self.providers.insert(kind, provider);
        self
    }

    pub fn set_default(&mut self, provider: Arc<dyn ResourceProvider>) -> &mut Self {
        self.default = Some(provider);
        self
    }

    /// Resolve the provider for a kind, falling back to the default.
    pub fn for_kind(&self, kind: Kind) -> Result<Arc<dyn ResourceProvider>, ProviderError> {
        self.providers
            .get(&kind)
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| {
                ProviderError::new(
                    "registry",
                    "resolve",
                    kind.as_str(),
                    format!("no provider registered for kind {}", kind),
                    ProviderErrorKind::Invalid,
                )
            })
    }

    pub fn registered_kinds(&self) -> Vec<Kind> {
        self.providers.keys().copied().collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
