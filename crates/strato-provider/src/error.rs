use thiserror::Error;

/// Classification of a provider failure, used by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Rate limit or throttle; safe to retry after a pause.
    Throttled,
    /// The referenced resource does not exist in the cloud.
    NotFound,
    /// A resource with the computed name already exists.
    Conflict,
    /// The request was rejected as invalid; retrying cannot help.
    Invalid,
    /// Anything else.
    Internal,
}

/// A failure surfaced by a cloud call.
#[derive(Debug, Error)]
#[error("provider '{provider}' failed during {operation} of '{resource_id}': {message}")]
pub struct ProviderError {
    pub provider: String,
    pub operation: String,
    pub resource_id: String,
    pub message: String,
    pub kind: ProviderErrorKind,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    pub fn new(
        provider: impl Into<String>,
        operation: impl Into<String>,
        resource_id: impl Into<String>,
        message: impl Into<String>,
        kind: ProviderErrorKind,
    ) -> Self {
        Self {
            provider: provider.into(),
            operation: operation.into(),
            resource_id: resource_id.into(),
            message: message.into(),
            kind,
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Whether the engine may retry the failed call.
    pub fn retryable(&self) -> bool {
        self.kind == ProviderErrorKind::Throttled
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ProviderErrorKind::NotFound
    }
}
