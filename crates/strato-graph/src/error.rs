use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("circular dependency involving component '{component}'")]
    CircularDependency { component: String },

    #[error("component '{component}' references unknown component '{reference}'")]
    UnknownReference {
        component: String,
        reference: String,
    },
}
