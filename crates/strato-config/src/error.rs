use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("yaml parse error in {path}: {source}")]
    YamlParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("no stack document found under {0}")]
    StackDocumentMissing(String),

    #[error("multiple stack documents found ('{first}' and '{second}'); a stack folder holds exactly one")]
    MultipleStacks { first: String, second: String },

    #[error("unknown kind '{kind}' in {path}")]
    UnknownKind { kind: String, path: String },

    #[error("conversion error in {path}: {message}")]
    Conversion { path: String, message: String },

    #[error("component '{component}' declares stack '{declared}' but the folder belongs to stack '{expected}'")]
    CrossStackReference {
        component: String,
        declared: String,
        expected: String,
    },

    #[error("unresolved variable '${{{variable}}}' in component '{component}'")]
    BadVariableInterpolation { component: String, variable: String },

    #[error("component '{component}' references variable '${{{variable}}}' from another service '{other_service}'")]
    CrossServiceVariable {
        component: String,
        variable: String,
        other_service: String,
    },

    #[error("duplicate component name '{0}' in stack")]
    DuplicateComponent(String),

    #[error("component '{component}' belongs to unknown service '{service}'")]
    UnknownService { component: String, service: String },

    #[error("component '{component}' depends on unknown component '{dependency}'")]
    UnknownDependency {
        component: String,
        dependency: String,
    },

    #[error("domain error: {0}")]
    Domain(#[from] strato_domain::DomainError),
}
