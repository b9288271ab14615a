use std::collections::BTreeMap;

use serde::Deserialize;

/// One YAML document of a stack folder, before kind dispatch.
///
/// Stack, service, and component documents all share this envelope:
/// `apiVersion`, `kind`, `metadata`, `spec`, and (components only)
/// `depends_on`.
#[derive(Debug, Deserialize)]
pub struct RawDocument {
    #[serde(rename = "apiVersion", default)]
    pub api_version: Option<String>,
    pub kind: String,
    #[serde(default)]
    pub metadata: RawMetadata,
    #[serde(default)]
    pub spec: serde_json::Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// The `spec` of a `kind: Stack` document.
#[derive(Debug, Deserialize)]
pub struct RawStackSpec {
    #[serde(default)]
    pub tenant: String,
    pub provider: String,
    pub region: String,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

/// The `spec` of a `kind: Service` document.
#[derive(Debug, Default, Deserialize)]
pub struct RawServiceSpec {
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}
