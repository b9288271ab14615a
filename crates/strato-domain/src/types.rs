use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

// ── Kind ─────────────────────────────────────────────────────────────────────

/// Closed enumeration of resource kinds the engine knows how to reconcile.
///
/// The serde form matches the `kind:` field of component documents
/// (`kind: Bucket`, `kind: InternetGateway`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    Bucket,
    Table,
    Queue,
    Topic,
    Function,
    Database,
    Service,
    Vpc,
    Subnet,
    InternetGateway,
    NatGateway,
    SecurityGroup,
    RouteTable,
}

impl Kind {
    pub const ALL: [Kind; 13] = [
        Kind::Bucket,
        Kind::Table,
        Kind::Queue,
        Kind::Topic,
        Kind::Function,
        Kind::Database,
        Kind::Service,
        Kind::Vpc,
        Kind::Subnet,
        Kind::InternetGateway,
        Kind::NatGateway,
        Kind::SecurityGroup,
        Kind::RouteTable,
    ];

    /// The AWS service segment used when building an ARN for this kind.
    pub fn aws_service(&self) -> &'static str {
        match self {
            Kind::Bucket => "s3",
            Kind::Table => "dynamodb",
            Kind::Queue => "sqs",
            Kind::Topic => "sns",
            Kind::Function => "lambda",
            Kind::Database => "rds",
            Kind::Service => "ecs",
            Kind::Vpc
            | Kind::Subnet
            | Kind::InternetGateway
            | Kind::NatGateway
            | Kind::SecurityGroup
            | Kind::RouteTable => "ec2",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Bucket => "Bucket",
            Kind::Table => "Table",
            Kind::Queue => "Queue",
            Kind::Topic => "Topic",
            Kind::Function => "Function",
            Kind::Database => "Database",
            Kind::Service => "Service",
            Kind::Vpc => "Vpc",
            Kind::Subnet => "Subnet",
            Kind::InternetGateway => "InternetGateway",
            Kind::NatGateway => "NatGateway",
            Kind::SecurityGroup => "SecurityGroup",
            Kind::RouteTable => "RouteTable",
        }
    }
}

impl FromStr for Kind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| DomainError::UnknownKind(s.to_string()))
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Names ────────────────────────────────────────────────────────────────────

pub const MAX_NAME_LEN: usize = 63;

/// Check a stack/service/component/tenant name against the naming rule:
/// `^[a-z][a-z0-9-]*$`, at most [`MAX_NAME_LEN`] characters.
pub fn validate_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

// ── Metadata ─────────────────────────────────────────────────────────────────

/// Shared metadata carried by every component regardless of kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub stack: String,
    pub service: String,
    /// Free-form labels, merged into the tag set sent to providers.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Metadata {
    /// The fully-qualified resource name: `<stack>.<service>.<name>`.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}.{}", self.stack, self.service, self.name)
    }
}

// ── Stack & Service ──────────────────────────────────────────────────────────

/// The root document of a stack folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    pub name: String,
    pub tenant: String,
    pub provider: String,
    pub region: String,
    /// Stack-scoped variables, resolved by `${VAR}` interpolation.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Stack {
    pub fn validate(&self) -> Result<(), DomainError> {
        if !validate_name(&self.name) {
            return Err(DomainError::InvalidName(self.name.clone()));
        }
        if self.provider.trim().is_empty() {
            return Err(DomainError::InvalidConfig(format!(
                "stack '{}': provider must not be empty",
                self.name
            )));
        }
        if self.region.trim().is_empty() {
            return Err(DomainError::InvalidConfig(format!(
                "stack '{}': region must not be empty",
                self.name
            )));
        }
        Ok(())
    }
}

/// A sub-grouping of components within a stack, sharing a variable scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub stack: String,
    /// Service-scoped variables, resolved by `${<service>.VAR}` interpolation.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

// ── ARN ──────────────────────────────────────────────────────────────────────

/// An Amazon-style resource name: `arn:aws:<service>:<region>:<account>:<resource>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arn {
    pub service: String,
    pub region: String,
    pub account: String,
    pub resource: String,
}

impl Arn {
    pub fn new(kind: Kind, region: &str, account: &str, resource: &str) -> Self {
        // S3 bucket ARNs are global: no region or account segment.
        let (region, account) = match kind {
            Kind::Bucket => ("", ""),
            _ => (region, account),
        };
        Self {
            service: kind.aws_service().to_string(),
            region: region.to_string(),
            account: account.to_string(),
            resource: resource.to_string(),
        }
    }
}

impl std::fmt::Display for Arn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "arn:aws:{}:{}:{}:{}",
            self.service, self.region, self.account, self.resource
        )
    }
}
