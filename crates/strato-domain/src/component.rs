use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DomainError;
use crate::types::{validate_name, Kind, Metadata};

// ── Component ────────────────────────────────────────────────────────────────

/// A single declarative resource: shared metadata plus a kind-specific spec.
///
/// Components are created by the parser and immutable afterwards. The typed
/// round trip through untyped JSON goes via [`Component::to_snapshot`] /
/// [`Component::from_snapshot`], which carry the kind tag alongside the spec.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Component {
    pub metadata: Metadata,
    pub spec: ComponentSpec,
    /// Names of sibling components that must be provisioned first.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Component {
    pub fn kind(&self) -> Kind {
        self.spec.kind()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    /// The name the resource carries in the cloud.
    ///
    /// For FIFO queues and topics the `.fifo` suffix is part of the computed
    /// name, never a user-supplied attribute.
    pub fn resource_name(&self) -> String {
        match &self.spec {
            ComponentSpec::Queue(s) if s.fifo => format!("{}.fifo", self.metadata.name),
            ComponentSpec::Topic(s) if s.fifo => format!("{}.fifo", self.metadata.name),
            _ => self.metadata.name.clone(),
        }
    }

    /// Sibling components referenced structurally by this spec (a subnet names
    /// its vpc, a nat gateway its subnet, ...). These become implicit graph
    /// edges in addition to `depends_on`.
    pub fn referenced_components(&self) -> Vec<&str> {
        self.spec.referenced_components()
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if !validate_name(&self.metadata.name) {
            return Err(DomainError::InvalidName(self.metadata.name.clone()));
        }
        self.spec.validate(&self.metadata.name)
    }
}

// ── ComponentSpec ────────────────────────────────────────────────────────────

/// The sum type over resource kinds. Serializes to the bare spec record; the
/// kind tag lives next to it (in the document `kind:` field, or in a state
/// resource's `type`).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ComponentSpec {
    Bucket(BucketSpec),
    Table(TableSpec),
    Queue(QueueSpec),
    Topic(TopicSpec),
    Function(FunctionSpec),
    Database(DatabaseSpec),
    Service(ServiceSpec),
    Vpc(VpcSpec),
    Subnet(SubnetSpec),
    InternetGateway(InternetGatewaySpec),
    NatGateway(NatGatewaySpec),
    SecurityGroup(SecurityGroupSpec),
    RouteTable(RouteTableSpec),
}

impl ComponentSpec {
    pub fn kind(&self) -> Kind {
        match self {
            ComponentSpec::Bucket(_) => Kind::Bucket,
            ComponentSpec::Table(_) => Kind::Table,
            ComponentSpec::Queue(_) => Kind::Queue,
            ComponentSpec::Topic(_) => Kind::Topic,
            ComponentSpec::Function(_) => Kind::Function,
            ComponentSpec::Database(_) => Kind::Database,
            ComponentSpec::Service(_) => Kind::Service,
            ComponentSpec::Vpc(_) => Kind::Vpc,
            ComponentSpec::Subnet(_) => Kind::Subnet,
            ComponentSpec::InternetGateway(_) => Kind::InternetGateway,
            ComponentSpec::NatGateway(_) => Kind::NatGateway,
            ComponentSpec::SecurityGroup(_) => Kind::SecurityGroup,
            ComponentSpec::RouteTable(_) => Kind::RouteTable,
        }
    }

    /// Parse a typed spec from an untyped value, dispatching on `kind`.
    pub fn from_value(kind: Kind, value: Value) -> Result<Self, DomainError> {
        fn parse<T: serde::de::DeserializeOwned>(
            kind: Kind,
            value: Value,
        ) -> Result<T, DomainError> {
            serde_json::from_value(value).map_err(|e| {
                DomainError::InvalidConfig(format!("bad {} spec: {}", kind, e))
            })
        }
        Ok(match kind {
            Kind::Bucket => ComponentSpec::Bucket(parse(kind, value)?),
            Kind::Table => ComponentSpec::Table(parse(kind, value)?),
            Kind::Queue => ComponentSpec::Queue(parse(kind, value)?),
            Kind::Topic => ComponentSpec::Topic(parse(kind, value)?),
            Kind::Function => ComponentSpec::Function(parse(kind, value)?),
            Kind::Database => ComponentSpec::Database(parse(kind, value)?),
            Kind::Service => ComponentSpec::Service(parse(kind, value)?),
            Kind::Vpc => ComponentSpec::Vpc(parse(kind, value)?),
            Kind::Subnet => ComponentSpec::Subnet(parse(kind, value)?),
            Kind::InternetGateway => ComponentSpec::InternetGateway(parse(kind, value)?),
            Kind::NatGateway => ComponentSpec::NatGateway(parse(kind, value)?),
            Kind::SecurityGroup => ComponentSpec::SecurityGroup(parse(kind, value)?),
            Kind::RouteTable => ComponentSpec::RouteTable(parse(kind, value)?),
        })
    }

    /// Serialize the spec record to an untyped value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn referenced_components(&self) -> Vec<&str> {
        match self {
            ComponentSpec::Subnet(s) => vec![s.vpc.as_str()],
            ComponentSpec::InternetGateway(s) => vec![s.vpc.as_str()],
            ComponentSpec::NatGateway(s) => vec![s.subnet.as_str()],
            ComponentSpec::SecurityGroup(s) => vec![s.vpc.as_str()],
            ComponentSpec::RouteTable(s) => {
                let mut refs = vec![s.vpc.as_str()];
                for route in &s.routes {
                    if let Some(gw) = &route.gateway {
                        refs.push(gw.as_str());
                    }
                    if let Some(nat) = &route.nat_gateway {
                        refs.push(nat.as_str());
                    }
                }
                refs
            }
            _ => vec![],
        }
    }

    fn validate(&self, name: &str) -> Result<(), DomainError> {
        match self {
            ComponentSpec::Bucket(s) => s.validate(name),
            ComponentSpec::Table(s) => s.validate(name),
            ComponentSpec::Queue(s) => s.validate(name),
            ComponentSpec::Topic(s) => s.validate(name),
            ComponentSpec::Function(s) => s.validate(name),
            ComponentSpec::Database(s) => s.validate(name),
            ComponentSpec::Service(s) => s.validate(name),
            ComponentSpec::Vpc(s) => s.validate(name),
            ComponentSpec::Subnet(s) => s.validate(name),
            ComponentSpec::InternetGateway(s) => s.validate(name),
            ComponentSpec::NatGateway(s) => s.validate(name),
            ComponentSpec::SecurityGroup(s) => s.validate(name),
            ComponentSpec::RouteTable(s) => s.validate(name),
        }
    }
}

// Tag the serialized component with its kind so journal snapshots round-trip.
impl Component {
    pub fn to_snapshot(&self) -> Value {
        serde_json::json!({
            "__kind": self.kind().as_str(),
            "metadata": self.metadata,
            "spec": self.spec.to_value(),
            "depends_on": self.depends_on,
        })
    }

    pub fn from_snapshot(value: &Value) -> Result<Self, DomainError> {
        let kind = value
            .get("__kind")
            .and_then(|k| k.as_str())
            .ok_or_else(|| DomainError::InvalidConfig("snapshot missing __kind".into()))?
            .parse::<Kind>()?;
        let metadata: Metadata = serde_json::from_value(
            value
                .get("metadata")
                .cloned()
                .ok_or_else(|| DomainError::InvalidConfig("snapshot missing metadata".into()))?,
        )
        .map_err(|e| DomainError::InvalidConfig(format!("bad snapshot metadata: {}", e)))?;
        let spec = ComponentSpec::from_value(
            kind,
            value
                .get("spec")
                .cloned()
                .ok_or_else(|| DomainError::InvalidConfig("snapshot missing spec".into()))?,
        )?;
        let depends_on = value
            .get("depends_on")
            .and_then(|d| d.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Component { metadata, spec, depends_on })
    }
}

// ── Kind specs ───────────────────────────────────────────────────────────────

const BUCKET_ACLS: [&str; 4] = [
    "private",
    "public-read",
    "public-read-write",
    "authenticated-read",
];

fn default_acl() -> String {
    "private".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Versioning {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSpec {
    #[serde(default = "default_acl")]
    pub acl: String,
    #[serde(default)]
    pub versioning: Versioning,
    /// Expire objects after this many days. None = keep forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_days: Option<u32>,
}

impl BucketSpec {
    fn validate(&self, name: &str) -> Result<(), DomainError> {
        if !BUCKET_ACLS.contains(&self.acl.as_str()) {
            return Err(DomainError::InvalidAcl {
                name: name.to_string(),
                acl: self.acl.clone(),
            });
        }
        Ok(())
    }
}

const KEY_TYPES: [&str; 3] = ["S", "N", "B"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchema {
    pub name: String,
    /// Attribute type: S (string), N (number), or B (binary).
    pub key_type: String,
}

fn default_billing_mode() -> String {
    "PAY_PER_REQUEST".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub hash_key: KeySchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_key: Option<KeySchema>,
    #[serde(default = "default_billing_mode")]
    pub billing_mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_capacity: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_capacity: Option<u64>,
    /// Attribute that drives item expiry, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_attribute: Option<String>,
}

impl TableSpec {
    fn validate(&self, name: &str) -> Result<(), DomainError> {
        for key in std::iter::once(&self.hash_key).chain(self.range_key.as_ref()) {
            if !KEY_TYPES.contains(&key.key_type.as_str()) {
                return Err(DomainError::InvalidKeyType {
                    name: name.to_string(),
                    attribute: key.name.clone(),
                    key_type: key.key_type.clone(),
                });
            }
        }
        match self.billing_mode.as_str() {
            "PAY_PER_REQUEST" => Ok(()),
            "PROVISIONED" => {
                let read = self.read_capacity.unwrap_or(0);
                let write = self.write_capacity.unwrap_or(0);
                if read == 0 || write == 0 {
                    return Err(DomainError::MissingProvisionedCapacity {
                        name: name.to_string(),
                    });
                }
                Ok(())
            }
            other => Err(DomainError::InvalidBillingMode {
                name: name.to_string(),
                mode: other.to_string(),
            }),
        }
    }
}

fn default_visibility_timeout() -> u32 {
    30
}

fn default_message_retention() -> u32 {
    345_600 // 4 days
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSpec {
    #[serde(default)]
    pub fifo: bool,
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_seconds: u32,
    #[serde(default = "default_message_retention")]
    pub message_retention_seconds: u32,
    #[serde(default)]
    pub delay_seconds: u32,
    #[serde(default)]
    pub content_based_deduplication: bool,
}

impl QueueSpec {
    fn validate(&self, name: &str) -> Result<(), DomainError> {
        if self.content_based_deduplication && !self.fifo {
            return Err(DomainError::DeduplicationWithoutFifo {
                kind: "queue".to_string(),
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSpec {
    #[serde(default)]
    pub fifo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub content_based_deduplication: bool,
}

impl TopicSpec {
    fn validate(&self, name: &str) -> Result<(), DomainError> {
        if self.content_based_deduplication && !self.fifo {
            return Err(DomainError::DeduplicationWithoutFifo {
                kind: "topic".to_string(),
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

fn default_memory_mb() -> u32 {
    128
}

fn default_timeout_seconds() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub runtime: String,
    pub handler: String,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u32,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl FunctionSpec {
    fn validate(&self, name: &str) -> Result<(), DomainError> {
        if self.runtime.trim().is_empty() {
            return Err(DomainError::MissingReference {
                kind: "function".to_string(),
                name: name.to_string(),
                field: "runtime".to_string(),
            });
        }
        if self.handler.trim().is_empty() {
            return Err(DomainError::MissingReference {
                kind: "function".to_string(),
                name: name.to_string(),
                field: "handler".to_string(),
            });
        }
        Ok(())
    }
}

pub const MIN_DATABASE_STORAGE_GB: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSpec {
    pub engine: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_version: Option<String>,
    pub instance_class: String,
    pub allocated_storage_gb: u32,
    #[serde(default)]
    pub multi_az: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,
}

impl DatabaseSpec {
    fn validate(&self, name: &str) -> Result<(), DomainError> {
        if self.engine.trim().is_empty() {
            return Err(DomainError::MissingReference {
                kind: "database".to_string(),
                name: name.to_string(),
                field: "engine".to_string(),
            });
        }
        if self.allocated_storage_gb < MIN_DATABASE_STORAGE_GB {
            return Err(DomainError::StorageTooSmall {
                name: name.to_string(),
                got: self.allocated_storage_gb,
            });
        }
        Ok(())
    }
}

const SERVICE_PLATFORMS: [&str; 3] = ["fargate", "ec2", "lambda"];

fn default_cpu() -> u32 {
    256
}

fn default_service_memory() -> u32 {
    512
}

fn default_desired_count() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Runtime platform: fargate, ec2, or lambda.
    pub platform: String,
    pub image: String,
    #[serde(default = "default_cpu")]
    pub cpu: u32,
    #[serde(default = "default_service_memory")]
    pub memory_mb: u32,
    #[serde(default = "default_desired_count")]
    pub desired_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl ServiceSpec {
    fn validate(&self, name: &str) -> Result<(), DomainError> {
        if !SERVICE_PLATFORMS.contains(&self.platform.as_str()) {
            return Err(DomainError::InvalidPlatform {
                name: name.to_string(),
                platform: self.platform.clone(),
            });
        }
        if self.image.trim().is_empty() {
            return Err(DomainError::MissingReference {
                kind: "service".to_string(),
                name: name.to_string(),
                field: "image".to_string(),
            });
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcSpec {
    pub cidr_block: String,
    #[serde(default = "default_true")]
    pub enable_dns_hostnames: bool,
}

impl VpcSpec {
    fn validate(&self, name: &str) -> Result<(), DomainError> {
        if self.cidr_block.trim().is_empty() || !self.cidr_block.contains('/') {
            return Err(DomainError::InvalidConfig(format!(
                "vpc '{}': cidr_block '{}' is not CIDR notation",
                name, self.cidr_block
            )));
        }
        Ok(())
    }
}

fn require_ref(kind: &str, name: &str, field: &str, value: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::MissingReference {
            kind: kind.to_string(),
            name: name.to_string(),
            field: field.to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetSpec {
    /// Name of the sibling Vpc component this subnet lives in.
    pub vpc: String,
    pub cidr_block: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub public: bool,
}

impl SubnetSpec {
    fn validate(&self, name: &str) -> Result<(), DomainError> {
        require_ref("subnet", name, "vpc", &self.vpc)?;
        if self.cidr_block.trim().is_empty() || !self.cidr_block.contains('/') {
            return Err(DomainError::InvalidConfig(format!(
                "subnet '{}': cidr_block '{}' is not CIDR notation",
                name, self.cidr_block
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternetGatewaySpec {
    pub vpc: String,
}

impl InternetGatewaySpec {
    fn validate(&self, name: &str) -> Result<(), DomainError> {
        require_ref("internet-gateway", name, "vpc", &self.vpc)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatGatewaySpec {
    /// Name of the sibling public Subnet component hosting the gateway.
    pub subnet: String,
}

impl NatGatewaySpec {
    fn validate(&self, name: &str) -> Result<(), DomainError> {
        require_ref("nat-gateway", name, "subnet", &self.subnet)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    pub protocol: String,
    pub from_port: u16,
    pub to_port: u16,
    #[serde(default)]
    pub cidr_blocks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupSpec {
    pub vpc: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub ingress: Vec<SecurityRule>,
    #[serde(default)]
    pub egress: Vec<SecurityRule>,
}

impl SecurityGroupSpec {
    fn validate(&self, name: &str) -> Result<(), DomainError> {
        require_ref("security-group", name, "vpc", &self.vpc)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    pub destination_cidr: String,
    /// Name of a sibling InternetGateway component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    /// Name of a sibling NatGateway component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nat_gateway: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTableSpec {
    pub vpc: String,
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
}

impl RouteTableSpec {
    fn validate(&self, name: &str) -> Result<(), DomainError> {
        require_ref("route-table", name, "vpc", &self.vpc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str) -> Metadata {
        Metadata {
            name: name.to_string(),
            stack: "s1".to_string(),
            service: "api".to_string(),
            labels: BTreeMap::new(),
        }
    }

    fn bucket(name: &str) -> Component {
        Component {
            metadata: meta(name),
            spec: ComponentSpec::Bucket(BucketSpec {
                acl: "private".into(),
                versioning: Versioning::default(),
                expiration_days: None,
            }),
            depends_on: vec![],
        }
    }

    #[test]
    fn bucket_acl_matrix() {
        let mut comp = bucket("uploads");
        assert!(comp.validate().is_ok());
        if let ComponentSpec::Bucket(ref mut s) = comp.spec {
            s.acl = "public-read".into();
        }
        assert!(comp.validate().is_ok());
        if let ComponentSpec::Bucket(ref mut s) = comp.spec {
            s.acl = "world-writable".into();
        }
        assert!(matches!(
            comp.validate(),
            Err(DomainError::InvalidAcl { .. })
        ));
    }

    #[test]
    fn provisioned_table_requires_capacity() {
        let spec = TableSpec {
            hash_key: KeySchema { name: "userId".into(), key_type: "S".into() },
            range_key: None,
            billing_mode: "PROVISIONED".into(),
            read_capacity: Some(5),
            write_capacity: None,
            ttl_attribute: None,
        };
        assert!(matches!(
            spec.validate("sessions"),
            Err(DomainError::MissingProvisionedCapacity { .. })
        ));
    }

    #[test]
    fn table_rejects_bad_key_type() {
        let spec = TableSpec {
            hash_key: KeySchema { name: "userId".into(), key_type: "X".into() },
            range_key: None,
            billing_mode: "PAY_PER_REQUEST".into(),
            read_capacity: None,
            write_capacity: None,
            ttl_attribute: None,
        };
        assert!(matches!(
            spec.validate("sessions"),
            Err(DomainError::InvalidKeyType { .. })
        ));
    }

    #[test]
    fn fifo_queue_gets_suffix() {
        let comp = Component {
            metadata: meta("jobs"),
            spec: ComponentSpec::Queue(QueueSpec {
                fifo: true,
                visibility_timeout_seconds: 30,
                message_retention_seconds: 345_600,
                delay_seconds: 0,
                content_based_deduplication: true,
            }),
            depends_on: vec![],
        };
        assert_eq!(comp.resource_name(), "jobs.fifo");
        assert!(comp.validate().is_ok());
    }

    #[test]
    fn standard_queue_keeps_name() {
        let comp = Component {
            metadata: meta("jobs"),
            spec: ComponentSpec::Queue(QueueSpec {
                fifo: false,
                visibility_timeout_seconds: 30,
                message_retention_seconds: 345_600,
                delay_seconds: 0,
                content_based_deduplication: false,
            }),
            depends_on: vec![],
        };
        assert_eq!(comp.resource_name(), "jobs");
    }

    #[test]
    fn dedup_requires_fifo() {
        let spec = QueueSpec {
            fifo: false,
            visibility_timeout_seconds: 30,
            message_retention_seconds: 345_600,
            delay_seconds: 0,
            content_based_deduplication: true,
        };
        assert!(matches!(
            spec.validate("jobs"),
            Err(DomainError::DeduplicationWithoutFifo { .. })
        ));
    }

    #[test]
    fn database_storage_floor() {
        let spec = DatabaseSpec {
            engine: "postgres".into(),
            engine_version: None,
            instance_class: "db.t3.micro".into(),
            allocated_storage_gb: 10,
            multi_az: false,
            database_name: None,
        };
        assert!(matches!(
            spec.validate("main"),
            Err(DomainError::StorageTooSmall { got: 10, .. })
        ));
    }

    #[test]
    fn service_platform_matrix() {
        for platform in ["fargate", "ec2", "lambda"] {
            let spec = ServiceSpec {
                platform: platform.into(),
                image: "app:latest".into(),
                cpu: 256,
                memory_mb: 512,
                desired_count: 1,
                port: Some(8080),
                environment: BTreeMap::new(),
            };
            assert!(spec.validate("api").is_ok(), "{platform} should be valid");
        }
        let spec = ServiceSpec {
            platform: "kubernetes".into(),
            image: "app:latest".into(),
            cpu: 256,
            memory_mb: 512,
            desired_count: 1,
            port: None,
            environment: BTreeMap::new(),
        };
        assert!(matches!(
            spec.validate("api"),
            Err(DomainError::InvalidPlatform { .. })
        ));
    }

    #[test]
    fn subnet_references_vpc() {
        let comp = Component {
            metadata: meta("private-a"),
            spec: ComponentSpec::Subnet(SubnetSpec {
                vpc: "main".into(),
                cidr_block: "10.0.1.0/24".into(),
                availability_zone: None,
                public: false,
            }),
            depends_on: vec![],
        };
        assert_eq!(comp.referenced_components(), vec!["main"]);
    }

    #[test]
    fn route_table_references_gateways() {
        let comp = Component {
            metadata: meta("public-rt"),
            spec: ComponentSpec::RouteTable(RouteTableSpec {
                vpc: "main".into(),
                routes: vec![RouteSpec {
                    destination_cidr: "0.0.0.0/0".into(),
                    gateway: Some("igw".into()),
                    nat_gateway: None,
                }],
            }),
            depends_on: vec![],
        };
        assert_eq!(comp.referenced_components(), vec!["main", "igw"]);
    }

    #[test]
    fn snapshot_round_trips() {
        let comp = bucket("uploads");
        let snap = comp.to_snapshot();
        let back = Component::from_snapshot(&snap).unwrap();
        assert_eq!(back.kind(), Kind::Bucket);
        assert_eq!(back.metadata.name, "uploads");
        assert_eq!(back, comp);
    }

    #[test]
    fn spec_from_value_dispatches_on_kind() {
        let value = serde_json::json!({
            "hash_key": { "name": "userId", "key_type": "S" },
        });
        let spec = ComponentSpec::from_value(Kind::Table, value).unwrap();
        assert_eq!(spec.kind(), Kind::Table);
        match spec {
            ComponentSpec::Table(t) => {
                assert_eq!(t.billing_mode, "PAY_PER_REQUEST");
                assert_eq!(t.hash_key.name, "userId");
            }
            other => panic!("expected table spec, got {:?}", other.kind()),
        }
    }
}
