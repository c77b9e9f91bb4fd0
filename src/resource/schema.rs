//! Typed input schemas for every supported resource kind.
//!
//! Each kind has one input struct. The graph builder deserializes declared
//! inputs into it (with placeholders for pending references), and provider
//! adapters check resolved inputs against it before calling out.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Supported resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Virtual network.
    Vpc,
    /// Subnet inside a virtual network.
    Subnet,
    /// Internet gateway attached to a network.
    InternetGateway,
    /// Route table.
    RouteTable,
    /// Binding of a route table to a subnet.
    RouteTableAssociation,
    /// Firewall rule set.
    SecurityGroup,
    /// Locally generated key material.
    PrivateKey,
    /// Public key registered with the cloud.
    KeyPair,
    /// Machine image lookup (read-only data source).
    AmiLookup,
    /// Virtual machine.
    Instance,
}

/// Declared output of a resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    /// Output key.
    pub name: &'static str,
    /// Encrypted at rest and masked in every rendering.
    pub secret: bool,
    /// Keeps its value across an in-place update.
    pub stable: bool,
}

const fn out(name: &'static str, stable: bool) -> OutputSpec {
    OutputSpec {
        name,
        secret: false,
        stable,
    }
}

const fn secret(name: &'static str) -> OutputSpec {
    OutputSpec {
        name,
        secret: true,
        stable: true,
    }
}

type Tags = BTreeMap<String, String>;

const fn default_true() -> bool {
    true
}

/// Inputs of [`ResourceKind::Vpc`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VpcInputs {
    /// Address range.
    pub cidr_block: String,
    /// Assign DNS hostnames to instances.
    #[serde(default)]
    pub enable_dns_hostnames: bool,
    /// Enable the network's DNS resolver.
    #[serde(default = "default_true")]
    pub enable_dns_support: bool,
    /// Tags.
    #[serde(default)]
    pub tags: Tags,
}

/// Inputs of [`ResourceKind::Subnet`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubnetInputs {
    /// Owning network id.
    pub vpc_id: String,
    /// Address range.
    pub cidr_block: String,
    /// Give launched instances a public address.
    #[serde(default)]
    pub map_public_ip_on_launch: bool,
    /// Availability zone.
    #[serde(default)]
    pub availability_zone: Option<String>,
    /// Tags.
    #[serde(default)]
    pub tags: Tags,
}

/// Inputs of [`ResourceKind::InternetGateway`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InternetGatewayInputs {
    /// Attached network id.
    #[serde(default)]
    pub vpc_id: Option<String>,
    /// Tags.
    #[serde(default)]
    pub tags: Tags,
}

/// A single route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteInputs {
    /// Destination range.
    pub cidr_block: String,
    /// Target gateway id.
    #[serde(default)]
    pub gateway_id: Option<String>,
}

/// Inputs of [`ResourceKind::RouteTable`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteTableInputs {
    /// Owning network id.
    pub vpc_id: String,
    /// Routes.
    #[serde(default)]
    pub routes: Vec<RouteInputs>,
    /// Tags.
    #[serde(default)]
    pub tags: Tags,
}

/// Inputs of [`ResourceKind::RouteTableAssociation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteTableAssociationInputs {
    /// Subnet id.
    pub subnet_id: String,
    /// Route table id.
    pub route_table_id: String,
}

/// One firewall rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityRule {
    /// First port of the range.
    pub from_port: u16,
    /// Last port of the range.
    pub to_port: u16,
    /// `tcp`, `udp`, or `-1` for all.
    pub protocol: String,
    /// Source or destination ranges.
    #[serde(default)]
    pub cidr_blocks: Vec<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Inputs of [`ResourceKind::SecurityGroup`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityGroupInputs {
    /// Owning network id.
    #[serde(default)]
    pub vpc_id: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Inbound rules.
    #[serde(default)]
    pub ingress: Vec<SecurityRule>,
    /// Outbound rules.
    #[serde(default)]
    pub egress: Vec<SecurityRule>,
    /// Tags.
    #[serde(default)]
    pub tags: Tags,
}

/// Key algorithms for [`ResourceKind::PrivateKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyAlgorithm {
    /// RSA.
    Rsa,
    /// ECDSA.
    Ecdsa,
    /// Ed25519.
    Ed25519,
}

/// Inputs of [`ResourceKind::PrivateKey`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrivateKeyInputs {
    /// Algorithm.
    pub algorithm: KeyAlgorithm,
    /// Key size for RSA; the provider's default (2048) when absent.
    #[serde(default)]
    pub rsa_bits: Option<u32>,
}

/// Inputs of [`ResourceKind::KeyPair`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyPairInputs {
    /// Name registered with the cloud.
    #[serde(default)]
    pub key_name: Option<String>,
    /// OpenSSH public key.
    pub public_key: String,
    /// Tags.
    #[serde(default)]
    pub tags: Tags,
}

/// Image filter for [`ResourceKind::AmiLookup`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AmiFilter {
    /// Filter attribute.
    pub name: String,
    /// Accepted values (glob patterns allowed).
    pub values: Vec<String>,
}

/// Inputs of [`ResourceKind::AmiLookup`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AmiLookupInputs {
    /// Pick the newest match.
    #[serde(default)]
    pub most_recent: bool,
    /// Image owner account ids.
    #[serde(default)]
    pub owners: Vec<String>,
    /// Filters.
    #[serde(default)]
    pub filters: Vec<AmiFilter>,
}

/// Root disk of an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RootBlockDevice {
    /// Size in GiB.
    pub volume_size: u32,
    /// Volume type, e.g. `gp3`.
    #[serde(default)]
    pub volume_type: Option<String>,
}

/// Inputs of [`ResourceKind::Instance`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceInputs {
    /// Machine image id.
    pub ami: String,
    /// Instance size.
    pub instance_type: String,
    /// Registered key pair name.
    #[serde(default)]
    pub key_name: Option<String>,
    /// Subnet id.
    #[serde(default)]
    pub subnet_id: Option<String>,
    /// Security group ids.
    #[serde(default)]
    pub vpc_security_group_ids: Vec<String>,
    /// Boot script.
    #[serde(default)]
    pub user_data: Option<String>,
    /// Root disk.
    #[serde(default)]
    pub root_block_device: Option<RootBlockDevice>,
    /// Tags.
    #[serde(default)]
    pub tags: Tags,
}

fn check<T: serde::de::DeserializeOwned>(inputs: Value) -> Result<(), String> {
    serde_json::from_value::<T>(inputs)
        .map(drop)
        .map_err(|e| e.to_string())
}

impl ResourceKind {
    /// Every supported kind.
    pub const ALL: [Self; 10] = [
        Self::Vpc,
        Self::Subnet,
        Self::InternetGateway,
        Self::RouteTable,
        Self::RouteTableAssociation,
        Self::SecurityGroup,
        Self::PrivateKey,
        Self::KeyPair,
        Self::AmiLookup,
        Self::Instance,
    ];

    /// Returns the manifest spelling of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vpc => "vpc",
            Self::Subnet => "subnet",
            Self::InternetGateway => "internet_gateway",
            Self::RouteTable => "route_table",
            Self::RouteTableAssociation => "route_table_association",
            Self::SecurityGroup => "security_group",
            Self::PrivateKey => "private_key",
            Self::KeyPair => "key_pair",
            Self::AmiLookup => "ami_lookup",
            Self::Instance => "instance",
        }
    }

    /// Inputs that force replacement when changed.
    #[must_use]
    pub const fn immutable_fields(self) -> &'static [&'static str] {
        match self {
            Self::Vpc => &["cidr_block"],
            Self::Subnet => &["vpc_id", "cidr_block", "availability_zone"],
            Self::InternetGateway | Self::AmiLookup => &[],
            Self::RouteTable => &["vpc_id"],
            Self::RouteTableAssociation => &["subnet_id"],
            Self::SecurityGroup => &["vpc_id", "description"],
            Self::PrivateKey => &["algorithm", "rsa_bits"],
            Self::KeyPair => &["key_name", "public_key"],
            Self::Instance => &["ami", "key_name", "subnet_id", "user_data", "root_block_device"],
        }
    }

    /// Declared outputs.
    #[must_use]
    pub const fn outputs(self) -> &'static [OutputSpec] {
        const VPC: &[OutputSpec] = &[out("id", true), out("arn", true)];
        const ID_ONLY: &[OutputSpec] = &[out("id", true)];
        const PRIVATE_KEY: &[OutputSpec] = &[
            out("id", true),
            secret("private_key_pem"),
            out("public_key_openssh", true),
            out("public_key_fingerprint_md5", true),
        ];
        const KEY_PAIR: &[OutputSpec] = &[
            out("id", true),
            out("key_name", true),
            out("fingerprint", true),
        ];
        const AMI: &[OutputSpec] = &[out("id", false), out("name", false)];
        const INSTANCE: &[OutputSpec] = &[
            out("id", true),
            out("arn", true),
            out("public_ip", false),
            out("private_ip", false),
            out("public_dns", false),
        ];

        match self {
            Self::Vpc | Self::Subnet | Self::SecurityGroup => VPC,
            Self::InternetGateway | Self::RouteTable | Self::RouteTableAssociation => ID_ONLY,
            Self::PrivateKey => PRIVATE_KEY,
            Self::KeyPair => KEY_PAIR,
            Self::AmiLookup => AMI,
            Self::Instance => INSTANCE,
        }
    }

    /// Looks up an output spec by name.
    #[must_use]
    pub fn output(self, name: &str) -> Option<&'static OutputSpec> {
        self.outputs().iter().find(|o| o.name == name)
    }

    /// Returns true if the output is declared secret.
    #[must_use]
    pub fn is_secret_output(self, name: &str) -> bool {
        self.output(name).is_some_and(|o| o.secret)
    }

    /// Data sources are read, never created or destroyed in the cloud.
    #[must_use]
    pub const fn is_data_source(self) -> bool {
        matches!(self, Self::AmiLookup)
    }

    /// Checks inputs against the kind's typed input struct.
    ///
    /// # Errors
    ///
    /// Returns a description of the first mismatch.
    pub fn check_inputs(self, inputs: Value) -> Result<(), String> {
        match self {
            Self::Vpc => check::<VpcInputs>(inputs),
            Self::Subnet => check::<SubnetInputs>(inputs),
            Self::InternetGateway => check::<InternetGatewayInputs>(inputs),
            Self::RouteTable => check::<RouteTableInputs>(inputs),
            Self::RouteTableAssociation => check::<RouteTableAssociationInputs>(inputs),
            Self::SecurityGroup => check::<SecurityGroupInputs>(inputs),
            Self::PrivateKey => check::<PrivateKeyInputs>(inputs),
            Self::KeyPair => check::<KeyPairInputs>(inputs),
            Self::AmiLookup => check::<AmiLookupInputs>(inputs),
            Self::Instance => check::<InstanceInputs>(inputs),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_every_kind_exposes_id() {
        for kind in ResourceKind::ALL {
            assert!(kind.output("id").is_some(), "{kind} has no id output");
        }
    }

    #[test]
    fn test_private_key_pem_is_secret() {
        assert!(ResourceKind::PrivateKey.is_secret_output("private_key_pem"));
        assert!(!ResourceKind::PrivateKey.is_secret_output("public_key_openssh"));
    }

    #[test]
    fn test_check_inputs_accepts_valid_instance() {
        let inputs = json!({
            "ami": "ami-123",
            "instance_type": "m5.large",
            "subnet_id": "<pending:subnet.id>",
            "vpc_security_group_ids": ["<pending:sg.id>"],
            "root_block_device": {"volume_size": 50, "volume_type": "gp3"},
        });
        assert!(ResourceKind::Instance.check_inputs(inputs).is_ok());
    }

    #[test]
    fn test_check_inputs_rejects_unknown_field() {
        let inputs = json!({"cidr_block": "10.0.0.0/16", "colour": "blue"});
        assert!(ResourceKind::Vpc.check_inputs(inputs).is_err());
    }

    #[test]
    fn test_check_inputs_rejects_wrong_type() {
        let inputs = json!({
            "ingress": [{"from_port": "twenty-two", "to_port": 22, "protocol": "tcp"}]
        });
        assert!(ResourceKind::SecurityGroup.check_inputs(inputs).is_err());
    }

    #[test]
    fn test_kind_round_trips_through_serde() {
        let kind: ResourceKind = serde_json::from_value(json!("route_table_association")).unwrap();
        assert_eq!(kind, ResourceKind::RouteTableAssociation);
        assert_eq!(kind.to_string(), "route_table_association");
    }
}
