//! Resource declarations.
//!
//! This module holds the leaf data model of the engine:
//! - Property values and deferred references between resources
//! - Typed input and output schemas per resource kind
//! - Resource descriptors as authored in the manifest

mod descriptor;
mod schema;
mod value;

pub use descriptor::ResourceDescriptor;
pub use schema::{
    AmiFilter, AmiLookupInputs, InstanceInputs, InternetGatewayInputs, KeyAlgorithm,
    KeyPairInputs, OutputSpec, PrivateKeyInputs, ResourceKind, RootBlockDevice,
    RouteInputs, RouteTableAssociationInputs, RouteTableInputs, SecurityGroupInputs,
    SecurityRule, SubnetInputs, VpcInputs,
};
pub use value::{
    InputMap, OutputValue, Outputs, PlannedInputs, PlannedValue, Property, Reference,
    SECRET_MASK,
};
