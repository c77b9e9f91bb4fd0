// ============================================================================
// Linting
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // Public items should be documented
#![warn(dead_code)]                   // Unused code
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![warn(unused_imports)]              // Unused imports
#![warn(unused_variables)]            // Unused variables
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(clippy::print_stdout)]
#![warn(clippy::todo)]
#![warn(clippy::unimplemented)]
#![warn(clippy::unwrap_in_result)]
#![warn(clippy::redundant_clone)]
#![warn(clippy::too_many_arguments)]
#![warn(clippy::cognitive_complexity)]

// Safety and robustness lints
#![deny(overflowing_literals)]
#![deny(arithmetic_overflow)]

// Tests unwrap freely.
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # ipfs-node-deploy
//!
//! A declarative resource-graph reconciler, shipped with a manifest that
//! deploys a single IPFS node (network, security group, SSH key, instance).
//!
//! ## Overview
//!
//! Resources are declared in `ipfs-deploy.yaml`. Each run:
//!
//! 1. Binds config options and builds a dependency graph from the
//!    references between resources
//! 2. Diffs every resource against its last-applied state record
//! 3. Produces an ordered plan of create, update, delete, and no-op steps
//! 4. Executes independent branches concurrently through a [`provider::Provider`],
//!    committing each resource's record as soon as it is applied
//!
//! ## Modules
//!
//! - [`resource`]: Descriptors, property expressions, typed schemas
//! - [`graph`]: Dependency graph and deterministic ordering
//! - [`provider`]: The cloud boundary and its adapters
//! - [`state`]: State storage backends (local, S3), locking, secrets
//! - [`planner`]: Diff computation, plans, and execution
//! - [`config`]: Manifest parsing, options, and validation
//! - [`reconciler`]: One-stack facade used by the CLI
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! stack:
//!   name: ipfs-node
//!
//! config:
//!   region: { default: us-west-2 }
//!
//! resources:
//!   - name: ipfs-node-vpc
//!     type: vpc
//!     properties:
//!       cidr_block: 10.0.0.0/16
//!   - name: ipfs-node-subnet
//!     type: subnet
//!     properties:
//!       vpc_id: { $ref: ipfs-node-vpc.id }
//!       cidr_block: 10.0.1.0/24
//!       availability_zone: { $concat: [{ $config: region }, "a"] }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod resource;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, Manifest};
pub use error::{DeployError, Result};
pub use graph::ResourceGraph;
pub use planner::{DiffEngine, ExecutionResult, Plan, PlanExecutor, RunStatus};
pub use provider::{HttpProvider, Provider, SimulatedProvider};
pub use reconciler::{Reconciler, RefreshReport, RunReport};
pub use resource::{Property, Reference, ResourceDescriptor, ResourceKind};
pub use state::{DeploymentState, LocalStateStore, S3StateStore, StateStore};
