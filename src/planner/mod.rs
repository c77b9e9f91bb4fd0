//! Planning and execution.
//!
//! [`DiffEngine`] compares declarations with recorded state, [`Plan`] turns
//! the per-resource decisions into an ordered list of operations, and
//! [`PlanExecutor`] applies that list against a provider.

mod diff;
mod executor;
mod plan;

pub use diff::{Decision, DiffEngine, ResourceDiff};
pub use executor::{
    ExecutionResult, ExecutorOptions, OperationOutcome, OperationResult, PlanExecutor, RunStatus,
    DEFAULT_PARALLELISM,
};
pub use plan::{Action, Plan, PlanOperation};
