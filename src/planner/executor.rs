//! Plan executor.
//!
//! Operations run as soon as everything they depend on has succeeded, with at
//! most `parallelism` in flight. Each finished operation is committed to the
//! state store on its own, so an interrupted run leaves state describing
//! exactly what was applied. A failure skips everything downstream of it and
//! lets unrelated branches continue. Nothing is rolled back.

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{DeployError, ExecError, Result, StateError};
use crate::provider::{Provider, RetryPolicy};
use crate::resource::{InputMap, Outputs, Reference, ResourceKind};
use crate::state::{SecretsManager, StateRecord, StateStore, StoredValue};

use super::plan::{Action, Plan, PlanOperation};

/// Default number of operations in flight.
pub const DEFAULT_PARALLELISM: usize = 10;

/// Execution settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Maximum operations in flight.
    pub parallelism: usize,
    /// Stop scheduling after this long.
    pub timeout: Option<Duration>,
    /// Retry policy for provider calls.
    pub retry: RetryPolicy,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// How a single operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// Applied and committed.
    Succeeded,
    /// Attempted and failed.
    Failed(String),
    /// Never attempted.
    Skipped(String),
}

/// Result of executing a single operation.
#[derive(Debug, Clone)]
pub struct OperationResult {
    /// Operation index.
    pub index: usize,
    /// Resource name.
    pub resource: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Action.
    pub action: Action,
    /// Outcome.
    pub outcome: OperationOutcome,
    /// Provider calls made.
    pub attempts: u32,
    /// Wall time.
    pub duration: Duration,
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every operation succeeded.
    Success,
    /// At least one operation failed or was skipped after a failure.
    PartialFailure,
    /// Cancellation or timeout stopped scheduling.
    Cancelled,
}

/// Result of executing a plan.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Per-operation results in plan order.
    pub results: Vec<OperationResult>,
    /// Overall status.
    pub status: RunStatus,
    /// Outputs of every resource that exists after the run.
    pub outputs: BTreeMap<String, Outputs>,
    /// Wall time of the whole run.
    pub duration: Duration,
}

/// Resolved inputs for a create or update.
struct Prepared {
    inputs: InputMap,
    sensitive: BTreeSet<String>,
}

struct Completion {
    index: usize,
    result: std::result::Result<Option<Outputs>, String>,
    attempts: u32,
    duration: Duration,
}

/// Book-keeping for dependency counting.
struct Schedule {
    waiting: Vec<usize>,
    dependents: Vec<Vec<usize>>,
    results: Vec<Option<OperationResult>>,
    ready: BTreeSet<usize>,
}

impl Schedule {
    fn new(plan: &Plan) -> Self {
        let count = plan.operations.len();
        let mut dependents = vec![Vec::new(); count];
        for op in &plan.operations {
            for &dep in &op.depends_on {
                dependents[dep].push(op.index);
            }
        }
        let waiting: Vec<usize> = plan.operations.iter().map(|op| op.depends_on.len()).collect();
        let ready = waiting
            .iter()
            .enumerate()
            .filter(|(_, w)| **w == 0)
            .map(|(i, _)| i)
            .collect();

        Self {
            waiting,
            dependents,
            results: (0..count).map(|_| None).collect(),
            ready,
        }
    }

    fn record(&mut self, op: &PlanOperation, outcome: OperationOutcome, attempts: u32, duration: Duration) {
        self.results[op.index] = Some(OperationResult {
            index: op.index,
            resource: op.resource.clone(),
            kind: op.kind,
            action: op.action,
            outcome,
            attempts,
            duration,
        });
    }

    fn succeed(&mut self, op: &PlanOperation, attempts: u32, duration: Duration) {
        self.record(op, OperationOutcome::Succeeded, attempts, duration);
        for &dependent in &self.dependents[op.index] {
            self.waiting[dependent] -= 1;
            if self.waiting[dependent] == 0 && self.results[dependent].is_none() {
                self.ready.insert(dependent);
            }
        }
    }

    /// Records a failure and skips everything downstream of it.
    fn fail(&mut self, plan: &Plan, op: &PlanOperation, message: String, attempts: u32, duration: Duration) {
        self.record(op, OperationOutcome::Failed(message), attempts, duration);

        let mut stack = self.dependents[op.index].clone();
        while let Some(index) = stack.pop() {
            if self.results[index].is_some() {
                continue;
            }
            let dependent = &plan.operations[index];
            warn!("Skipping {}: dependency '{}' failed", dependent.description(), op.resource);
            self.ready.remove(&index);
            self.record(
                dependent,
                OperationOutcome::Skipped(format!("dependency '{}' failed", op.resource)),
                0,
                Duration::ZERO,
            );
            stack.extend(self.dependents[index].iter().copied());
        }
    }
}

/// Executor for plans.
pub struct PlanExecutor<'a> {
    provider: &'a dyn Provider,
    store: &'a dyn StateStore,
    secrets: &'a SecretsManager,
    options: ExecutorOptions,
    cancel: CancellationToken,
}

impl<'a> PlanExecutor<'a> {
    /// Creates a new plan executor.
    #[must_use]
    pub fn new(provider: &'a dyn Provider, store: &'a dyn StateStore, secrets: &'a SecretsManager) -> Self {
        Self {
            provider,
            store,
            secrets,
            options: ExecutorOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Sets execution options.
    #[must_use]
    pub const fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    /// Uses `cancel` to stop scheduling new operations.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Executes a plan.
    ///
    /// # Errors
    ///
    /// Returns an error only if the plan is malformed; operation failures are
    /// reported in the result.
    pub async fn execute(&self, plan: &Plan) -> std::result::Result<ExecutionResult, ExecError> {
        Self::validate(plan)?;

        let started = Instant::now();
        let parallelism = self.options.parallelism.max(1);
        info!(
            "Executing plan with {} operations (parallelism {parallelism})",
            plan.operations.len()
        );

        let cancel = self.cancel.child_token();
        let timer = self.options.timeout.map(|timeout| {
            let token = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!("Timed out after {timeout:?}; no new operations will start");
                token.cancel();
            })
        });

        let mut schedule = Schedule::new(plan);
        let mut outputs: BTreeMap<String, Outputs> = BTreeMap::new();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < parallelism && !cancel.is_cancelled() {
                let Some(index) = schedule.ready.pop_first() else {
                    break;
                };
                let op = &plan.operations[index];
                match self.prepare(op, &outputs) {
                    Ok(prepared) => in_flight.push(self.run(op, prepared, &cancel)),
                    Err(message) => {
                        error!("{} failed: {message}", op.description());
                        schedule.fail(plan, op, message, 0, Duration::ZERO);
                    }
                }
            }

            let Some(done) = in_flight.next().await else {
                break;
            };
            let op = &plan.operations[done.index];
            match done.result {
                Ok(new_outputs) => {
                    match new_outputs {
                        Some(values) => {
                            outputs.insert(op.resource.clone(), values);
                        }
                        None => {
                            outputs.remove(&op.resource);
                        }
                    }
                    schedule.succeed(op, done.attempts, done.duration);
                }
                Err(message) => {
                    error!("{} failed: {message}", op.description());
                    schedule.fail(plan, op, message, done.attempts, done.duration);
                }
            }
        }

        if let Some(timer) = timer {
            timer.abort();
        }

        let mut cancelled = false;
        let results: Vec<OperationResult> = plan
            .operations
            .iter()
            .zip(schedule.results)
            .map(|(op, result)| {
                result.unwrap_or_else(|| {
                    cancelled = true;
                    OperationResult {
                        index: op.index,
                        resource: op.resource.clone(),
                        kind: op.kind,
                        action: op.action,
                        outcome: OperationOutcome::Skipped(String::from("cancelled")),
                        attempts: 0,
                        duration: Duration::ZERO,
                    }
                })
            })
            .collect();

        let status = if cancelled {
            RunStatus::Cancelled
        } else if results.iter().all(|r| r.outcome == OperationOutcome::Succeeded) {
            RunStatus::Success
        } else {
            RunStatus::PartialFailure
        };

        let result = ExecutionResult {
            results,
            status,
            outputs,
            duration: started.elapsed(),
        };
        info!("{result}");
        Ok(result)
    }

    /// Checks that every dependency points at an earlier operation.
    fn validate(plan: &Plan) -> std::result::Result<(), ExecError> {
        for (position, op) in plan.operations.iter().enumerate() {
            if op.index != position {
                return Err(ExecError::MalformedPlan {
                    message: format!("operation at {position} is numbered {}", op.index),
                });
            }
            if let Some(dep) = op.depends_on.iter().find(|d| **d >= position) {
                return Err(ExecError::MalformedPlan {
                    message: format!("operation {position} depends on later operation {dep}"),
                });
            }
            let needs_desired = matches!(op.action, Action::Create | Action::Update | Action::NoOp);
            if needs_desired && op.desired.is_none() {
                return Err(ExecError::MalformedPlan {
                    message: format!("{} has no declaration", op.description()),
                });
            }
            let needs_prior = matches!(op.action, Action::Update | Action::Delete | Action::NoOp);
            if needs_prior && op.prior.is_none() {
                return Err(ExecError::MalformedPlan {
                    message: format!("{} has no recorded state", op.description()),
                });
            }
        }
        Ok(())
    }

    /// Resolves inputs against outputs produced so far.
    fn prepare(&self, op: &PlanOperation, outputs: &BTreeMap<String, Outputs>) -> std::result::Result<Prepared, String> {
        let Some(desired) = op.desired.as_ref().filter(|_| matches!(op.action, Action::Create | Action::Update)) else {
            return Ok(Prepared {
                inputs: InputMap::new(),
                sensitive: BTreeSet::new(),
            });
        };

        let lookup = |r: &Reference| {
            outputs
                .get(&r.resource)
                .and_then(|o| o.get(&r.output))
                .map(|o| o.value.clone())
        };
        let inputs = desired.resolve_inputs(&lookup).map_err(|reference| {
            ExecError::Unresolved {
                resource: op.resource.clone(),
                reference: reference.to_string(),
            }
            .to_string()
        })?;

        let object: serde_json::Map<String, Value> = inputs.clone().into_iter().collect();
        op.kind
            .check_inputs(Value::Object(object))
            .map_err(|e| format!("invalid inputs: {e}"))?;

        let is_secret = |r: &Reference| {
            outputs
                .get(&r.resource)
                .and_then(|o| o.get(&r.output))
                .is_some_and(|o| o.secret)
        };
        let sensitive = desired.sensitive_fields(&is_secret);

        let stores_secrets = op.kind.outputs().iter().any(|o| o.secret) || !sensitive.is_empty();
        if stores_secrets && !self.secrets.is_unlocked() {
            return Err(StateError::SecretsLocked.to_string());
        }

        Ok(Prepared { inputs, sensitive })
    }

    async fn run(&self, op: &PlanOperation, prepared: Prepared, cancel: &CancellationToken) -> Completion {
        let started = Instant::now();
        let label = format!("{} {}", op.action, op.resource);

        let (result, attempts) = match op.action {
            Action::NoOp => (self.keep(op).await, 0),
            Action::Delete => self.delete(op, &label, cancel).await,
            Action::Create | Action::Update => self.apply(op, prepared, &label, cancel).await,
        };

        if result.is_ok() {
            debug!("{} done in {}ms", op.description(), started.elapsed().as_millis());
        }
        Completion {
            index: op.index,
            result,
            attempts,
            duration: started.elapsed(),
        }
    }

    async fn apply(
        &self,
        op: &PlanOperation,
        prepared: Prepared,
        label: &str,
        cancel: &CancellationToken,
    ) -> (std::result::Result<Option<Outputs>, String>, u32) {
        let Prepared { inputs, sensitive } = prepared;
        info!("{}", op.description());

        let (result, attempts) = match (op.action, op.prior.as_ref()) {
            (Action::Update, Some(prior)) => {
                self.options
                    .retry
                    .run(label, cancel, || self.provider.update(op.kind, &prior.id, &prior.inputs, &inputs))
                    .await
            }
            _ => {
                self.options
                    .retry
                    .run(label, cancel, || self.provider.create(op.kind, &op.resource, &inputs))
                    .await
            }
        };

        let resource = match result {
            Ok(resource) => resource,
            Err(e) => return (Err(e.to_string()), attempts),
        };

        let id = resource.id.clone();
        let outputs = resource.into_outputs(op.kind);
        match self.commit(op, id, &inputs, &sensitive, &outputs).await {
            Ok(()) => (Ok(Some(outputs)), attempts),
            Err(e) => (Err(format!("applied but not recorded: {e}")), attempts),
        }
    }

    async fn delete(
        &self,
        op: &PlanOperation,
        label: &str,
        cancel: &CancellationToken,
    ) -> (std::result::Result<Option<Outputs>, String>, u32) {
        let Some(prior) = op.prior.as_ref() else {
            return (Err(String::from("no recorded state")), 0);
        };
        info!("{}", op.description());

        let attempts = if prior.kind.is_data_source() {
            0
        } else {
            let (result, attempts) = self
                .options
                .retry
                .run(label, cancel, || self.provider.delete(prior.kind, &prior.id))
                .await;
            if let Err(e) = result {
                return (Err(e.to_string()), attempts);
            }
            attempts
        };

        match self.store.remove_record(&op.resource).await {
            Ok(()) => (Ok(None), attempts),
            Err(e) => (Err(format!("deleted but not recorded: {e}")), attempts),
        }
    }

    /// Carries prior outputs forward, refreshing recorded dependencies if
    /// only `depends_on` changed.
    async fn keep(&self, op: &PlanOperation) -> std::result::Result<Option<Outputs>, String> {
        let (Some(prior), Some(desired)) = (op.prior.as_ref(), op.desired.as_ref()) else {
            return Err(String::from("no recorded state"));
        };

        let dependencies: Vec<String> = desired.dependency_names().into_iter().collect();
        let mut recorded = prior.dependencies.clone();
        recorded.sort();
        if recorded != dependencies {
            debug!("Refreshing recorded dependencies of {}", op.resource);
            let refreshed = async {
                if let Some(mut record) = self.store.load_record(&op.resource).await? {
                    record.dependencies = dependencies;
                    record.updated_at = Utc::now();
                    self.store.put_record(&record).await?;
                }
                Ok::<(), DeployError>(())
            };
            refreshed.await.map_err(|e| e.to_string())?;
        }

        Ok(Some(prior.outputs.clone()))
    }

    async fn commit(
        &self,
        op: &PlanOperation,
        id: String,
        inputs: &InputMap,
        sensitive: &BTreeSet<String>,
        outputs: &Outputs,
    ) -> Result<()> {
        let now = Utc::now();
        let prior = op.prior.as_ref().filter(|p| p.kind == op.kind);

        let stored_inputs = inputs
            .iter()
            .map(|(key, value)| {
                let stored = if sensitive.contains(key) {
                    self.secrets.seal(value)?
                } else {
                    StoredValue::Plain(value.clone())
                };
                Ok((key.clone(), stored))
            })
            .collect::<std::result::Result<_, StateError>>()?;
        let stored_outputs = outputs
            .iter()
            .map(|(key, value)| self.secrets.store(value).map(|s| (key.clone(), s)))
            .collect::<std::result::Result<_, StateError>>()?;

        let record = StateRecord {
            name: op.resource.clone(),
            kind: op.kind,
            id,
            inputs: stored_inputs,
            outputs: stored_outputs,
            dependencies: op
                .desired
                .as_ref()
                .map(|d| d.dependency_names().into_iter().collect())
                .unwrap_or_default(),
            serial: prior.map_or(0, |p| p.serial) + 1,
            created_at: match (op.action, prior) {
                (Action::Update, Some(p)) => p.created_at,
                _ => now,
            },
            updated_at: now,
        };
        self.store.put_record(&record).await
    }
}

impl ExecutionResult {
    fn count(&self, pred: impl Fn(&OperationOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }

    /// Number of operations that succeeded.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.count(|o| *o == OperationOutcome::Succeeded)
    }

    /// Number of operations that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, OperationOutcome::Failed(_)))
    }

    /// Number of operations that never ran.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, OperationOutcome::Skipped(_)))
    }

    /// Returns true if all operations succeeded.
    #[must_use]
    pub fn all_successful(&self) -> bool {
        self.status == RunStatus::Success
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::PartialFailure => write!(f, "partial failure"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "ok"),
            Self::Failed(message) => write!(f, "failed: {message}"),
            Self::Skipped(reason) => write!(f, "skipped: {reason}"),
        }
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Executed {} operations ({}): {} successful, {} failed, {} skipped",
            self.results.len(),
            self.status,
            self.succeeded(),
            self.failed(),
            self.skipped()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ResourceGraph;
    use crate::planner::DiffEngine;
    use crate::provider::SimulatedProvider;
    use crate::resource::ResourceDescriptor;
    use crate::state::{KnownState, LocalStateStore};
    use tempfile::TempDir;

    fn network() -> ResourceGraph {
        ResourceGraph::build(vec![
            ResourceDescriptor::new("vpc", ResourceKind::Vpc).with_property("cidr_block", "10.0.0.0/16"),
            ResourceDescriptor::new("subnet", ResourceKind::Subnet)
                .with_ref("vpc_id", "vpc", "id")
                .with_property("cidr_block", "10.0.1.0/24"),
            ResourceDescriptor::new("igw", ResourceKind::InternetGateway),
        ])
        .expect("valid graph")
    }

    fn plan(provider: &SimulatedProvider, graph: &ResourceGraph) -> Plan {
        let known = KnownState::empty();
        let diffs = DiffEngine::new(provider).compute(graph, &known).expect("diff");
        Plan::build(diffs, graph, &known, "hash").expect("plan")
    }

    fn outcome<'r>(result: &'r ExecutionResult, name: &str) -> &'r OperationOutcome {
        &result
            .results
            .iter()
            .find(|r| r.resource == name)
            .expect("operation present")
            .outcome
    }

    fn fast() -> ExecutorOptions {
        ExecutorOptions {
            retry: RetryPolicy::immediate(3),
            ..ExecutorOptions::default()
        }
    }

    /// `vpc` and `igw`, then two subnets of `vpc`.
    fn two_levels() -> ResourceGraph {
        ResourceGraph::build(vec![
            ResourceDescriptor::new("vpc", ResourceKind::Vpc).with_property("cidr_block", "10.0.0.0/16"),
            ResourceDescriptor::new("igw", ResourceKind::InternetGateway),
            ResourceDescriptor::new("subnet-a", ResourceKind::Subnet)
                .with_ref("vpc_id", "vpc", "id")
                .with_property("cidr_block", "10.0.1.0/24"),
            ResourceDescriptor::new("subnet-b", ResourceKind::Subnet)
                .with_ref("vpc_id", "vpc", "id")
                .with_property("cidr_block", "10.0.2.0/24"),
        ])
        .expect("valid graph")
    }

    const LATENCY: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn test_creates_commit_records_and_outputs() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = SimulatedProvider::new();
        let secrets = SecretsManager::locked();
        let graph = network();

        let result = PlanExecutor::new(&provider, &store, &secrets)
            .with_options(fast())
            .execute(&plan(&provider, &graph))
            .await
            .expect("execute");

        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.succeeded(), 3);
        assert_eq!(store.list_records().await.expect("list").len(), 3);

        let subnet = store.load_record("subnet").await.expect("load").expect("record");
        let vpc_id = &result.outputs["vpc"]["id"].value;
        assert_eq!(subnet.inputs["vpc_id"], StoredValue::Plain(vpc_id.clone()));
        assert_eq!(subnet.dependencies, vec![String::from("vpc")]);
        assert_eq!(subnet.serial, 1);
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_only() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = SimulatedProvider::new();
        provider.fail_on("vpc");
        let secrets = SecretsManager::locked();
        let graph = network();

        let result = PlanExecutor::new(&provider, &store, &secrets)
            .with_options(fast())
            .execute(&plan(&provider, &graph))
            .await
            .expect("execute");

        assert_eq!(result.status, RunStatus::PartialFailure);
        assert!(matches!(outcome(&result, "vpc"), OperationOutcome::Failed(_)));
        assert!(matches!(outcome(&result, "subnet"), OperationOutcome::Skipped(_)));
        assert_eq!(outcome(&result, "igw"), &OperationOutcome::Succeeded);
        assert_eq!(store.list_records().await.expect("list"), vec![String::from("igw")]);
        assert!(!provider.calls().iter().any(|c| c.contains("subnet")));
    }

    #[tokio::test]
    async fn test_throttling_is_retried() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = SimulatedProvider::new();
        provider.throttle("igw", 2);
        let secrets = SecretsManager::locked();
        let graph = network();

        let result = PlanExecutor::new(&provider, &store, &secrets)
            .with_options(fast())
            .execute(&plan(&provider, &graph))
            .await
            .expect("execute");

        assert_eq!(result.status, RunStatus::Success);
        let igw = result.results.iter().find(|r| r.resource == "igw").expect("igw");
        assert_eq!(igw.attempts, 3);
    }

    #[tokio::test]
    async fn test_independent_operations_run_concurrently() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = SimulatedProvider::new().with_latency(LATENCY);
        let secrets = SecretsManager::locked();
        let plan = plan(&provider, &two_levels());

        let started = Instant::now();
        let result = PlanExecutor::new(&provider, &store, &secrets)
            .with_options(fast())
            .execute(&plan)
            .await
            .expect("execute");
        let elapsed = started.elapsed();

        assert_eq!(result.status, RunStatus::Success);
        assert!(elapsed >= LATENCY * 2, "{elapsed:?}");
        assert!(elapsed < LATENCY * 4, "levels did not overlap: {elapsed:?}");
    }

    #[tokio::test]
    async fn test_parallelism_limits_operations_in_flight() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = SimulatedProvider::new().with_latency(LATENCY);
        let secrets = SecretsManager::locked();
        let plan = plan(&provider, &two_levels());

        let started = Instant::now();
        let result = PlanExecutor::new(&provider, &store, &secrets)
            .with_options(ExecutorOptions {
                parallelism: 1,
                ..fast()
            })
            .execute(&plan)
            .await
            .expect("execute");

        assert_eq!(result.status, RunStatus::Success);
        assert!(started.elapsed() >= LATENCY * 4, "{:?}", started.elapsed());
    }

    #[tokio::test]
    async fn test_timeout_lets_in_flight_calls_finish() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = SimulatedProvider::new().with_latency(LATENCY);
        let secrets = SecretsManager::locked();
        let plan = plan(&provider, &two_levels());

        let result = PlanExecutor::new(&provider, &store, &secrets)
            .with_options(ExecutorOptions {
                timeout: Some(LATENCY / 2),
                ..fast()
            })
            .execute(&plan)
            .await
            .expect("execute");

        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(outcome(&result, "vpc"), &OperationOutcome::Succeeded);
        assert_eq!(outcome(&result, "igw"), &OperationOutcome::Succeeded);
        for name in ["subnet-a", "subnet-b"] {
            assert_eq!(
                outcome(&result, name),
                &OperationOutcome::Skipped(String::from("cancelled"))
            );
        }
        assert_eq!(
            store.list_records().await.expect("list"),
            vec![String::from("igw"), String::from("vpc")]
        );
        assert!(!provider.calls().iter().any(|c| c.contains("subnet")));
    }

    #[tokio::test]
    async fn test_cancelled_run_starts_nothing() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = SimulatedProvider::new();
        let secrets = SecretsManager::locked();
        let graph = network();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = PlanExecutor::new(&provider, &store, &secrets)
            .with_cancellation(cancel)
            .execute(&plan(&provider, &graph))
            .await
            .expect("execute");

        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(result.skipped(), 3);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_secret_outputs_need_unlocked_secrets() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = SimulatedProvider::new();
        let secrets = SecretsManager::locked();
        let graph = ResourceGraph::build(vec![
            ResourceDescriptor::new("key", ResourceKind::PrivateKey).with_property("algorithm", "RSA"),
        ])
        .expect("valid graph");

        let result = PlanExecutor::new(&provider, &store, &secrets)
            .execute(&plan(&provider, &graph))
            .await
            .expect("execute");

        assert!(matches!(outcome(&result, "key"), OperationOutcome::Failed(_)));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_secret_outputs_are_sealed_at_rest() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = SimulatedProvider::new();
        let salt = SecretsManager::generate_salt();
        let secrets = SecretsManager::from_passphrase("correct horse", &salt).expect("key");
        let graph = ResourceGraph::build(vec![
            ResourceDescriptor::new("key", ResourceKind::PrivateKey).with_property("algorithm", "RSA"),
        ])
        .expect("valid graph");

        let result = PlanExecutor::new(&provider, &store, &secrets)
            .execute(&plan(&provider, &graph))
            .await
            .expect("execute");
        assert!(result.all_successful());

        let record = store.load_record("key").await.expect("load").expect("record");
        assert!(record.outputs["private_key_pem"].is_secret());
        assert!(!record.outputs["public_key_openssh"].is_secret());
        let raw = std::fs::read_to_string(dir.path().join("resources").join("key.json")).expect("read");
        assert!(!raw.contains("BEGIN PRIVATE KEY"));
    }

    #[tokio::test]
    async fn test_malformed_plan_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = SimulatedProvider::new();
        let secrets = SecretsManager::locked();
        let graph = network();
        let mut bad = plan(&provider, &graph);
        bad.operations[0].depends_on.push(2);

        let err = PlanExecutor::new(&provider, &store, &secrets)
            .execute(&bad)
            .await
            .expect_err("malformed");
        assert!(matches!(err, ExecError::MalformedPlan { .. }));
    }
}
