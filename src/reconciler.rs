//! Reconciler for maintaining desired state.
//!
//! This module ties the engine together for one stack: it binds the manifest
//! to config options, builds the resource graph, opens recorded state, and
//! drives the planner and executor. Every CLI command that touches state goes
//! through [`Reconciler`].

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigHasher, Manifest};
use crate::error::{PlanError, Result, StateError};
use crate::graph::ResourceGraph;
use crate::planner::{
    Action, DiffEngine, ExecutionResult, ExecutorOptions, OperationOutcome, Plan, PlanExecutor, RunStatus,
};
use crate::provider::Provider;
use crate::resource::{OutputValue, Outputs, Property};
use crate::state::{
    generate_holder_id, DeploymentState, HistoryEntry, KnownState, RunOperation, SecretsManager,
    StateHeader, StateRecord, StateStore, StoredValue,
};

/// Reconciler for one stack.
pub struct Reconciler<'a> {
    /// Parsed manifest.
    manifest: &'a Manifest,
    /// Resolved config option values.
    options: BTreeMap<String, Value>,
    /// Cloud boundary.
    provider: &'a dyn Provider,
    /// State store.
    store: &'a dyn StateStore,
    /// Executor settings.
    executor_options: ExecutorOptions,
    /// Stops scheduling when cancelled.
    cancel: CancellationToken,
    /// Configuration hasher.
    hasher: ConfigHasher,
}

/// Recorded state with secrets opened.
struct Loaded {
    state: DeploymentState,
    known: KnownState,
    secrets: SecretsManager,
}

/// Result of `up` or `destroy`.
#[derive(Debug)]
pub struct RunReport {
    /// The plan that was executed.
    pub plan: Plan,
    /// Per-operation outcomes.
    pub execution: ExecutionResult,
    /// Stack outputs after the run.
    pub outputs: Outputs,
}

/// Result of a refresh.
#[derive(Debug, Default, serde::Serialize)]
pub struct RefreshReport {
    /// Records whose outputs matched the provider.
    pub unchanged: Vec<String>,
    /// Records whose outputs were rewritten.
    pub updated: Vec<String>,
    /// Records dropped because the resource no longer exists.
    pub removed: Vec<String>,
    /// Records that could not be read.
    pub errors: Vec<String>,
}

impl<'a> Reconciler<'a> {
    /// Creates a new reconciler.
    #[must_use]
    pub fn new(
        manifest: &'a Manifest,
        options: BTreeMap<String, Value>,
        provider: &'a dyn Provider,
        store: &'a dyn StateStore,
    ) -> Self {
        let executor_options = ExecutorOptions {
            parallelism: manifest
                .provider
                .parallelism
                .unwrap_or(crate::planner::DEFAULT_PARALLELISM),
            timeout: manifest.provider.timeout_secs.map(Duration::from_secs),
            retry: manifest.provider.retry.policy(),
        };
        Self {
            manifest,
            options,
            provider,
            store,
            executor_options,
            cancel: CancellationToken::new(),
            hasher: ConfigHasher::new(),
        }
    }

    /// Sets executor options.
    #[must_use]
    pub const fn with_executor_options(mut self, options: ExecutorOptions) -> Self {
        self.executor_options = options;
        self
    }

    /// Uses `cancel` to stop scheduling new operations.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the executor options in effect.
    #[must_use]
    pub const fn executor_options(&self) -> &ExecutorOptions {
        &self.executor_options
    }

    /// Hash of the desired state.
    #[must_use]
    pub fn config_hash(&self) -> String {
        self.hasher.hash_config(self.manifest, &self.options)
    }

    /// Builds the resource graph from the manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if an expression is malformed or the graph is invalid.
    pub fn graph(&self) -> Result<ResourceGraph> {
        let descriptors = self.manifest.descriptors(&self.options)?;
        Ok(ResourceGraph::build(descriptors)?)
    }

    /// Computes the plan without applying it.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is invalid, state cannot be read, or a
    /// diff fails.
    pub async fn preview(&self) -> Result<Plan> {
        info!(
            "Planning {}/{}",
            self.manifest.stack.name, self.manifest.stack.environment
        );
        let graph = self.graph()?;
        let loaded = self.load().await?;
        self.plan(&graph, &loaded.known)
    }

    /// Plans and applies the manifest.
    ///
    /// # Errors
    ///
    /// Returns an error for plan-time failures (cycles, unknown references,
    /// state or lock problems). Operation failures are reported in the result.
    pub async fn up(&self) -> Result<RunReport> {
        info!(
            "Starting update of {}/{}",
            self.manifest.stack.name, self.manifest.stack.environment
        );
        let graph = self.graph()?;
        let outputs = self.manifest.output_properties(&self.options)?;
        self.locked(self.apply(&graph, &outputs, None)).await
    }

    /// Applies the manifest only if planning under the lock reproduces
    /// `approved`, the plan shown to the user.
    ///
    /// # Errors
    ///
    /// Same as [`Reconciler::up`], plus [`PlanError::Stale`] when state or
    /// the manifest changed since `approved` was computed. Nothing is applied
    /// in that case.
    pub async fn up_approved(&self, approved: &Plan) -> Result<RunReport> {
        info!(
            "Starting approved update of {}/{}",
            self.manifest.stack.name, self.manifest.stack.environment
        );
        let graph = self.graph()?;
        let outputs = self.manifest.output_properties(&self.options)?;
        self.locked(self.apply(&graph, &outputs, Some(approved))).await
    }

    async fn apply(
        &self,
        graph: &ResourceGraph,
        outputs: &BTreeMap<String, Property>,
        approved: Option<&Plan>,
    ) -> Result<RunReport> {
        let mut loaded = self.load().await?;
        let plan = self.plan(graph, &loaded.known)?;

        if let Some(message) = approved.and_then(|approved| approved.divergence(&plan)) {
            warn!("Refusing to apply: {message}");
            return Err(PlanError::Stale { message }.into());
        }

        if !loaded.secrets.is_unlocked() && needs_secrets(&plan, graph, outputs) {
            return Err(StateError::SecretsLocked.into());
        }

        // The salt has to be durable before anything is sealed with it.
        self.store.save_header(&loaded.state.header).await?;

        let execution = self.execute(&plan, &loaded.secrets).await?;
        let live = live_outputs(&execution, &loaded.known);
        let resolved = resolve_outputs(outputs, &live);

        let header = &mut loaded.state.header;
        header.outputs = resolved
            .iter()
            .map(|(name, value)| loaded.secrets.store(value).map(|v| (name.clone(), v)))
            .collect::<std::result::Result<_, StateError>>()?;
        self.finish(header, RunOperation::Up, &plan.config_hash, &execution);
        self.store.save_header(header).await?;

        Ok(RunReport {
            plan,
            execution,
            outputs: resolved,
        })
    }

    /// Deletes every recorded resource.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be read or the lock is held elsewhere.
    pub async fn destroy(&self) -> Result<RunReport> {
        info!(
            "Destroying {}/{}",
            self.manifest.stack.name, self.manifest.stack.environment
        );
        self.locked(self.teardown()).await
    }

    async fn teardown(&self) -> Result<RunReport> {
        let mut loaded = self.load().await?;
        let plan = Plan::destroy(&loaded.known, &self.config_hash())?;
        if plan.operations.is_empty() {
            info!("Nothing to destroy");
        }

        let execution = self.execute(&plan, &loaded.secrets).await?;

        let header = &mut loaded.state.header;
        if execution.all_successful() {
            header.outputs.clear();
        }
        self.finish(header, RunOperation::Destroy, &plan.config_hash, &execution);
        if self.store.exists().await? || !plan.operations.is_empty() {
            self.store.save_header(header).await?;
        }

        Ok(RunReport {
            plan,
            execution,
            outputs: Outputs::new(),
        })
    }

    /// Re-reads every recorded resource from the provider and syncs records.
    ///
    /// Records of resources that no longer exist are dropped, so the next
    /// plan creates them again.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be read or written.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        info!(
            "Refreshing {}/{}",
            self.manifest.stack.name, self.manifest.stack.environment
        );
        self.locked(self.sync_records()).await
    }

    async fn sync_records(&self) -> Result<RefreshReport> {
        let mut loaded = self.load().await?;
        let mut report = RefreshReport::default();

        for prior in loaded.known.iter() {
            let label = format!("read {} '{}'", prior.kind, prior.name);
            let (result, _) = self
                .executor_options
                .retry
                .run(&label, &self.cancel, || self.provider.read(prior.kind, &prior.id))
                .await;

            match result {
                Ok(None) => {
                    warn!("{} '{}' no longer exists; dropping its record", prior.kind, prior.name);
                    self.store.remove_record(&prior.name).await?;
                    report.removed.push(prior.name.clone());
                }
                Ok(Some(found)) => {
                    let observed = found.into_outputs(prior.kind);
                    if observed == prior.outputs {
                        debug!("{} is up to date", prior.name);
                        report.unchanged.push(prior.name.clone());
                        continue;
                    }
                    let Some(record) = loaded.state.records.get(&prior.name) else {
                        continue;
                    };
                    let updated = refreshed_record(record, &observed, &loaded.secrets)?;
                    self.store.put_record(&updated).await?;
                    info!("Updated outputs of {}", prior.name);
                    report.updated.push(prior.name.clone());
                }
                Err(e) => {
                    error!("Failed to read {}: {e}", prior.name);
                    report.errors.push(format!("{}: {e}", prior.name));
                }
            }
        }

        let header = &mut loaded.state.header;
        let changed: Vec<String> = report
            .updated
            .iter()
            .chain(&report.removed)
            .cloned()
            .collect();
        let hash = header.config_hash.clone();
        let entry = if report.errors.is_empty() {
            HistoryEntry::new(RunOperation::Refresh, &hash, changed)
        } else {
            HistoryEntry::failed(
                RunOperation::Refresh,
                &hash,
                changed,
                &format!("{} resources could not be read", report.errors.len()),
            )
        };
        header.add_history(entry);
        self.store.save_header(header).await?;

        Ok(report)
    }

    /// Returns the stack outputs recorded by the last `up`.
    ///
    /// With `reveal` unset, secret outputs are returned masked without being
    /// decrypted, so no passphrase is needed.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be read, or if `reveal` is set and a
    /// secret cannot be opened.
    pub async fn outputs(&self, reveal: bool) -> Result<Outputs> {
        let Some(header) = self.store.load_header().await? else {
            return Ok(Outputs::new());
        };

        if !reveal {
            return Ok(header
                .outputs
                .into_iter()
                .map(|(name, stored)| {
                    let value = match stored {
                        StoredValue::Plain(value) => OutputValue::plain(value),
                        StoredValue::Secret { .. } => OutputValue::secret(Value::Null),
                    };
                    (name, value)
                })
                .collect());
        }

        let secrets = Self::secrets_for(&header)?;
        let outputs = header
            .outputs
            .iter()
            .map(|(name, stored)| secrets.open(stored).map(|v| (name.clone(), v)))
            .collect::<std::result::Result<Outputs, StateError>>()?;
        Ok(outputs)
    }

    fn plan(&self, graph: &ResourceGraph, known: &KnownState) -> Result<Plan> {
        let diffs = DiffEngine::new(self.provider).compute(graph, known)?;
        let plan = Plan::build(diffs, graph, known, &self.config_hash())?;
        let (create, update, delete, noop) = plan.summary();
        info!("Plan: {create} to create, {update} to update, {delete} to delete, {noop} unchanged");
        Ok(plan)
    }

    async fn execute(&self, plan: &Plan, secrets: &SecretsManager) -> Result<ExecutionResult> {
        let executor = PlanExecutor::new(self.provider, self.store, secrets)
            .with_options(self.executor_options)
            .with_cancellation(self.cancel.clone());
        let execution = executor.execute(plan).await?;
        info!("{execution}");
        Ok(execution)
    }

    /// Loads state, creating a fresh header with a new salt if none exists.
    async fn load(&self) -> Result<Loaded> {
        let stack = &self.manifest.stack;
        let mut state = match self.store.load().await? {
            Some(state) => state,
            None => {
                debug!("No state found; starting from an empty stack");
                DeploymentState::new(&stack.name, &stack.environment)
            }
        };

        if state.header.stack != stack.name || state.header.environment != stack.environment {
            warn!(
                "State belongs to {}/{} but the manifest declares {}/{}",
                state.header.stack, state.header.environment, stack.name, stack.environment
            );
        }

        if state.header.encryption_salt.is_none() {
            state.header.encryption_salt = Some(SecretsManager::generate_salt());
        }
        let secrets = Self::secrets_for(&state.header)?;
        let known = KnownState::open(&state, &secrets)?;
        debug!("Loaded {} recorded resources", known.len());

        Ok(Loaded { state, known, secrets })
    }

    fn secrets_for(header: &StateHeader) -> Result<SecretsManager> {
        Ok(match header.encryption_salt.as_deref() {
            Some(salt) => SecretsManager::from_env(salt)?,
            None => SecretsManager::locked(),
        })
    }

    /// Runs `work` while holding the stack lock.
    async fn locked<T, F>(&self, work: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let lock = self.store.acquire_lock(&generate_holder_id()).await?;
        debug!("Acquired state lock {}", lock.lock_id);

        let result = work.await;

        if let Err(e) = self.store.release_lock(&lock.lock_id).await {
            error!("Failed to release state lock {}: {e}", lock.lock_id);
        }
        result
    }

    fn finish(
        &self,
        header: &mut StateHeader,
        operation: RunOperation,
        config_hash: &str,
        execution: &ExecutionResult,
    ) {
        let changed: Vec<String> = execution
            .results
            .iter()
            .filter(|r| r.action != Action::NoOp && r.outcome == OperationOutcome::Succeeded)
            .map(|r| r.resource.clone())
            .collect();

        let entry = match execution.status {
            RunStatus::Success => {
                if operation == RunOperation::Up {
                    header.config_hash = config_hash.to_string();
                }
                HistoryEntry::new(operation, config_hash, changed)
            }
            RunStatus::PartialFailure => HistoryEntry::failed(
                operation,
                config_hash,
                changed,
                &format!(
                    "{} failed, {} skipped",
                    execution.failed(),
                    execution.skipped()
                ),
            ),
            RunStatus::Cancelled => HistoryEntry::failed(operation, config_hash, changed, "cancelled"),
        };
        debug!(
            "Recording {} run for {} ({})",
            operation,
            self.manifest.stack.name,
            self.hasher.short_hash(config_hash)
        );
        header.add_history(entry);
    }
}

/// Returns true if applying `plan` or storing `outputs` will seal a secret.
fn needs_secrets(plan: &Plan, graph: &ResourceGraph, outputs: &BTreeMap<String, Property>) -> bool {
    let sealing_op = plan.operations.iter().any(|op| {
        matches!(op.action, Action::Create | Action::Update)
            && (op.kind.outputs().iter().any(|o| o.secret) || op.changes.iter().any(|c| c.sensitive))
    });
    let secret_output = outputs.values().flat_map(Property::references).any(|r| {
        graph
            .get(&r.resource)
            .is_some_and(|d| d.kind.is_secret_output(&r.output))
    });
    sealing_op || secret_output
}

/// Resolves stack output expressions against resource outputs.
///
/// An output is secret if any value it reads is. Outputs that read from a
/// resource that does not exist after the run are left out.
#[must_use]
pub fn resolve_outputs(
    outputs: &BTreeMap<String, Property>,
    resources: &BTreeMap<String, Outputs>,
) -> Outputs {
    let find = |resource: &str, output: &str| resources.get(resource).and_then(|o| o.get(output));

    outputs
        .iter()
        .filter_map(|(name, property)| {
            let lookup = |r: &crate::resource::Reference| find(&r.resource, &r.output).map(|v| v.value.clone());
            match property.resolve(&lookup) {
                Ok(value) => {
                    let secret = property
                        .references()
                        .iter()
                        .any(|r| find(&r.resource, &r.output).is_some_and(|v| v.secret));
                    let value = if secret {
                        OutputValue::secret(value)
                    } else {
                        OutputValue::plain(value)
                    };
                    Some((name.clone(), value))
                }
                Err(missing) => {
                    warn!("Output '{name}' is unavailable: {missing} did not resolve");
                    None
                }
            }
        })
        .collect()
}

/// Outputs of every resource that exists after a run.
///
/// Resources whose operation failed or was skipped keep their recorded
/// outputs, unless a delete of them went through.
fn live_outputs(execution: &ExecutionResult, known: &KnownState) -> BTreeMap<String, Outputs> {
    let mut live = execution.outputs.clone();
    for prior in known.iter() {
        if live.contains_key(&prior.name) {
            continue;
        }
        let deleted = execution.results.iter().any(|r| {
            r.resource == prior.name && r.action == Action::Delete && r.outcome == OperationOutcome::Succeeded
        });
        if !deleted {
            debug!("Keeping recorded outputs of {}", prior.name);
            live.insert(prior.name.clone(), prior.outputs.clone());
        }
    }
    live
}

/// Rewrites a record's outputs with what the provider reports.
fn refreshed_record(
    record: &StateRecord,
    observed: &Outputs,
    secrets: &SecretsManager,
) -> std::result::Result<StateRecord, StateError> {
    let outputs = observed
        .iter()
        .map(|(k, v)| secrets.store(v).map(|v| (k.clone(), v)))
        .collect::<std::result::Result<_, _>>()?;
    Ok(StateRecord {
        outputs,
        serial: record.serial + 1,
        updated_at: chrono::Utc::now(),
        ..record.clone()
    })
}

impl RunReport {
    /// Returns true if every operation succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.execution.all_successful()
    }
}

impl RefreshReport {
    /// Returns true if every record could be read.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for RefreshReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Refresh complete:")?;
        writeln!(f, "  Unchanged: {}", self.unchanged.len())?;
        writeln!(f, "  Updated: {}", self.updated.len())?;
        writeln!(f, "  Removed: {}", self.removed.len())?;
        if !self.errors.is_empty() {
            writeln!(f, "  Errors:")?;
            for error in &self.errors {
                writeln!(f, "    - {error}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::error::DeployError;
    use crate::provider::SimulatedProvider;
    use crate::state::LocalStateStore;
    use serde_json::json;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"
stack:
  name: ipfs-node
config:
  cidr:
    default: 10.0.0.0/16
resources:
  - name: vpc
    type: vpc
    properties:
      cidr_block: { $config: cidr }
  - name: subnet
    type: subnet
    properties:
      vpc_id: { $ref: vpc.id }
      cidr_block: 10.0.1.0/24
outputs:
  vpc_id: { $ref: vpc.id }
  summary: { $concat: ["subnet ", { $ref: subnet.id }] }
"#;

    fn manifest() -> Manifest {
        ConfigParser::new().parse_yaml(MANIFEST, None).unwrap()
    }

    fn options(manifest: &Manifest) -> BTreeMap<String, Value> {
        ConfigParser::resolve_options_with(manifest, &[], |_| None).unwrap()
    }

    #[tokio::test]
    async fn test_preview_on_empty_state_creates_everything() {
        let dir = TempDir::new().unwrap();
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = SimulatedProvider::new();
        let manifest = manifest();
        let reconciler = Reconciler::new(&manifest, options(&manifest), &provider, &store);

        let plan = reconciler.preview().await.unwrap();
        assert_eq!(plan.summary(), (2, 0, 0, 0));
        assert!(!store.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_up_records_outputs_and_history() {
        let dir = TempDir::new().unwrap();
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = SimulatedProvider::new();
        let manifest = manifest();
        let reconciler = Reconciler::new(&manifest, options(&manifest), &provider, &store);

        let report = reconciler.up().await.unwrap();
        assert!(report.is_success());
        assert!(report.outputs["summary"].render(false).starts_with("subnet "));

        let header = store.load_header().await.unwrap().unwrap();
        assert_eq!(header.config_hash, reconciler.config_hash());
        assert_eq!(header.history.len(), 1);
        assert!(header.history[0].success);
        assert!(!store.is_locked().await.unwrap());

        let outputs = reconciler.outputs(false).await.unwrap();
        assert_eq!(outputs["vpc_id"], report.outputs["vpc_id"]);
    }

    #[tokio::test]
    async fn test_second_up_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = SimulatedProvider::new();
        let manifest = manifest();
        let reconciler = Reconciler::new(&manifest, options(&manifest), &provider, &store);

        reconciler.up().await.unwrap();
        let plan = reconciler.preview().await.unwrap();
        assert!(plan.is_noop());
    }

    #[tokio::test]
    async fn test_destroy_removes_records() {
        let dir = TempDir::new().unwrap();
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = SimulatedProvider::new();
        let manifest = manifest();
        let reconciler = Reconciler::new(&manifest, options(&manifest), &provider, &store);

        reconciler.up().await.unwrap();
        let report = reconciler.destroy().await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.plan.operations[0].resource, "subnet");
        assert!(store.list_records().await.unwrap().is_empty());
        assert_eq!(provider.resource_count(), 0);
        assert!(reconciler.outputs(false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_drops_resources_removed_out_of_band() {
        let dir = TempDir::new().unwrap();
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = SimulatedProvider::new();
        let manifest = manifest();
        let reconciler = Reconciler::new(&manifest, options(&manifest), &provider, &store);

        reconciler.up().await.unwrap();
        let subnet = store.load_record("subnet").await.unwrap().unwrap();
        assert!(provider.remove_out_of_band(subnet.kind, &subnet.id));

        let report = reconciler.refresh().await.unwrap();
        assert_eq!(report.removed, vec![String::from("subnet")]);
        assert_eq!(report.unchanged, vec![String::from("vpc")]);

        let plan = reconciler.preview().await.unwrap();
        assert_eq!(plan.summary(), (1, 0, 0, 1));
    }

    #[tokio::test]
    async fn test_up_refuses_when_locked_by_another_holder() {
        let dir = TempDir::new().unwrap();
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = SimulatedProvider::new();
        let manifest = manifest();
        let reconciler = Reconciler::new(&manifest, options(&manifest), &provider, &store);

        store.acquire_lock("someone-else").await.unwrap();
        let err = reconciler.up().await.unwrap_err();
        assert!(matches!(err, DeployError::State(StateError::LockedByOther { .. })));
        assert_eq!(provider.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_update_keeps_published_outputs() {
        const TAGGED: &str = r#"
stack:
  name: ipfs-node
config:
  label:
    default: first
resources:
  - name: net
    type: vpc
    properties:
      cidr_block: 10.0.0.0/16
      tags: { Name: { $config: label } }
outputs:
  net_id: { $ref: net.id }
"#;
        let dir = TempDir::new().unwrap();
        let store = LocalStateStore::with_base_dir(dir.path());
        let provider = SimulatedProvider::new();
        let manifest = ConfigParser::new().parse_yaml(TAGGED, None).unwrap();

        let first = Reconciler::new(&manifest, options(&manifest), &provider, &store)
            .up()
            .await
            .unwrap();
        let published = first.outputs["net_id"].clone();

        provider.fail_on("net");
        let relabel = [(String::from("label"), String::from("second"))];
        let options = ConfigParser::resolve_options_with(&manifest, &relabel, |_| None).unwrap();
        let reconciler = Reconciler::new(&manifest, options, &provider, &store);
        let report = reconciler.up().await.unwrap();

        assert!(!report.is_success());
        assert_eq!(report.plan.summary(), (0, 1, 0, 0));
        assert_eq!(report.outputs["net_id"], published);
        assert_eq!(reconciler.outputs(false).await.unwrap()["net_id"], published);
    }

    #[test]
    fn test_resolve_outputs_propagates_secret_flag() {
        let outputs = BTreeMap::from([
            (
                String::from("key"),
                Property::reference("key", "private_key_pem"),
            ),
            (String::from("ip"), Property::reference("node", "public_ip")),
            (String::from("gone"), Property::reference("missing", "id")),
        ]);
        let resources = BTreeMap::from([
            (
                String::from("key"),
                Outputs::from([(
                    String::from("private_key_pem"),
                    OutputValue::secret(json!("PEM")),
                )]),
            ),
            (
                String::from("node"),
                Outputs::from([(String::from("public_ip"), OutputValue::plain(json!("1.2.3.4")))]),
            ),
        ]);

        let resolved = resolve_outputs(&outputs, &resources);
        assert!(resolved["key"].secret);
        assert!(!resolved["ip"].secret);
        assert!(!resolved.contains_key("gone"));
    }
}
