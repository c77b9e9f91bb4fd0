//! End-to-end runs against the simulated cloud and a local state directory.

use ipfs_node_deploy::config::{ConfigParser, ConfigValidator, Manifest};
use ipfs_node_deploy::error::{DeployError, GraphError, PlanError, StateError};
use ipfs_node_deploy::planner::{Action, DiffEngine, Plan, PlanExecutor};
use ipfs_node_deploy::provider::SimulatedProvider;
use ipfs_node_deploy::reconciler::{resolve_outputs, Reconciler};
use ipfs_node_deploy::resource::{Property, SECRET_MASK};
use ipfs_node_deploy::state::{
    DeploymentState, KnownState, LocalStateStore, SecretsManager, StateStore, PASSPHRASE_ENV,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const NETWORK: &str = r#"
stack:
  name: network
config:
  cidr:
    default: 10.0.0.0/16
resources:
  - name: net
    type: vpc
    properties:
      cidr_block: { $config: cidr }
  - name: sub
    type: subnet
    properties:
      vpc_id: { $ref: net.id }
      cidr_block: 10.0.1.0/24
  - name: gw
    type: internet_gateway
outputs:
  subnet_id: { $ref: sub.id }
"#;

const GATEWAY_ONLY: &str = r#"
stack:
  name: network
resources:
  - name: gw
    type: internet_gateway
"#;

const CYCLIC: &str = r#"
stack:
  name: cyclic
resources:
  - name: a
    type: route_table
    properties:
      vpc_id: { $ref: b.id }
  - name: b
    type: vpc
    properties:
      cidr_block: { $ref: a.id }
"#;

fn parse(yaml: &str) -> Manifest {
    ConfigParser::new().parse_yaml(yaml, None).expect("manifest parses")
}

fn options(manifest: &Manifest, overrides: &[(&str, &str)]) -> BTreeMap<String, Value> {
    let overrides: Vec<(String, String)> = overrides
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    ConfigParser::resolve_options_with(manifest, &overrides, |_| None).expect("options resolve")
}

fn template_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("templates/ipfs-deploy.yaml")
}

fn template() -> Manifest {
    ConfigParser::new().load_file(template_path()).expect("template loads")
}

fn position(calls: &[String], call: &str) -> usize {
    calls
        .iter()
        .position(|c| c == call)
        .unwrap_or_else(|| panic!("no call `{call}` in {calls:?}"))
}

fn read_tree(dir: &Path) -> String {
    let mut text = String::new();
    for entry in std::fs::read_dir(dir).expect("read dir") {
        let path = entry.expect("entry").path();
        if path.is_dir() {
            text.push_str(&read_tree(&path));
        } else {
            text.push_str(&std::fs::read_to_string(&path).unwrap_or_default());
        }
    }
    text
}

#[tokio::test]
async fn test_up_then_up_again_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let store = LocalStateStore::with_base_dir(dir.path());
    let provider = SimulatedProvider::new();
    let manifest = parse(NETWORK);
    let reconciler = Reconciler::new(&manifest, options(&manifest, &[]), &provider, &store);

    let first = reconciler.up().await.unwrap();
    assert!(first.is_success());
    assert_eq!(first.plan.summary(), (3, 0, 0, 0));
    let order: Vec<&str> = first.plan.operations.iter().map(|op| op.resource.as_str()).collect();
    assert!(order.iter().position(|r| *r == "net") < order.iter().position(|r| *r == "sub"));

    let calls_before = provider.calls().len();
    let second = reconciler.up().await.unwrap();
    assert!(second.plan.is_noop());
    assert_eq!(second.plan.summary(), (0, 0, 0, 3));
    assert_eq!(provider.calls().len(), calls_before);
    assert_eq!(second.outputs["subnet_id"], first.outputs["subnet_id"]);

    let header = store.load_header().await.unwrap().unwrap();
    assert_eq!(header.history.len(), 2);
}

#[tokio::test]
async fn test_up_approved_refuses_a_plan_overtaken_by_another_run() {
    let dir = TempDir::new().unwrap();
    let store = LocalStateStore::with_base_dir(dir.path());
    let provider = SimulatedProvider::new();
    let manifest = parse(NETWORK);
    let reconciler = Reconciler::new(&manifest, options(&manifest, &[]), &provider, &store);

    let approved = reconciler.preview().await.unwrap();
    assert_eq!(approved.summary(), (3, 0, 0, 0));

    let other = Reconciler::new(&manifest, options(&manifest, &[]), &provider, &store);
    assert!(other.up().await.unwrap().is_success());
    let calls_before = provider.calls().len();

    let err = reconciler.up_approved(&approved).await.unwrap_err();
    assert!(matches!(err, DeployError::Plan(PlanError::Stale { .. })), "{err}");
    assert_eq!(provider.calls().len(), calls_before);
    assert!(store.get_lock_info().await.unwrap().is_none());

    let current = reconciler.preview().await.unwrap();
    let report = reconciler.up_approved(&current).await.unwrap();
    assert!(report.is_success());
    assert!(report.plan.is_noop());
}

#[tokio::test]
async fn test_cycle_is_rejected_before_planning() {
    let dir = TempDir::new().unwrap();
    let store = LocalStateStore::with_base_dir(dir.path());
    let provider = SimulatedProvider::new();
    let manifest = parse(CYCLIC);
    let reconciler = Reconciler::new(&manifest, options(&manifest, &[]), &provider, &store);

    let err = reconciler.up().await.unwrap_err();
    let DeployError::Graph(GraphError::Cycle { cycle }) = err else {
        panic!("expected a cycle error, got {err}");
    };
    assert!(cycle.contains('a') && cycle.contains('b'));
    assert!(provider.calls().is_empty());
    assert!(!store.exists().await.unwrap());
}

#[tokio::test]
async fn test_failure_skips_dependents_and_recovers_on_next_up() {
    let dir = TempDir::new().unwrap();
    let store = LocalStateStore::with_base_dir(dir.path());
    let provider = SimulatedProvider::new();
    provider.fail_on("net");
    let manifest = parse(NETWORK);
    let reconciler = Reconciler::new(&manifest, options(&manifest, &[]), &provider, &store);

    let report = reconciler.up().await.unwrap();
    assert!(!report.is_success());
    assert_eq!(report.execution.failed(), 1);
    assert_eq!(report.execution.skipped(), 1);
    assert_eq!(store.list_records().await.unwrap(), vec![String::from("gw")]);
    assert!(!report.outputs.contains_key("subnet_id"));

    let header = store.load_header().await.unwrap().unwrap();
    assert!(!header.history[0].success);
    assert_ne!(header.config_hash, reconciler.config_hash());

    provider.heal("net");
    let retry = reconciler.up().await.unwrap();
    assert!(retry.is_success());
    assert_eq!(retry.plan.summary(), (2, 0, 0, 1));
    assert!(retry.outputs.contains_key("subnet_id"));
}

#[tokio::test]
async fn test_removed_resources_are_deleted_dependents_first() {
    let dir = TempDir::new().unwrap();
    let store = LocalStateStore::with_base_dir(dir.path());
    let provider = SimulatedProvider::new();

    let full = parse(NETWORK);
    Reconciler::new(&full, options(&full, &[]), &provider, &store)
        .up()
        .await
        .unwrap();

    let trimmed = parse(GATEWAY_ONLY);
    let report = Reconciler::new(&trimmed, options(&trimmed, &[]), &provider, &store)
        .up()
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.plan.summary(), (0, 0, 2, 1));
    let calls = provider.calls();
    assert!(position(&calls, "delete subnet sub") < position(&calls, "delete vpc net"));
    assert_eq!(store.list_records().await.unwrap(), vec![String::from("gw")]);
    assert_eq!(provider.resource_count(), 1);
}

#[tokio::test]
async fn test_immutable_change_replaces_and_cascades() {
    let dir = TempDir::new().unwrap();
    let store = LocalStateStore::with_base_dir(dir.path());
    let provider = SimulatedProvider::new();
    let manifest = parse(NETWORK);

    let first = Reconciler::new(&manifest, options(&manifest, &[]), &provider, &store)
        .up()
        .await
        .unwrap();
    let old_vpc = first.execution.outputs["net"]["id"].value.clone();

    let reconciler = Reconciler::new(
        &manifest,
        options(&manifest, &[("cidr", "10.1.0.0/16")]),
        &provider,
        &store,
    );
    let plan = reconciler.preview().await.unwrap();
    let actions = |name: &str| -> Vec<Action> { plan.operations_for(name).map(|op| op.action).collect() };
    assert_eq!(actions("net"), vec![Action::Delete, Action::Create]);
    assert_eq!(actions("sub"), vec![Action::Delete, Action::Create]);
    assert_eq!(actions("gw"), vec![Action::NoOp]);

    let report = reconciler.up().await.unwrap();
    assert!(report.is_success());
    let calls = provider.calls();
    assert!(position(&calls, "delete subnet sub") < position(&calls, "delete vpc net"));
    let create_net = calls.iter().rposition(|c| c == "create vpc net").unwrap();
    let create_sub = calls.iter().rposition(|c| c == "create subnet sub").unwrap();
    assert!(create_net < create_sub);

    let subnet = store.load_record("sub").await.unwrap().unwrap();
    let new_vpc = &report.execution.outputs["net"]["id"].value;
    assert_ne!(new_vpc, &old_vpc);
    assert_eq!(subnet.dependencies, vec![String::from("net")]);
}

#[tokio::test]
async fn test_destroy_keeps_history_and_empties_the_cloud() {
    let dir = TempDir::new().unwrap();
    let store = LocalStateStore::with_base_dir(dir.path());
    let provider = SimulatedProvider::new();
    let manifest = parse(NETWORK);
    let reconciler = Reconciler::new(&manifest, options(&manifest, &[]), &provider, &store);

    reconciler.up().await.unwrap();
    let report = reconciler.destroy().await.unwrap();
    assert!(report.is_success());
    assert_eq!(provider.resource_count(), 0);
    assert!(store.list_records().await.unwrap().is_empty());

    let header = store.load_header().await.unwrap().unwrap();
    assert_eq!(header.history.len(), 2);
    assert!(header.outputs.is_empty());

    let again = reconciler.destroy().await.unwrap();
    assert!(again.plan.operations.is_empty());
}

#[test]
fn test_template_is_valid_and_binds_options() {
    let manifest = template();
    let result = ConfigValidator::new().check(&manifest);
    assert!(result.errors.is_empty(), "{:?}", result.errors);

    let options = options(&manifest, &[("myPublicIp", "203.0.113.7/32")]);
    assert_eq!(options["region"], json!("us-west-2"));
    assert_eq!(options["instanceType"], json!("m5.large"));

    let descriptors = manifest.descriptors(&options).unwrap();
    let subnet = descriptors.iter().find(|d| d.name == "ipfs-node-subnet").unwrap();
    assert_eq!(
        subnet.properties["availability_zone"],
        Property::Resolved(json!("us-west-2a"))
    );

    let sg = descriptors.iter().find(|d| d.name == "ipfs-node-sg").unwrap();
    let Property::Resolved(ingress) = &sg.properties["ingress"] else {
        panic!("ingress should be fully known");
    };
    assert_eq!(ingress[0]["cidr_blocks"], json!(["203.0.113.7/32"]));
    assert_eq!(ingress[1]["cidr_blocks"], json!(["0.0.0.0/0"]));

    let key = descriptors.iter().find(|d| d.name == "ipfs-key").unwrap();
    assert_eq!(key.properties["algorithm"], Property::Resolved(json!("RSA")));
    assert!(!key.properties.contains_key("rsa_bits"));
}

#[tokio::test]
async fn test_template_orders_the_node_after_its_dependencies() {
    let dir = TempDir::new().unwrap();
    let store = LocalStateStore::with_base_dir(dir.path());
    let provider = SimulatedProvider::new();
    let manifest = template();
    let reconciler = Reconciler::new(&manifest, options(&manifest, &[]), &provider, &store);

    let graph = reconciler.graph().unwrap();
    let order = graph.topological_order();
    let at = |name: &str| order.iter().position(|n| n == name).unwrap();
    assert_eq!(order.len(), 10);
    assert!(at("ipfs-node-vpc") < at("ipfs-node-subnet"));
    assert!(at("ipfs-key") < at("ipfs-node-key"));
    for dependency in ["ubuntu-jammy", "ipfs-node-key", "ipfs-node-subnet", "ipfs-node-sg"] {
        assert!(at(dependency) < at("ipfs-node-instance"), "{dependency}");
    }

    let plan = reconciler.preview().await.unwrap();
    assert_eq!(plan.summary(), (10, 0, 0, 0));
}

#[tokio::test]
async fn test_template_up_without_passphrase_touches_nothing() {
    if std::env::var(PASSPHRASE_ENV).is_ok_and(|p| !p.is_empty()) {
        return;
    }
    let dir = TempDir::new().unwrap();
    let store = LocalStateStore::with_base_dir(dir.path());
    let provider = SimulatedProvider::new();
    let manifest = template();
    let reconciler = Reconciler::new(&manifest, options(&manifest, &[]), &provider, &store);

    let err = reconciler.up().await.unwrap_err();
    assert!(matches!(err, DeployError::State(StateError::SecretsLocked)));
    assert!(provider.calls().is_empty());
    assert!(!store.is_locked().await.unwrap());
}

#[tokio::test]
async fn test_template_deploys_and_keeps_the_private_key_sealed() {
    let dir = TempDir::new().unwrap();
    let store = LocalStateStore::with_base_dir(dir.path());
    let provider = SimulatedProvider::new();
    let manifest = template();
    let options = options(&manifest, &[]);
    let graph = Reconciler::new(&manifest, options.clone(), &provider, &store)
        .graph()
        .unwrap();

    let salt = SecretsManager::generate_salt();
    let secrets = SecretsManager::from_passphrase("correct horse battery staple", &salt).unwrap();
    let mut state = DeploymentState::new("ipfs-node", "dev");
    state.header.encryption_salt = Some(salt);
    store.save_header(&state.header).await.unwrap();

    let known = KnownState::empty();
    let diffs = DiffEngine::new(&provider).compute(&graph, &known).unwrap();
    let plan = Plan::build(diffs, &graph, &known, "hash").unwrap();
    let result = PlanExecutor::new(&provider, &store, &secrets)
        .execute(&plan)
        .await
        .unwrap();
    assert!(result.all_successful(), "{result}");

    let outputs = resolve_outputs(&manifest.output_properties(&options).unwrap(), &result.outputs);
    let ip = outputs["ipfs_node_public_ip"].value.as_str().unwrap().to_string();
    assert_eq!(
        outputs["ipfs_gateway_url"].value,
        json!(format!("http://{ip}:8080/ipfs/"))
    );
    assert!(outputs["private_key"].secret);
    assert_eq!(outputs["private_key"].render(false), SECRET_MASK);
    assert!(!outputs["ipfs_key_pair_name"].secret);

    let on_disk = read_tree(dir.path());
    let pem = result.outputs["ipfs-key"]["private_key_pem"].value.as_str().unwrap();
    assert!(!on_disk.contains("BEGIN PRIVATE KEY"));
    assert!(!on_disk.contains(pem));

    let state = store.load().await.unwrap().unwrap();
    let known = KnownState::open(&state, &secrets).unwrap();
    let diffs = DiffEngine::new(&provider).compute(&graph, &known).unwrap();
    let replan = Plan::build(diffs, &graph, &known, "hash").unwrap();
    assert!(replan.is_noop(), "{:?}", replan.summary());
}
