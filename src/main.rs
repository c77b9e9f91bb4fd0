//! ipfs-deploy CLI entrypoint.
//!
//! This is the main entrypoint for the ipfs-deploy command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use ipfs_node_deploy::cli::{Cli, Commands, LogFormat, OutputFormatter, StateCommands};
use ipfs_node_deploy::config::{
    find_config_file, ConfigParser, ConfigValidator, Manifest, ProviderKind, StateBackend,
};
use ipfs_node_deploy::error::{ConfigError, DeployError, Result};
use ipfs_node_deploy::provider::{HttpProvider, Provider, SimulatedProvider};
use ipfs_node_deploy::reconciler::Reconciler;
use ipfs_node_deploy::state::{
    generate_holder_id, LocalStateStore, S3StateStore, StateStore, STATE_DIR,
};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_format);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `--verbose` forces debug; otherwise `RUST_LOG` applies, defaulting to info.
/// Logs go to stderr so stdout stays machine-readable.
fn init_logging(verbose: bool, format: LogFormat) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);

    match &cli.command {
        Commands::Init { path, force } => cmd_init(path, *force).map(|()| ExitCode::SUCCESS),
        Commands::Validate { warnings } => cmd_validate(&cli, *warnings, &formatter),
        Commands::Preview { detailed } => cmd_preview(&cli, *detailed, &formatter).await,
        Commands::Up { yes } => cmd_up(&cli, *yes, &formatter).await,
        Commands::Destroy { yes } => cmd_destroy(&cli, *yes, &formatter).await,
        Commands::Refresh => cmd_refresh(&cli, &formatter).await,
        Commands::Outputs { show_secrets } => cmd_outputs(&cli, *show_secrets, &formatter).await,
        Commands::State { command } => cmd_state(&cli, command, &formatter).await,
    }
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new stack in: {}", path.display());

    let config_path = path.join("ipfs-deploy.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    // Check if files exist
    if !force && config_path.exists() {
        eprintln!("Manifest already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    // Create directory if needed
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    // Write manifest template
    let config_template = include_str!("../templates/ipfs-deploy.yaml");
    std::fs::write(&config_path, config_template)?;
    eprintln!("Created: {}", config_path.display());

    // Write .env.example
    let env_template = include_str!("../templates/.env.example");
    std::fs::write(&env_path, env_template)?;
    eprintln!("Created: {}", env_path.display());

    // Write/update .gitignore
    let state_entry = format!("{STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let has_env = existing.lines().any(|l| l.trim() == ".env");
        let has_state = existing.lines().any(|l| l.trim() == state_entry);
        if !has_env || !has_state {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# ipfs-deploy")?;
            if !has_env {
                writeln!(file, ".env")?;
            }
            if !has_state {
                writeln!(file, "{state_entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nStack initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and set IPFS_DEPLOY_PASSPHRASE");
    eprintln!("  2. Edit ipfs-deploy.yaml (provider endpoint, region, instance type)");
    eprintln!("  3. Run 'ipfs-deploy validate' to check the manifest");
    eprintln!("  4. Run 'ipfs-deploy preview' to see what will be created");
    eprintln!("  5. Run 'ipfs-deploy up' to deploy the node");

    Ok(())
}

/// Validate the manifest.
fn cmd_validate(cli: &Cli, show_warnings: bool, formatter: &OutputFormatter) -> Result<ExitCode> {
    let config_file = resolve_config_path(cli.config.as_ref())?;
    info!("Validating manifest: {}", config_file.display());

    let parser = parser_for(&config_file);
    parser.load_dotenv()?;
    let manifest = parser.load_with_env(&config_file)?;

    let mut result = ConfigValidator::new().check(&manifest);

    // Bind options and build the graph too, so reference and schema errors show up here.
    if result.is_valid() {
        let options = ConfigParser::resolve_options(&manifest, &cli.set)?;
        let provider = SimulatedProvider::new();
        let store = LocalStateStore::with_base_dir(state_dir(&parser, &manifest, &config_file));
        let reconciler = Reconciler::new(&manifest, options, &provider, &store);
        if let Err(e) = reconciler.graph() {
            result.errors.push(ipfs_node_deploy::config::ValidationError {
                field: String::from("resources"),
                message: e.to_string(),
            });
        }
    }

    println!("{}", formatter.format_validation(&manifest, &result, show_warnings));

    Ok(if result.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Show the plan.
async fn cmd_preview(cli: &Cli, detailed: bool, formatter: &OutputFormatter) -> Result<ExitCode> {
    let stack = load_stack(cli).await?;
    let reconciler = stack.reconciler(cli);

    let plan = reconciler.preview().await?;
    println!("{}", formatter.format_plan(&plan, detailed));

    Ok(ExitCode::SUCCESS)
}

/// Plan and apply.
async fn cmd_up(cli: &Cli, auto_approve: bool, formatter: &OutputFormatter) -> Result<ExitCode> {
    let stack = load_stack(cli).await?;
    let cancel = cancel_on_ctrl_c();
    let reconciler = stack.reconciler(cli).with_cancellation(cancel);

    let plan = reconciler.preview().await?;
    if !plan.is_noop() {
        eprintln!("{}", formatter.format_plan(&plan, false));

        if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
            eprintln!("Update cancelled.");
            return Ok(ExitCode::SUCCESS);
        }
    }

    let report = reconciler.up_approved(&plan).await?;
    println!("{}", formatter.format_execution(&report.execution, &report.outputs));

    Ok(exit_code(report.is_success()))
}

/// Destroy every recorded resource.
async fn cmd_destroy(cli: &Cli, auto_approve: bool, formatter: &OutputFormatter) -> Result<ExitCode> {
    let stack = load_stack(cli).await?;

    let Some(state) = stack.store.load().await? else {
        eprintln!("No state found; nothing to destroy.");
        return Ok(ExitCode::SUCCESS);
    };
    if state.records.is_empty() {
        eprintln!("No resources recorded; nothing to destroy.");
        return Ok(ExitCode::SUCCESS);
    }

    eprintln!("The following resources will be destroyed:");
    for record in state.records.values() {
        eprintln!("  - {} {} ({})", record.kind, record.name, record.id);
    }

    if !auto_approve
        && !confirm(
            "\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ",
            "destroy",
        )?
    {
        eprintln!("Destroy cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let cancel = cancel_on_ctrl_c();
    let reconciler = stack.reconciler(cli).with_cancellation(cancel);
    let report = reconciler.destroy().await?;
    println!("{}", formatter.format_execution(&report.execution, &report.outputs));

    Ok(exit_code(report.is_success()))
}

/// Sync records with the provider.
async fn cmd_refresh(cli: &Cli, formatter: &OutputFormatter) -> Result<ExitCode> {
    let stack = load_stack(cli).await?;
    if stack.manifest.provider.kind == ProviderKind::Simulated {
        warn!("The simulated provider starts empty in every process; refresh will drop every record");
    }

    let cancel = cancel_on_ctrl_c();
    let reconciler = stack.reconciler(cli).with_cancellation(cancel);
    let report = reconciler.refresh().await?;
    println!("{}", formatter.format_refresh(&report));

    Ok(exit_code(report.is_success()))
}

/// Show stack outputs.
async fn cmd_outputs(cli: &Cli, show_secrets: bool, formatter: &OutputFormatter) -> Result<ExitCode> {
    let stack = load_stack(cli).await?;
    let reconciler = stack.reconciler(cli);

    let outputs = reconciler.outputs(show_secrets).await?;
    println!("{}", formatter.format_outputs(&outputs, show_secrets));

    Ok(ExitCode::SUCCESS)
}

/// State management commands.
async fn cmd_state(cli: &Cli, command: &StateCommands, formatter: &OutputFormatter) -> Result<ExitCode> {
    let config_file = resolve_config_path(cli.config.as_ref())?;
    let parser = parser_for(&config_file);
    parser.load_dotenv()?;
    let manifest = parser.load_with_env(&config_file)?;
    let store = open_store(&parser, &manifest, &config_file).await?;

    match command {
        StateCommands::Show => match store.load().await? {
            Some(state) => println!("{}", formatter.format_state(&state)),
            None => eprintln!("No state found."),
        },
        StateCommands::List => match store.load().await? {
            Some(state) => println!("{}", formatter.format_records(&state)),
            None => eprintln!("No state found."),
        },
        StateCommands::Lock { holder } => {
            let holder = holder.clone().unwrap_or_else(generate_holder_id);
            let lock = store.acquire_lock(&holder).await?;
            println!("{}", formatter.format_lock(&lock));
        }
        StateCommands::Unlock { lock_id, force } => {
            if *force {
                store.force_unlock().await?;
                eprintln!("State forcefully unlocked.");
            } else if let Some(id) = lock_id {
                store.release_lock(id).await?;
                eprintln!("State unlocked.");
            } else {
                eprintln!("Please provide --lock-id or use --force");
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Everything a command needs to talk to one stack.
struct Stack {
    manifest: Manifest,
    options: std::collections::BTreeMap<String, serde_json::Value>,
    provider: Box<dyn Provider>,
    store: Box<dyn StateStore>,
}

impl Stack {
    fn reconciler(&self, cli: &Cli) -> Reconciler<'_> {
        let reconciler = Reconciler::new(
            &self.manifest,
            self.options.clone(),
            self.provider.as_ref(),
            self.store.as_ref(),
        );

        let mut options = *reconciler.executor_options();
        if let Some(parallelism) = cli.parallelism {
            options.parallelism = parallelism.max(1);
        }
        if let Some(secs) = cli.timeout {
            options.timeout = Some(std::time::Duration::from_secs(secs));
        }
        reconciler.with_executor_options(options)
    }
}

/// Resolves the manifest path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

fn parser_for(config_file: &Path) -> ConfigParser {
    ConfigParser::new().with_base_path(config_file.parent().unwrap_or_else(|| Path::new(".")))
}

fn state_dir(parser: &ConfigParser, manifest: &Manifest, config_file: &Path) -> PathBuf {
    parser.state_dir(manifest).unwrap_or_else(|| {
        config_file
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(STATE_DIR)
    })
}

/// Loads, validates, and binds the manifest, then opens the store and provider.
async fn load_stack(cli: &Cli) -> Result<Stack> {
    let config_file = resolve_config_path(cli.config.as_ref())?;
    debug!("Loading manifest from: {}", config_file.display());

    let parser = parser_for(&config_file);
    parser.load_dotenv()?;
    let manifest = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new().validate(&manifest)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }

    let options = ConfigParser::resolve_options(&manifest, &cli.set)?;
    let store = open_store(&parser, &manifest, &config_file).await?;
    let provider = open_provider(&manifest)?;

    Ok(Stack {
        manifest,
        options,
        provider,
        store,
    })
}

/// Creates the state store the manifest asks for.
async fn open_store(
    parser: &ConfigParser,
    manifest: &Manifest,
    config_file: &Path,
) -> Result<Box<dyn StateStore>> {
    Ok(match manifest.state.backend {
        StateBackend::Local => Box::new(LocalStateStore::with_base_dir(state_dir(parser, manifest, config_file))),
        StateBackend::S3 => {
            let bucket = manifest.state.bucket.as_deref().ok_or_else(|| {
                DeployError::Config(ConfigError::validation(
                    "S3 bucket not configured",
                    "state.bucket",
                ))
            })?;
            let prefix = manifest.state.prefix.as_deref();
            let region = manifest.state.region.as_deref();
            Box::new(S3StateStore::new(bucket, prefix, region).await?)
        }
    })
}

/// Creates the provider adapter the manifest asks for.
fn open_provider(manifest: &Manifest) -> Result<Box<dyn Provider>> {
    Ok(match manifest.provider.kind {
        ProviderKind::Simulated => Box::new(SimulatedProvider::new()),
        ProviderKind::Http => {
            let endpoint = manifest.provider.endpoint.as_deref().ok_or_else(|| {
                DeployError::Config(ConfigError::validation(
                    "An endpoint is required for the http provider",
                    "provider.endpoint",
                ))
            })?;
            Box::new(HttpProvider::new(endpoint, ConfigParser::provider_token())?)
        }
    })
}

/// Cancels the returned token on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; waiting for in-flight operations to finish");
            token.cancel();
        }
    });
    cancel
}

/// Asks on stderr and compares the trimmed answer case-insensitively.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

const fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
