//! rangeforge CLI entrypoint.
//!
//! This is the main entrypoint for the rangeforge command-line tool.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use rangeforge::cli::{Cli, Commands, OutputFormatter};
use rangeforge::config::{ConfigParser, ConfigValidator, TopologyConfig, find_config_file};
use rangeforge::error::{ForgeError, Result, RevisionError};
use rangeforge::orchestrator::{BuildOptions, CancelHandle, Orchestrator};
use rangeforge::provider::CollaboratorRegistry;
use rangeforge::state::{LocalRevisionStore, RevisionStore};
use rangeforge::topology::{Node, TopologyBuilder, TreeFormatter};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

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
/// `RUST_LOG` takes precedence over the verbosity flag.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);
    let config = cli.config.as_ref();

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(config, warnings),
        Commands::Plan { all, rebuild } => cmd_plan(config, all, rebuild, &formatter).await,
        Commands::Build { rebuild, workers } => {
            cmd_build(config, rebuild, workers, &formatter).await
        }
        Commands::Status { id } => cmd_status(config, id.as_deref(), &formatter).await,
        Commands::Taint { id } => cmd_taint(config, &id, &formatter).await,
        Commands::Show {
            depth,
            ids,
            checksums,
        } => cmd_show(config, depth, ids, checksums, &formatter),
    }
}

/// Validate the topology.
fn cmd_validate(config_path: Option<&PathBuf>, show_warnings: bool) -> Result<ExitCode> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating topology: {}", config_file.display());

    let parser = parser_for(&config_file);
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new().validate(&config)?;
    eprintln!("Topology is valid!");
    if show_warnings && !result.warnings.is_empty() {
        eprintln!("\nWarnings:");
        for warning in &result.warnings {
            eprintln!("  - {warning}");
        }
    }

    let tree = TopologyBuilder::new(config.settings.platform).build(&config);
    eprintln!("\nTopology summary:");
    eprintln!("  Environment: {}", config.environment.id);
    eprintln!("  Teams: {}", config.environment.team_count);
    eprintln!("  Hosts: {}", config.total_hosts());
    eprintln!("  Nodes: {}", tree.subtree_size());
    eprintln!(
        "  Build root: {}",
        ConfigParser::build_root(&config, &config_file).display()
    );

    Ok(ExitCode::SUCCESS)
}

/// Show what the next build would do.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    all: bool,
    rebuild: Vec<String>,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let loaded = load_topology(config_path)?;
    let options = BuildOptions {
        rebuild: rebuild.into_iter().collect(),
        ..BuildOptions::default()
    };
    let plan = loaded.orchestrator().plan(&loaded.tree, &options).await?;

    eprintln!("{}", formatter.format_plan(&plan, all));
    Ok(ExitCode::SUCCESS)
}

/// Run a build pass.
async fn cmd_build(
    config_path: Option<&PathBuf>,
    rebuild: Vec<String>,
    workers: Option<usize>,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let loaded = load_topology(config_path)?;
    let orchestrator = loaded.orchestrator();

    let rebuild: HashSet<String> = rebuild.into_iter().collect();
    for id in &rebuild {
        if loaded.tree.find(id).is_none() {
            warn!("--rebuild {id} does not name a node of the topology");
        }
    }

    let (handle, signal) = CancelHandle::new();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, finishing in-flight nodes...");
            handle.cancel();
        }
    });

    let options = BuildOptions {
        rebuild,
        workers,
        holder: None,
    };
    let result = orchestrator.build(&loaded.tree, &options, signal).await;
    interrupt.abort();
    let report = result?;

    eprintln!("{}", formatter.format_report(&report));
    Ok(if report.exit_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Show recorded state.
async fn cmd_status(
    config_path: Option<&PathBuf>,
    id: Option<&str>,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let loaded = load_topology(config_path)?;
    let records = loaded.orchestrator().records().await?;

    if let Some(id) = id {
        let record = records
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| RevisionError::NotFound { id: id.to_string() })?;
        eprintln!("{}", formatter.format_record(record));
    } else {
        eprintln!("\nBuild root: {}\n", loaded.root.display());
        eprintln!("{}", formatter.format_records(&records));
    }
    Ok(ExitCode::SUCCESS)
}

/// Taint one node.
async fn cmd_taint(
    config_path: Option<&PathBuf>,
    id: &str,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let loaded = load_topology(config_path)?;
    let orchestrator = loaded.orchestrator();

    // Nodes that left the topology are still recorded under their own kind.
    let kind = match loaded.tree.find(id) {
        Some(node) => node.kind(),
        None => orchestrator
            .records()
            .await?
            .into_iter()
            .find(|r| r.id == id)
            .map(|r| r.kind)
            .ok_or_else(|| RevisionError::NotFound { id: id.to_string() })?,
    };

    let record = orchestrator.taint(id, kind).await?;
    eprintln!("{}", formatter.format_record(&record));
    eprintln!("{id} will be re-applied on the next build.");
    Ok(ExitCode::SUCCESS)
}

/// Print the topology tree.
fn cmd_show(
    config_path: Option<&PathBuf>,
    depth: Option<usize>,
    ids: bool,
    checksums: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let tree = load_topology(config_path)?.tree;

    let mut tree_formatter = TreeFormatter::new().with_ids(ids).with_checksums(checksums);
    if let Some(depth) = depth {
        tree_formatter = tree_formatter.with_max_depth(depth);
    }

    eprintln!("{}", formatter.format_tree(&tree, &tree_formatter));
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the topology file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

fn parser_for(config_file: &Path) -> ConfigParser {
    ConfigParser::new().with_base_path(config_file.parent().unwrap_or_else(|| Path::new(".")))
}

/// A loaded and validated topology.
struct Loaded {
    config: TopologyConfig,
    /// Directory of the topology file; hooks run from here.
    base_dir: PathBuf,
    root: PathBuf,
    tree: Node,
}

impl Loaded {
    /// Creates an orchestrator over the local build root.
    fn orchestrator(&self) -> Orchestrator {
        let store: Arc<dyn RevisionStore> = Arc::new(LocalRevisionStore::new(&self.root));
        let registry = CollaboratorRegistry::from_settings(&self.config.settings, &self.base_dir);
        Orchestrator::new(store, registry, &self.config.settings)
    }
}

/// Loads and validates the topology.
fn load_topology(config_path: Option<&PathBuf>) -> Result<Loaded> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading topology from: {}", config_file.display());

    let parser = parser_for(&config_file);
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;
    ConfigValidator::new().validate(&config)?;

    let root = ConfigParser::build_root(&config, &config_file);
    if root.exists() && !root.is_dir() {
        return Err(ForgeError::internal(format!(
            "Build root {} is not a directory",
            root.display()
        )));
    }

    let tree = TopologyBuilder::new(config.settings.platform).build(&config);
    let base_dir = config_file
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    Ok(Loaded {
        config,
        base_dir,
        root,
        tree,
    })
}
