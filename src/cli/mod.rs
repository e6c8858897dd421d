use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

pub mod config;
pub mod schema;
pub mod tree;
pub mod watch;

use config::ConfigArgs;
use schema::SchemaArgs;
use tree::{DslArgs, TreeArgs};
use watch::WatchArgs;

use flowtrace::{config::ConfigManager, logger::LogConfig};

#[derive(Parser, Debug)]
#[command(
    name = "flowtrace",
    about = "Rebuild execution trees from workflow logs and follow collaborative documents",
    version
)]
pub struct Cli {
    /// Log filter directive (e.g. warn, info, flowtrace=debug)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Write rolling log files into this directory instead of stderr
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// OpenTelemetry OTLP/HTTP endpoint (e.g. http://localhost:4318)
    #[arg(long, global = true)]
    pub otel_endpoint: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn log_config(&self, root: &Path) -> LogConfig {
        LogConfig {
            log_level: self.log_level.clone(),
            log_dir: self.log_dir.as_ref().map(|dir| {
                if dir.is_absolute() { dir.clone() } else { root.join(dir) }
            }),
            otel_endpoint: self.otel_endpoint.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Nest agent log entries into a tree
    AgentTree(TreeArgs),

    /// Group execution records into parallel forks and branches
    BranchTree(TreeArgs),

    /// Parse an execution-shape expression
    Dsl(DslArgs),

    /// Emit JSON-Schema into `<root>/schemas`
    Schema(SchemaArgs),

    /// Handle configuration
    Config(ConfigArgs),

    /// Follow the collaboration socket of a document
    Watch(WatchArgs),
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::AgentTree(_) => "agent-tree",
            Commands::BranchTree(_) => "branch-tree",
            Commands::Dsl(_) => "dsl",
            Commands::Schema(_) => "schema",
            Commands::Config(_) => "config",
            Commands::Watch(_) => "watch",
        }
    }
}

#[derive(Clone, Debug)]
pub struct CliContext {
    pub root: PathBuf,
    pub config_manager: ConfigManager,
}

impl CliContext {
    pub fn new(root: PathBuf, config_manager: ConfigManager) -> Self {
        Self {
            root,
            config_manager,
        }
    }
}

pub async fn execute(context: &CliContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::AgentTree(args) => tree::agent(args),
        Commands::BranchTree(args) => tree::branch(args),
        Commands::Dsl(args) => tree::dsl(args),
        Commands::Schema(args) => schema::execute(args, context),
        Commands::Config(args) => config::execute(args, context).await,
        Commands::Watch(args) => watch::execute(args, context).await,
    }
}
