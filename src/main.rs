use clap::Parser;
use flowtrace::{
    config::{ConfigManager, EnvConfigManager},
    logger::{init_tracing, instrument_command},
};
use std::{env, path::PathBuf};

mod cli;

use cli::{Cli, CliContext};

/// Resolve the flowtrace root directory from the environment or use default.
pub fn resolve_root_dir() -> PathBuf {
    match env::var("FLOWTRACE_ROOT") {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from("./flowtrace"),
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let root = resolve_root_dir();
    let telemetry = init_tracing(&cli.log_config(&root))?;

    let config_manager = ConfigManager(EnvConfigManager::new(root.join(".env")));
    let context = CliContext::new(root, config_manager);

    let name = cli.command.name();
    let result = instrument_command(name, || cli::execute(&context, cli.command)).await;

    telemetry.shutdown();
    result
}
