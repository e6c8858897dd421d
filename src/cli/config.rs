use clap::{Args, Subcommand};

use super::CliContext;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    Set { key: String, value: String },
    Delete { key: String },
    Get { key: String },
}

pub async fn execute(args: ConfigArgs, context: &CliContext) -> anyhow::Result<()> {
    let config = &context.config_manager.0;
    match args.command {
        ConfigCommands::Set { key, value } => {
            config.set(&key, &value).await?;
            println!("✅ {key} set.");
        }
        ConfigCommands::Delete { key } => {
            config.del(&key).await?;
            println!("✅ {key} deleted.");
        }
        ConfigCommands::Get { key } => match config.get(&key).await {
            Some(value) => println!("{value}"),
            None => eprintln!("❌ {key} is not set."),
        },
    }
    Ok(())
}
