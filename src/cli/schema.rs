use std::path::PathBuf;

use clap::Args;

use super::CliContext;
use flowtrace::schema::write_schema;

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Output directory, defaults to `<root>/schemas`
    #[arg(long)]
    pub out_dir: Option<PathBuf>,
}

pub fn execute(args: SchemaArgs, context: &CliContext) -> anyhow::Result<()> {
    let out_dir = args.out_dir.unwrap_or_else(|| context.root.join("schemas"));
    let written = write_schema(&out_dir)?;
    println!("{} schemas written to {}", written.len(), out_dir.display());
    Ok(())
}
