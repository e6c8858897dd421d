use std::{
    fs,
    io::{self, Read},
    path::PathBuf,
};

use anyhow::Context;
use clap::Args;
use serde::{Serialize, de::DeserializeOwned};
use tracing::info;

use flowtrace::{
    dsl::{parse_dsl, to_records},
    trace::{ExecutionRecord, LogEntry, build_agent_tree, build_branch_tree},
};

#[derive(Args, Debug)]
pub struct TreeArgs {
    /// JSON array of entries; `-` reads stdin
    pub file: PathBuf,

    /// Pretty-print the output
    #[arg(long)]
    pub pretty: bool,
}

#[derive(Args, Debug)]
pub struct DslArgs {
    /// Expression, e.g. "a -> (parallel, p, b, c -> d) -> end"
    pub text: String,

    /// Print the synthesized execution records instead of the AST
    #[arg(long, conflicts_with = "tree")]
    pub records: bool,

    /// Print the branch tree built from the synthesized records
    #[arg(long)]
    pub tree: bool,

    #[arg(long)]
    pub pretty: bool,
}

fn read_input<T: DeserializeOwned>(file: &PathBuf) -> anyhow::Result<T> {
    let text = if file.as_os_str() == "-" {
        let mut text = String::new();
        io::stdin().read_to_string(&mut text).context("reading stdin")?;
        text
    } else {
        fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?
    };
    serde_json::from_str(&text).with_context(|| format!("parsing {}", file.display()))
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> anyhow::Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{text}");
    Ok(())
}

pub fn agent(args: TreeArgs) -> anyhow::Result<()> {
    let entries: Vec<LogEntry> = read_input(&args.file)?;
    let tree = build_agent_tree(&entries);
    info!(entries = entries.len(), roots = tree.len(), "built agent tree");
    print_json(&tree, args.pretty)
}

pub fn branch(args: TreeArgs) -> anyhow::Result<()> {
    let records: Vec<ExecutionRecord> = read_input(&args.file)?;
    let tree = build_branch_tree(&records);
    info!(records = records.len(), roots = tree.len(), "built branch tree");
    print_json(&tree, args.pretty)
}

pub fn dsl(args: DslArgs) -> anyhow::Result<()> {
    let nodes = parse_dsl(&args.text).with_context(|| format!("parsing `{}`", args.text))?;
    if args.tree {
        print_json(&build_branch_tree(&to_records(&nodes)?), args.pretty)
    } else if args.records {
        print_json(&to_records(&nodes)?, args.pretty)
    } else {
        print_json(&nodes, args.pretty)
    }
}
