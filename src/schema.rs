use std::{fs, path::Path};

use anyhow::Result;
use schemars::{JsonSchema, schema_for};
use tracing::info;

use crate::{
    dsl::DslNode,
    trace::{BranchNode, ExecutionRecord, LogEntry, TraceNode},
};

fn write_one<T: JsonSchema>(out_dir: &Path, name: &str) -> Result<()> {
    let schema = schema_for!(T);
    let path = out_dir.join(format!("{name}.schema.json"));
    fs::write(&path, serde_json::to_string_pretty(&schema)?)?;
    info!("wrote {}", path.display());
    Ok(())
}

/// Writes the JSON schemas of the builders' inputs and outputs into
/// `out_dir`, returning the names written.
pub fn write_schema(out_dir: &Path) -> Result<Vec<&'static str>> {
    fs::create_dir_all(out_dir)?;
    write_one::<LogEntry>(out_dir, "log-entry")?;
    write_one::<TraceNode>(out_dir, "trace-node")?;
    write_one::<ExecutionRecord>(out_dir, "execution-record")?;
    write_one::<BranchNode>(out_dir, "branch-node")?;
    write_one::<DslNode>(out_dir, "dsl-node")?;
    Ok(vec!["log-entry", "trace-node", "execution-record", "branch-node", "dsl-node"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_schema() {
        let dir = tempdir().unwrap();
        let names = write_schema(dir.path()).unwrap();
        for name in names {
            let text = fs::read_to_string(dir.path().join(format!("{name}.schema.json"))).unwrap();
            let schema: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert!(schema.get("title").is_some(), "{name} has no title");
        }
    }
}
