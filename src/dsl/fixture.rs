use std::collections::HashMap;

use tracing::warn;

use super::{DslError, DslNode, NodeType, Param};
use crate::trace::ExecutionRecord;

/// Upper bound on the attempts a single retry node may expand to.
pub const MAX_RETRIES: usize = 1_000;

#[derive(Debug, Clone, Default)]
struct Context {
    parallel_id: Option<String>,
    start_node_id: Option<String>,
    parent_parallel_id: Option<String>,
    parent_start_node_id: Option<String>,
    iteration_id: Option<String>,
}

impl Context {
    fn branch(&self, parallel_id: &str, start_node_id: &str) -> Context {
        Context {
            parallel_id: Some(parallel_id.to_string()),
            start_node_id: Some(start_node_id.to_string()),
            parent_parallel_id: self.parallel_id.clone(),
            parent_start_node_id: self.start_node_id.clone(),
            iteration_id: self.iteration_id.clone(),
        }
    }
}

#[derive(Default)]
struct Synth {
    records: Vec<ExecutionRecord>,
    emitted: HashMap<String, usize>,
}

impl Synth {
    fn emit(&mut self, node_id: &str, node_type: &str, status: &str, ctx: &Context) {
        let count = self.emitted.entry(node_id.to_string()).or_insert(0);
        let id = match *count {
            0 => node_id.to_string(),
            k => format!("{node_id}#{k}"),
        };
        *count += 1;

        self.records.push(ExecutionRecord {
            title: Some(node_id.to_string()),
            status: Some(status.to_string()),
            parallel_id: ctx.parallel_id.clone(),
            parallel_start_node_id: ctx.start_node_id.clone(),
            parent_parallel_id: ctx.parent_parallel_id.clone(),
            parent_parallel_start_node_id: ctx.parent_start_node_id.clone(),
            iteration_id: ctx.iteration_id.clone(),
            iteration_index: ctx.iteration_id.as_ref().map(|_| 0),
            ..ExecutionRecord::new(id, node_id, node_type)
        });
    }

    fn walk(&mut self, nodes: &[DslNode], ctx: &Context) -> Result<(), DslError> {
        for node in nodes {
            let id = node.node_id.as_str();
            match node.node_type {
                NodeType::Plain => {
                    let node_type = if id == "end" { "end" } else { "plain" };
                    self.emit(id, node_type, "succeeded", ctx);
                }
                NodeType::Iteration => {
                    self.emit(id, "iteration", "succeeded", ctx);
                    let inner = Context {
                        iteration_id: Some(id.to_string()),
                        ..ctx.clone()
                    };
                    for param in &node.params {
                        self.walk(param.steps(), &inner)?;
                    }
                }
                NodeType::Parallel => {
                    self.emit(id, "parallel", "succeeded", ctx);
                    for param in &node.params {
                        let steps = param.steps();
                        let Some(first) = steps.first() else {
                            warn!(parallel = id, "numeric branch ignored");
                            continue;
                        };
                        self.walk(steps, &ctx.branch(id, &first.node_id))?;
                    }
                }
                NodeType::Retry => {
                    let retries = match node.params.iter().find_map(|p| match p {
                        Param::Number(n) => Some(*n),
                        _ => None,
                    }) {
                        Some(n) if n.is_finite() && n >= 0.0 && n <= MAX_RETRIES as f64 => n as usize,
                        Some(count) => {
                            return Err(DslError::RetryCount {
                                node_id: id.to_string(),
                                count,
                            });
                        }
                        None => 0,
                    };
                    for _ in 0..retries {
                        self.emit(id, "plain", "retry", ctx);
                    }
                    self.emit(id, "plain", "succeeded", ctx);
                }
            }
        }
        Ok(())
    }
}

/// Synthesizes the execution records an engine would log for `nodes`.
///
/// Fails on a retry count that is negative, not finite, or above
/// [`MAX_RETRIES`].
pub fn to_records(nodes: &[DslNode]) -> Result<Vec<ExecutionRecord>, DslError> {
    let mut synth = Synth::default();
    synth.walk(nodes, &Context::default())?;
    Ok(synth.records)
}
