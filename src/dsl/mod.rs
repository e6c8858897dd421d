//! A compact notation for execution shapes, used to synthesize fixtures
//! for the tree builders.
//!
//! ```text
//! start -> (parallel, p, a, b -> c) -> (retry, r, 2) -> end
//! ```

pub mod fixture;
pub mod parser;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fixture::to_records;
pub use parser::parse_dsl;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Plain,
    Iteration,
    Parallel,
    Retry,
}

impl std::str::FromStr for NodeType {
    type Err = DslError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "iteration" => Ok(NodeType::Iteration),
            "parallel" => Ok(NodeType::Parallel),
            "retry" => Ok(NodeType::Retry),
            other => Err(DslError::UnknownKind(other.to_string())),
        }
    }
}

/// A parameter of a complex node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Param {
    Number(f64),
    Node(DslNode),
    /// A branch of two or more steps.
    Sequence(Vec<DslNode>),
}

impl Param {
    /// The steps of this parameter, if it holds any.
    pub fn steps(&self) -> &[DslNode] {
        match self {
            Param::Number(_) => &[],
            Param::Node(node) => std::slice::from_ref(node),
            Param::Sequence(nodes) => nodes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DslNode {
    pub node_type: NodeType,
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_index: Option<usize>,
}

impl DslNode {
    pub fn plain(node_id: impl Into<String>) -> Self {
        DslNode {
            node_type: NodeType::Plain,
            node_id: node_id.into(),
            params: Vec::new(),
            iteration_id: None,
            iteration_index: None,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum DslError {
    #[error("unbalanced parentheses at byte {position}")]
    Unbalanced { position: usize },

    #[error("unknown node kind `{0}`")]
    UnknownKind(String),

    #[error("`{kind}` node has no id")]
    MissingId { kind: String },

    #[error("empty step")]
    EmptySegment,

    #[error("malformed step `{0}`")]
    Malformed(String),

    #[error("retry count {count} of `{node_id}` is not between 0 and {max}", max = fixture::MAX_RETRIES)]
    RetryCount { node_id: String, count: f64 },
}
