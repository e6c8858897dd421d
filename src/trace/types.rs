use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One step of an agent run as logged by the execution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LogEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub label: String,
    /// Everything else the engine attached; carried through untouched.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl LogEntry {
    pub fn new(id: impl Into<String>, parent_id: Option<&str>) -> Self {
        let id = id.into();
        LogEntry {
            label: id.clone(),
            id,
            parent_id: parent_id.map(str::to_string),
            payload: Map::new(),
        }
    }

    /// Engines log the root step with an empty parent.
    pub fn parent(&self) -> Option<&str> {
        self.parent_id.as_deref().filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TraceNode {
    pub id: String,
    pub label: String,
    pub children: Vec<TraceNode>,
    /// Set on the first repeat of a step inside its own ancestry; such a
    /// node is never expanded.
    #[serde(rename = "hasCircle", default, skip_serializing_if = "std::ops::Not::not")]
    pub has_circle: bool,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl TraceNode {
    pub fn from_entry(entry: &LogEntry) -> Self {
        TraceNode {
            id: entry.id.clone(),
            label: entry.label.clone(),
            children: Vec::new(),
            has_circle: false,
            payload: entry.payload.clone(),
        }
    }
}

impl Drop for TraceNode {
    // flatten before dropping so deep agent chains do not recurse per level
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

/// A node execution record as emitted by the workflow engine.
///
/// The parallel fields may live at the top level or inside
/// `execution_metadata`; the accessors look at both, top level first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct ExecutionRecord {
    pub id: String,
    pub node_id: String,
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_parallel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_start_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_parallel_start_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_metadata: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExecutionRecord {
    pub fn new(id: impl Into<String>, node_id: impl Into<String>, node_type: impl Into<String>) -> Self {
        ExecutionRecord {
            id: id.into(),
            node_id: node_id.into(),
            node_type: node_type.into(),
            ..Default::default()
        }
    }

    fn field<'a>(&'a self, top: &'a Option<String>, key: &str) -> Option<&'a str> {
        top.as_deref().or_else(|| {
            self.execution_metadata
                .as_ref()
                .and_then(|meta| meta.get(key))
                .and_then(Value::as_str)
        })
    }

    pub fn parallel_id(&self) -> Option<&str> {
        self.field(&self.parallel_id, "parallel_id")
    }

    pub fn parent_parallel_id(&self) -> Option<&str> {
        self.field(&self.parent_parallel_id, "parent_parallel_id")
    }

    pub fn parallel_start_node_id(&self) -> Option<&str> {
        self.field(&self.parallel_start_node_id, "parallel_start_node_id")
    }

    pub fn parent_parallel_start_node_id(&self) -> Option<&str> {
        self.field(&self.parent_parallel_start_node_id, "parent_parallel_start_node_id")
    }

    pub fn is_end(&self) -> bool {
        self.node_type == "end"
    }

    pub fn in_parallel(&self) -> bool {
        self.parallel_id().is_some()
    }
}

/// Output of the branch tree builder.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BranchNode {
    Parallel(ParallelGroup),
    Record(RecordNode),
}

/// Synthetic node standing for one parallel fork.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ParallelGroup {
    /// Render key, unique within one build.
    pub key: usize,
    /// The `parallel_id` this group stands for.
    pub id: String,
    pub title: String,
    pub level: usize,
    /// Start node of the enclosing branch this fork was opened from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub children: Vec<BranchNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RecordNode {
    pub key: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_title: Option<String>,
    #[serde(flatten)]
    pub record: ExecutionRecord,
}

// render keys are not part of structural equality

impl PartialEq for ParallelGroup {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.title == other.title
            && self.level == other.level
            && self.origin == other.origin
            && self.children == other.children
    }
}

impl PartialEq for RecordNode {
    fn eq(&self, other: &Self) -> bool {
        self.branch_title == other.branch_title && self.record == other.record
    }
}

impl PartialEq for BranchNode {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (BranchNode::Parallel(a), BranchNode::Parallel(b)) => a == b,
            (BranchNode::Record(a), BranchNode::Record(b)) => a == b,
            _ => false,
        }
    }
}

impl BranchNode {
    pub fn title(&self) -> Option<&str> {
        match self {
            BranchNode::Parallel(group) => Some(&group.title),
            BranchNode::Record(node) => node.branch_title.as_deref(),
        }
    }

    pub fn as_group(&self) -> Option<&ParallelGroup> {
        match self {
            BranchNode::Parallel(group) => Some(group),
            BranchNode::Record(_) => None,
        }
    }

    pub fn as_record(&self) -> Option<&RecordNode> {
        match self {
            BranchNode::Record(node) => Some(node),
            BranchNode::Parallel(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parallel_fields_fall_back_to_execution_metadata() {
        let record: ExecutionRecord = serde_json::from_value(json!({
            "id": "r1",
            "node_id": "n1",
            "node_type": "llm",
            "parallel_id": "top",
            "execution_metadata": {
                "parallel_id": "ignored",
                "parallel_start_node_id": "n1",
                "parent_parallel_id": "outer"
            },
            "elapsed_time": 0.4
        }))
        .unwrap();
        assert_eq!(record.parallel_id(), Some("top"));
        assert_eq!(record.parallel_start_node_id(), Some("n1"));
        assert_eq!(record.parent_parallel_id(), Some("outer"));
        assert_eq!(record.parent_parallel_start_node_id(), None);
        assert_eq!(record.extra.get("elapsed_time"), Some(&json!(0.4)));
    }

    #[test]
    fn test_trace_node_serializes_has_circle_only_when_set() {
        let mut node = TraceNode::from_entry(&LogEntry::new("a", None));
        assert!(serde_json::to_value(&node).unwrap().get("hasCircle").is_none());
        node.has_circle = true;
        assert_eq!(serde_json::to_value(&node).unwrap()["hasCircle"], json!(true));
    }

    #[test]
    fn test_empty_parent_is_no_parent() {
        let entry: LogEntry = serde_json::from_value(json!({"id": "a", "parent_id": ""})).unwrap();
        assert_eq!(entry.parent(), None);
        assert_eq!(entry.label, "");
    }

    #[test]
    fn test_render_key_is_ignored_by_equality() {
        let a = RecordNode { key: 1, branch_title: None, record: ExecutionRecord::new("r", "n", "llm") };
        let b = RecordNode { key: 9, ..a.clone() };
        assert_eq!(BranchNode::Record(a), BranchNode::Record(b));
    }
}
