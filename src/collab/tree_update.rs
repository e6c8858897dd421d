use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::manager::TransportManager;

/// Broadcast whenever the shared file/skill tree of a document changes.
pub const SKILL_TREE_UPDATE: &str = "skill_tree_update";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeUpdate {
    pub doc_id: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl TreeUpdate {
    pub fn new(doc_id: impl Into<String>, payload: Value) -> Self {
        TreeUpdate {
            doc_id: doc_id.into(),
            payload,
            sent_at: Some(Utc::now()),
        }
    }
}

/// Tells the other editors of `doc_id` that its tree changed. Returns false
/// when the document has no socket.
pub fn emit_tree_update(manager: &TransportManager, doc_id: &str, payload: Value) -> bool {
    let update = TreeUpdate::new(doc_id, payload);
    match serde_json::to_value(&update) {
        Ok(data) => manager.emit(doc_id, SKILL_TREE_UPDATE, data),
        Err(err) => {
            warn!(doc_id, "could not encode tree update: {}", err);
            false
        }
    }
}

/// Calls `callback` for tree updates addressed to `doc_id`. Updates for
/// other documents, and malformed ones, are dropped.
pub fn on_tree_update<F>(manager: &TransportManager, doc_id: &str, callback: F) -> bool
where
    F: Fn(TreeUpdate) + Send + Sync + 'static,
{
    let doc = doc_id.to_string();
    manager.on(doc_id, SKILL_TREE_UPDATE, move |data| {
        match serde_json::from_value::<TreeUpdate>(data.clone()) {
            Ok(update) if update.doc_id == doc => callback(update),
            Ok(update) => debug!(doc_id = %doc, other = %update.doc_id, "ignoring tree update for another document"),
            Err(err) => warn!(doc_id = %doc, "malformed tree update: {}", err),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let update: TreeUpdate =
            serde_json::from_value(json!({"doc_id": "app-1", "payload": {"files": 3}})).unwrap();
        assert_eq!(update.doc_id, "app-1");
        assert_eq!(update.sent_at, None);

        let encoded = serde_json::to_value(TreeUpdate::new("app-1", json!(null))).unwrap();
        assert_eq!(encoded["doc_id"], json!("app-1"));
        assert!(encoded.get("sent_at").is_some());
    }
}
