use std::collections::HashMap;

use tracing::{debug, warn};

use super::types::{LogEntry, TraceNode};

struct Slot {
    node: TraceNode,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// Nests agent log entries under their parents.
///
/// A step keeps the position of its first occurrence. When a step shows up
/// again below itself (an agent loop) the first occurrence is flagged with
/// `has_circle` and rendered without children. Other repeats are folded
/// into the first occurrence. Entries pointing at a parent that was never
/// logged start a new root.
pub fn build_agent_tree(entries: &[LogEntry]) -> Vec<TraceNode> {
    let mut slots: Vec<Slot> = Vec::with_capacity(entries.len());
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut roots: Vec<usize> = Vec::new();

    for entry in entries {
        let parent = entry.parent();

        if let Some(&existing) = index.get(entry.id.as_str()) {
            let parent_slot = parent.and_then(|p| index.get(p).copied());
            if ancestors(&slots, parent_slot).any(|slot| slot == existing) {
                debug!(id = %entry.id, "agent loop detected");
                slots[existing].node.has_circle = true;
            } else {
                debug!(id = %entry.id, "folding repeated step into its first occurrence");
            }
            continue;
        }

        let mut node = TraceNode::from_entry(entry);
        let parent_slot = match parent {
            Some(p) if p == entry.id => {
                node.has_circle = true;
                None
            }
            Some(p) => match index.get(p) {
                Some(&slot) => Some(slot),
                None => {
                    warn!(id = %entry.id, parent_id = p, "parent step was never logged, starting a new root");
                    None
                }
            },
            None => None,
        };

        let slot = slots.len();
        slots.push(Slot {
            node,
            parent: parent_slot,
            children: Vec::new(),
        });
        index.insert(entry.id.as_str(), slot);
        match parent_slot {
            Some(p) => slots[p].children.push(slot),
            None => roots.push(slot),
        }
    }

    materialize(&slots, &roots)
}

/// Walks from `start` up to its root, `start` included.
fn ancestors(slots: &[Slot], start: Option<usize>) -> impl Iterator<Item = usize> + '_ {
    std::iter::successors(start, move |&slot| slots[slot].parent)
}

/// Children always sit at higher slots than their parent, so a reverse
/// sweep finishes every subtree before its parent is reached.
fn materialize(slots: &[Slot], roots: &[usize]) -> Vec<TraceNode> {
    let mut built: Vec<Option<TraceNode>> = Vec::with_capacity(slots.len());
    built.resize_with(slots.len(), || None);
    for (index, slot) in slots.iter().enumerate().rev() {
        let mut node = slot.node.clone();
        if !node.has_circle {
            node.children = slot
                .children
                .iter()
                .filter_map(|&child| built[child].take())
                .collect();
        }
        built[index] = Some(node);
    }
    roots.iter().filter_map(|&root| built[root].take()).collect()
}
