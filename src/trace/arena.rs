use super::types::{BranchNode, ParallelGroup, RecordNode};

/// Handle on a node allocated in a [`BranchArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeKey(usize);

enum Slot {
    Group {
        group: ParallelGroup,
        children: Vec<NodeKey>,
    },
    Record(RecordNode),
}

/// Flat storage for a branch tree under construction.
///
/// Nodes are linked by key, so placing a node in the middle of a sibling
/// list never moves already placed subtrees. Render keys are handed out in
/// allocation order.
#[derive(Default)]
pub struct BranchArena {
    slots: Vec<Slot>,
    roots: Vec<NodeKey>,
}

impl BranchArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_group(&mut self, mut group: ParallelGroup) -> NodeKey {
        let key = NodeKey(self.slots.len());
        group.key = key.0;
        group.children.clear();
        self.slots.push(Slot::Group {
            group,
            children: Vec::new(),
        });
        key
    }

    pub fn alloc_record(&mut self, mut node: RecordNode) -> NodeKey {
        let key = NodeKey(self.slots.len());
        node.key = key.0;
        self.slots.push(Slot::Record(node));
        key
    }

    /// Children of `parent`, or the root sequence for `None`.
    pub fn children(&self, parent: Option<NodeKey>) -> &[NodeKey] {
        match parent {
            None => &self.roots,
            Some(key) => match &self.slots[key.0] {
                Slot::Group { children, .. } => children,
                Slot::Record(_) => &[],
            },
        }
    }

    fn children_mut(&mut self, parent: Option<NodeKey>) -> Option<&mut Vec<NodeKey>> {
        match parent {
            None => Some(&mut self.roots),
            Some(key) => match &mut self.slots[key.0] {
                Slot::Group { children, .. } => Some(children),
                Slot::Record(_) => None,
            },
        }
    }

    pub fn push(&mut self, parent: Option<NodeKey>, key: NodeKey) {
        if let Some(children) = self.children_mut(parent) {
            children.push(key);
        }
    }

    /// Places `key` right after `anchor` among the children of `parent`.
    /// Appends when `anchor` is not one of them.
    pub fn insert_after(&mut self, parent: Option<NodeKey>, anchor: NodeKey, key: NodeKey) {
        if let Some(children) = self.children_mut(parent) {
            match children.iter().position(|&k| k == anchor) {
                Some(pos) => children.insert(pos + 1, key),
                None => children.push(key),
            }
        }
    }

    pub fn group(&self, key: NodeKey) -> Option<&ParallelGroup> {
        match &self.slots[key.0] {
            Slot::Group { group, .. } => Some(group),
            Slot::Record(_) => None,
        }
    }

    pub fn record(&self, key: NodeKey) -> Option<&RecordNode> {
        match &self.slots[key.0] {
            Slot::Record(node) => Some(node),
            Slot::Group { .. } => None,
        }
    }

    pub fn into_tree(self) -> Vec<BranchNode> {
        let mut slots: Vec<Option<Slot>> = self.slots.into_iter().map(Some).collect();
        self.roots
            .iter()
            .filter_map(|&key| take(&mut slots, key))
            .collect()
    }
}

fn take(slots: &mut [Option<Slot>], key: NodeKey) -> Option<BranchNode> {
    match slots[key.0].take()? {
        Slot::Record(node) => Some(BranchNode::Record(node)),
        Slot::Group {
            mut group,
            children,
        } => {
            group.children = children
                .into_iter()
                .filter_map(|child| take(slots, child))
                .collect();
            Some(BranchNode::Parallel(group))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::types::ExecutionRecord;

    fn record(arena: &mut BranchArena, id: &str) -> NodeKey {
        arena.alloc_record(RecordNode {
            key: 0,
            branch_title: None,
            record: ExecutionRecord::new(id, id, "llm"),
        })
    }

    fn group(arena: &mut BranchArena, id: &str) -> NodeKey {
        arena.alloc_group(ParallelGroup {
            key: 0,
            id: id.into(),
            title: format!("Parallel-{id}"),
            level: 1,
            origin: None,
            children: vec![],
        })
    }

    #[test]
    fn test_insert_after_keeps_placed_subtrees() {
        let mut arena = BranchArena::new();
        let a = record(&mut arena, "a");
        let g = group(&mut arena, "p");
        let c = record(&mut arena, "c");
        arena.push(None, a);
        arena.push(None, g);
        let inner = record(&mut arena, "inner");
        arena.push(Some(g), inner);
        arena.insert_after(None, a, c);

        let tree = arena.into_tree();
        let ids: Vec<_> = tree
            .iter()
            .map(|n| match n {
                BranchNode::Record(r) => r.record.id.clone(),
                BranchNode::Parallel(p) => p.id.clone(),
            })
            .collect();
        assert_eq!(ids, vec!["a", "c", "p"]);
        assert_eq!(tree[2].as_group().unwrap().children.len(), 1);
    }

    #[test]
    fn test_render_keys_follow_allocation_order() {
        let mut arena = BranchArena::new();
        let a = record(&mut arena, "a");
        let b = record(&mut arena, "b");
        arena.push(None, b);
        arena.push(None, a);
        let tree = arena.into_tree();
        assert_eq!(tree[0].as_record().unwrap().key, 1);
        assert_eq!(tree[1].as_record().unwrap().key, 0);
    }

    #[test]
    fn test_missing_anchor_appends() {
        let mut arena = BranchArena::new();
        let g = group(&mut arena, "p");
        let other = record(&mut arena, "x");
        let late = record(&mut arena, "late");
        arena.push(None, g);
        arena.insert_after(Some(g), other, late);
        assert_eq!(arena.children(Some(g)), &[late]);
    }
}
