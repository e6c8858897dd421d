use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use super::{
    arena::{BranchArena, NodeKey},
    types::{BranchNode, ExecutionRecord, ParallelGroup, RecordNode},
};

/// `0 -> A`, `25 -> Z`, `26 -> AA`.
pub fn index_letter(index: usize) -> String {
    let mut letters = Vec::new();
    let mut n = index + 1;
    while n > 0 {
        n -= 1;
        letters.push(char::from(b'A' + (n % 26) as u8));
        n /= 26;
    }
    letters.iter().rev().collect()
}

/// Result of the counting pass: the enclosing scope of every parallel id
/// and, where a scope holds several forks, the letter of each.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeIndex {
    scopes: HashMap<String, Option<String>>,
    letters: HashMap<String, String>,
}

impl ScopeIndex {
    /// The parent parallel id `parallel_id` was first seen under.
    pub fn scope(&self, parallel_id: &str) -> Option<&str> {
        self.scopes.get(parallel_id).and_then(|s| s.as_deref())
    }

    /// Empty when the fork is alone in its scope.
    pub fn letter(&self, parallel_id: &str) -> &str {
        self.letters.get(parallel_id).map(String::as_str).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

/// First pass: which forks share a scope, in first-seen order.
pub fn count_scopes(records: &[ExecutionRecord]) -> ScopeIndex {
    let mut scopes: HashMap<String, Option<String>> = HashMap::new();
    let mut members: Vec<(Option<String>, Vec<String>)> = Vec::new();

    for record in records.iter().filter(|r| !r.is_end()) {
        let Some(parallel_id) = record.parallel_id() else {
            continue;
        };
        if scopes.contains_key(parallel_id) {
            continue;
        }
        let scope = record.parent_parallel_id().map(str::to_string);
        scopes.insert(parallel_id.to_string(), scope.clone());
        match members.iter_mut().find(|(s, _)| *s == scope) {
            Some((_, ids)) => ids.push(parallel_id.to_string()),
            None => members.push((scope, vec![parallel_id.to_string()])),
        }
    }

    let mut letters = HashMap::new();
    for (_, ids) in members.into_iter().filter(|(_, ids)| ids.len() > 1) {
        for (i, id) in ids.into_iter().enumerate() {
            letters.insert(id, index_letter(i));
        }
    }

    ScopeIndex { scopes, letters }
}

struct GroupState {
    key: NodeKey,
    level: usize,
    /// `{level}{letter}`, shared by the group title and its branch titles.
    label: String,
    opened: HashSet<String>,
}

struct Placement<'a> {
    scopes: &'a ScopeIndex,
    arena: BranchArena,
    groups: HashMap<String, GroupState>,
}

impl Placement<'_> {
    fn open_group(&mut self, parallel_id: &str, record: &ExecutionRecord) {
        // the scope from the counting pass also decided this fork's letter
        let scopes = self.scopes;
        let parent_id = scopes
            .scope(parallel_id)
            .or_else(|| record.parent_parallel_id());
        let parent = parent_id.and_then(|id| self.groups.get(id)).map(|g| (g.key, g.level));
        if let (Some(id), None) = (parent_id, parent) {
            warn!(parallel_id, parent_parallel_id = id, "enclosing fork not seen yet, placing at root");
        }

        let level = parent.map(|(_, level)| level + 1).unwrap_or(1);
        let label = format!("{level}{}", self.scopes.letter(parallel_id));
        let origin = record.parent_parallel_start_node_id().map(str::to_string);
        let key = self.arena.alloc_group(ParallelGroup {
            key: 0,
            id: parallel_id.to_string(),
            title: format!("Parallel-{label}"),
            level,
            origin: origin.clone(),
            children: Vec::new(),
        });
        debug!(parallel_id, level, "opened parallel group");

        match parent {
            Some((parent_key, _)) => match origin.as_deref().and_then(|o| self.last_of_branch(parent_key, o)) {
                Some(anchor) => self.arena.insert_after(Some(parent_key), anchor, key),
                None => self.arena.push(Some(parent_key), key),
            },
            None => self.arena.push(None, key),
        }

        self.groups.insert(
            parallel_id.to_string(),
            GroupState {
                key,
                level,
                label,
                opened: HashSet::new(),
            },
        );
    }

    /// Last child of `group` that belongs to the branch started by `start`:
    /// its records, and forks opened from it.
    fn last_of_branch(&self, group: NodeKey, start: &str) -> Option<NodeKey> {
        self.arena.children(Some(group)).iter().rev().copied().find(|&child| {
            match (self.arena.record(child), self.arena.group(child)) {
                (Some(node), _) => node.record.parallel_start_node_id() == Some(start),
                (_, Some(nested)) => nested.origin.as_deref() == Some(start),
                _ => false,
            }
        })
    }

    fn place(&mut self, parallel_id: &str, record: ExecutionRecord) {
        if !self.groups.contains_key(parallel_id) {
            self.open_group(parallel_id, &record);
        }
        let Some(state) = self.groups.get_mut(parallel_id) else {
            return;
        };
        let group = state.key;
        let start = record.parallel_start_node_id().map(str::to_string);

        let Some(start) = start else {
            debug!(id = %record.id, parallel_id, "record without branch start, appending to group");
            let key = self.alloc(record, None);
            self.arena.push(Some(group), key);
            return;
        };

        if record.node_id == start && !state.opened.contains(&start) {
            let title = format!("Branch-{}-{}", state.label, index_letter(state.opened.len()));
            state.opened.insert(start);
            let key = self.alloc(record, Some(title));
            self.arena.push(Some(group), key);
            return;
        }

        let anchor = self
            .arena
            .children(Some(group))
            .iter()
            .rposition(|&child| {
                self.arena
                    .record(child)
                    .is_some_and(|node| node.record.parallel_start_node_id() == Some(start.as_str()))
            })
            .map(|mut pos| {
                let children = self.arena.children(Some(group));
                // keep forks opened from this branch next to it
                while pos + 1 < children.len() && self.arena.group(children[pos + 1]).is_some() {
                    pos += 1;
                }
                children[pos]
            });

        let key = self.alloc(record, None);
        match anchor {
            Some(anchor) => self.arena.insert_after(Some(group), anchor, key),
            None => {
                debug!(parallel_id, start = %start, "branch continues before it was opened");
                self.arena.push(Some(group), key);
            }
        }
    }

    fn alloc(&mut self, record: ExecutionRecord, branch_title: Option<String>) -> NodeKey {
        self.arena.alloc_record(RecordNode {
            key: 0,
            branch_title,
            record,
        })
    }
}

/// Second pass: a single walk placing every record in the tree.
pub fn place_records(records: &[ExecutionRecord], scopes: &ScopeIndex) -> Vec<BranchNode> {
    let mut placement = Placement {
        scopes,
        arena: BranchArena::new(),
        groups: HashMap::new(),
    };

    for record in records {
        match record.parallel_id() {
            Some(parallel_id) if !record.is_end() => {
                let parallel_id = parallel_id.to_string();
                placement.place(&parallel_id, record.clone());
            }
            _ => {
                let key = placement.alloc(record.clone(), None);
                placement.arena.push(None, key);
            }
        }
    }

    placement.arena.into_tree()
}

/// Groups execution records into parallel forks and titled branches.
pub fn build_branch_tree(records: &[ExecutionRecord]) -> Vec<BranchNode> {
    let scopes = count_scopes(records);
    place_records(records, &scopes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(id: &str) -> ExecutionRecord {
        ExecutionRecord::new(id, id, "llm")
    }

    fn branch(id: &str, parallel: &str, start: &str) -> ExecutionRecord {
        ExecutionRecord {
            parallel_id: Some(parallel.into()),
            parallel_start_node_id: Some(start.into()),
            ..plain(id)
        }
    }

    fn nested(id: &str, parallel: &str, start: &str, parent: &str, parent_start: &str) -> ExecutionRecord {
        ExecutionRecord {
            parent_parallel_id: Some(parent.into()),
            parent_parallel_start_node_id: Some(parent_start.into()),
            ..branch(id, parallel, start)
        }
    }

    fn node_ids(nodes: &[BranchNode]) -> Vec<String> {
        nodes
            .iter()
            .map(|n| match n {
                BranchNode::Record(r) => r.record.id.clone(),
                BranchNode::Parallel(p) => format!("[{}]", p.id),
            })
            .collect()
    }

    #[test]
    fn test_index_letter() {
        assert_eq!(index_letter(0), "A");
        assert_eq!(index_letter(1), "B");
        assert_eq!(index_letter(25), "Z");
        assert_eq!(index_letter(26), "AA");
        assert_eq!(index_letter(27), "AB");
    }

    #[test]
    fn test_single_fork_has_no_letter() {
        let tree = build_branch_tree(&[
            plain("start"),
            branch("a", "p1", "a"),
            branch("b", "p1", "b"),
            branch("a2", "p1", "a"),
            ExecutionRecord::new("end", "end", "end"),
        ]);
        assert_eq!(node_ids(&tree), vec!["start", "[p1]", "end"]);
        let group = tree[1].as_group().unwrap();
        assert_eq!(group.title, "Parallel-1");
        assert_eq!(group.level, 1);
        assert_eq!(node_ids(&group.children), vec!["a", "a2", "b"]);
        assert_eq!(group.children[0].title(), Some("Branch-1-A"));
        assert_eq!(group.children[1].title(), None);
        assert_eq!(group.children[2].title(), Some("Branch-1-B"));
    }

    #[test]
    fn test_sibling_forks_get_distinct_letters() {
        let tree = build_branch_tree(&[
            branch("a", "p1", "a"),
            branch("b", "p1", "b"),
            plain("join"),
            branch("c", "p2", "c"),
            branch("d", "p2", "d"),
        ]);
        assert_eq!(node_ids(&tree), vec!["[p1]", "join", "[p2]"]);
        let titles: Vec<_> = tree.iter().filter_map(|n| n.as_group()).map(|g| g.title.as_str()).collect();
        assert_eq!(titles, vec!["Parallel-1A", "Parallel-1B"]);
        let first = tree.iter().find_map(|n| n.as_group()).unwrap();
        assert_eq!(first.children[0].title(), Some("Branch-1A-A"));
        assert_eq!(first.children[1].title(), Some("Branch-1A-B"));
    }

    #[test]
    fn test_nested_fork_sits_after_its_branch() {
        let tree = build_branch_tree(&[
            branch("a", "outer", "a"),
            branch("b", "outer", "b"),
            nested("x", "inner", "x", "outer", "a"),
            nested("y", "inner", "y", "outer", "a"),
            branch("b2", "outer", "b"),
            branch("a2", "outer", "a"),
        ]);
        let outer = tree[0].as_group().unwrap();
        assert_eq!(outer.level, 1);
        assert_eq!(node_ids(&outer.children), vec!["a", "[inner]", "a2", "b", "b2"]);

        let inner = outer.children[1].as_group().unwrap();
        assert_eq!(inner.level, outer.level + 1);
        assert_eq!(inner.title, "Parallel-2");
        assert_eq!(inner.origin.as_deref(), Some("a"));
        assert_eq!(inner.children[0].title(), Some("Branch-2-A"));
        assert_eq!(inner.children[1].title(), Some("Branch-2-B"));
    }

    #[test]
    fn test_end_record_goes_to_root_inside_fork() {
        let mut end = ExecutionRecord::new("end", "end", "end");
        end.parallel_id = Some("p1".into());
        let tree = build_branch_tree(&[branch("a", "p1", "a"), end]);
        assert_eq!(node_ids(&tree), vec!["[p1]", "end"]);
    }

    #[test]
    fn test_unknown_parent_fork_goes_to_root() {
        let tree = build_branch_tree(&[nested("x", "inner", "x", "missing", "m")]);
        let group = tree[0].as_group().unwrap();
        assert_eq!(group.level, 1);
        assert_eq!(group.title, "Parallel-1");
    }

    #[test]
    fn test_count_scopes() {
        let records = [
            branch("a", "p1", "a"),
            nested("x", "n1", "x", "p1", "a"),
            nested("y", "n2", "y", "p1", "a"),
            branch("c", "p2", "c"),
        ];
        let scopes = count_scopes(&records);
        assert_eq!(scopes.len(), 4);
        assert_eq!(scopes.scope("n1"), Some("p1"));
        assert_eq!(scopes.scope("p1"), None);
        assert_eq!(scopes.letter("p1"), "A");
        assert_eq!(scopes.letter("p2"), "B");
        assert_eq!(scopes.letter("n2"), "B");
    }

    #[test]
    fn test_placement_nests_by_counted_scope() {
        let records = [
            branch("a", "outer", "a"),
            nested("x", "inner", "x", "outer", "a"),
        ];
        let scopes = count_scopes(&records);
        // same records, minus the enclosing-fork fields
        let flat = [branch("a", "outer", "a"), branch("x", "inner", "x")];

        let tree = place_records(&flat, &scopes);
        assert_eq!(node_ids(&tree), vec!["[outer]"]);
        let outer = tree[0].as_group().unwrap();
        assert_eq!(node_ids(&outer.children), vec!["a", "[inner]"]);
        assert_eq!(outer.children[1].as_group().unwrap().level, 2);
    }

    #[test]
    fn test_render_keys_are_unique() {
        let tree = build_branch_tree(&[branch("a", "p", "a"), branch("b", "p", "b"), plain("z")]);
        let mut keys = Vec::new();
        fn collect(nodes: &[BranchNode], keys: &mut Vec<usize>) {
            for node in nodes {
                match node {
                    BranchNode::Record(r) => keys.push(r.key),
                    BranchNode::Parallel(p) => {
                        keys.push(p.key);
                        collect(&p.children, keys);
                    }
                }
            }
        }
        collect(&tree, &mut keys);
        let unique: HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());
    }
}
