// tests/trace_test.rs
use flowtrace::dsl::{parse_dsl, to_records};
use flowtrace::trace::{
    BranchNode, ExecutionRecord, LogEntry, ParallelGroup, build_agent_tree, build_branch_tree,
    count_scopes, place_records,
};
use serde_json::json;

fn tree_of(text: &str) -> Vec<BranchNode> {
    build_branch_tree(&to_records(&parse_dsl(text).expect("valid expression")).expect("bounded retries"))
}

fn labels(nodes: &[BranchNode]) -> Vec<String> {
    nodes
        .iter()
        .map(|node| match node {
            BranchNode::Record(r) => match &r.branch_title {
                Some(title) => format!("{}<{title}>", r.record.id),
                None => r.record.id.clone(),
            },
            BranchNode::Parallel(p) => format!("[{}]", p.title),
        })
        .collect()
}

fn group<'a>(nodes: &'a [BranchNode], title: &str) -> &'a ParallelGroup {
    nodes
        .iter()
        .filter_map(BranchNode::as_group)
        .find(|g| g.title == title)
        .unwrap_or_else(|| panic!("no group {title}"))
}

#[test]
fn test_nested_fork_from_expression() {
    let tree = tree_of("start -> (parallel, p, a -> b, (parallel, q, x, y -> z), c) -> end");

    assert_eq!(labels(&tree), vec!["start", "p", "[Parallel-1]", "end"]);

    let outer = group(&tree, "Parallel-1");
    assert_eq!(
        labels(&outer.children),
        vec!["a<Branch-1-A>", "b", "q<Branch-1-B>", "[Parallel-2]", "c<Branch-1-C>"]
    );

    let inner = group(&outer.children, "Parallel-2");
    assert_eq!(inner.level, outer.level + 1);
    assert_eq!(labels(&inner.children), vec!["x<Branch-2-A>", "y<Branch-2-B>", "z"]);
}

#[test]
fn test_sibling_forks_from_expression() {
    let tree = tree_of("(parallel, p1, a, b) -> (parallel, p2, c, d)");
    assert_eq!(labels(&tree), vec!["p1", "[Parallel-1A]", "p2", "[Parallel-1B]"]);
    assert_eq!(
        labels(&group(&tree, "Parallel-1A").children),
        vec!["a<Branch-1A-A>", "b<Branch-1A-B>"]
    );
    assert_eq!(
        labels(&group(&tree, "Parallel-1B").children),
        vec!["c<Branch-1B-A>", "d<Branch-1B-B>"]
    );
}

#[test]
fn test_retry_and_iteration_records_stay_in_their_branch() {
    let tree = tree_of("(parallel, p, (retry, call, 2), (iteration, loop, item))");
    let fork = group(&tree, "Parallel-1");
    assert_eq!(
        labels(&fork.children),
        vec!["call<Branch-1-A>", "call#1", "call#2", "loop<Branch-1-B>", "item"]
    );
}

#[test]
fn test_two_passes_compose() {
    let records = to_records(&parse_dsl("(parallel, p, a, b) -> (parallel, r, c)").unwrap()).unwrap();
    let scopes = count_scopes(&records);
    assert_eq!(place_records(&records, &scopes), build_branch_tree(&records));
    assert_eq!(scopes.letter("p"), "A");
    assert_eq!(scopes.letter("r"), "B");
}

#[test]
fn test_engine_records_with_nested_metadata() {
    let records: Vec<ExecutionRecord> = serde_json::from_value(json!([
        {"id": "1", "node_id": "start", "node_type": "start", "status": "succeeded"},
        {"id": "2", "node_id": "llm-a", "node_type": "llm",
         "execution_metadata": {"parallel_id": "fork", "parallel_start_node_id": "llm-a"}},
        {"id": "3", "node_id": "llm-b", "node_type": "llm",
         "execution_metadata": {"parallel_id": "fork", "parallel_start_node_id": "llm-b"}},
        {"id": "4", "node_id": "code", "node_type": "code",
         "execution_metadata": {"parallel_id": "fork", "parallel_start_node_id": "llm-a"}},
        {"id": "5", "node_id": "answer", "node_type": "end",
         "execution_metadata": {"parallel_id": "fork", "parallel_start_node_id": "llm-a"}}
    ]))
    .unwrap();

    let tree = build_branch_tree(&records);
    assert_eq!(labels(&tree), vec!["1", "[Parallel-1]", "5"]);
    assert_eq!(
        labels(&group(&tree, "Parallel-1").children),
        vec!["2<Branch-1-A>", "4", "3<Branch-1-B>"]
    );

    let encoded = serde_json::to_value(&tree).unwrap();
    assert_eq!(encoded[1]["kind"], json!("parallel"));
    assert_eq!(encoded[1]["children"][0]["branch_title"], json!("Branch-1-A"));
    assert_eq!(encoded[1]["children"][0]["node_id"], json!("llm-a"));
}

#[test]
fn test_branch_tree_is_deterministic() {
    let records = to_records(&parse_dsl("a -> (parallel, p, b -> c, (parallel, q, d, e)) -> end").unwrap()).unwrap();
    assert_eq!(build_branch_tree(&records), build_branch_tree(&records));
}

#[test]
fn test_agent_tree_from_engine_log() {
    let entries: Vec<LogEntry> = serde_json::from_value(json!([
        {"id": "think", "parent_id": "", "label": "Thought", "tokens": 120},
        {"id": "search", "parent_id": "think", "label": "Search"},
        {"id": "think", "parent_id": "search", "label": "Thought"},
        {"id": "answer", "parent_id": "think", "label": "Answer"}
    ]))
    .unwrap();

    let tree = build_agent_tree(&entries);
    assert_eq!(tree.len(), 1);
    assert!(tree[0].has_circle);
    assert!(tree[0].children.is_empty());
    assert_eq!(tree[0].payload["tokens"], json!(120));

    let encoded = serde_json::to_value(&tree).unwrap();
    assert_eq!(encoded[0]["hasCircle"], json!(true));
    assert_eq!(encoded[0]["tokens"], json!(120));
    assert_eq!(encoded[0]["children"], json!([]));
}
