//! Rebuilds rendering trees from flat execution logs.
//!
//! [`agent::build_agent_tree`] nests agent reasoning steps by `parent_id`,
//! [`parallel::build_branch_tree`] groups records by parallel fork and
//! branch. Both are pure and never fail: inconsistent input degrades to a
//! best-effort tree and is reported through `tracing`.

pub mod agent;
pub mod arena;
pub mod parallel;
pub mod types;

pub use agent::build_agent_tree;
pub use parallel::{ScopeIndex, build_branch_tree, count_scopes, place_records};
pub use types::{BranchNode, ExecutionRecord, LogEntry, ParallelGroup, RecordNode, TraceNode};
