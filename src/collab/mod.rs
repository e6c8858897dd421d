//! Realtime collaboration: one socket per edited document, plus the
//! helpers upper layers use to broadcast changes over it.

pub mod manager;
pub mod token;
pub mod tree_update;

pub use manager::{
    ConnectionInfo, TransportEvent, TransportManager, TransportSettings, USER_CONNECT,
    is_unauthorized,
};
pub use token::{FileTokenStore, StaticTokenStore, TokenStore};
pub use tree_update::{SKILL_TREE_UPDATE, TreeUpdate, emit_tree_update, on_tree_update};
