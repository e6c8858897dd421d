pub mod collab;
pub mod config;
pub mod dsl;
pub mod logger;
pub mod schema;
pub mod trace;
