pub mod client;
pub mod error;
pub mod options;
pub mod packet;
pub mod socket;

pub use client::WsConnector;
pub use error::TransportError;
pub use options::{ConnectOptions, TransportKind};
pub use socket::{Command, Connector, SocketHandle, WeakSocketHandle};

/// Reserved event names dispatched by the transport itself.
pub const CONNECT: &str = "connect";
pub const DISCONNECT: &str = "disconnect";
pub const CONNECT_ERROR: &str = "connect_error";
