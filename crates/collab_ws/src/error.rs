use thiserror::Error;

/// Local failures of the transport. Remote failures never show up here,
/// they are dispatched to the socket's `connect_error` listeners instead.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("no tokio runtime available to drive the connection")]
    NoRuntime,

    #[error("socket has already been opened")]
    AlreadyOpened,

    #[error("malformed packet: {0}")]
    Packet(String),
}
