/// Errors raised while assembling or configuring a protocol pipeline.
///
/// Surfaced from the registry and the framer/bufio constructors; fatal
/// to the pipeline being built.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown protocol {0:?}")]
    UnknownProtocol(String),

    #[error("protocol {0:?} already registered")]
    DuplicateProtocol(String),

    #[error("invalid fixlen header width: {0} (must be 1, 2, 4, or 8)")]
    InvalidHeaderWidth(usize),

    #[error("invalid byte order: {0:?}")]
    InvalidByteOrder(String),

    #[error("invalid bufio size: {0}")]
    InvalidBufferSize(usize),

    #[error("received frame of {len} bytes exceeds max_recv of {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("frame of {len} bytes exceeds max_send of {max}")]
    SendTooLarge { len: usize, max: usize },

    #[error("no decoder registered for type {0:?}")]
    UnknownType(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Errors raised by `Session` operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,

    #[error("session send queue overflowed, session closed")]
    Blocked,

    #[error(transparent)]
    Codec(#[from] ProtocolError),
}

/// Errors raised by the server (accept-loop) driver.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("server {0:?} already registered")]
    DuplicateServer(String),

    #[error("unknown server adapter {0:?}")]
    UnknownServer(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Errors raised by the client (dial-loop) driver.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("client {0:?} already registered")]
    DuplicateClient(String),

    #[error("unknown client adapter {0:?}")]
    UnknownClient(String),

    #[error("failed to connect to {addr} after {tries} attempts: {source}")]
    DialFailed {
        addr: String,
        tries: u32,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
