use thiserror::Error;

/// Errors surfaced while decoding the handshake or message framing.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("handshake header did not match the expected protocol literal")]
    BadHandshake,
    #[error("unknown message type tag {0}")]
    UnknownType(u8),
    #[error("connection closed mid-frame")]
    TruncatedFrame,
    #[error("frame length {len} exceeds configured cap {cap}")]
    OversizeFrame { len: u32, cap: u32 },
}

/// Errors raised by the `StorageAdapter`. Non-fatal to the link.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to open backing file at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read piece {index}: {source}")]
    Read {
        index: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write piece {index}: {source}")]
    Write {
        index: usize,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while parsing the common configuration or peer table. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("missing required key {0} in common configuration")]
    MissingKey(&'static str),
    #[error("invalid value for key {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("malformed peer table line: {0:?}")]
    MalformedPeerLine(String),
    #[error("local peer id {0} does not appear in the peer table")]
    UnknownLocalPeerId(u32),
}

/// The union of errors that can terminate a single `PeerLink`'s receive loop.
///
/// `InvariantViolation` covers cases like a `piece` message for an index outside `0..num_pieces`.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}
