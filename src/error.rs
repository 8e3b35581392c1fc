/// Errors from the byte-level transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },
    #[error("connect to {addr} timed out after {timeout_ms}ms")]
    ConnectTimeout { addr: String, timeout_ms: u64 },
    #[error("send on a connection in state {state}")]
    NotConnected { state: &'static str },
    #[error("frame of {len} bytes exceeds maximum of {max}")]
    OversizedFrame { len: usize, max: usize },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Violations of the broadcast protocol. Always fatal: a worker that has
/// lost its place in the sequence must stop rather than desynchronize the
/// computation.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("undecodable message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("out-of-order sequence: expected {expected}, got {got}")]
    OutOfOrder { expected: u64, got: u64 },
    #[error("unexpected message on broadcast channel: {0}")]
    Unexpected(String),
}

/// Errors loading or validating the worker execution context.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("cannot read context file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid context: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("broadcast {channel} port is zero")]
    ZeroPort { channel: &'static str },
    #[error("rendezvous rank {rank} out of range for size {size}")]
    RankOutOfRange { rank: usize, size: usize },
}

/// Errors propagated from the external training controller.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("controller preparation failed: {0}")]
    Prepare(String),
    #[error("controller run failed: {0}")]
    Run(String),
}

/// Top-level worker error.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("context error: {0}")]
    Context(#[from] ContextError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("connection lost before end of stream")]
    ConnectionLost,
    #[error("chief reported fault at seq {seq}: {reason}")]
    ChiefFault { seq: u64, reason: String },
    #[error("controller error: {0}")]
    Controller(#[from] ControllerError),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, WorkerError>;
