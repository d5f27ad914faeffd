use seaside_protocol::ProtocolError;

/// Failures surfaced by a transport endpoint (spec §7).
///
/// `Terminated` and `Cancelled` are both expected shutdown paths, not bugs:
/// the coordinator treats either as "run teardown", distinguished only for
/// logging.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("handshake failed: {0}")]
    Initialization(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer sent termination")]
    Terminated,

    #[error("handshake or decay loop exhausted its retries")]
    TimedOut,

    #[error("shut down by local cancellation")]
    Cancelled,
}
