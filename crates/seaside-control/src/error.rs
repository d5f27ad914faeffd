/// Failures from the control RPC channel (spec §6.2) or link parsing
/// (spec §6.4).
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("malformed connection link: {0}")]
    MalformedLink(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("server returned malformed response: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
