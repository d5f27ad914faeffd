use seaside_crypto::{AsymmetricError, SymmetricError};

/// Failures from building or parsing a PORT or TYPHOON message (spec §7).
///
/// Every variant is deliberately generic about *which* peer or connection
/// triggered it; callers attach that context (user id, address) when they
/// log or propagate the error.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("message shorter than the fixed header ({expected} bytes, got {actual})")]
    HeaderTooShort { expected: usize, actual: usize },

    #[error("message body shorter than declared length ({expected} bytes, got {actual})")]
    BodyTooShort { expected: usize, actual: usize },

    #[error("unrecognized or invalid flag combination: {0:#010b}")]
    InvalidFlags(u8),

    #[error("flag combination {0} is not valid in this context")]
    UnexpectedFlags(String),

    #[error("client name is not exactly 32 bytes")]
    InvalidClientName,

    #[error("next_in {got}ms outside the permitted range [{min}ms, {max}ms]")]
    NextInOutOfRange { got: u64, min: u64, max: u64 },

    #[error("packet number {got} does not match expected {expected}")]
    UnexpectedPacketNumber { got: u32, expected: u32 },

    #[error(transparent)]
    Asymmetric(#[from] AsymmetricError),

    #[error(transparent)]
    Symmetric(#[from] SymmetricError),
}
