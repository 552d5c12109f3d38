//! Shared error type across spex crates.

use thiserror::Error;

/// Stable error codes, used in logs and asserted on by tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed or undersized frame.
    BadFrame,
    /// Unsupported frame version.
    UnsupportedVersion,
    /// Invalid configuration.
    Config,
    /// Socket or file I/O failure.
    Io,
    /// A tunnel id is already bound to an active session.
    DuplicateTunnel,
    /// No physical channel is attached (or it has been closed).
    NotConnected,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and test vectors.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BadFrame => "BAD_FRAME",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::Config => "CONFIG",
            ErrorCode::Io => "IO",
            ErrorCode::DuplicateTunnel => "DUPLICATE_TUNNEL",
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, SpexError>;

/// Unified error type used by core and transport.
#[derive(Debug, Error)]
pub enum SpexError {
    #[error("bad frame: {0}")]
    BadFrame(String),
    #[error("unsupported frame version {0}")]
    UnsupportedVersion(u8),
    #[error("config: {0}")]
    Config(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("tunnel #{0} is already active")]
    DuplicateTunnel(u32),
    #[error("not connected")]
    NotConnected,
    #[error("internal: {0}")]
    Internal(String),
}

impl SpexError {
    /// Map the error to its stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            SpexError::BadFrame(_) => ErrorCode::BadFrame,
            SpexError::UnsupportedVersion(_) => ErrorCode::UnsupportedVersion,
            SpexError::Config(_) => ErrorCode::Config,
            SpexError::Io(_) => ErrorCode::Io,
            SpexError::DuplicateTunnel(_) => ErrorCode::DuplicateTunnel,
            SpexError::NotConnected => ErrorCode::NotConnected,
            SpexError::Internal(_) => ErrorCode::Internal,
        }
    }
}
