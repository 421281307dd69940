//! Error types for the RIP daemon.

use std::net::Ipv4Addr;

use thiserror::Error;

/// A datagram that cannot be decoded as a RIPv2 PDU.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// Shorter than the 4-byte header.
    #[error("packet too short: {0} bytes")]
    Truncated(usize),

    /// Payload after the header is not a whole number of 20-byte entries.
    #[error("payload of {0} bytes is not a multiple of the entry size")]
    Misaligned(usize),

    #[error("unsupported RIP version {0} (use 2)")]
    BadVersion(u8),

    #[error("unknown command {0}")]
    BadCommand(u8),

    #[error("unknown authentication type {0}")]
    UnknownAuthType(u16),
}

/// A PDU that failed authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("authentication type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: u16, got: u16 },

    #[error("plain password mismatch")]
    PlainKey,

    #[error("md5 digest mismatch")]
    Digest,

    /// MD5 metadata present but the trailing digest entry is missing or
    /// the declared packet length points outside the datagram.
    #[error("md5 digest trailer missing")]
    MissingTrailer,
}

/// Errors that can occur anywhere in the daemon.
#[derive(Debug, Error)]
pub enum Error {
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Packet from an unknown or local source.
    #[error("packet from unexpected source {0}")]
    Source(Ipv4Addr),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Kernel route add/replace/delete failure.
    #[error("route error: {0}")]
    Route(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for daemon operations.
pub type Result<T> = std::result::Result<T, Error>;
