//! # Networking Error Types
//!
//! All errors that can occur on the wire, in the transport, while loading
//! configuration, and the umbrella [`SyncError`].

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tether_core::CoreError;

/// Malformed or unacceptable bytes on the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Op ended before all its fields were read.
    #[error("truncated op while reading {what}")]
    Truncated {
        /// Field being read.
        what: &'static str,
    },

    /// Op code byte is not one we know.
    #[error("unknown op code 0x{0:02x}")]
    UnknownOpCode(u8),

    /// Header announced a body larger than allowed.
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Announced length.
        len: usize,
        /// Configured limit.
        max: usize,
    },

    /// A single op cannot fit in an empty frame.
    #[error("op of {len} bytes cannot fit a {max}-byte frame")]
    OpTooLarge {
        /// Encoded length.
        len: usize,
        /// Configured limit.
        max: usize,
    },

    /// Handshake did not start with the protocol magic.
    #[error("bad protocol magic 0x{0:08x}")]
    BadMagic(u32),

    /// Handshake carried an incompatible major version.
    #[error("incompatible protocol version: ours {ours}, theirs {theirs}")]
    IncompatibleVersion {
        /// Our major version.
        ours: u16,
        /// Peer's major version.
        theirs: u16,
    },

    /// First frame was not a `Hello`.
    #[error("expected hello, got op 0x{0:02x}")]
    ExpectedHello(u8),

    /// Peer announced our own instance id.
    #[error("peer reports our own instance id")]
    SelfConnection,
}

/// Result type for wire operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors raised by a transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Socket-level failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Protocol violation on the stream.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// The reactor thread is gone.
    #[error("transport is shut down")]
    Closed,

    /// The transport cannot do this.
    #[error("unsupported by this transport: {0}")]
    Unsupported(&'static str),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Configuration loading or validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// TOML could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Any error surfaced by the sync layer.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Store or registry failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Wire failure.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
