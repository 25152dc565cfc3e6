//! Error types for packetline.

use std::io;
use std::string::FromUtf8Error;
use std::time::Duration;

use thiserror::Error;

/// Violations of the connection lifecycle contract.
///
/// These are always reported synchronously to the caller that broke the
/// contract and never change the transport's state.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// `start` called on a transport that is not in `NotStarted`.
    #[error("connection has already started")]
    AlreadyStarted,

    /// `stop` called on a transport that is already `Closed`.
    #[error("connection has already stopped")]
    AlreadyStopped,

    /// Queue access before the transport was started.
    #[error("connection has not been opened")]
    NotOpened,

    /// Queue access after the transport was stopped.
    #[error("connection has been closed")]
    Closed,
}

/// Errors raised while encoding or decoding a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Length prefix ran past its maximum width.
    #[error("malformed length prefix")]
    MalformedLength,

    /// Declared or actual payload length exceeds the configured limit.
    #[error("packet too large: {len} bytes exceeds limit of {max}")]
    TooLarge {
        /// Payload length in bytes.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Payload bytes are not valid UTF-8.
    #[error("payload is not valid utf-8: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),

    /// Stream ended in the middle of a frame.
    #[error("stream ended inside a frame: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes the frame still needed.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// I/O error while reading or writing a frame.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Top-level transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Lifecycle contract violation.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Framing error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Socket error (connect, bind, accept, read, write).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Actively-opened connection did not complete in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
}

impl TransportError {
    /// Check if this error is a lifecycle contract violation.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, TransportError::Lifecycle(_))
    }

    /// Get the lifecycle violation, if this is one.
    pub fn as_lifecycle(&self) -> Option<LifecycleError> {
        match self {
            TransportError::Lifecycle(e) => Some(*e),
            _ => None,
        }
    }

    /// Check if this error ends the connection it occurred on.
    ///
    /// Lifecycle violations leave the transport untouched; everything else
    /// means the underlying stream is no longer usable.
    pub fn is_fatal(&self) -> bool {
        !self.is_lifecycle()
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
