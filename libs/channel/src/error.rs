use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection broke before any byte of the buffer was sent.
    #[error("Write on closed pipe")]
    ClosedPipe,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("No handler registered for scheme {0}")]
    UnknownScheme(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("No backends connected")]
    NoBackends,

    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Whether a failed write is known to have delivered nothing.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ClosedPipe)
    }
}

/// Classification of a failed write, declared by the backend that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFailure {
    /// Zero bytes were delivered and the connection is unusable; the write
    /// may be repeated on a fresh connection.
    Retryable,
    /// Anything else. Bytes may have left the wire.
    Terminal,
}

impl WriteFailure {
    pub fn of(err: &Error) -> Self {
        if err.is_retryable() {
            WriteFailure::Retryable
        } else {
            WriteFailure::Terminal
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
