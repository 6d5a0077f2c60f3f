use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error is the catch-all error type shared by the transport-facing crates.
#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("buffer: full")]
    ErrBufferFull,
    #[error("buffer: short")]
    ErrBufferShort,
    #[error("buffer is closed")]
    ErrBufferClosed,
    #[error("this connection has been closed")]
    ErrClosedListener,
    #[error("try-lock is already locked")]
    ErrDoubleLock,
    #[error("{0}")]
    Io(#[source] IoError),
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn new(s: String) -> Self {
        Error::Other(s)
    }
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}
