//! Error types for rockbind.

use crate::status::Status;
use std::fmt;

/// The main error type for rockbind operations.
#[derive(Debug)]
pub enum Error {
    /// The native engine reported a non-ok status
    Status(Status),

    /// An argument could not be marshalled across the FFI boundary
    InvalidArgument(String),

    /// A lock was poisoned (internal error)
    LockPoisoned,

    /// I/O error
    Io(std::io::Error),

    /// Serialization/deserialization error
    Serialization(String),
}

impl Error {
    /// Returns the native status carried by this error, if any.
    pub fn status(&self) -> Option<&Status> {
        match self {
            Error::Status(status) => Some(status),
            _ => None,
        }
    }

    /// True if the error is a native `NotFound` status.
    pub fn is_not_found(&self) -> bool {
        self.status().map(Status::is_not_found).unwrap_or(false)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Status(status) => write!(f, "{}", status),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::LockPoisoned => write!(f, "Lock poisoned"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Error::Status(status)
    }
}

/// A specialized `Result` type for rockbind operations.
pub type Result<T> = std::result::Result<T, Error>;
