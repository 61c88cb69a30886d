//! Native operation status.
//!
//! The engine reports the outcome of every data operation as a status value
//! (code plus optional message). A status is data: the bindings hand it to the
//! caller, either directly or wrapped in [`crate::Error::Status`].

use crate::error::{Error, Result};
use std::fmt;

/// Status codes shared by the engine's C ABI and the bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    NotFound = 1,
    Corruption = 2,
    NotSupported = 3,
    InvalidArgument = 4,
    IoError = 5,
    MergeInProgress = 6,
    Incomplete = 7,
    ShutdownInProgress = 8,
    TimedOut = 9,
    Aborted = 10,
    Busy = 11,
}

impl StatusCode {
    /// Decode a raw code received over the C ABI.
    ///
    /// Unknown codes are reported as corruption of the status itself.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => StatusCode::Ok,
            1 => StatusCode::NotFound,
            2 => StatusCode::Corruption,
            3 => StatusCode::NotSupported,
            4 => StatusCode::InvalidArgument,
            5 => StatusCode::IoError,
            6 => StatusCode::MergeInProgress,
            7 => StatusCode::Incomplete,
            8 => StatusCode::ShutdownInProgress,
            9 => StatusCode::TimedOut,
            10 => StatusCode::Aborted,
            11 => StatusCode::Busy,
            _ => StatusCode::Corruption,
        }
    }

    /// The raw value passed over the C ABI.
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    fn label(self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::NotFound => "NotFound: ",
            StatusCode::Corruption => "Corruption: ",
            StatusCode::NotSupported => "Not implemented: ",
            StatusCode::InvalidArgument => "Invalid argument: ",
            StatusCode::IoError => "IO error: ",
            StatusCode::MergeInProgress => "Merge in progress: ",
            StatusCode::Incomplete => "Result incomplete: ",
            StatusCode::ShutdownInProgress => "Shutdown in progress: ",
            StatusCode::TimedOut => "Operation timed out: ",
            StatusCode::Aborted => "Operation aborted: ",
            StatusCode::Busy => "Resource busy: ",
        }
    }
}

/// Outcome of a native operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: StatusCode,
    message: Option<String>,
}

impl Status {
    /// Build a status from a code and an optional message.
    pub fn new(code: StatusCode, message: Option<String>) -> Self {
        Self { code, message }
    }

    /// The success status.
    pub fn ok() -> Self {
        Self::new(StatusCode::Ok, None)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, Some(msg.into()))
    }

    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::Corruption, Some(msg.into()))
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NotSupported, Some(msg.into()))
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, Some(msg.into()))
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::IoError, Some(msg.into()))
    }

    pub fn incomplete(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::Incomplete, Some(msg.into()))
    }

    pub fn shutdown_in_progress(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::ShutdownInProgress, Some(msg.into()))
    }

    pub fn aborted(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::Aborted, Some(msg.into()))
    }

    pub fn busy(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::Busy, Some(msg.into()))
    }

    /// The status code.
    pub fn code(&self) -> StatusCode {
        self.code
    }

    /// The message attached by the engine, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns true iff the status indicates success.
    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }

    pub fn is_not_found(&self) -> bool {
        self.code == StatusCode::NotFound
    }

    pub fn is_corruption(&self) -> bool {
        self.code == StatusCode::Corruption
    }

    pub fn is_not_supported(&self) -> bool {
        self.code == StatusCode::NotSupported
    }

    pub fn is_invalid_argument(&self) -> bool {
        self.code == StatusCode::InvalidArgument
    }

    pub fn is_io_error(&self) -> bool {
        self.code == StatusCode::IoError
    }

    pub fn is_merge_in_progress(&self) -> bool {
        self.code == StatusCode::MergeInProgress
    }

    pub fn is_incomplete(&self) -> bool {
        self.code == StatusCode::Incomplete
    }

    pub fn is_shutdown_in_progress(&self) -> bool {
        self.code == StatusCode::ShutdownInProgress
    }

    pub fn is_timed_out(&self) -> bool {
        self.code == StatusCode::TimedOut
    }

    pub fn is_aborted(&self) -> bool {
        self.code == StatusCode::Aborted
    }

    /// Returns true iff a resource was busy and could not be acquired.
    pub fn is_busy(&self) -> bool {
        self.code == StatusCode::Busy
    }

    /// `Ok(())` for a success status, the status wrapped in an error otherwise.
    pub fn into_result(self) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(Error::Status(self))
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::ok()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return write!(f, "OK");
        }
        write!(f, "{}{}", self.code.label(), self.message.as_deref().unwrap_or(""))
    }
}
