//! Error types for the protocol crate.
//!
//! Two kinds of error live here: [`ProtocolError`], the failure type of the
//! encoding helpers, and [`ErrorKind`], the classified failure a tethering
//! worker reports upward. The latter is data, not a Rust error: it travels in
//! events and is surfaced to the user, never propagated with `?`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol error type covering all encoding failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize data.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize data.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// A numeric service state code outside the known range.
    #[error("unknown service state code: {0}")]
    UnknownStateCode(u8),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

/// Worker code for a denied root (superuser) request.
pub const ERROR_ROOT: i32 = 1;

/// Worker code for an unclassified failure.
pub const ERROR_OTHER: i32 = 2;

/// Worker code for a wpa_supplicant failure.
pub const ERROR_SUPPLICANT: i32 = 3;

/// Classified failure reported by the tethering worker.
///
/// The taxonomy is closed. Codes the worker sends that are not recognised
/// map to [`ErrorKind::Other`] so that no failure is ever dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The worker could not obtain root privileges.
    RootAccessDenied,
    /// The wifi supplicant could not be reconfigured for ad-hoc mode.
    SupplicantFailure,
    /// Anything else.
    Other,
}

impl ErrorKind {
    /// Classifies a numeric worker error code.
    pub fn from_code(code: i32) -> Self {
        match code {
            ERROR_ROOT => ErrorKind::RootAccessDenied,
            ERROR_SUPPLICANT => ErrorKind::SupplicantFailure,
            _ => ErrorKind::Other,
        }
    }

    /// Returns the numeric worker code for this kind.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::RootAccessDenied => ERROR_ROOT,
            ErrorKind::SupplicantFailure => ERROR_SUPPLICANT,
            ErrorKind::Other => ERROR_OTHER,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::RootAccessDenied => write!(f, "root access denied"),
            ErrorKind::SupplicantFailure => write!(f, "supplicant failure"),
            ErrorKind::Other => write!(f, "tethering failed"),
        }
    }
}
