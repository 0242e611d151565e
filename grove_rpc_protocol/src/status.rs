// Portable RPC status taxonomy.
//
// `StatusCode` mirrors the standard RPC status code numbering so that codes
// pass through the wire value-for-value. `RpcStatus` pairs a code with a
// human-readable message and opaque detail bytes (typically a serialized
// rich-status message the application can decode itself).
//
// On the wire a status travels as a raw `u32` (see `message.rs`); unknown
// numeric codes decode to `StatusCode::Unknown` rather than failing the frame.

use serde::{Deserialize, Serialize};

/// Standard RPC status codes. Discriminants are the wire values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StatusCode {
    /// Not an error; returned on success.
    #[default]
    Ok = 0,
    /// The operation was cancelled, typically by the caller.
    Cancelled = 1,
    Unknown = 2,
    /// Arguments are problematic regardless of system state.
    InvalidArgument = 3,
    /// The deadline expired before the operation could complete.
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    /// The system is not in a state required for the operation.
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    /// Most likely transient; the caller may retry with backoff.
    Unavailable = 14,
    DataLoss = 15,
    /// The request lacks valid authentication credentials.
    Unauthenticated = 16,
}

impl StatusCode {
    /// Every code, in wire-value order.
    pub const ALL: [StatusCode; 17] = [
        StatusCode::Ok,
        StatusCode::Cancelled,
        StatusCode::Unknown,
        StatusCode::InvalidArgument,
        StatusCode::DeadlineExceeded,
        StatusCode::NotFound,
        StatusCode::AlreadyExists,
        StatusCode::PermissionDenied,
        StatusCode::ResourceExhausted,
        StatusCode::FailedPrecondition,
        StatusCode::Aborted,
        StatusCode::OutOfRange,
        StatusCode::Unimplemented,
        StatusCode::Internal,
        StatusCode::Unavailable,
        StatusCode::DataLoss,
        StatusCode::Unauthenticated,
    ];

    /// Decode a wire value. Values outside the taxonomy map to `Unknown`.
    pub fn from_wire(value: u32) -> Self {
        Self::ALL
            .get(value as usize)
            .copied()
            .unwrap_or(StatusCode::Unknown)
    }

    pub fn to_wire(self) -> u32 {
        self as u32
    }

    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }

    /// Name as used in logs and engine-side dictionaries.
    pub fn as_str(self) -> &'static str {
        match self {
            StatusCode::Ok => "Ok",
            StatusCode::Cancelled => "Cancelled",
            StatusCode::Unknown => "Unknown",
            StatusCode::InvalidArgument => "InvalidArgument",
            StatusCode::DeadlineExceeded => "DeadlineExceeded",
            StatusCode::NotFound => "NotFound",
            StatusCode::AlreadyExists => "AlreadyExists",
            StatusCode::PermissionDenied => "PermissionDenied",
            StatusCode::ResourceExhausted => "ResourceExhausted",
            StatusCode::FailedPrecondition => "FailedPrecondition",
            StatusCode::Aborted => "Aborted",
            StatusCode::OutOfRange => "OutOfRange",
            StatusCode::Unimplemented => "Unimplemented",
            StatusCode::Internal => "Internal",
            StatusCode::Unavailable => "Unavailable",
            StatusCode::DataLoss => "DataLoss",
            StatusCode::Unauthenticated => "Unauthenticated",
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Did it work? If it didn't, why?
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RpcStatus {
    pub code: StatusCode,
    pub message: String,
    /// Opaque error details, copied verbatim from the server.
    pub details: Vec<u8>,
}

impl RpcStatus {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: Vec<u8>) -> Self {
        self.details = details;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }
}

impl std::fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_match_standard_numbering() {
        assert_eq!(StatusCode::Ok.to_wire(), 0);
        assert_eq!(StatusCode::DeadlineExceeded.to_wire(), 4);
        assert_eq!(StatusCode::ResourceExhausted.to_wire(), 8);
        assert_eq!(StatusCode::DataLoss.to_wire(), 15);
        assert_eq!(StatusCode::Unauthenticated.to_wire(), 16);
    }

    #[test]
    fn from_wire_passes_every_code_through() {
        for code in StatusCode::ALL {
            assert_eq!(StatusCode::from_wire(code.to_wire()), code);
        }
    }

    #[test]
    fn unknown_wire_value_decodes_as_unknown() {
        assert_eq!(StatusCode::from_wire(17), StatusCode::Unknown);
        assert_eq!(StatusCode::from_wire(u32::MAX), StatusCode::Unknown);
    }

    #[test]
    fn display_includes_message() {
        let status = RpcStatus::new(StatusCode::NotFound, "no such user");
        assert_eq!(status.to_string(), "NotFound: no such user");
        assert_eq!(RpcStatus::ok().to_string(), "Ok");
    }
}
