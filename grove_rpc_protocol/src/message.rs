// Frames exchanged between RPC clients and servers.
//
// Two enums define the full protocol vocabulary:
// - `ClientFrame`: sent by a client channel to the server.
// - `ServerFrame`: sent by the server to a client channel.
//
// A connection starts with `Hello`/`Welcome`; only after `Welcome` is the
// channel considered ready. Calls are unary: one `Call` frame, at most one
// `Reply` with the same `CallId`. Request and response payloads are opaque
// bytes, so the protocol crate stays independent of any service definition;
// service crates serialize their own message types into them.

use serde::{Deserialize, Serialize};

use crate::status::{RpcStatus, StatusCode};
use crate::types::{CallFlags, CallId, CompressionAlgorithm};

/// Current protocol version, sent in `Hello` and echoed in `Welcome`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent by a client to the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientFrame {
    /// Open the connection (handshake).
    Hello {
        protocol_version: u32,
        client_name: String,
    },
    /// Issue one unary call.
    Call {
        call_id: CallId,
        /// Fully qualified method path, e.g. `/grove.hello.HelloService/Hello`.
        method: String,
        payload: Vec<u8>,
        metadata: Vec<(String, String)>,
        authority: Option<String>,
        /// Remaining time budget in milliseconds, if the call has a deadline.
        timeout_ms: Option<u64>,
        compression: CompressionAlgorithm,
        flags: CallFlags,
    },
    /// Ask the server to abandon an in-flight call.
    Cancel { call_id: CallId },
    /// Client is closing the connection gracefully.
    Goodbye,
}

/// Messages sent by the server to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ServerFrame {
    /// Handshake accepted.
    Welcome {
        protocol_version: u32,
        server_name: String,
    },
    /// Handshake rejected.
    Rejected { reason: String },
    /// Completion of a call.
    Reply {
        call_id: CallId,
        status: WireStatus,
        payload: Vec<u8>,
    },
}

/// Status as carried on the wire: the code is a raw number so that peers
/// with a newer taxonomy never fail to decode a frame.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WireStatus {
    pub code: u32,
    pub message: String,
    pub details: Vec<u8>,
}

impl From<RpcStatus> for WireStatus {
    fn from(status: RpcStatus) -> Self {
        Self {
            code: status.code.to_wire(),
            message: status.message,
            details: status.details,
        }
    }
}

impl From<WireStatus> for RpcStatus {
    fn from(wire: WireStatus) -> Self {
        Self {
            code: StatusCode::from_wire(wire.code),
            message: wire.message,
            details: wire.details,
        }
    }
}
