// grove_rpc_protocol — wire protocol for grove_rpc clients and servers.
//
// This crate defines the frame types, status taxonomy, and framing used by the
// client worker (`grove_rpc_client`) and the server (`grove_rpc_server`) to
// communicate over TCP or TLS. It is shared between both sides and has no
// dependency on any service definition or on Godot.
//
// Module overview:
// - `types.rs`:    `CallId`, `CompressionAlgorithm`, `CallFlags`.
// - `status.rs`:   `StatusCode` (standard RPC numbering) and `RpcStatus`.
// - `message.rs`:  `ClientFrame` / `ServerFrame` enums and `WireStatus`.
// - `framing.rs`:  Length-delimited framing over any `Read`/`Write` stream
//                  (4-byte big-endian length prefix, then JSON payload), plus
//                  an incremental `FrameDecoder` for timeout-driven readers.
//
// Design decisions:
// - **JSON serialization.** Frames are small and human-inspectable; payloads
//   are opaque bytes so services pick their own encoding.
// - **No async runtime.** Uses `std::io::Read`/`Write`, compatible with
//   blocking TCP streams, `rustls` streams, and buffered wrappers.

pub mod framing;
pub mod message;
pub mod status;
pub mod types;

pub use framing::{FrameDecoder, MAX_MESSAGE_SIZE, read_message, write_message};
pub use message::{ClientFrame, PROTOCOL_VERSION, ServerFrame, WireStatus};
pub use status::{RpcStatus, StatusCode};
pub use types::{CallFlags, CallId, CompressionAlgorithm};

/// Serialize a frame to JSON bytes ready for `write_message`.
pub fn encode_frame<T: serde::Serialize>(frame: &T) -> std::io::Result<Vec<u8>> {
    serde_json::to_vec(frame).map_err(std::io::Error::from)
}

/// Deserialize a frame from bytes returned by `read_message`.
pub fn decode_frame<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> std::io::Result<T> {
    serde_json::from_slice(bytes).map_err(std::io::Error::from)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn client_roundtrip(frame: &ClientFrame) {
        let json = encode_frame(frame).unwrap();
        let mut wire = Vec::new();
        write_message(&mut wire, &json).unwrap();

        let mut cursor = Cursor::new(&wire);
        let recovered: ClientFrame = decode_frame(&read_message(&mut cursor).unwrap()).unwrap();
        assert_eq!(&recovered, frame);
    }

    #[test]
    fn roundtrip_call_with_every_option() {
        client_roundtrip(&ClientFrame::Call {
            call_id: CallId(7),
            method: "/grove.hello.HelloService/Hello".into(),
            payload: br#"{"name":"Ada"}"#.to_vec(),
            metadata: vec![("x-player".into(), "ada".into())],
            authority: Some("hello.internal".into()),
            timeout_ms: Some(2500),
            compression: CompressionAlgorithm::Gzip,
            flags: CallFlags {
                idempotent: true,
                cacheable: false,
                wait_for_ready: true,
                initial_metadata_corked: true,
            },
        });
    }

    #[test]
    fn roundtrip_cancel() {
        client_roundtrip(&ClientFrame::Cancel {
            call_id: CallId(u64::MAX),
        });
    }

    #[test]
    fn reply_status_survives_the_wire() {
        let status = RpcStatus::new(StatusCode::PermissionDenied, "nope").with_details(vec![1, 2]);
        let frame = ServerFrame::Reply {
            call_id: CallId(3),
            status: status.clone().into(),
            payload: Vec::new(),
        };
        let json = encode_frame(&frame).unwrap();
        let recovered: ServerFrame = decode_frame(&json).unwrap();
        match recovered {
            ServerFrame::Reply { status: wire, .. } => assert_eq!(RpcStatus::from(wire), status),
            other => panic!("expected Reply, got {other:?}"),
        }
    }

    #[test]
    fn newer_status_code_decodes_as_unknown() {
        let wire = WireStatus {
            code: 42,
            message: "future".into(),
            details: Vec::new(),
        };
        let status = RpcStatus::from(wire);
        assert_eq!(status.code, StatusCode::Unknown);
        assert_eq!(status.message, "future");
    }

    #[test]
    fn garbage_frame_is_invalid_data() {
        let err = decode_frame::<ServerFrame>(b"not json").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
