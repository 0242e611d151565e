// Integration smoke test for the RPC server.
//
// Starts a server on localhost with a small registry, connects mock TCP
// clients, and exercises the protocol: handshake, calls, unknown methods,
// cancellation of a slow call, version rejection, and shutdown.
//
// Each client is a plain TCP socket using the protocol crate's framing and
// frame types, so the server is tested without the client crate.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

use grove_rpc_protocol::{
    CallFlags, CallId, ClientFrame, CompressionAlgorithm, PROTOCOL_VERSION, RpcStatus,
    ServerFrame, StatusCode, decode_frame, encode_frame, read_message, write_message,
};
use grove_rpc_server::{CallMeta, ServerConfig, ServiceRegistry, start_server};

fn send(writer: &mut BufWriter<TcpStream>, frame: &ClientFrame) {
    write_message(writer, &encode_frame(frame).unwrap()).unwrap();
}

fn recv(reader: &mut BufReader<TcpStream>) -> ServerFrame {
    decode_frame(&read_message(reader).unwrap()).unwrap()
}

fn connect(addr: SocketAddr, version: u32) -> (BufReader<TcpStream>, BufWriter<TcpStream>, ServerFrame) {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut writer = BufWriter::new(stream);
    send(
        &mut writer,
        &ClientFrame::Hello {
            protocol_version: version,
            client_name: "smoke".into(),
        },
    );
    let answer = recv(&mut reader);
    (reader, writer, answer)
}

fn call(call_id: u64, method: &str, payload: &[u8]) -> ClientFrame {
    ClientFrame::Call {
        call_id: CallId(call_id),
        method: method.into(),
        payload: payload.to_vec(),
        metadata: vec![("x-caller".into(), "smoke".into())],
        authority: None,
        timeout_ms: None,
        compression: CompressionAlgorithm::None,
        flags: CallFlags::default(),
    }
}

fn registry() -> ServiceRegistry {
    let mut registry = ServiceRegistry::new();
    registry.register_json("/test.Echo/Echo", |text: String, meta: &CallMeta| {
        Ok(format!(
            "{text} from {}",
            meta.metadata_value("x-caller").unwrap_or("?")
        ))
    });
    registry.register("/test.Echo/Slow", |_payload, meta| {
        while !meta.is_cancelled() {
            thread::sleep(Duration::from_millis(10));
        }
        (RpcStatus::ok(), b"\"too late\"".to_vec())
    });
    registry
}

fn start() -> (grove_rpc_server::ServerHandle, SocketAddr) {
    let config = ServerConfig {
        port: 0, // OS picks a free port
        server_name: "smoke-server".into(),
        ..ServerConfig::default()
    };
    start_server(config, registry()).unwrap()
}

#[test]
fn full_call_lifecycle() {
    let (handle, addr) = start();

    // 1. Handshake.
    let (mut reader, mut writer, welcome) = connect(addr, PROTOCOL_VERSION);
    match welcome {
        ServerFrame::Welcome { server_name, .. } => assert_eq!(server_name, "smoke-server"),
        other => panic!("expected Welcome, got {other:?}"),
    }

    // 2. A successful call sees its metadata.
    send(&mut writer, &call(1, "/test.Echo/Echo", b"\"hi\""));
    match recv(&mut reader) {
        ServerFrame::Reply {
            call_id,
            status,
            payload,
        } => {
            assert_eq!(call_id, CallId(1));
            assert_eq!(status.code, StatusCode::Ok.to_wire());
            assert_eq!(payload, b"\"hi from smoke\"");
        }
        other => panic!("expected Reply, got {other:?}"),
    }

    // 3. Unknown method.
    send(&mut writer, &call(2, "/test.Echo/Nope", b"{}"));
    match recv(&mut reader) {
        ServerFrame::Reply {
            call_id, status, ..
        } => {
            assert_eq!(call_id, CallId(2));
            assert_eq!(status.code, StatusCode::Unimplemented.to_wire());
        }
        other => panic!("expected Reply, got {other:?}"),
    }

    // 4. Cancel a slow call: exactly one Cancelled reply, nothing afterwards.
    send(&mut writer, &call(3, "/test.Echo/Slow", b"null"));
    thread::sleep(Duration::from_millis(50));
    send(
        &mut writer,
        &ClientFrame::Cancel {
            call_id: CallId(3),
        },
    );
    match recv(&mut reader) {
        ServerFrame::Reply {
            call_id, status, ..
        } => {
            assert_eq!(call_id, CallId(3));
            assert_eq!(status.code, StatusCode::Cancelled.to_wire());
        }
        other => panic!("expected Reply, got {other:?}"),
    }
    // The next reply on the wire belongs to the next call, not the slow one.
    send(&mut writer, &call(4, "/test.Echo/Echo", b"\"again\""));
    match recv(&mut reader) {
        ServerFrame::Reply { call_id, .. } => assert_eq!(call_id, CallId(4)),
        other => panic!("expected Reply, got {other:?}"),
    }

    // 5. Goodbye, then stop.
    send(&mut writer, &ClientFrame::Goodbye);
    handle.stop();
}

#[test]
fn wrong_protocol_version_is_rejected() {
    let (handle, addr) = start();
    let (_reader, _writer, answer) = connect(addr, PROTOCOL_VERSION + 1);
    assert!(
        matches!(answer, ServerFrame::Rejected { .. }),
        "expected Rejected, got {answer:?}"
    );
    handle.stop();
}

#[test]
fn stop_closes_open_connections() {
    let (handle, addr) = start();
    let (mut reader, _writer, _) = connect(addr, PROTOCOL_VERSION);
    handle.stop();
    assert!(read_message(&mut reader).is_err());
}
