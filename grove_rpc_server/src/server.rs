// TCP server for grove_rpc services.
//
// Architecture: thread-per-connection readers plus one thread per call.
//
// - **Listener thread** (non-blocking `accept()` loop): accepts connections
//   and spawns a connection thread for each, until `keep_running` clears.
// - **Connection threads**: perform the `Hello`/`Welcome` handshake, then
//   read frames in a loop. `Call` spawns a call thread; `Cancel` answers
//   Cancelled at once; `Goodbye`, EOF, or a malformed frame ends the
//   connection.
// - **Call threads**: run the registered handler and write the reply.
//
// Writes from call threads and the connection thread go through one shared
// `Mutex<TcpStream>` per connection, so replies never interleave.
//
// Each in-flight call has an entry in the connection's `in_flight` map. The
// reply is written by whoever removes the entry: the call thread when the
// handler returns, or the connection thread when a `Cancel` arrives. So a
// cancelled call is answered exactly once, with Cancelled, and the handler's
// late result is dropped.
//
// Shutdown: `ServerHandle::stop` clears `keep_running`, shuts down every open
// socket so blocked readers see EOF, and joins the listener thread.

use std::collections::HashMap;
use std::io::BufReader;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use grove_rpc_protocol::{
    CallId, ClientFrame, PROTOCOL_VERSION, RpcStatus, ServerFrame, StatusCode, decode_frame,
    encode_frame, read_message, write_message,
};
use log::{debug, info, warn};

use crate::error::ServerError;
use crate::registry::{CallMeta, ServiceRegistry};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Configuration for starting a server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub server_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 50051,
            server_name: "grove-server".into(),
        }
    }
}

/// Handle returned by `start_server` to control the running server.
pub struct ServerHandle {
    keep_running: Arc<AtomicBool>,
    connections: Arc<Mutex<Vec<(SocketAddr, TcpStream)>>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ServerHandle {
    /// Stop accepting, close every connection, and wait for the listener.
    pub fn stop(mut self) {
        self.shutdown();
    }

    /// Block until the listener thread exits (it only does after `stop`).
    pub fn wait(mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    fn shutdown(&mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        for (_, stream) in lock(&self.connections).drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.shutdown();
        }
    }
}

/// Start the server on a background thread. Returns a handle for stopping
/// it and the bound address (port 0 lets the OS pick a free port).
pub fn start_server(
    config: ServerConfig,
    registry: ServiceRegistry,
) -> Result<(ServerHandle, SocketAddr), ServerError> {
    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&bind_addr).map_err(|source| ServerError::Bind {
        addr: bind_addr.clone(),
        source,
    })?;
    let addr = listener.local_addr().map_err(ServerError::Listener)?;
    // Non-blocking so the accept loop can notice `keep_running`.
    listener
        .set_nonblocking(true)
        .map_err(ServerError::Listener)?;

    let keep_running = Arc::new(AtomicBool::new(true));
    let connections = Arc::new(Mutex::new(Vec::new()));
    let shared = Arc::new(Shared {
        name: config.server_name,
        registry: Arc::new(registry),
        keep_running: Arc::clone(&keep_running),
        connections: Arc::clone(&connections),
    });

    let thread = thread::Builder::new()
        .name("grove-server-accept".into())
        .spawn(move || accept_loop(listener, shared))
        .map_err(ServerError::Spawn)?;

    info!("server: listening on {addr}");
    Ok((
        ServerHandle {
            keep_running,
            connections,
            thread: Some(thread),
        },
        addr,
    ))
}

/// State shared by every server thread.
struct Shared {
    name: String,
    registry: Arc<ServiceRegistry>,
    keep_running: Arc<AtomicBool>,
    connections: Arc<Mutex<Vec<(SocketAddr, TcpStream)>>>,
}

/// Per-connection state shared by the reader and its call threads.
struct Connection {
    peer: SocketAddr,
    writer: Mutex<TcpStream>,
    in_flight: Mutex<HashMap<CallId, Arc<AtomicBool>>>,
}

impl Connection {
    fn send(&self, frame: &ServerFrame) {
        let bytes = match encode_frame(frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("server: failed to encode reply for {}: {e}", self.peer);
                return;
            }
        };
        let mut writer = lock(&self.writer);
        if let Err(e) = write_message(&mut *writer, &bytes) {
            debug!("server: write to {} failed: {e}", self.peer);
        }
    }

    fn reply(&self, call_id: CallId, status: RpcStatus, payload: Vec<u8>) {
        self.send(&ServerFrame::Reply {
            call_id,
            status: status.into(),
            payload,
        });
    }

    /// Remove the call's entry. Only the caller that gets `Some` may reply.
    fn claim(&self, call_id: CallId) -> Option<Arc<AtomicBool>> {
        lock(&self.in_flight).remove(&call_id)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    while shared.keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false).ok();
                stream.set_nodelay(true).ok();
                if let Ok(clone) = stream.try_clone() {
                    lock(&shared.connections).push((peer, clone));
                }
                let shared = Arc::clone(&shared);
                let spawned = thread::Builder::new()
                    .name(format!("grove-server-{peer}"))
                    .spawn(move || serve_connection(stream, peer, &shared));
                if let Err(e) = spawned {
                    warn!("server: could not spawn reader for {peer}: {e}");
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                warn!("server: accept failed: {e}");
                break;
            }
        }
    }
    debug!("server: accept loop finished");
}

fn serve_connection(stream: TcpStream, peer: SocketAddr, shared: &Shared) {
    run_session(stream, peer, shared);
    lock(&shared.connections).retain(|(open, _)| *open != peer);
}

fn run_session(stream: TcpStream, peer: SocketAddr, shared: &Shared) {
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT)).ok();
    let (read_half, write_half) = match stream.try_clone() {
        Ok(clone) => (clone, stream),
        Err(e) => {
            warn!("server: could not clone stream for {peer}: {e}");
            return;
        }
    };
    let mut reader = BufReader::new(read_half);
    let connection = Arc::new(Connection {
        peer,
        writer: Mutex::new(write_half),
        in_flight: Mutex::new(HashMap::new()),
    });

    let hello = read_message(&mut reader).and_then(|bytes| decode_frame::<ClientFrame>(&bytes));
    match hello {
        Ok(ClientFrame::Hello {
            protocol_version,
            client_name,
        }) if protocol_version == PROTOCOL_VERSION => {
            debug!("server: {peer} is {client_name}");
            connection.send(&ServerFrame::Welcome {
                protocol_version: PROTOCOL_VERSION,
                server_name: shared.name.clone(),
            });
        }
        Ok(ClientFrame::Hello {
            protocol_version, ..
        }) => {
            connection.send(&ServerFrame::Rejected {
                reason: format!(
                    "unsupported protocol version {protocol_version} (server speaks {PROTOCOL_VERSION})"
                ),
            });
            return;
        }
        Ok(other) => {
            debug!("server: {peer} opened with {other:?} instead of Hello");
            return;
        }
        Err(e) => {
            debug!("server: handshake with {peer} failed: {e}");
            return;
        }
    }
    reader.get_ref().set_read_timeout(None).ok();

    while shared.keep_running.load(Ordering::SeqCst) {
        let frame = match read_message(&mut reader).and_then(|b| decode_frame::<ClientFrame>(&b)) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("server: {peer} disconnected: {e}");
                break;
            }
        };
        match frame {
            ClientFrame::Call {
                call_id,
                method,
                payload,
                metadata,
                authority,
                timeout_ms,
                compression: _,
                flags: _,
            } => {
                let cancelled = Arc::new(AtomicBool::new(false));
                lock(&connection.in_flight).insert(call_id, Arc::clone(&cancelled));
                let meta = CallMeta {
                    method,
                    metadata,
                    authority,
                    deadline: timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms)),
                    cancelled,
                };
                let registry = Arc::clone(&shared.registry);
                let call_connection = Arc::clone(&connection);
                let spawned = thread::Builder::new()
                    .name(format!("grove-call-{}", call_id.0))
                    .spawn(move || run_call(&registry, &call_connection, call_id, &payload, &meta));
                if let Err(e) = spawned {
                    warn!("server: could not spawn call thread: {e}");
                    if connection.claim(call_id).is_some() {
                        connection.reply(
                            call_id,
                            RpcStatus::new(StatusCode::ResourceExhausted, "server overloaded"),
                            Vec::new(),
                        );
                    }
                }
            }
            ClientFrame::Cancel { call_id } => {
                if let Some(flag) = connection.claim(call_id) {
                    flag.store(true, Ordering::Release);
                    connection.reply(
                        call_id,
                        RpcStatus::new(StatusCode::Cancelled, "cancelled by client"),
                        Vec::new(),
                    );
                }
            }
            ClientFrame::Goodbye => {
                debug!("server: {peer} said goodbye");
                break;
            }
            ClientFrame::Hello { .. } => {
                debug!("server: ignoring repeated Hello from {peer}");
            }
        }
    }

    // Wake any handler still running for this connection.
    for (_, flag) in lock(&connection.in_flight).drain() {
        flag.store(true, Ordering::Release);
    }
}

fn run_call(
    registry: &ServiceRegistry,
    connection: &Connection,
    call_id: CallId,
    payload: &[u8],
    meta: &CallMeta,
) {
    let (mut status, mut reply) = registry.dispatch(payload, meta);
    if status.is_ok() && meta.deadline.is_some_and(|deadline| Instant::now() > deadline) {
        status = RpcStatus::new(StatusCode::DeadlineExceeded, "deadline exceeded");
        reply = Vec::new();
    }
    if connection.claim(call_id).is_some() {
        connection.reply(call_id, status, reply);
    } else {
        debug!("server: dropping reply for cancelled call {call_id}");
    }
}
