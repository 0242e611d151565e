// Client transport channel: one TCP (optionally TLS) connection to a server.
//
// The channel is owned by the worker thread and never shared. It tracks a
// connectivity state (Idle, Connecting, Ready, TransientFailure, Shutdown)
// and moves between them only when the worker asks it to:
// - `wait_for_state_change()` waits up to one slice for the state to move.
//   From Idle or TransientFailure it first starts a connection attempt (name
//   resolution, TCP connect, optional TLS, then the `Hello`/`Welcome`
//   handshake) on a short-lived dialer thread. The attempt runs against its
//   own budget (`ClientTimings::connect_timeout`), not the slice: a slow link
//   leaves the channel in Connecting across several slices until the attempt
//   lands. An attempt that fails early still takes the full slice, which
//   keeps the establisher's poll loop from spinning.
// - `start_call()` / `cancel()` write frames.
// - `poll_reply()` waits up to a timeout for the reply to one call.
//
// Reads use a socket read timeout rather than a blocking reader thread. Bytes
// go through a `FrameDecoder`, so a timeout in the middle of a frame never
// desynchronizes the stream. Replies for other call ids (late answers to calls
// abandoned after a local deadline) are logged and discarded.
//
// Any I/O failure drops the connection and moves the channel to
// TransientFailure; the next `wait_for_state_change()` reconnects.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use grove_rpc_protocol::{
    CallId, ClientFrame, FrameDecoder, PROTOCOL_VERSION, RpcStatus, ServerFrame, decode_frame,
    encode_frame, read_message, write_message,
};
use log::{debug, info, trace, warn};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, StreamOwned};

use crate::config::StartupConfig;
use crate::context::CallOptions;
use crate::endpoint::Endpoint;
use crate::error::{CredentialsError, TransportError};

/// Smallest timeout handed to the socket (zero means "block forever" there).
const MIN_SOCKET_TIMEOUT: Duration = Duration::from_millis(1);

const READ_CHUNK: usize = 8 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectivityState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

/// The completion of one call as read from the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub status: RpcStatus,
    pub payload: Vec<u8>,
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Stream {
    fn tcp(&self) -> &TcpStream {
        match self {
            Stream::Plain(sock) => sock,
            Stream::Tls(tls) => &tls.sock,
        }
    }

    fn close(&mut self) {
        if let Stream::Tls(tls) = self {
            tls.conn.send_close_notify();
            let _ = tls.flush();
        }
        let _ = self.tcp().shutdown(Shutdown::Both);
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(sock) => sock.read(buf),
            Stream::Tls(tls) => tls.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(sock) => sock.write(buf),
            Stream::Tls(tls) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(sock) => sock.flush(),
            Stream::Tls(tls) => tls.flush(),
        }
    }
}

pub struct Channel {
    endpoint: Endpoint,
    tls: Option<Arc<ClientConfig>>,
    client_name: String,
    attempt_budget: Duration,
    attempt: Option<Receiver<Result<Stream, TransportError>>>,
    stream: Option<Stream>,
    decoder: FrameDecoder,
    state: ConnectivityState,
    last_failure: Option<String>,
    next_call_id: u64,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("endpoint", &self.endpoint)
            .field("tls", &self.tls.is_some())
            .field("state", &self.state)
            .field("last_failure", &self.last_failure)
            .finish()
    }
}

impl Channel {
    /// Build an idle channel. Resolves credentials but does not connect.
    pub fn new(config: &StartupConfig) -> Result<Self, CredentialsError> {
        let endpoint = Endpoint::split(&config.endpoint);
        let tls = config.credentials.tls_config()?;
        if tls.is_some() {
            ServerName::try_from(endpoint.host.as_str())
                .map_err(|_| CredentialsError::ServerName(endpoint.host.clone()))?;
        }
        Ok(Self {
            endpoint,
            tls,
            client_name: format!("grove_rpc_client/{}", env!("CARGO_PKG_VERSION")),
            attempt_budget: config.timings.connect_timeout,
            attempt: None,
            stream: None,
            decoder: FrameDecoder::new(),
            state: ConnectivityState::Idle,
            last_failure: None,
            next_call_id: 0,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectivityState::Ready
    }

    /// Why the most recent connection attempt or I/O operation failed.
    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    /// Wait up to `timeout` for the state to differ from `last`.
    ///
    /// From Idle or TransientFailure this starts a connection attempt; from
    /// Connecting it keeps waiting on the one already running. An attempt
    /// that fails early sleeps out the rest of `timeout`.
    pub fn wait_for_state_change(
        &mut self,
        last: ConnectivityState,
        timeout: Duration,
    ) -> ConnectivityState {
        if self.state != last {
            return self.state;
        }
        match self.state {
            ConnectivityState::Idle | ConnectivityState::TransientFailure => {
                let started = Instant::now();
                self.start_attempt();
                self.await_attempt(timeout);
                if self.state == ConnectivityState::TransientFailure {
                    if let Some(rest) = timeout.checked_sub(started.elapsed()) {
                        thread::sleep(rest);
                    }
                }
            }
            ConnectivityState::Connecting => self.await_attempt(timeout),
            ConnectivityState::Ready | ConnectivityState::Shutdown => thread::sleep(timeout),
        }
        self.state
    }

    fn start_attempt(&mut self) {
        let dialer = Dialer {
            endpoint: self.endpoint.clone(),
            tls: self.tls.clone(),
            client_name: self.client_name.clone(),
        };
        let budget = self.attempt_budget;
        let (tx, rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name(format!("grove-dial-{}", self.endpoint))
            .spawn(move || {
                // The channel may have given up on this attempt already.
                let _ = tx.send(dialer.open(budget));
            });
        match spawned {
            Ok(_) => {
                self.attempt = Some(rx);
                self.state = ConnectivityState::Connecting;
            }
            Err(e) => {
                warn!("channel: cannot spawn dialer for {}: {e}", self.endpoint);
                self.last_failure = Some(e.to_string());
                self.state = ConnectivityState::TransientFailure;
            }
        }
    }

    fn await_attempt(&mut self, timeout: Duration) {
        let outcome = match &self.attempt {
            Some(rx) => rx.recv_timeout(timeout.max(MIN_SOCKET_TIMEOUT)),
            None => Err(RecvTimeoutError::Disconnected),
        };
        let result = match outcome {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => return,
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Protocol(
                "connection attempt abandoned".into(),
            )),
        };
        self.attempt = None;
        match result {
            Ok(stream) => {
                info!("channel: connected to {}", self.endpoint);
                self.stream = Some(stream);
                self.decoder.clear();
                self.last_failure = None;
                self.state = ConnectivityState::Ready;
            }
            Err(e) => {
                debug!("channel: connect to {} failed: {e}", self.endpoint);
                self.last_failure = Some(e.to_string());
                self.state = ConnectivityState::TransientFailure;
            }
        }
    }

    /// Write a `Call` frame. Returns the id the reply will carry.
    pub fn start_call(
        &mut self,
        method: &str,
        payload: Vec<u8>,
        options: CallOptions,
    ) -> Result<CallId, TransportError> {
        let call_id = CallId(self.next_call_id);
        self.next_call_id += 1;
        let frame = ClientFrame::Call {
            call_id,
            method: method.to_owned(),
            payload,
            metadata: options.metadata,
            authority: options.authority,
            timeout_ms: options.timeout_ms,
            compression: options.compression,
            flags: options.flags,
        };
        self.send(&frame)?;
        trace!("channel: started {method} {call_id}");
        Ok(call_id)
    }

    /// Ask the server to abandon `call_id`. Best effort.
    pub fn cancel(&mut self, call_id: CallId) -> Result<(), TransportError> {
        self.send(&ClientFrame::Cancel { call_id })
    }

    fn send(&mut self, frame: &ClientFrame) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let bytes = encode_frame(frame)?;
        if let Err(e) = write_message(stream, &bytes) {
            self.fail(&e.to_string());
            return Err(e.into());
        }
        Ok(())
    }

    /// Wait up to `timeout` for the reply to `call_id`.
    ///
    /// `Ok(None)` means the wait elapsed with the call still outstanding.
    pub fn poll_reply(
        &mut self,
        call_id: CallId,
        timeout: Duration,
    ) -> Result<Option<Reply>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(reply) = self.next_buffered_reply(call_id)? {
                return Ok(Some(reply));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
            stream
                .tcp()
                .set_read_timeout(Some(remaining.max(MIN_SOCKET_TIMEOUT)))?;
            match stream.read(&mut chunk) {
                Ok(0) => {
                    self.fail("connection closed by peer");
                    return Err(TransportError::Closed);
                }
                Ok(n) => self.decoder.push(&chunk[..n]),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return Ok(None);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.fail(&e.to_string());
                    return Err(e.into());
                }
            }
        }
    }

    /// Pop buffered frames until the reply for `call_id` or the buffer runs
    /// dry.
    fn next_buffered_reply(&mut self, call_id: CallId) -> Result<Option<Reply>, TransportError> {
        loop {
            let bytes = match self.decoder.next_frame() {
                Ok(Some(bytes)) => bytes,
                Ok(None) => return Ok(None),
                Err(e) => {
                    self.fail(&e.to_string());
                    return Err(TransportError::Protocol(e.to_string()));
                }
            };
            let frame: ServerFrame = match decode_frame(&bytes) {
                Ok(frame) => frame,
                Err(e) => {
                    self.fail(&e.to_string());
                    return Err(TransportError::Protocol(format!("undecodable frame: {e}")));
                }
            };
            match frame {
                ServerFrame::Reply {
                    call_id: id,
                    status,
                    payload,
                } if id == call_id => {
                    return Ok(Some(Reply {
                        status: status.into(),
                        payload,
                    }));
                }
                ServerFrame::Reply { call_id: id, .. } => {
                    debug!("channel: discarding late reply for {id}");
                }
                other => warn!("channel: unexpected frame mid-session: {other:?}"),
            }
        }
    }

    fn fail(&mut self, reason: &str) {
        warn!("channel: connection to {} lost: {reason}", self.endpoint);
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
        self.decoder.clear();
        self.last_failure = Some(reason.to_owned());
        self.state = ConnectivityState::TransientFailure;
    }

    /// Say goodbye and close. The channel stays in Shutdown afterwards.
    pub fn shutdown(&mut self) {
        self.attempt = None;
        if let Some(mut stream) = self.stream.take() {
            if let Ok(bytes) = encode_frame(&ClientFrame::Goodbye) {
                let _ = write_message(&mut stream, &bytes);
            }
            stream.close();
        }
        self.state = ConnectivityState::Shutdown;
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if self.stream.is_some() {
            self.shutdown();
        }
    }
}

/// Everything one connection attempt needs, detached from the channel so the
/// attempt can outlive a slice on its own thread.
struct Dialer {
    endpoint: Endpoint,
    tls: Option<Arc<ClientConfig>>,
    client_name: String,
}

impl Dialer {
    /// Resolve, connect and handshake, all within `budget`.
    fn open(&self, budget: Duration) -> Result<Stream, TransportError> {
        let deadline = Instant::now() + budget;
        let addr = resolve(&self.endpoint)?;
        let sock = TcpStream::connect_timeout(&addr, remaining(deadline)?)?;
        sock.set_nodelay(true)?;
        sock.set_read_timeout(Some(remaining(deadline)?))?;
        sock.set_write_timeout(Some(remaining(deadline)?))?;

        let mut stream = match &self.tls {
            None => Stream::Plain(sock),
            Some(config) => {
                let name = ServerName::try_from(self.endpoint.host.as_str())
                    .map_err(|e| TransportError::Protocol(format!("server name: {e}")))?
                    .to_owned();
                let conn = ClientConnection::new(Arc::clone(config), name)
                    .map_err(|e| TransportError::Protocol(format!("tls: {e}")))?;
                Stream::Tls(Box::new(StreamOwned::new(conn, sock)))
            }
        };

        let hello = ClientFrame::Hello {
            protocol_version: PROTOCOL_VERSION,
            client_name: self.client_name.clone(),
        };
        write_message(&mut stream, &encode_frame(&hello)?)?;
        stream.tcp().set_read_timeout(Some(remaining(deadline)?))?;
        let welcome: ServerFrame = decode_frame(&read_message(&mut stream)?)?;
        stream.tcp().set_write_timeout(None)?;
        match welcome {
            ServerFrame::Welcome {
                protocol_version,
                server_name,
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    warn!(
                        "channel: server {server_name} speaks protocol {protocol_version}, we speak {PROTOCOL_VERSION}"
                    );
                }
                debug!("channel: welcomed by {server_name}");
                Ok(stream)
            }
            ServerFrame::Rejected { reason } => Err(TransportError::Rejected(reason)),
            other => Err(TransportError::Protocol(format!(
                "expected Welcome, got {other:?}"
            ))),
        }
    }
}

/// Time left before `deadline`, or `TimedOut` once it has passed.
fn remaining(deadline: Instant) -> Result<Duration, TransportError> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(TransportError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            "connection attempt ran out of time",
        )));
    }
    Ok(left.max(MIN_SOCKET_TIMEOUT))
}

fn resolve(endpoint: &Endpoint) -> Result<SocketAddr, TransportError> {
    endpoint
        .authority()
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            TransportError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{endpoint} resolved to no addresses"),
            ))
        })
}
