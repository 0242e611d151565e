// Test-only helpers for end-to-end client/server tests.
//
// Starts real `grove_rpc_server` instances on ephemeral ports and drives a
// real `HelloServiceClient` against them. The only test-specific code is the
// blocking polling wrapper (`collect_events`) around the tick-driven
// `update()`; everything else runs the same code paths as a game would.
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::{Duration, Instant};

use grove_rpc_client::{ClientEvent, ClientId, ClientTimings};
use grove_rpc_hello::{HelloEvent, HelloServiceClient, service};
use grove_rpc_server::{ServerConfig, ServerHandle, ServiceRegistry, start_server};

/// Default timeout for blocking poll operations.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between `update()` calls, roughly one frame.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Route `log` output to the test harness. Safe to call from every test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Short waits so failure paths finish quickly.
pub fn fast_timings() -> ClientTimings {
    ClientTimings {
        connect_timeout: Duration::from_millis(500),
        connect_poll: Duration::from_millis(50),
        call_wait_slice: Duration::from_millis(50),
        idle_wait: Duration::from_millis(20),
    }
}

/// Serve `registry` on an OS-assigned localhost port.
pub fn start_on_free_port(registry: ServiceRegistry) -> (ServerHandle, SocketAddr) {
    let config = ServerConfig {
        port: 0,
        server_name: "integration-test".into(),
        ..ServerConfig::default()
    };
    start_server(config, registry).unwrap()
}

/// A server running the stock hello service.
pub fn start_hello_server() -> (ServerHandle, SocketAddr) {
    let mut registry = ServiceRegistry::new();
    service::register(&mut registry, service::DEFAULT_LOCATION);
    start_on_free_port(registry)
}

/// `localhost:PORT` where nothing is listening.
pub fn closed_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("127.0.0.1:{port}")
}

/// Call `update()` until `count` events have arrived or `POLL_TIMEOUT`
/// elapses. Panics on timeout.
pub fn collect_events(
    client: &HelloServiceClient,
    count: usize,
) -> Vec<(ClientId, ClientEvent<HelloEvent>)> {
    let start = Instant::now();
    let mut events = Vec::new();
    while events.len() < count {
        assert!(
            start.elapsed() < POLL_TIMEOUT,
            "timed out with {} of {count} events: {events:?}",
            events.len()
        );
        client.update(|id, event| events.push((id, event)));
        thread::sleep(POLL_INTERVAL);
    }
    events
}

/// Keep calling `update()` for `window` and return whatever arrived.
pub fn drain_for(
    client: &HelloServiceClient,
    window: Duration,
) -> Vec<(ClientId, ClientEvent<HelloEvent>)> {
    let start = Instant::now();
    let mut events = Vec::new();
    while start.elapsed() < window {
        client.update(|id, event| events.push((id, event)));
        thread::sleep(POLL_INTERVAL);
    }
    events
}
