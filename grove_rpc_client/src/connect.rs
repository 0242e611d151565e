// Connection establisher: bring a fresh channel to Ready, or give up.
//
// Runs once per worker lifetime, on the worker thread. The channel is polled
// for at most `ClientTimings::connect_timeout` in total, each poll waiting at
// most `connect_poll` for a connectivity state change. The poll only paces
// stop checks and state logging; a slow handshake keeps running across polls
// on the channel's dialer thread. A stop request seen between polls abandons
// the attempt. There is no automatic retry after a
// timeout; the caller reports the failure and the worker exits.

use std::time::Instant;

use log::{debug, info};

use crate::channel::Channel;
use crate::config::StartupConfig;
use crate::error::ConnectError;
use crate::lifecycle::WorkerLifecycle;

pub fn establish_channel(
    config: &StartupConfig,
    lifecycle: &WorkerLifecycle,
) -> Result<Channel, ConnectError> {
    let timings = config.timings;
    let mut channel = Channel::new(config)?;
    info!(
        "connect: opening {} channel to {}",
        config.credentials.kind(),
        channel.endpoint()
    );

    let started = Instant::now();
    let deadline = started + timings.connect_timeout;
    let mut state = channel.state();
    while !channel.is_ready() {
        if lifecycle.is_pending_stopped() {
            return Err(ConnectError::Cancelled);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ConnectError::Timeout {
                endpoint: config.endpoint.clone(),
                waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                last_failure: channel
                    .last_failure()
                    .unwrap_or("no response")
                    .to_owned(),
            });
        }
        state = channel.wait_for_state_change(state, remaining.min(timings.connect_poll));
        debug!("connect: {} is {state:?}", channel.endpoint());
    }
    Ok(channel)
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use grove_rpc_protocol::{
        ClientFrame, PROTOCOL_VERSION, ServerFrame, decode_frame, encode_frame, read_message,
        write_message,
    };

    use super::*;
    use crate::config::ClientTimings;
    use crate::credentials::ChannelCredentials;

    fn config(endpoint: String, connect_timeout: Duration) -> StartupConfig {
        StartupConfig {
            endpoint,
            credentials: ChannelCredentials::insecure(),
            timings: ClientTimings {
                connect_timeout,
                ..ClientTimings::default()
            },
        }
    }

    #[test]
    fn times_out_against_a_closed_port() {
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let life = WorkerLifecycle::new();
        let start = Instant::now();
        let err =
            establish_channel(&config(addr.to_string(), Duration::from_millis(400)), &life)
                .unwrap_err();
        let elapsed = start.elapsed();
        assert!(matches!(err, ConnectError::Timeout { .. }), "{err}");
        assert!(elapsed >= Duration::from_millis(350), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "{elapsed:?}");
    }

    #[test]
    fn stop_abandons_the_attempt() {
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let life = Arc::new(WorkerLifecycle::new());
        life.begin_initialization().unwrap();
        let stopper = Arc::clone(&life);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            stopper.mark_pending_stopped();
        });
        let err = establish_channel(&config(addr.to_string(), Duration::from_secs(10)), &life)
            .unwrap_err();
        assert!(matches!(err, ConnectError::Cancelled), "{err}");
        handle.join().unwrap();
    }

    #[test]
    fn connects_to_a_live_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let hello: ClientFrame = decode_frame(&read_message(&mut stream).unwrap()).unwrap();
            assert!(matches!(hello, ClientFrame::Hello { .. }));
            let welcome = ServerFrame::Welcome {
                protocol_version: PROTOCOL_VERSION,
                server_name: "test".into(),
            };
            write_message(&mut stream, &encode_frame(&welcome).unwrap()).unwrap();
        });
        let life = WorkerLifecycle::new();
        let channel =
            establish_channel(&config(addr.to_string(), Duration::from_secs(3)), &life).unwrap();
        assert!(channel.is_ready());
        server.join().unwrap();
    }

    #[test]
    fn slow_server_is_reached_across_many_polls() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let _: ClientFrame = decode_frame(&read_message(&mut stream).unwrap()).unwrap();
            thread::sleep(Duration::from_millis(1200));
            let welcome = ServerFrame::Welcome {
                protocol_version: PROTOCOL_VERSION,
                server_name: "slow".into(),
            };
            write_message(&mut stream, &encode_frame(&welcome).unwrap()).unwrap();
        });
        let mut patient = config(addr.to_string(), Duration::from_secs(3));
        patient.timings.connect_poll = Duration::from_millis(50);
        let life = WorkerLifecycle::new();
        let channel = establish_channel(&patient, &life).unwrap();
        assert!(channel.is_ready());
        server.join().unwrap();
    }
}
