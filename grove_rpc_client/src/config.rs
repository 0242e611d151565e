// Startup configuration handed from the facade to its worker thread.
//
// `StartupConfig` is written exactly once, before the worker thread is
// spawned, and then shared immutably through an `Arc`. The worker never sees
// the facade itself, only this snapshot.
//
// `ClientTimings` collects the wait intervals used by the connection
// establisher, the call executor, and the idle worker loop. The defaults
// are the production values; tests shrink them to keep runs short.

use std::sync::Arc;
use std::time::Duration;

use crate::credentials::ChannelCredentials;

/// Immutable connection parameters for one worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartupConfig {
    /// `host[:port]`, possibly invalid (validation only logs).
    pub endpoint: String,
    pub credentials: ChannelCredentials,
    pub timings: ClientTimings,
}

impl StartupConfig {
    pub fn new(endpoint: impl Into<String>, credentials: ChannelCredentials) -> Arc<Self> {
        Arc::new(Self {
            endpoint: endpoint.into(),
            credentials,
            timings: ClientTimings::default(),
        })
    }
}

/// Wait intervals for the worker thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientTimings {
    /// Total budget for bringing the channel to Ready.
    pub connect_timeout: Duration,
    /// Longest single wait for a connectivity state change.
    pub connect_poll: Duration,
    /// Longest single wait for a call to complete before re-checking for
    /// shutdown.
    pub call_wait_slice: Duration,
    /// How long the worker sleeps on its doorbell after a pass with no work.
    pub idle_wait: Duration,
}

impl Default for ClientTimings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            connect_poll: Duration::from_millis(100),
            call_wait_slice: Duration::from_secs(1),
            idle_wait: Duration::from_millis(100),
        }
    }
}
