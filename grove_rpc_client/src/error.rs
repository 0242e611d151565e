// Error types for the client crate.
//
// These are construction/connection-time errors. Per-call failures never use
// them: a call always completes with an `RpcStatus` inside its `CallResult`,
// and connection failures reach the application as `RpcError` events on the
// facade's error channel (see `worker.rs`).

use std::io;

use crate::endpoint::EndpointIssue;

/// An endpoint string failed syntax validation. Carries every issue found.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid endpoint \"{endpoint}\": {}", join_issues(.issues))]
pub struct EndpointError {
    pub endpoint: String,
    pub issues: Vec<EndpointIssue>,
}

fn join_issues(issues: &[EndpointIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Credentials could not be turned into a TLS client configuration.
#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error("failed to parse PEM {what}: {source}")]
    Pem {
        what: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("no {what} found in PEM text")]
    Empty { what: &'static str },
    #[error("no usable root certificates (tried {searched})")]
    NoRoots { searched: String },
    #[error("invalid TLS client identity: {0}")]
    Identity(#[source] rustls::Error),
    #[error("invalid server name \"{0}\"")]
    ServerName(String),
}

/// Failure to bring a channel to the Ready state.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("connection to {endpoint} not ready after {waited_ms} ms: {last_failure}")]
    Timeout {
        endpoint: String,
        waited_ms: u64,
        last_failure: String,
    },
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
    #[error("shutdown requested while connecting")]
    Cancelled,
}

/// I/O-level failure on an established channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("channel is not connected")]
    NotConnected,
    #[error("connection closed by peer")]
    Closed,
    #[error("handshake rejected: {0}")]
    Rejected(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}
