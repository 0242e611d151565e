// Server start-up errors. Per-call failures are statuses sent to the client.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to configure listener: {0}")]
    Listener(#[source] io::Error),
    #[error("failed to spawn server thread: {0}")]
    Spawn(#[source] io::Error),
}
