// Core ID and option types for the RPC protocol.
//
// Lightweight types shared by `message.rs` (frames) and by both peers.
// `CallId` is connection-scoped: the client allocates them monotonically and
// the server echoes them back in `Reply` frames.

use serde::{Deserialize, Serialize};

/// Connection-scoped call identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub u64);

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Compression algorithm requested for a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionAlgorithm {
    #[default]
    None,
    Deflate,
    Gzip,
}

/// Per-call behavior flags carried alongside the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallFlags {
    pub idempotent: bool,
    pub cacheable: bool,
    pub wait_for_ready: bool,
    /// Coalesce initial metadata with the first message write.
    pub initial_metadata_corked: bool,
}
