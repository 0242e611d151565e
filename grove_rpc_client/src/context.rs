// Per-call context: metadata and behavior flags attached to one RPC.
//
// A `CallContext` is built fresh for every call and moved into it; it is not
// `Clone`, so a context is never shared between calls. On the worker thread
// the executor turns it into `CallOptions`, the wire-ready form:
// - metadata keys that are empty or start with the reserved `:` prefix are
//   dropped, each with an error log;
// - the deadline becomes a remaining-time budget in milliseconds;
// - an empty authority override is treated as absent.
//
// Engine-side code passes contexts as JSON (`from_json`), e.g.
// `{"metadata": {"x-player": "ada"}, "deadline_ms": 2000, "compression": "gzip",
//   "wait_for_ready": true}`. A deadline that is absent, zero, or negative means
// "no deadline".

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use grove_rpc_protocol::{CallFlags, CompressionAlgorithm};
use log::{error, warn};
use serde::Deserialize;

/// Metadata keys with this prefix are reserved for the transport.
pub const RESERVED_KEY_PREFIX: char = ':';

#[derive(Debug, Default)]
pub struct CallContext {
    pub metadata: Vec<(String, String)>,
    pub deadline: Option<Instant>,
    pub authority: Option<String>,
    pub compression: CompressionAlgorithm,
    pub flags: CallFlags,
}

/// Wire-ready call options, produced from a `CallContext` on the worker.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub metadata: Vec<(String, String)>,
    pub authority: Option<String>,
    pub timeout_ms: Option<u64>,
    pub compression: CompressionAlgorithm,
    pub flags: CallFlags,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ContextDescriptor {
    metadata: BTreeMap<String, String>,
    deadline_ms: i64,
    authority: String,
    compression: CompressionAlgorithm,
    idempotent: bool,
    cacheable: bool,
    wait_for_ready: bool,
    initial_metadata_corked: bool,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    /// Deadline `timeout` from now. A zero timeout clears the deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    pub fn with_compression(mut self, compression: CompressionAlgorithm) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_flags(mut self, flags: CallFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn wait_for_ready(&self) -> bool {
        self.flags.wait_for_ready
    }

    /// Parse an engine-side JSON context. Unreadable input yields the default
    /// context with a warning.
    pub fn from_json(json: &str) -> Self {
        if json.trim().is_empty() {
            return Self::default();
        }
        let descriptor: ContextDescriptor = match serde_json::from_str(json) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!("call context: ignoring unreadable JSON ({e})");
                return Self::default();
            }
        };
        let deadline = u64::try_from(descriptor.deadline_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        Self {
            metadata: descriptor.metadata.into_iter().collect(),
            deadline,
            authority: Some(descriptor.authority).filter(|a| !a.is_empty()),
            compression: descriptor.compression,
            flags: CallFlags {
                idempotent: descriptor.idempotent,
                cacheable: descriptor.cacheable,
                wait_for_ready: descriptor.wait_for_ready,
                initial_metadata_corked: descriptor.initial_metadata_corked,
            },
        }
    }

    /// Convert to wire options as of `now`, dropping reserved or empty keys.
    pub fn into_options(self, now: Instant) -> CallOptions {
        let metadata = self
            .metadata
            .into_iter()
            .filter(|(key, _)| {
                if key.is_empty() {
                    error!("call context: skipping metadata entry with an empty key");
                    false
                } else if key.starts_with(RESERVED_KEY_PREFIX) {
                    error!("call context: skipping reserved metadata key \"{key}\"");
                    false
                } else {
                    true
                }
            })
            .collect();
        let timeout_ms = self.deadline.map(|deadline| {
            let remaining = deadline.saturating_duration_since(now).as_millis();
            u64::try_from(remaining).unwrap_or(u64::MAX)
        });
        CallOptions {
            metadata,
            authority: self.authority.filter(|a| !a.is_empty()),
            timeout_ms,
            compression: self.compression,
            flags: self.flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_and_empty_keys_are_dropped() {
        let options = CallContext::new()
            .with_metadata("x-player", "ada")
            .with_metadata("", "orphan")
            .with_metadata(":authority", "sneaky")
            .with_metadata("trace-id", "42")
            .into_options(Instant::now());
        assert_eq!(
            options.metadata,
            vec![
                ("x-player".to_string(), "ada".to_string()),
                ("trace-id".to_string(), "42".to_string()),
            ]
        );
    }

    #[test]
    fn deadline_becomes_remaining_budget() {
        let now = Instant::now();
        let options = CallContext::new()
            .with_deadline(now + Duration::from_millis(1500))
            .into_options(now);
        assert_eq!(options.timeout_ms, Some(1500));

        let expired = CallContext::new()
            .with_deadline(now)
            .into_options(now + Duration::from_secs(1));
        assert_eq!(expired.timeout_ms, Some(0));

        assert_eq!(CallContext::new().into_options(now).timeout_ms, None);
        assert!(
            CallContext::new()
                .with_timeout(Duration::ZERO)
                .deadline
                .is_none()
        );
    }

    #[test]
    fn json_context_carries_everything() {
        let context = CallContext::from_json(
            r#"{"metadata":{"x-player":"ada"},"deadline_ms":2000,"authority":"svc.local",
                "compression":"deflate","idempotent":true,"wait_for_ready":true}"#,
        );
        assert!(context.deadline.is_some());
        assert!(context.wait_for_ready());
        let options = context.into_options(Instant::now());
        assert_eq!(options.metadata, vec![("x-player".into(), "ada".into())]);
        assert_eq!(options.authority.as_deref(), Some("svc.local"));
        assert_eq!(options.compression, CompressionAlgorithm::Deflate);
        assert!(options.flags.idempotent);
        assert!(!options.flags.cacheable);
        assert!(options.timeout_ms.unwrap() <= 2000);
    }

    #[test]
    fn non_positive_json_deadline_means_none() {
        assert!(CallContext::from_json(r#"{"deadline_ms":0}"#).deadline.is_none());
        assert!(CallContext::from_json(r#"{"deadline_ms":-5}"#).deadline.is_none());
        assert!(CallContext::from_json("").deadline.is_none());
        assert!(CallContext::from_json("{oops").deadline.is_none());
    }

    #[test]
    fn empty_authority_is_absent() {
        let options = CallContext::new()
            .with_authority("")
            .into_options(Instant::now());
        assert_eq!(options.authority, None);
    }
}
