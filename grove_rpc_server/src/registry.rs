// Method handler registry.
//
// A `ServiceRegistry` maps fully qualified method paths
// (`/package.Service/Method`) to handlers. Handlers run on their own thread
// per call and receive the raw payload plus a `CallMeta` describing the call;
// they return the reply status and payload.
//
// `register_json` wraps a typed handler: the request is decoded from JSON
// (failure -> InvalidArgument), the handler's `Ok` value is encoded back,
// and an `Err(RpcStatus)` is sent as-is with an empty payload.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use grove_rpc_protocol::{RpcStatus, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Everything a handler may want to know about its call besides the payload.
#[derive(Clone, Debug)]
pub struct CallMeta {
    pub method: String,
    pub metadata: Vec<(String, String)>,
    pub authority: Option<String>,
    pub deadline: Option<Instant>,
    pub(crate) cancelled: Arc<AtomicBool>,
}

impl CallMeta {
    /// Look up the first metadata value for `key`.
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// True once the client has cancelled the call. Long-running handlers
    /// should check this and return early.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// A handler's answer: status plus reply payload.
pub type HandlerReply = (RpcStatus, Vec<u8>);

type Handler = Arc<dyn Fn(&[u8], &CallMeta) -> HandlerReply + Send + Sync>;

#[derive(Clone, Default)]
pub struct ServiceRegistry {
    handlers: HashMap<String, Handler>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raw handler. A later registration for the same method
    /// replaces the earlier one.
    pub fn register(
        &mut self,
        method: impl Into<String>,
        handler: impl Fn(&[u8], &CallMeta) -> HandlerReply + Send + Sync + 'static,
    ) -> &mut Self {
        self.handlers.insert(method.into(), Arc::new(handler));
        self
    }

    /// Register a handler with JSON-encoded request and response types.
    pub fn register_json<Req, Resp, F>(&mut self, method: impl Into<String>, handler: F) -> &mut Self
    where
        Req: DeserializeOwned,
        Resp: Serialize,
        F: Fn(Req, &CallMeta) -> Result<Resp, RpcStatus> + Send + Sync + 'static,
    {
        self.register(method, move |payload, meta| {
            let request: Req = match serde_json::from_slice(payload) {
                Ok(request) => request,
                Err(e) => {
                    return (
                        RpcStatus::new(StatusCode::InvalidArgument, format!("bad request: {e}")),
                        Vec::new(),
                    );
                }
            };
            match handler(request, meta) {
                Ok(response) => match serde_json::to_vec(&response) {
                    Ok(bytes) => (RpcStatus::ok(), bytes),
                    Err(e) => (
                        RpcStatus::new(StatusCode::Internal, format!("bad response: {e}")),
                        Vec::new(),
                    ),
                },
                Err(status) => (status, Vec::new()),
            }
        })
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Run the handler for `meta.method`, or answer Unimplemented.
    pub fn dispatch(&self, payload: &[u8], meta: &CallMeta) -> HandlerReply {
        match self.handlers.get(&meta.method) {
            Some(handler) => handler(payload, meta),
            None => (
                RpcStatus::new(
                    StatusCode::Unimplemented,
                    format!("unknown method {}", meta.method),
                ),
                Vec::new(),
            ),
        }
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&str> = self.methods().collect();
        methods.sort_unstable();
        f.debug_struct("ServiceRegistry")
            .field("methods", &methods)
            .finish()
    }
}
