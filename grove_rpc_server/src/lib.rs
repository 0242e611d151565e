// grove_rpc_server — threaded server for grove_rpc services.
//
// Accepts TCP connections speaking `grove_rpc_protocol`, routes each `Call`
// frame to a handler registered in a `ServiceRegistry`, and writes back one
// `Reply` per call. Service crates register their handlers; the binary that
// serves the demo hello service lives in `grove_rpc_hello`.
//
// Module overview:
// - `registry.rs`: `ServiceRegistry` (method path -> handler) and `CallMeta`.
// - `server.rs`:   Listener, per-connection reader threads, per-call threads,
//                  cancellation bookkeeping, `ServerHandle`.
// - `error.rs`:    `ServerError`.
//
// Dependencies: `grove_rpc_protocol` only. No dependency on the client crate
// or Godot.

pub mod error;
pub mod registry;
pub mod server;

pub use error::ServerError;
pub use registry::{CallMeta, HandlerReply, ServiceRegistry};
pub use server::{ServerConfig, ServerHandle, start_server};
