// grove_rpc_client — background-thread RPC client with a tick-driven facade.
//
// Each client facade (`RpcClient<B>`) owns one worker thread. The main thread
// enqueues calls and drains results once per frame; the worker connects,
// executes calls one at a time, and hands results back. Nothing on the main
// thread ever blocks on the network.
//
// Module overview:
// - `conduit.rs`:     Typed pair of single-producer queues between the two
//                     threads, with runtime thread-affinity checks.
// - `lifecycle.rs`:   `WorkerState` machine (CAS transitions) and the idle
//                     doorbell.
// - `worker.rs`:      `ServiceWorker` trait, `run_worker` driver, `RpcError`
//                     and the error channel.
// - `endpoint.rs`:    `host[:port]` syntax validation and splitting.
// - `credentials.rs`: `ChannelCredentials` and their TLS (`rustls`) config.
// - `config.rs`:      `StartupConfig` (shared by `Arc`) and `ClientTimings`.
// - `channel.rs`:     One TCP/TLS connection speaking `grove_rpc_protocol`.
// - `connect.rs`:     Bounded connection establishment.
// - `context.rs`:     `CallContext` and its wire form `CallOptions`.
// - `executor.rs`:    `CallExecutor` (one cancellable unary call) and
//                     `pump_method`.
// - `client.rs`:      `RpcClient<B>` facade and the `ServiceBinding` trait.
// - `error.rs`:       Construction/connection error enums.
//
// Service crates (e.g. `grove_rpc_hello`) supply a `ServiceBinding` and a
// `ServiceWorker`; everything else is generic.

pub mod channel;
pub mod client;
pub mod conduit;
pub mod config;
pub mod connect;
pub mod context;
pub mod credentials;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod worker;

pub use client::{ClientEvent, ClientId, RpcClient, ServiceBinding, StopOutcome};
pub use conduit::{RequestsEnd, ResponsesEnd, conduit};
pub use config::{ClientTimings, StartupConfig};
pub use context::{CallContext, CallOptions};
pub use credentials::{ChannelCredentials, TlsOptions};
pub use endpoint::Endpoint;
pub use error::{ConnectError, CredentialsError, EndpointError, TransportError};
pub use executor::{CallExecutor, CallResult, RequestWithContext, pump_method};
pub use grove_rpc_protocol::{CallFlags, CompressionAlgorithm, RpcStatus, StatusCode};
pub use lifecycle::{WorkerLifecycle, WorkerState};
pub use worker::{RpcError, RunOutcome, ServiceWorker};
