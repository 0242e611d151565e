// grove_rpc_hello — the demo hello service.
//
// Two unary methods: `Hello(name) -> message` and `ServerTime() -> time of
// day`. The crate carries both halves so they stay in sync:
// - `messages.rs`: request/response types and method paths.
// - `client.rs`:   `HelloService` binding, `HelloServiceWorker`, and the
//                  `HelloServiceClient` facade used by games (and by the
//                  Godot node in `grove_rpc_gdext`).
// - `service.rs`:  server handlers, registered into a `ServiceRegistry`.
// - `main.rs`:     the `grove-server` binary serving this service.

pub mod client;
pub mod messages;
pub mod service;

pub use client::{HelloEvent, HelloService, HelloServiceClient};
pub use messages::{HelloRequest, HelloResponse, ServerTimeRequest, ServerTimeResponse};
