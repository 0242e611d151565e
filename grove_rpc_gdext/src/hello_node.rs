// Godot node wrapping a `HelloServiceClient`.
//
// GDScript usage:
//
//   var node := HelloServiceNode.new()
//   add_child(node)
//   node.hello_received.connect(_on_hello)
//   node.connect_to("localhost:50051", "")
//   node.hello("Ada", '{"deadline_ms": 2000}')
//
// Every call returns immediately; results arrive as signals emitted from
// `process()` on the main thread, one frame or more later.
//
// Arguments that are JSON strings (`credentials_json`, `context_json`) may be
// empty, meaning insecure credentials and a default call context. See
// `ChannelCredentials::from_json` and `CallContext::from_json` for the
// accepted fields.
//
// Signals:
// - `hello_received(client_id, message, status)`
// - `server_time_received(client_id, time, status)`: `time` is a dictionary
//   with hours/minutes/seconds/timezone/location/clock.
// - `rpc_error(client_id, message)`: worker-level failures such as a
//   connection that never came up.
//
// `status` is a dictionary: `{ok, code, name, message}`.

use grove_rpc_client::{
    CallContext, CallResult, ChannelCredentials, ClientEvent, ClientId, RpcStatus, StopOutcome,
};
use grove_rpc_hello::{
    HelloEvent, HelloRequest, HelloResponse, HelloServiceClient, ServerTimeRequest,
    ServerTimeResponse,
};
use godot::prelude::*;

#[derive(GodotClass)]
#[class(base=Node)]
pub struct HelloServiceNode {
    base: Base<Node>,
    client: Option<HelloServiceClient>,
}

#[godot_api]
impl INode for HelloServiceNode {
    fn init(base: Base<Node>) -> Self {
        Self { base, client: None }
    }

    fn process(&mut self, _delta: f64) {
        let Some(client) = &self.client else { return };
        let mut events = Vec::new();
        client.update(|id, event| events.push((id, event)));
        for (id, event) in events {
            self.emit_event(id, event);
        }
    }

    fn exit_tree(&mut self) {
        if let Some(client) = self.client.take() {
            client.stop(true);
        }
    }
}

#[godot_api]
impl HelloServiceNode {
    #[signal]
    fn hello_received(client_id: i64, message: GString, status: VarDictionary);

    #[signal]
    fn server_time_received(client_id: i64, time: VarDictionary, status: VarDictionary);

    #[signal]
    fn rpc_error(client_id: i64, message: GString);

    /// Start a client for `endpoint` (`host[:port]`). Replaces (and stops) any
    /// previous client. Returns `false` only if the client refused to start.
    #[func]
    fn connect_to(&mut self, endpoint: GString, credentials_json: GString) -> bool {
        let credentials = credentials_from(&credentials_json.to_string());
        if let Some(old) = self.client.take() {
            old.stop(true);
        }
        let mut client = HelloServiceClient::new();
        let started = client.init(endpoint.to_string(), credentials);
        godot_print!(
            "HelloServiceNode: {} for {endpoint} (started={started})",
            client.client_id()
        );
        self.client = Some(client);
        started
    }

    #[func]
    fn hello(&mut self, name: GString, context_json: GString) -> bool {
        let Some(client) = &self.client else {
            godot_warn!("HelloServiceNode: hello() before connect_to()");
            return false;
        };
        let request = HelloRequest {
            name: name.to_string(),
        };
        client.hello(request, context_from(&context_json.to_string()))
    }

    #[func]
    fn server_time(&mut self, context_json: GString) -> bool {
        let Some(client) = &self.client else {
            godot_warn!("HelloServiceNode: server_time() before connect_to()");
            return false;
        };
        client.server_time(ServerTimeRequest {}, context_from(&context_json.to_string()))
    }

    /// Returns `true` if this call stopped the client.
    #[func]
    fn stop(&mut self, synchronous: bool) -> bool {
        match &self.client {
            Some(client) => client.stop(synchronous) != StopOutcome::AlreadyStopped,
            None => false,
        }
    }

    #[func]
    fn can_send_requests(&self) -> bool {
        self.client
            .as_ref()
            .is_some_and(HelloServiceClient::can_send_requests)
    }

    fn emit_event(&mut self, id: ClientId, event: ClientEvent<HelloEvent>) {
        let client_id = id.0 as i64;
        match event {
            ClientEvent::Response(HelloEvent::Hello(result)) => {
                let CallResult {
                    response: HelloResponse { message },
                    status,
                } = result;
                self.base_mut().emit_signal(
                    "hello_received",
                    &[
                        client_id.to_variant(),
                        GString::from(&message).to_variant(),
                        status_dict(&status).to_variant(),
                    ],
                );
            }
            ClientEvent::Response(HelloEvent::ServerTime(result)) => {
                let time = time_dict(&result.response);
                self.base_mut().emit_signal(
                    "server_time_received",
                    &[
                        client_id.to_variant(),
                        time.to_variant(),
                        status_dict(&result.status).to_variant(),
                    ],
                );
            }
            ClientEvent::Error(error) => {
                godot_warn!("HelloServiceNode: {id}: {error}");
                self.base_mut().emit_signal(
                    "rpc_error",
                    &[
                        client_id.to_variant(),
                        GString::from(&error.message).to_variant(),
                    ],
                );
            }
        }
    }
}

fn credentials_from(json: &str) -> ChannelCredentials {
    if json.trim().is_empty() {
        ChannelCredentials::insecure()
    } else {
        ChannelCredentials::from_json(json)
    }
}

fn context_from(json: &str) -> CallContext {
    CallContext::from_json(json)
}

fn status_dict(status: &RpcStatus) -> VarDictionary {
    let mut dict = VarDictionary::new();
    dict.set("ok", status.is_ok());
    dict.set("code", status.code.to_wire() as i64);
    dict.set("name", status.code.as_str());
    dict.set("message", GString::from(&status.message));
    dict
}

fn time_dict(time: &ServerTimeResponse) -> VarDictionary {
    let mut dict = VarDictionary::new();
    dict.set("hours", time.hours);
    dict.set("minutes", time.minutes);
    dict.set("seconds", time.seconds);
    dict.set("timezone", GString::from(&time.timezone));
    dict.set("location", GString::from(&time.location));
    dict.set("clock", GString::from(&time.clock()));
    dict
}
