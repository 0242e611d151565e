// grove_rpc_gdext — GDExtension bridge between grove_rpc clients and Godot.
//
// A thin wrapper: all networking lives in `grove_rpc_client`, all hello
// service types in `grove_rpc_hello`. This crate only translates between
// Godot types and those.
//
// Module overview:
// - `hello_node.rs`: The `HelloServiceNode` Godot node. Owns one
//                    `HelloServiceClient`, drains it every `process()` frame,
//                    and re-emits results as Godot signals.
// - `log_bridge.rs`: Routes `log` records from the client worker threads to
//                    Godot's output panel.

mod hello_node;
mod log_bridge;

use godot::prelude::*;

struct GroveRpcExtension;

#[gdextension]
unsafe impl ExtensionLibrary for GroveRpcExtension {
    fn on_level_init(level: InitLevel) {
        if level == InitLevel::Scene {
            log_bridge::install();
        }
    }
}
