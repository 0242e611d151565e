// CLI entry point for the grove_rpc demo server.
//
// Serves the hello service over plain TCP until the process is killed.
// See `grove_rpc_server::server` for the networking architecture.
//
// Usage:
//   grove-server [OPTIONS]
//     --host <HOST>         Bind address (default: 127.0.0.1)
//     --port <PORT>         Listen port (default: 50051)
//     --name <NAME>         Server name sent in the handshake (default: grove-server)
//     --location <ZONE>     Zone name reported by ServerTime (default: Etc/UTC)
//
// Log verbosity follows `RUST_LOG` (default: info).

use grove_rpc_hello::service::{self, DEFAULT_LOCATION};
use grove_rpc_server::{ServerConfig, ServiceRegistry, start_server};

struct Options {
    server: ServerConfig,
    location: String,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let options = parse_args();

    let mut registry = ServiceRegistry::new();
    service::register(&mut registry, options.location);

    let (handle, addr) = match start_server(options.server, registry) {
        Ok(result) => result,
        Err(e) => {
            log::error!("failed to start server: {e}");
            std::process::exit(1);
        }
    };

    println!("grove-server listening on {addr}");
    println!("Press Ctrl+C to stop.");
    // The process exits on SIGINT/SIGTERM; the accept loop never ends first.
    handle.wait();
}

/// Parse command-line arguments. Simple `std::env::args()` matching.
fn parse_args() -> Options {
    let mut options = Options {
        server: ServerConfig::default(),
        location: DEFAULT_LOCATION.into(),
    };
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--host" => {
                i += 1;
                options.server.host = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--host requires a value");
                    std::process::exit(1);
                });
            }
            "--port" => {
                i += 1;
                options.server.port =
                    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                        eprintln!("--port requires a valid port number");
                        std::process::exit(1);
                    });
            }
            "--name" => {
                i += 1;
                options.server.server_name = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--name requires a value");
                    std::process::exit(1);
                });
            }
            "--location" => {
                i += 1;
                options.location = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--location requires a value");
                    std::process::exit(1);
                });
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    options
}

fn print_usage() {
    println!("Usage: grove-server [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --host <HOST>         Bind address (default: 127.0.0.1)");
    println!("  --port <PORT>         Listen port (default: 50051)");
    println!("  --name <NAME>         Server name (default: grove-server)");
    println!("  --location <ZONE>     Zone reported by ServerTime (default: Etc/UTC)");
    println!("  --help, -h            Show this help");
}
