// Server-side handlers for the hello service.
//
// `register` adds both methods to a `ServiceRegistry`. The handlers are
// plain functions so they can be tested without a socket.

use std::time::{SystemTime, UNIX_EPOCH};

use grove_rpc_server::{CallMeta, ServiceRegistry};
use log::info;

use crate::messages::{
    HELLO_METHOD, HelloRequest, HelloResponse, SERVER_TIME_METHOD, ServerTimeRequest,
    ServerTimeResponse,
};

/// Zone name reported when the server is not told otherwise.
pub const DEFAULT_LOCATION: &str = "Etc/UTC";

pub fn register(registry: &mut ServiceRegistry, location: impl Into<String>) {
    let location = location.into();
    registry.register_json(HELLO_METHOD, |request: HelloRequest, _meta: &CallMeta| {
        info!("hello: greeting {}", request.name);
        Ok(greet(&request))
    });
    registry.register_json(
        SERVER_TIME_METHOD,
        move |_: ServerTimeRequest, _meta: &CallMeta| Ok(server_time(SystemTime::now(), &location)),
    );
}

pub fn greet(request: &HelloRequest) -> HelloResponse {
    HelloResponse {
        message: format!("Grove demo server greets you, {}!", request.name),
    }
}

/// Wall-clock time of day at `now`, in UTC.
pub fn server_time(now: SystemTime, location: &str) -> ServerTimeResponse {
    let secs = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let of_day = secs % 86_400;
    ServerTimeResponse {
        hours: (of_day / 3600) as i32,
        minutes: (of_day % 3600 / 60) as i32,
        seconds: (of_day % 60) as i32,
        timezone: "+0000".into(),
        location: location.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn greeting_names_the_caller() {
        let response = greet(&HelloRequest { name: "Ada".into() });
        assert!(response.message.contains("Ada"), "{}", response.message);
    }

    #[test]
    fn time_of_day_from_epoch_seconds() {
        // 1970-01-02T13:45:07Z
        let at = UNIX_EPOCH + Duration::from_secs(86_400 + 13 * 3600 + 45 * 60 + 7);
        let time = server_time(at, DEFAULT_LOCATION);
        assert_eq!((time.hours, time.minutes, time.seconds), (13, 45, 7));
        assert_eq!(time.clock(), "13:45:07");
        assert_eq!(time.timezone, "+0000");
        assert_eq!(time.location, "Etc/UTC");
    }

    #[test]
    fn registered_methods_are_served() {
        let mut registry = ServiceRegistry::new();
        register(&mut registry, "Europe/Lisbon");
        assert!(registry.contains(HELLO_METHOD));
        assert!(registry.contains(SERVER_TIME_METHOD));
    }
}
