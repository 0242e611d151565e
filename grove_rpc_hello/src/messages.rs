// Hello service message types and method paths.
//
// Payloads are JSON; every field has a default so that an empty or partial
// object still decodes, and a failed call can hand out `Default` values.

use serde::{Deserialize, Serialize};

pub const SERVICE: &str = "grove.hello.HelloService";
pub const HELLO_METHOD: &str = "/grove.hello.HelloService/Hello";
pub const SERVER_TIME_METHOD: &str = "/grove.hello.HelloService/ServerTime";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelloRequest {
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelloResponse {
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTimeRequest {}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerTimeResponse {
    pub hours: i32,
    pub minutes: i32,
    pub seconds: i32,
    /// UTC offset, e.g. `+0000`.
    pub timezone: String,
    /// IANA zone name the server reports, e.g. `Etc/UTC`.
    pub location: String,
}

impl ServerTimeResponse {
    /// `HH:MM:SS`.
    pub fn clock(&self) -> String {
        format!("{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
    }
}
