// Endpoint syntax validation and parsing.
//
// Accepted form: `host[:port]`. No URL scheme (`http://...`), no path
// segment. The host is either an IPv4 address (four dot-separated octets in
// [0, 255]) or a domain name made of ASCII letters, digits, `-` and `.`. The
// port, when present, is a base-10 integer in [0, 65536); when absent the
// connection uses port 80.
//
// A host is treated as an IP address when it consists only of digits and
// dots; anything else is validated as a domain name. Validation collects
// every issue rather than stopping at the first, so "bad..host:99999" reports
// both the empty domain label and the out-of-range port.
//
// The facade only logs validation failures and still attempts to connect (see
// `client.rs`); `Endpoint::split` therefore extracts a host and port even from
// strings that fail validation.

use std::fmt;

use crate::error::EndpointError;

/// Port used when the endpoint names none.
pub const DEFAULT_PORT: u16 = 80;

/// Exclusive upper bound for port numbers.
pub const PORT_LIMIT: u32 = 65_536;

/// One syntax problem found in an endpoint string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndpointIssue {
    /// The endpoint carries a URL scheme such as `http`.
    Scheme(String),
    /// Something follows the first `/`.
    Path(String),
    EmptyHost,
    /// Not four octets, or an octet that is not a number.
    MalformedIpv4(String),
    OctetOutOfRange { octet: String, address: String },
    ForbiddenCharacter { domain: String, character: char },
    EmptyDomainLabel(String),
    UnparsablePort(String),
    PortOutOfRange(u64),
}

impl fmt::Display for EndpointIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointIssue::Scheme(scheme) => {
                write!(f, "must not contain a URL scheme (\"{scheme}\" provided)")
            }
            EndpointIssue::Path(path) => write!(f, "path must be empty, got \"{path}\""),
            EndpointIssue::EmptyHost => f.write_str("host is empty"),
            EndpointIssue::MalformedIpv4(address) => {
                write!(f, "\"{address}\" is not four dot-separated decimal octets")
            }
            EndpointIssue::OctetOutOfRange { octet, address } => write!(
                f,
                "octet \"{octet}\" in IPv4 address \"{address}\" is outside [0 - 256)"
            ),
            EndpointIssue::ForbiddenCharacter { domain, character } => write!(
                f,
                "domain name \"{domain}\" contains forbidden character '{character}'"
            ),
            EndpointIssue::EmptyDomainLabel(domain) => {
                write!(f, "domain name \"{domain}\" contains an empty label")
            }
            EndpointIssue::UnparsablePort(port) => {
                write!(f, "can not parse port \"{port}\" as a decimal integer")
            }
            EndpointIssue::PortOutOfRange(port) => write!(
                f,
                "invalid port number {port}, must be within [0 - {PORT_LIMIT})"
            ),
        }
    }
}

/// A `host:port` pair extracted from an endpoint string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Validate `endpoint` and return its host and port.
    pub fn parse(endpoint: &str) -> Result<Self, EndpointError> {
        validate(endpoint)?;
        Ok(Self::split(endpoint))
    }

    /// Split without validating. Unparsable ports fall back to `DEFAULT_PORT`.
    pub fn split(endpoint: &str) -> Self {
        let parts = Parts::of(endpoint);
        let port = parts
            .port
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);
        Self {
            host: parts.host.to_owned(),
            port,
        }
    }

    /// `host:port`, suitable for `ToSocketAddrs`.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Check `endpoint` against the syntax rules, reporting every issue found.
pub fn validate(endpoint: &str) -> Result<(), EndpointError> {
    let mut issues = Vec::new();

    if let Some(index) = endpoint.find("://") {
        issues.push(EndpointIssue::Scheme(endpoint[..index].to_owned()));
        return Err(EndpointError {
            endpoint: endpoint.to_owned(),
            issues,
        });
    }

    let parts = Parts::of(endpoint);
    if let Some(path) = parts.path {
        issues.push(EndpointIssue::Path(path.to_owned()));
    }

    if parts.host.is_empty() {
        issues.push(EndpointIssue::EmptyHost);
    } else if looks_like_ip(parts.host) {
        check_ipv4(parts.host, &mut issues);
    } else {
        check_domain(parts.host, &mut issues);
    }

    if let Some(port) = parts.port {
        check_port(port, &mut issues);
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(EndpointError {
            endpoint: endpoint.to_owned(),
            issues,
        })
    }
}

/// The pieces of an endpoint string before any checking.
struct Parts<'a> {
    host: &'a str,
    port: Option<&'a str>,
    /// Everything from the first `/` on, when non-trivial.
    path: Option<&'a str>,
}

impl<'a> Parts<'a> {
    fn of(endpoint: &'a str) -> Self {
        let (authority, path) = match endpoint.find('/') {
            Some(index) => (&endpoint[..index], Some(&endpoint[index..])),
            None => (endpoint, None),
        };
        let (host, port) = match authority.rfind(':') {
            Some(index) => (&authority[..index], Some(&authority[index + 1..])),
            None => (authority, None),
        };
        Self { host, port, path }
    }
}

fn looks_like_ip(host: &str) -> bool {
    host.chars().all(|c| c.is_ascii_digit() || c == '.')
}

fn check_ipv4(address: &str, issues: &mut Vec<EndpointIssue>) {
    let octets: Vec<&str> = address.split('.').collect();
    if octets.len() != 4 {
        issues.push(EndpointIssue::MalformedIpv4(address.to_owned()));
        return;
    }
    for octet in octets {
        match octet.parse::<u64>() {
            Ok(value) if value <= 255 => {}
            Ok(_) => issues.push(EndpointIssue::OctetOutOfRange {
                octet: octet.to_owned(),
                address: address.to_owned(),
            }),
            // Empty or absurdly long digit runs.
            Err(_) => {
                issues.push(EndpointIssue::MalformedIpv4(address.to_owned()));
                return;
            }
        }
    }
}

fn check_domain(domain: &str, issues: &mut Vec<EndpointIssue>) {
    if let Some(character) = domain
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '.'))
    {
        issues.push(EndpointIssue::ForbiddenCharacter {
            domain: domain.to_owned(),
            character,
        });
    }
    if domain.split('.').any(str::is_empty) {
        issues.push(EndpointIssue::EmptyDomainLabel(domain.to_owned()));
    }
}

fn check_port(port: &str, issues: &mut Vec<EndpointIssue>) {
    if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
        issues.push(EndpointIssue::UnparsablePort(port.to_owned()));
        return;
    }
    match port.parse::<u64>() {
        Ok(value) if value < u64::from(PORT_LIMIT) => {}
        Ok(value) => issues.push(EndpointIssue::PortOutOfRange(value)),
        Err(_) => issues.push(EndpointIssue::UnparsablePort(port.to_owned())),
    }
}
