// Channel credentials: what security a channel uses when it connects.
//
// `ChannelCredentials` is a closed set built by three factories:
// - `insecure()`: plain TCP.
// - `platform_default()`: TLS verified against the platform's CA bundle.
// - `tls_explicit(root_certs, private_key, cert_chain)`: TLS with PEM text
//   supplied by the application. An empty root set means "platform roots";
//   the key and chain enable client authentication only when both are given.
//
// Credentials are immutable once built and shared read-only with the worker
// thread through `StartupConfig` (see `config.rs`). They are resolved into a
// `rustls::ClientConfig` on the worker when the channel connects.
//
// Engine-side code describes credentials as JSON (`from_json`). A descriptor
// whose `kind` is not recognized falls back to `Insecure` so that a typo does
// not leave a client unable to start, but the downgrade is logged at error
// level because it silently drops transport security.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use log::{error, warn};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use serde::Deserialize;

use crate::error::CredentialsError;

/// Environment variable naming a PEM bundle that overrides the platform roots.
pub const CERT_FILE_ENV: &str = "SSL_CERT_FILE";

/// Well-known CA bundle locations, tried in order.
const PLATFORM_BUNDLES: &[&str] = &[
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/pki/tls/certs/ca-bundle.crt",
    "/etc/ssl/ca-bundle.pem",
    "/etc/ssl/cert.pem",
    "/usr/local/etc/openssl/cert.pem",
    "/opt/homebrew/etc/openssl@3/cert.pem",
];

/// PEM material for explicit TLS credentials. Empty strings mean "omit".
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TlsOptions {
    pub pem_root_certs: String,
    pub pem_private_key: String,
    pub pem_cert_chain: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ChannelCredentials {
    #[default]
    Insecure,
    PlatformDefault,
    TlsExplicit(TlsOptions),
}

/// JSON shape accepted by `ChannelCredentials::from_json`.
#[derive(Deserialize)]
struct CredentialsDescriptor {
    kind: String,
    #[serde(flatten)]
    tls: TlsOptions,
}

impl ChannelCredentials {
    pub fn insecure() -> Self {
        ChannelCredentials::Insecure
    }

    pub fn platform_default() -> Self {
        ChannelCredentials::PlatformDefault
    }

    pub fn tls_explicit(
        pem_root_certs: impl Into<String>,
        pem_private_key: impl Into<String>,
        pem_cert_chain: impl Into<String>,
    ) -> Self {
        ChannelCredentials::TlsExplicit(TlsOptions {
            pem_root_certs: pem_root_certs.into(),
            pem_private_key: pem_private_key.into(),
            pem_cert_chain: pem_cert_chain.into(),
        })
    }

    /// Classify an engine-side descriptor such as
    /// `{"kind": "tls", "pem_root_certs": "..."}`.
    ///
    /// Recognized kinds: `insecure`, `platform_default`, `tls`. Anything else,
    /// including malformed JSON, becomes `Insecure` with an error log.
    pub fn from_json(json: &str) -> Self {
        let descriptor: CredentialsDescriptor = match serde_json::from_str(json) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                error!(
                    "credentials: unreadable descriptor ({e}); DOWNGRADING to insecure channel credentials"
                );
                return ChannelCredentials::Insecure;
            }
        };
        match descriptor.kind.as_str() {
            "insecure" => ChannelCredentials::Insecure,
            "platform_default" => ChannelCredentials::PlatformDefault,
            "tls" => ChannelCredentials::TlsExplicit(descriptor.tls),
            other => {
                error!(
                    "credentials: unknown kind \"{other}\"; DOWNGRADING to insecure channel credentials"
                );
                ChannelCredentials::Insecure
            }
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelCredentials::Insecure => "insecure",
            ChannelCredentials::PlatformDefault => "platform_default",
            ChannelCredentials::TlsExplicit(_) => "tls",
        }
    }

    pub fn is_secure(&self) -> bool {
        !matches!(self, ChannelCredentials::Insecure)
    }

    /// Build the TLS client configuration, or `None` for insecure channels.
    pub fn tls_config(&self) -> Result<Option<Arc<ClientConfig>>, CredentialsError> {
        let config = match self {
            ChannelCredentials::Insecure => return Ok(None),
            ChannelCredentials::PlatformDefault => ClientConfig::builder()
                .with_root_certificates(platform_roots()?)
                .with_no_client_auth(),
            ChannelCredentials::TlsExplicit(options) => explicit_config(options)?,
        };
        Ok(Some(Arc::new(config)))
    }
}

fn explicit_config(options: &TlsOptions) -> Result<ClientConfig, CredentialsError> {
    let roots = if options.pem_root_certs.trim().is_empty() {
        platform_roots()?
    } else {
        let mut roots = RootCertStore::empty();
        let (added, _ignored) =
            roots.add_parsable_certificates(parse_certs(&options.pem_root_certs, "root certificates")?);
        if added == 0 {
            return Err(CredentialsError::Empty {
                what: "valid root certificates",
            });
        }
        roots
    };
    let builder = ClientConfig::builder().with_root_certificates(roots);

    let has_key = !options.pem_private_key.trim().is_empty();
    let has_chain = !options.pem_cert_chain.trim().is_empty();
    match (has_key, has_chain) {
        (true, true) => {
            let chain = parse_certs(&options.pem_cert_chain, "certificate chain")?;
            let key = parse_private_key(&options.pem_private_key)?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(CredentialsError::Identity)
        }
        (false, false) => Ok(builder.with_no_client_auth()),
        _ => {
            warn!(
                "credentials: client authentication needs both a private key and a certificate chain; connecting without a client certificate"
            );
            Ok(builder.with_no_client_auth())
        }
    }
}

fn parse_certs(
    pem: &str,
    what: &'static str,
) -> Result<Vec<CertificateDer<'static>>, CredentialsError> {
    let mut reader = pem.as_bytes();
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| CredentialsError::Pem { what, source })?;
    if certs.is_empty() {
        return Err(CredentialsError::Empty { what });
    }
    Ok(certs)
}

fn parse_private_key(pem: &str) -> Result<PrivateKeyDer<'static>, CredentialsError> {
    let mut reader = pem.as_bytes();
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| CredentialsError::Pem {
            what: "private key",
            source,
        })?
        .ok_or(CredentialsError::Empty {
            what: "private key",
        })
}

/// Root store from `SSL_CERT_FILE` or the first usable system bundle.
fn platform_roots() -> Result<RootCertStore, CredentialsError> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(path) = std::env::var_os(CERT_FILE_ENV) {
        candidates.push(PathBuf::from(path));
    }
    candidates.extend(PLATFORM_BUNDLES.iter().map(PathBuf::from));

    for path in &candidates {
        match load_bundle(path) {
            Ok(roots) if !roots.is_empty() => return Ok(roots),
            Ok(_) => warn!("credentials: no usable certificates in {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("credentials: failed to read {}: {e}", path.display()),
        }
    }
    Err(CredentialsError::NoRoots {
        searched: candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

fn load_bundle(path: &PathBuf) -> io::Result<RootCertStore> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    let mut roots = RootCertStore::empty();
    roots.add_parsable_certificates(certs);
    Ok(roots)
}
