mod error;
mod http;
mod serialize;
mod tls;

#[allow(unused)]
pub(crate) mod trace {
  pub(crate) use tracing::{debug, error, trace, warn};
}

/// TLS 1.0, TLS 1.1 and TLS 1.2 for ClientHello.legacy_version.
/// TLS 1.3 (0x0304) announces itself in the `supported_versions` extension and
/// still puts 0x0303 into legacy_version, so these three cover every modern client.
pub(crate) const SUPPORTED_TLS_VERSIONS: [u16; 3] = [0x0301, 0x0302, 0x0303];

pub use error::ProbeFailure;
pub use http::probe_http_host;
pub use tls::probe_tls_sni;
