use crate::{
  destination::{HostRouter, Route},
  error::{ConfigurationError, NetworkError},
  socket::bind_tcp_listener,
  trace::*,
};
use host_probe::ProbeFailure;
use std::net::SocketAddr;
use std::str::FromStr;

/* ---------------------------------------------------------- */
/// Which routing-key parser a listener runs over the peeked bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeProtocol {
  /// TLS ClientHello SNI extension
  Tls,
  /// HTTP Host header
  Http,
}

impl ProbeProtocol {
  /// Run the parser over the peeked window. The window is never consumed;
  /// the same bytes are forwarded verbatim once the backend is connected.
  pub(crate) fn probe(&self, buf: &[u8]) -> Result<String, ProbeFailure> {
    match self {
      Self::Tls => host_probe::probe_tls_sni(buf),
      Self::Http => host_probe::probe_http_host(buf),
    }
  }
}

impl std::fmt::Display for ProbeProtocol {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Tls => write!(f, "TLS"),
      Self::Http => write!(f, "HTTP"),
    }
  }
}

impl FromStr for ProbeProtocol {
  type Err = ConfigurationError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "tls" => Ok(Self::Tls),
      "http" => Ok(Self::Http),
      other => Err(ConfigurationError::UnsupportedProbe {
        protocol: other.to_string(),
      }),
    }
  }
}

/* ---------------------------------------------------------- */
/// Listener description supplied by the caller; the engine binds it
#[derive(Debug, Clone)]
pub struct ListenerSpec {
  /// Socket address to listen on, exposed to clients
  pub listen_on: SocketAddr,
  /// Parser run over the head of each accepted stream
  pub probe: ProbeProtocol,
  /// Hostname-to-backend rules, first match wins
  pub routes: Vec<Route>,
}

/* ---------------------------------------------------------- */
/// A bound listening socket together with its parser and backend router
#[derive(Debug)]
pub(crate) struct Listener {
  pub(crate) socket: mio::net::TcpListener,
  pub(crate) listen_on: SocketAddr,
  pub(crate) probe: ProbeProtocol,
  router: HostRouter,
}

impl Listener {
  pub(crate) fn try_new(spec: &ListenerSpec, backlog: u32) -> Result<Self, NetworkError> {
    let socket =
      bind_tcp_listener(&spec.listen_on, backlog).map_err(|e| NetworkError::bind_failed(spec.listen_on, e))?;
    // with port 0 the OS picks; report the bound address
    let listen_on = socket.local_addr().unwrap_or(spec.listen_on);
    info!("Listening on {} ({} probe)", listen_on, spec.probe);
    Ok(Self {
      socket,
      listen_on,
      probe: spec.probe,
      router: HostRouter::new(spec.routes.clone()),
    })
  }

  /// Look up the backend for `hostname` and resolve it to a dialable address
  pub(crate) fn lookup(&mut self, hostname: &str) -> Result<Option<SocketAddr>, NetworkError> {
    self.router.resolve(hostname)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::destination::{HostPattern, TargetAddr};

  #[test]
  fn probe_protocol_parses_names() {
    assert_eq!("tls".parse::<ProbeProtocol>().unwrap(), ProbeProtocol::Tls);
    assert_eq!("HTTP".parse::<ProbeProtocol>().unwrap(), ProbeProtocol::Http);
    assert!("quic".parse::<ProbeProtocol>().is_err());
  }

  #[test]
  fn listener_binds_and_routes() {
    let spec = ListenerSpec {
      listen_on: "127.0.0.1:0".parse().unwrap(),
      probe: ProbeProtocol::Tls,
      routes: vec![Route {
        host: HostPattern::Any,
        target: TargetAddr::Socket("192.0.2.9:443".parse().unwrap()),
      }],
    };
    let mut listener = Listener::try_new(&spec, crate::constants::TCP_BACKLOG).unwrap();
    assert_ne!(listener.listen_on.port(), 0);
    let dst = listener.lookup("whatever.test").unwrap().unwrap();
    assert_eq!(dst, "192.0.2.9:443".parse().unwrap());
  }
}
