use crate::{
  constants::{DNS_CACHE_MAX_TTL, DNS_CACHE_MIN_TTL},
  error::{ConfigurationError, NetworkError},
  trace::*,
};
use std::{
  collections::HashMap,
  net::{SocketAddr, ToSocketAddrs},
  str::FromStr,
  time::{Duration, Instant},
};

/* ---------------------------------------------------------- */
/// Represents a backend address that can be either a direct socket address
/// or a domain name with port, resolved at dial time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
  /// Direct socket address (IP and port)
  Socket(SocketAddr),
  /// Domain name and port combination
  Domain(String, u16),
}

/// A usable hostname is dot-separated DNS labels, 253 bytes overall: each
/// label 1-63 alphanumeric-or-hyphen characters and not starting or ending
/// with a hyphen. Empty labels also reject leading/trailing/doubled dots.
fn valid_hostname(name: &str) -> bool {
  if name.is_empty() || name.len() > 253 {
    return false;
  }
  name.split('.').all(|label| {
    !label.is_empty()
      && label.len() <= 63
      && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
      && !label.starts_with('-')
      && !label.ends_with('-')
  })
}

impl std::fmt::Display for TargetAddr {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      TargetAddr::Socket(addr) => write!(f, "{}", addr),
      TargetAddr::Domain(domain, port) => write!(f, "{}:{}", domain, port),
    }
  }
}

impl FromStr for TargetAddr {
  type Err = ConfigurationError;

  /// Parses `ip:port` or `domain:port`
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if let Ok(socket_addr) = s.parse::<SocketAddr>() {
      return Ok(TargetAddr::Socket(socket_addr));
    }

    match s.rsplit_once(':') {
      Some((domain, port)) => {
        if !valid_hostname(domain) {
          return Err(ConfigurationError::InvalidTarget { target: s.to_string() });
        }
        let port = port
          .parse::<u16>()
          .map_err(|_| ConfigurationError::InvalidTarget { target: s.to_string() })?;
        Ok(TargetAddr::Domain(domain.to_string(), port))
      }
      None => Err(ConfigurationError::InvalidTarget { target: s.to_string() }),
    }
  }
}

/* ---------------------------------------------------------- */
/// Hostname matching rule for a route
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPattern {
  /// Matches one hostname exactly
  Exact(String),
  /// `*.example.com`, matches any single-or-deeper subdomain suffix
  Wildcard(String),
  /// `*`, matches every hostname
  Any,
}

impl HostPattern {
  pub(crate) fn matches(&self, hostname: &str) -> bool {
    match self {
      HostPattern::Exact(name) => name == hostname,
      HostPattern::Wildcard(suffix) => hostname.len() > suffix.len() && hostname.ends_with(suffix.as_str()),
      HostPattern::Any => true,
    }
  }
}

impl FromStr for HostPattern {
  type Err = ConfigurationError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if s == "*" {
      return Ok(HostPattern::Any);
    }
    if let Some(suffix) = s.strip_prefix("*.") {
      if !valid_hostname(suffix) {
        return Err(ConfigurationError::InvalidHostPattern { pattern: s.to_string() });
      }
      return Ok(HostPattern::Wildcard(format!(".{}", suffix.to_ascii_lowercase())));
    }
    if !valid_hostname(s) {
      return Err(ConfigurationError::InvalidHostPattern { pattern: s.to_string() });
    }
    Ok(HostPattern::Exact(s.to_ascii_lowercase()))
  }
}

/* ---------------------------------------------------------- */
/// DNS cache entry containing resolved addresses with an expiry
#[derive(Debug, Clone)]
struct CacheEntry {
  addresses: Vec<SocketAddr>,
  expires_at: Instant,
}

impl CacheEntry {
  fn is_expired(&self) -> bool {
    Instant::now() > self.expires_at
  }
}

/// DNS cache in front of the system resolver. The resolver API exposes no
/// TTL, so entries live for the configured minimum TTL and are refreshed
/// lazily; a failed refresh serves the stale addresses rather than failing
/// the connection.
#[derive(Debug)]
pub(crate) struct DnsCache {
  entries: HashMap<String, CacheEntry>,
  ttl: Duration,
}

impl Default for DnsCache {
  fn default() -> Self {
    Self::new(DNS_CACHE_MIN_TTL)
  }
}

impl DnsCache {
  pub(crate) fn new(ttl: Duration) -> Self {
    Self {
      entries: HashMap::new(),
      ttl: ttl.min(DNS_CACHE_MAX_TTL),
    }
  }

  /// Get or resolve a domain name with caching
  pub(crate) fn get_or_resolve(&mut self, domain: &str, port: u16) -> Result<Vec<SocketAddr>, NetworkError> {
    if let Some(entry) = self.entries.get(domain) {
      if !entry.is_expired() {
        debug!("DNS cache hit for domain: {}", domain);
        return Ok(entry.addresses.clone());
      }
    }

    match self.resolve(domain, port) {
      Ok(addresses) => {
        self.entries.insert(
          domain.to_string(),
          CacheEntry {
            addresses: addresses.clone(),
            expires_at: Instant::now() + self.ttl,
          },
        );
        Ok(addresses)
      }
      Err(e) => {
        // Keep serving last known good addresses across a resolver outage
        if let Some(entry) = self.entries.get(domain) {
          warn!("Failed to refresh expired DNS entry for {}: {}", domain, e);
          return Ok(entry.addresses.clone());
        }
        Err(e)
      }
    }
  }

  fn resolve(&self, domain: &str, port: u16) -> Result<Vec<SocketAddr>, NetworkError> {
    debug!("Resolving DNS for: {}", domain);
    let addresses: Vec<SocketAddr> = (domain, port)
      .to_socket_addrs()
      .map_err(|e| NetworkError::dns_error(domain, e.to_string()))?
      .collect();
    if addresses.is_empty() {
      return Err(NetworkError::dns_error(domain, "no addresses found"));
    }
    Ok(addresses)
  }
}

/* ---------------------------------------------------------- */
/// One hostname-to-backend rule
#[derive(Debug, Clone)]
pub struct Route {
  pub host: HostPattern,
  pub target: TargetAddr,
}

/// Backend router for one listener: ordered route table over the extracted
/// hostname, first match wins, plus DNS resolution of domain targets
#[derive(Debug)]
pub(crate) struct HostRouter {
  routes: Vec<Route>,
  dns: DnsCache,
}

impl HostRouter {
  pub(crate) fn new(routes: Vec<Route>) -> Self {
    Self {
      routes,
      dns: DnsCache::default(),
    }
  }

  /// Find the backend address for `hostname`: match the route table in
  /// order, then resolve a domain target to its first address
  pub(crate) fn resolve(&mut self, hostname: &str) -> Result<Option<SocketAddr>, NetworkError> {
    let Some(route) = self.routes.iter().find(|r| r.host.matches(hostname)) else {
      return Ok(None);
    };
    match &route.target {
      TargetAddr::Socket(addr) => Ok(Some(*addr)),
      TargetAddr::Domain(domain, port) => {
        let domain = domain.clone();
        let port = *port;
        let addresses = self.dns.get_or_resolve(&domain, port)?;
        Ok(addresses.first().copied())
      }
    }
  }
}
