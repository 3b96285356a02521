/// Categorized error types for the relay.
///
/// Per-connection I/O errors never surface here: the scheduler handles them
/// in place by closing the affected side. These types cover configuration,
/// listener setup and routing failures that the caller has to act on.
use std::net::SocketAddr;

/// Top-level error type that encompasses all relay operation errors
#[derive(thiserror::Error, Debug)]
pub enum RelayError {
  #[error(transparent)]
  Configuration(#[from] ConfigurationError),

  #[error(transparent)]
  Network(#[from] NetworkError),

  #[error(transparent)]
  Connection(#[from] ConnectionError),
}

/// Configuration-related errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigurationError {
  #[error("Missing required configuration: {field}")]
  MissingRequired { field: String },

  #[error("Invalid target address: {target}")]
  InvalidTarget { target: String },

  #[error("Invalid host pattern: {pattern}")]
  InvalidHostPattern { pattern: String },

  #[error("Unsupported probe protocol: {protocol}")]
  UnsupportedProbe { protocol: String },

  #[error("No listeners configured")]
  NoListeners,

  #[error("No routes configured for listener on {listen_on}")]
  NoRoutes { listen_on: SocketAddr },
}

/// Network-related errors with context
#[derive(thiserror::Error, Debug)]
pub enum NetworkError {
  #[error("DNS resolution error for {hostname}: {reason}")]
  DnsError { hostname: String, reason: String },

  #[error("Connection failed to {address}: {source}")]
  ConnectionFailed {
    address: SocketAddr,
    #[source]
    source: std::io::Error,
  },

  #[error("Socket bind failed for {address}: {source}")]
  BindFailed {
    address: SocketAddr,
    #[source]
    source: std::io::Error,
  },

  #[error("IO error: {source}")]
  IoError {
    #[source]
    source: std::io::Error,
  },
}

/// Connection routing errors
#[derive(thiserror::Error, Debug)]
pub enum ConnectionError {
  #[error("Connection limit exceeded: {current}/{max} connections")]
  LimitExceeded { current: usize, max: usize },

  #[error("No backend route for hostname {hostname}")]
  NoRoute { hostname: String },
}

impl From<std::io::Error> for RelayError {
  fn from(err: std::io::Error) -> Self {
    RelayError::Network(NetworkError::IoError { source: err })
  }
}

impl NetworkError {
  /// Create a DNS error with a reason
  pub fn dns_error(hostname: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::DnsError {
      hostname: hostname.into(),
      reason: reason.into(),
    }
  }

  /// Create a connection failed error
  pub fn connection_failed(address: SocketAddr, source: std::io::Error) -> Self {
    Self::ConnectionFailed { address, source }
  }

  /// Create a bind failed error
  pub fn bind_failed(address: SocketAddr, source: std::io::Error) -> Self {
    Self::BindFailed { address, source }
  }
}
