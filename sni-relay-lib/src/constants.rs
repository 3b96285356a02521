use std::time::Duration;

/// TCP backlog size
pub const TCP_BACKLOG: u32 = 1024;

/// Per-direction ring buffer capacity in bytes.
/// The client buffer doubles as the probe window, so it must hold a whole
/// ClientHello. The classic bound is one TCP segment (1460 bytes), but hybrid
/// post-quantum key shares (key_share with X25519MLKEM768 is > 1KB) push
/// initial hellos past that, so the default is 4KB.
/// https://datatracker.ietf.org/doc/html/rfc8446#section-5.1
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Default refusal threshold for live connections across all listeners
pub const MAX_RELAY_CONNECTIONS: usize = 1024;

/// Readiness events drained per scheduler tick
pub(crate) const EVENTS_CAPACITY: usize = 1024;

/// DNS cache minimum TTL; resolved backend addresses are kept at least this long
pub(crate) const DNS_CACHE_MIN_TTL: Duration = Duration::from_secs(30);

/// DNS cache maximum TTL
pub(crate) const DNS_CACHE_MAX_TTL: Duration = Duration::from_secs(3600);

/// Structured log event names
pub mod log_event_names {
  /// Access log event emitted when a connection is routed to its backend
  pub const ACCESS_LOG: &str = "access_log";
}
