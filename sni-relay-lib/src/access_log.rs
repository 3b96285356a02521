use crate::{listener::ProbeProtocol, trace::info};
use std::net::SocketAddr;

/// Emit the access log line when a connection is routed to its backend
pub(crate) fn access_log(probe: &ProbeProtocol, hostname: &str, src_addr: &SocketAddr, dst_addr: &SocketAddr) {
  info!(
    name: crate::constants::log_event_names::ACCESS_LOG,
    "{}: {} {:?} -> {:?}",
    probe,
    hostname,
    src_addr,
    dst_addr
  );
}
