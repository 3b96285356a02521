use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;

/// Bind a non-blocking TCP listener to the given `SocketAddr` with
/// `SO_REUSEADDR` and `SO_REUSEPORT` options. These are required to re-bind
/// the address when the relay is restarted with connections still in
/// TIME_WAIT.
pub(crate) fn bind_tcp_listener(listen_on: &SocketAddr, backlog: u32) -> Result<mio::net::TcpListener, std::io::Error> {
  let socket = if listen_on.is_ipv6() {
    Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))
  } else {
    Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
  }?;
  socket.set_reuse_address(true)?;

  #[cfg(not(target_os = "windows"))]
  socket.set_reuse_port(true)?;

  socket.set_nonblocking(true)?;
  socket.bind(&(*listen_on).into())?;
  socket.listen(backlog as i32)?;

  Ok(mio::net::TcpListener::from_std(socket.into()))
}

/// Start a non-blocking connect to the backend. The returned stream is not
/// yet connected; completion (or refusal) is observed through writability on
/// the next readiness cycles.
pub(crate) fn connect_backend(addr: SocketAddr) -> Result<mio::net::TcpStream, std::io::Error> {
  mio::net::TcpStream::connect(addr)
}
