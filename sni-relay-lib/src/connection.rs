use crate::buffer::RingBuffer;
use crate::trace::*;
use mio::net::TcpStream;
use std::fmt::Write as _;
use std::net::SocketAddr;

/* ---------------------------------------------------------- */
/// Lifecycle state of a relayed connection. The discriminant gates which
/// sockets are valid: see the close transition methods on [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
  /// Allocated but accept not yet completed; never observed in the table
  New,
  /// Client accepted; waiting for enough bytes to extract the routing key
  Accepted,
  /// Both legs live, bidirectional relay
  Connected,
  /// Backend closed or errored; drain backend->client bytes, then close client
  ServerClosed,
  /// Client closed or errored; drain client->backend bytes, then close server
  ClientClosed,
  /// Terminal; eligible for removal from the table
  Closed,
}

impl std::fmt::Display for ConnState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::New => write!(f, "NEW"),
      Self::Accepted => write!(f, "ACCEPTED"),
      Self::Connected => write!(f, "CONNECTED"),
      Self::ServerClosed => write!(f, "SERVER_CLOSED"),
      Self::ClientClosed => write!(f, "CLIENT_CLOSED"),
      Self::Closed => write!(f, "CLOSED"),
    }
  }
}

/* ---------------------------------------------------------- */
/// One leg of a relayed connection. The buffer holds bytes read FROM this
/// endpoint that await transmission to the peer endpoint.
#[derive(Debug)]
pub(crate) struct Endpoint {
  pub(crate) stream: Option<TcpStream>,
  pub(crate) peer_addr: Option<SocketAddr>,
  pub(crate) buffer: RingBuffer,
  /// Whether the stream is currently in the poll registry
  pub(crate) registered: bool,
}

impl Endpoint {
  fn new(buffer_size: usize) -> Self {
    Self {
      stream: None,
      peer_addr: None,
      buffer: RingBuffer::new(buffer_size),
      registered: false,
    }
  }

  /// Close this leg's socket. Dropping the stream closes the descriptor and
  /// the OS removes it from the poll set.
  fn close(&mut self) {
    self.stream = None;
    self.registered = false;
  }

  fn is_open(&self) -> bool {
    self.stream.is_some()
  }

  /// `ip port len/capacity` column for the diagnostic dump, `-` when closed
  fn dump_column(&self) -> String {
    match self.peer_addr.filter(|_| self.is_open()) {
      Some(addr) => format!("{} {} {}/{}", addr.ip(), addr.port(), self.buffer.len(), self.buffer.capacity()),
      None => "-".to_string(),
    }
  }
}

/* ---------------------------------------------------------- */
/// A single client<->backend pairing owned by the connection table
#[derive(Debug)]
pub(crate) struct Connection {
  pub(crate) state: ConnState,
  pub(crate) client: Endpoint,
  pub(crate) server: Endpoint,
  /// Index of the accepting listener, for access to its probe and router
  pub(crate) listener: usize,
  /// Routing key, set at the transition to Connected
  pub(crate) hostname: Option<String>,
}

impl Connection {
  pub(crate) fn new(buffer_size: usize, listener: usize) -> Self {
    Self {
      state: ConnState::New,
      client: Endpoint::new(buffer_size),
      server: Endpoint::new(buffer_size),
      listener,
      hostname: None,
    }
  }

  /// Close the client socket. The caller must ensure it has not been closed
  /// before; the next state depends on the previous one.
  pub(crate) fn close_client(&mut self) {
    self.client.close();
    self.state = match self.state {
      ConnState::Connected => ConnState::ClientClosed,
      _ => ConnState::Closed,
    };
  }

  /// Close the server socket. The caller must ensure it has not been closed
  /// before; the next state depends on the previous one.
  pub(crate) fn close_server(&mut self) {
    self.server.close();
    self.state = match self.state {
      ConnState::ClientClosed => ConnState::Closed,
      _ => ConnState::ServerClosed,
    };
  }

  /// Tear down whatever is still open, as dictated by the current state
  pub(crate) fn close(&mut self) {
    if matches!(
      self.state,
      ConnState::Connected | ConnState::Accepted | ConnState::ServerClosed
    ) {
      self.close_client();
    }
    if matches!(self.state, ConnState::Connected | ConnState::ClientClosed) {
      self.close_server();
    }
  }

  /// One line of the diagnostic dump: state, then client and server columns
  pub(crate) fn dump_line(&self) -> String {
    let mut line = String::new();
    let _ = write!(
      line,
      "{:<13} {}\t{}",
      self.state.to_string(),
      self.client.dump_column(),
      self.server.dump_column()
    );
    line
  }

  /// Whether (state, client open, server open) is a legal combination
  #[cfg(test)]
  pub(crate) fn state_invariant_holds(&self) -> bool {
    match self.state {
      ConnState::New => !self.client.is_open() && !self.server.is_open(),
      ConnState::Accepted => self.client.is_open() && !self.server.is_open(),
      ConnState::Connected => self.client.is_open() && self.server.is_open(),
      ConnState::ServerClosed => self.client.is_open() && !self.server.is_open(),
      ConnState::ClientClosed => !self.client.is_open() && self.server.is_open(),
      ConnState::Closed => !self.client.is_open() && !self.server.is_open(),
    }
  }
}

impl Drop for Connection {
  fn drop(&mut self) {
    if self.state != ConnState::Closed && self.state != ConnState::New {
      debug!("connection dropped while {}", self.state);
      self.close();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_matches_dump_labels() {
    assert_eq!(ConnState::ServerClosed.to_string(), "SERVER_CLOSED");
    assert_eq!(ConnState::Accepted.to_string(), "ACCEPTED");
  }

  #[test]
  fn close_client_from_accepted_terminates() {
    let mut conn = Connection::new(64, 0);
    conn.state = ConnState::Accepted;
    conn.close_client();
    assert_eq!(conn.state, ConnState::Closed);
  }

  #[test]
  fn close_client_from_connected_half_closes() {
    let mut conn = Connection::new(64, 0);
    conn.state = ConnState::Connected;
    conn.close_client();
    assert_eq!(conn.state, ConnState::ClientClosed);
    conn.close_server();
    assert_eq!(conn.state, ConnState::Closed);
  }

  #[test]
  fn close_server_from_connected_half_closes() {
    let mut conn = Connection::new(64, 0);
    conn.state = ConnState::Connected;
    conn.close_server();
    assert_eq!(conn.state, ConnState::ServerClosed);
    conn.close_client();
    assert_eq!(conn.state, ConnState::Closed);
  }

  #[test]
  fn close_tears_down_any_state() {
    for state in [
      ConnState::Accepted,
      ConnState::Connected,
      ConnState::ServerClosed,
      ConnState::ClientClosed,
    ] {
      let mut conn = Connection::new(64, 0);
      conn.state = state;
      conn.close();
      assert_eq!(conn.state, ConnState::Closed, "from {state}");
      assert!(conn.state_invariant_holds());
    }
  }

  #[test]
  fn dump_line_shows_state_and_columns() {
    let mut conn = Connection::new(64, 0);
    conn.state = ConnState::Accepted;
    conn.client.peer_addr = Some("192.0.2.7:4321".parse().unwrap());
    // no open stream, both columns collapse to "-"
    let line = conn.dump_line();
    assert!(line.starts_with("ACCEPTED"));
    assert!(line.ends_with('-'));
  }
}
