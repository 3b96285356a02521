use crate::{
  access_log::access_log,
  connection::{ConnState, Connection, Endpoint},
  constants::EVENTS_CAPACITY,
  error::{ConnectionError, RelayError},
  listener::{Listener, ListenerSpec},
  socket::connect_backend,
  table::ConnectionTable,
  trace::*,
};
use host_probe::ProbeFailure;
use mio::{event::Event, Events, Interest, Poll, Registry, Token};
use std::{
  collections::HashMap,
  io::{self, Write as _},
  net::SocketAddr,
  path::PathBuf,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
  time::Duration,
};

/// Listener tokens live below this base; connection tokens are derived from
/// the table key and the side of the pairing
const CONN_TOKEN_BASE: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
  Client,
  Server,
}

fn conn_token(key: usize, side: Side) -> Token {
  let side_bit = match side {
    Side::Client => 0,
    Side::Server => 1,
  };
  Token(CONN_TOKEN_BASE + key * 2 + side_bit)
}

/* ---------------------------------------------------------- */
/// Run-control flags, shared with signal handlers. The readiness wait is
/// interrupted by the signal, so a raised flag is observed on the next pass
/// of the loop.
#[derive(Debug, Clone, Default)]
pub struct RunFlags {
  shutdown: Arc<AtomicBool>,
  dump: Arc<AtomicBool>,
}

impl RunFlags {
  pub fn new() -> Self {
    Self::default()
  }

  /// Flag to hand to a SIGINT/SIGTERM handler
  pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
    Arc::clone(&self.shutdown)
  }

  /// Flag to hand to a SIGUSR1 handler
  pub fn dump_flag(&self) -> Arc<AtomicBool> {
    Arc::clone(&self.dump)
  }

  /// Observed once the readiness wait returns; deliver a signal (or run with
  /// a poll timeout) to wake a fully idle engine
  pub fn request_shutdown(&self) {
    self.shutdown.store(true, Ordering::Relaxed);
  }

  fn should_shutdown(&self) -> bool {
    self.shutdown.load(Ordering::Relaxed)
  }

  fn take_dump_request(&self) -> bool {
    self.dump.swap(false, Ordering::Relaxed)
  }
}

/* ---------------------------------------------------------- */
/// Readiness observed in one tick, keyed by token. Error and hang-up
/// conditions count as readiness in both directions so the affected side is
/// serviced this tick and observes the failure through its I/O result.
#[derive(Debug, Default)]
struct ReadySet {
  ready: HashMap<usize, (bool, bool)>,
}

impl ReadySet {
  fn observe(&mut self, event: &Event) {
    let entry = self.ready.entry(event.token().0).or_insert((false, false));
    let failed = event.is_error();
    entry.0 |= event.is_readable() || event.is_read_closed() || failed;
    entry.1 |= event.is_writable() || event.is_write_closed() || failed;
  }

  fn readable(&self, token: Token) -> bool {
    self.ready.get(&token.0).is_some_and(|r| r.0)
  }

  fn writable(&self, token: Token) -> bool {
    self.ready.get(&token.0).is_some_and(|r| r.1)
  }
}

/// EAGAIN / EWOULDBLOCK / EINTR: the connection stays live for the next tick
fn is_temporary_sockerr(e: &io::Error) -> bool {
  matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}

/* ---------------------------------------------------------- */
/// The readiness-driven relay core. One engine owns its poll instance, its
/// listeners and the connection table; everything runs on the calling thread
/// and nothing is shared. One `tick` registers interest across the table,
/// waits for readiness and dispatches the handlers.
#[derive(Debug)]
pub struct RelayEngine {
  poll: Poll,
  events: Events,
  listeners: Vec<Listener>,
  table: ConnectionTable,
  buffer_size: usize,
  max_connections: usize,
}

impl RelayEngine {
  pub(crate) fn try_new(
    specs: &[ListenerSpec],
    buffer_size: usize,
    max_connections: usize,
    backlog: u32,
  ) -> Result<Self, RelayError> {
    let poll = Poll::new()?;
    let mut listeners = Vec::with_capacity(specs.len());
    for (idx, spec) in specs.iter().enumerate() {
      let mut listener = Listener::try_new(spec, backlog)?;
      poll.registry().register(&mut listener.socket, Token(idx), Interest::READABLE)?;
      listeners.push(listener);
    }

    Ok(Self {
      poll,
      events: Events::with_capacity(EVENTS_CAPACITY),
      listeners,
      table: ConnectionTable::new(),
      buffer_size,
      max_connections,
    })
  }

  /// Bound listener addresses, in configuration order
  pub fn listen_addrs(&self) -> Vec<SocketAddr> {
    self.listeners.iter().map(|l| l.listen_on).collect()
  }

  /// Number of connections currently in the table
  pub fn connection_count(&self) -> usize {
    self.table.len()
  }

  /// Serve until a shutdown is requested, then drain and free everything
  pub fn run(&mut self, flags: &RunFlags) -> Result<(), RelayError> {
    while !flags.should_shutdown() {
      if flags.take_dump_request() {
        if let Err(e) = self.dump() {
          warn!("Connection dump failed: {e}");
        }
      }
      self.tick(None)?;
    }
    info!("Shutting down, closing {} connections", self.table.len());
    self.shutdown();
    Ok(())
  }

  /// One readiness tick: register interest across the table, wait for
  /// readiness (or `timeout`), accept pending clients and dispatch I/O
  pub fn tick(&mut self, timeout: Option<Duration>) -> Result<(), RelayError> {
    self.register_interest()?;

    match self.poll.poll(&mut self.events, timeout) {
      Ok(()) => {}
      // a signal woke the wait; the caller re-checks its flags
      Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
      Err(e) => return Err(e.into()),
    }

    let mut ready = ReadySet::default();
    for event in self.events.iter() {
      ready.observe(event);
    }

    for idx in 0..self.listeners.len() {
      if ready.readable(Token(idx)) {
        self.accept(idx);
      }
    }
    self.dispatch(&ready);
    Ok(())
  }

  /// Phase R: walk the table once and point the poll registry at every live
  /// socket whose state admits I/O on it
  fn register_interest(&mut self) -> Result<(), io::Error> {
    let registry = self.poll.registry();
    let mut cursor = self.table.first();
    while let Some(key) = cursor {
      cursor = self.table.next_key(key);
      let Some(conn) = self.table.get_mut(key) else { continue };

      let (client_interest, server_interest) = match conn.state {
        ConnState::Accepted => (
          endpoint_interest(conn.client.buffer.room() > 0, !conn.server.buffer.is_empty()),
          None,
        ),
        ConnState::Connected => (
          endpoint_interest(conn.client.buffer.room() > 0, !conn.server.buffer.is_empty()),
          endpoint_interest(conn.server.buffer.room() > 0, !conn.client.buffer.is_empty()),
        ),
        // writable interest even with nothing queued, so the connection is
        // revisited and the remaining socket closed once the buffer drains
        ConnState::ServerClosed => (Some(Interest::WRITABLE), None),
        ConnState::ClientClosed => (None, Some(Interest::WRITABLE)),
        ConnState::Closed => (None, None),
        ConnState::New => {
          warn!("Invalid state NEW in connection table");
          (None, None)
        }
      };

      apply_interest(registry, &mut conn.client, conn_token(key, Side::Client), client_interest)?;
      apply_interest(registry, &mut conn.server, conn_token(key, Side::Server), server_interest)?;
    }
    Ok(())
  }

  /// Phase D: walk the table and act on whichever of each connection's
  /// sockets became ready. The walk grabs the successor up front so the
  /// CLOSED arm can remove the current element.
  fn dispatch(&mut self, ready: &ReadySet) {
    let mut cursor = self.table.first();
    while let Some(key) = cursor {
      cursor = self.table.next_key(key);
      let Some(state) = self.table.get(key).map(|c| c.state) else {
        continue;
      };

      match state {
        ConnState::Connected => {
          // server leg first; an error here closes the server side but must
          // not keep the client leg from being serviced this same tick
          let mut err = false;
          if ready.readable(conn_token(key, Side::Server)) && self.buffer_room(key, Side::Server) > 0 {
            err = self.server_rx(key);
          }
          if !err && ready.writable(conn_token(key, Side::Server)) && self.buffer_len(key, Side::Client) > 0 {
            err = self.server_tx(key);
          }
          if err {
            if let Some(c) = self.table.get_mut(key) {
              c.close_server();
            }
          }
          self.service_client_side(key, ready);
        }
        ConnState::Accepted => self.service_client_side(key, ready),
        ConnState::ServerClosed => {
          let mut err = false;
          if ready.writable(conn_token(key, Side::Client)) && self.buffer_len(key, Side::Server) > 0 {
            err = self.client_tx(key);
          }
          if err || self.buffer_len(key, Side::Server) == 0 {
            if let Some(c) = self.table.get_mut(key) {
              c.close_client();
            }
          }
        }
        ConnState::ClientClosed => {
          let mut err = false;
          if ready.writable(conn_token(key, Side::Server)) && self.buffer_len(key, Side::Client) > 0 {
            err = self.server_tx(key);
          }
          if err || self.buffer_len(key, Side::Client) == 0 {
            if let Some(c) = self.table.get_mut(key) {
              c.close_server();
            }
          }
        }
        ConnState::Closed => {
          self.table.remove(key);
        }
        ConnState::New => warn!("Invalid state NEW in connection table"),
      }
    }
  }

  /// Client read then client write, shared by the ACCEPTED arm and the
  /// fall-through from the CONNECTED arm
  fn service_client_side(&mut self, key: usize, ready: &ReadySet) {
    let mut err = false;
    if ready.readable(conn_token(key, Side::Client)) && self.buffer_room(key, Side::Client) > 0 {
      err = self.client_rx(key);
    }
    if !err && ready.writable(conn_token(key, Side::Client)) && self.buffer_len(key, Side::Server) > 0 {
      err = self.client_tx(key);
    }
    if err {
      if let Some(c) = self.table.get_mut(key) {
        c.close_client();
      }
    }
  }

  fn buffer_room(&self, key: usize, side: Side) -> usize {
    self
      .table
      .get(key)
      .map(|c| match side {
        Side::Client => c.client.buffer.room(),
        Side::Server => c.server.buffer.room(),
      })
      .unwrap_or(0)
  }

  /// Queued bytes read FROM `side`, i.e. awaiting transmission to its peer
  fn buffer_len(&self, key: usize, side: Side) -> usize {
    self
      .table
      .get(key)
      .map(|c| match side {
        Side::Client => c.client.buffer.len(),
        Side::Server => c.server.buffer.len(),
      })
      .unwrap_or(0)
  }

  /// Read from the client into the client buffer. Returns true when the
  /// client side must be closed.
  fn client_rx(&mut self, key: usize) -> bool {
    let result = {
      let Some(conn) = self.table.get_mut(key) else { return false };
      let Endpoint { stream, buffer, .. } = &mut conn.client;
      let Some(stream) = stream.as_mut() else { return false };
      buffer.recv(stream)
    };
    match result {
      Ok(0) => true, // client closed socket
      Ok(_) => {
        let accepted = self.table.get(key).is_some_and(|c| c.state == ConnState::Accepted);
        if accepted {
          self.client_hello(key);
        }
        self.table.move_to_head(key);
        false
      }
      Err(e) if is_temporary_sockerr(&e) => false,
      Err(e) => {
        info!("recv failed: {e}");
        true
      }
    }
  }

  /// Read from the backend into the server buffer. Returns true when the
  /// server side must be closed.
  fn server_rx(&mut self, key: usize) -> bool {
    let result = {
      let Some(conn) = self.table.get_mut(key) else { return false };
      let Endpoint { stream, buffer, .. } = &mut conn.server;
      let Some(stream) = stream.as_mut() else { return false };
      buffer.recv(stream)
    };
    match result {
      Ok(0) => true, // server closed socket
      Ok(_) => {
        self.table.move_to_head(key);
        false
      }
      Err(e) if is_temporary_sockerr(&e) => false,
      Err(e) => {
        info!("recv failed: {e}");
        true
      }
    }
  }

  /// Drain the server buffer into the client socket. Returns true when the
  /// client side must be closed.
  fn client_tx(&mut self, key: usize) -> bool {
    let result = {
      let Some(conn) = self.table.get_mut(key) else { return false };
      let Connection { client, server, .. } = conn;
      let Some(stream) = client.stream.as_mut() else { return false };
      server.buffer.send(stream)
    };
    match result {
      Ok(_) => {
        self.table.move_to_head(key);
        false
      }
      Err(e) if is_temporary_sockerr(&e) => false,
      Err(e) => {
        info!("send failed: {e}");
        true
      }
    }
  }

  /// Drain the client buffer into the backend socket. Returns true when the
  /// server side must be closed.
  fn server_tx(&mut self, key: usize) -> bool {
    let result = {
      let Some(conn) = self.table.get_mut(key) else { return false };
      let Connection { client, server, .. } = conn;
      let Some(stream) = server.stream.as_mut() else { return false };
      client.buffer.send(stream)
    };
    match result {
      Ok(_) => {
        self.table.move_to_head(key);
        false
      }
      Err(e) if is_temporary_sockerr(&e) => false,
      Err(e) => {
        info!("send failed: {e}");
        true
      }
    }
  }

  /// Peek the head of the client stream, run the listener's parser over it
  /// and, on success, start the backend connection. The peeked bytes stay
  /// queued so they are forwarded verbatim once the backend leg is up.
  fn client_hello(&mut self, key: usize) {
    let (window, peer, listener_idx) = {
      let Some(conn) = self.table.get(key) else { return };
      let mut window = vec![0u8; self.buffer_size];
      let n = conn.client.buffer.peek(&mut window);
      window.truncate(n);
      (window, conn.client.peer_addr, conn.listener)
    };
    let peer_label = peer.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string());
    let probe = self.listeners[listener_idx].probe;

    let hostname = match probe.probe(&window) {
      // incomplete request: the next readiness cycle retries with more bytes
      Err(ProbeFailure::Incomplete) => return,
      Err(ProbeFailure::NoHostname) => {
        info!("Request from {peer_label} did not include a hostname");
        self.close_connection(key);
        return;
      }
      Err(ProbeFailure::Malformed) => {
        info!("Unable to parse request from {peer_label}");
        self.close_connection(key);
        return;
      }
      Ok(hostname) => hostname,
    };
    info!("Request for {hostname} from {peer_label}");

    let dst = match self.listeners[listener_idx].lookup(&hostname) {
      Ok(Some(addr)) => addr,
      Ok(None) => {
        info!("{}", ConnectionError::NoRoute { hostname });
        self.close_connection(key);
        return;
      }
      Err(e) => {
        warn!("Backend lookup failed for {hostname}: {e}");
        self.close_connection(key);
        return;
      }
    };

    let stream = match connect_backend(dst) {
      Ok(stream) => stream,
      Err(e) => {
        warn!("Backend connection failed to {hostname} ({dst}): {e}");
        self.close_connection(key);
        return;
      }
    };

    let Some(conn) = self.table.get_mut(key) else { return };
    conn.server.stream = Some(stream);
    conn.server.peer_addr = Some(dst);
    conn.state = ConnState::Connected;
    conn.hostname = Some(hostname);
    if let (Some(src), Some(hostname)) = (peer, conn.hostname.as_deref()) {
      access_log(&probe, hostname, &src, &dst);
    }
  }

  /// Close both sides as the state dictates; the CLOSED entry is reaped by
  /// the next dispatch walk
  fn close_connection(&mut self, key: usize) {
    if let Some(conn) = self.table.get_mut(key) {
      conn.close();
    }
  }

  /// Accept every pending client on the listener, refusing each one beyond
  /// the connection limit
  fn accept(&mut self, listener_idx: usize) {
    loop {
      match self.listeners[listener_idx].socket.accept() {
        Ok((stream, peer)) => {
          if self.table.len() >= self.max_connections {
            let refusal = ConnectionError::LimitExceeded {
              current: self.table.len(),
              max: self.max_connections,
            };
            warn!("{refusal}, refusing {peer}");
            // dropped while still NEW: the socket closes, nothing entered the table
            drop(stream);
            continue;
          }
          let mut conn = Connection::new(self.buffer_size, listener_idx);
          conn.client.stream = Some(stream);
          conn.client.peer_addr = Some(peer);
          conn.state = ConnState::Accepted;
          debug!("Accepted connection from {peer}");
          self.table.insert_head(conn);
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) => {
          warn!("accept failed: {e}");
          break;
        }
      }
    }
  }

  /// Write a snapshot of every connection to a fresh temporary file and log
  /// its path. Does not mutate the table.
  pub fn dump(&self) -> Result<PathBuf, io::Error> {
    let mut file = tempfile::Builder::new().prefix("sni-relay-connections-").tempfile()?;
    writeln!(file, "Running connections:")?;
    for (_, conn) in self.table.iter() {
      writeln!(file, "{}", conn.dump_line())?;
    }
    let (_, path) = file.keep().map_err(|e| e.error)?;
    info!("Dumped connections to {}", path.display());
    Ok(path)
  }

  /// Tear down every connection and empty the table
  pub fn shutdown(&mut self) {
    while let Some(key) = self.table.first() {
      let mut conn = self.table.remove(key);
      conn.close();
    }
  }
}

/// Interest for one endpoint given whether its state wants reads and writes
fn endpoint_interest(read: bool, write: bool) -> Option<Interest> {
  match (read, write) {
    (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
    (true, false) => Some(Interest::READABLE),
    (false, true) => Some(Interest::WRITABLE),
    (false, false) => None,
  }
}

/// Reconcile one endpoint with the poll registry. Registration state is
/// tracked on the endpoint; a vanished interest deregisters the socket, a
/// kept one reregisters so the readiness is rearmed for this tick.
fn apply_interest(
  registry: &Registry,
  endpoint: &mut Endpoint,
  token: Token,
  interest: Option<Interest>,
) -> Result<(), io::Error> {
  let Some(stream) = endpoint.stream.as_mut() else {
    return Ok(());
  };
  match (endpoint.registered, interest) {
    (false, Some(interest)) => {
      registry.register(stream, token, interest)?;
      endpoint.registered = true;
    }
    (true, Some(interest)) => registry.reregister(stream, token, interest)?,
    (true, None) => {
      registry.deregister(stream)?;
      endpoint.registered = false;
    }
    (false, None) => {}
  }
  Ok(())
}
