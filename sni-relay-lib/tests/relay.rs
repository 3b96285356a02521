//! End-to-end relay scenarios over real localhost sockets. The engine is
//! ticked manually on the test thread; client and backend sockets are
//! non-blocking and pumped between ticks.

use sni_relay_lib::{HostPattern, ListenerSpec, ProbeProtocol, RelayBuilder, RelayEngine, Route, TargetAddr};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

const TICK: Duration = Duration::from_millis(10);
const MAX_PUMPS: usize = 300;

/* ---------------------------------------------------------- */

/// Assemble a syntactically valid ClientHello record carrying `sni`,
/// padded with an RFC 7685 padding extension to `pad_to` bytes when larger
/// than the minimal encoding
fn client_hello(sni: &str, pad_to: usize) -> Vec<u8> {
  let name = sni.as_bytes();
  let mut extensions = Vec::new();
  let mut sni_ext = Vec::new();
  sni_ext.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
  sni_ext.push(0x00);
  sni_ext.extend_from_slice(&(name.len() as u16).to_be_bytes());
  sni_ext.extend_from_slice(name);
  extensions.extend_from_slice(&[0x00, 0x00]);
  extensions.extend_from_slice(&(sni_ext.len() as u16).to_be_bytes());
  extensions.extend_from_slice(&sni_ext);

  let overhead = 5 + 4 + 43 + extensions.len();
  if pad_to > overhead + 4 {
    let pad = pad_to - overhead - 4;
    extensions.extend_from_slice(&[0x00, 0x15]);
    extensions.extend_from_slice(&(pad as u16).to_be_bytes());
    extensions.resize(extensions.len() + pad, 0);
  }

  let mut body = Vec::new();
  body.extend_from_slice(&[0x03, 0x03]);
  body.extend_from_slice(&[0x2a; 32]);
  body.push(0x00);
  body.extend_from_slice(&[0x00, 0x02, 0x13, 0x01]);
  body.extend_from_slice(&[0x01, 0x00]);
  body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
  body.extend_from_slice(&extensions);

  let mut record = vec![0x16, 0x03, 0x01];
  record.extend_from_slice(&((body.len() + 4) as u16).to_be_bytes());
  record.push(0x01);
  record.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
  record.extend_from_slice(&body);
  record
}

fn engine_with_routes(probe: ProbeProtocol, routes: Vec<Route>) -> RelayEngine {
  let relay = RelayBuilder::default()
    .listeners(vec![ListenerSpec {
      listen_on: "127.0.0.1:0".parse().unwrap(),
      probe,
      routes,
    }])
    .buffer_size(4096)
    .build()
    .unwrap();
  relay.engine().unwrap()
}

fn route_all_to(target: SocketAddr) -> Vec<Route> {
  vec![Route {
    host: HostPattern::Any,
    target: TargetAddr::Socket(target),
  }]
}

fn backend_listener() -> (TcpListener, SocketAddr) {
  let listener = TcpListener::bind("127.0.0.1:0").unwrap();
  listener.set_nonblocking(true).unwrap();
  let addr = listener.local_addr().unwrap();
  (listener, addr)
}

fn connect_client(engine: &RelayEngine) -> TcpStream {
  let stream = TcpStream::connect(engine.listen_addrs()[0]).unwrap();
  stream.set_nonblocking(true).unwrap();
  stream
}

fn write_all_pumped(engine: &mut RelayEngine, stream: &mut TcpStream, mut data: &[u8]) {
  for _ in 0..MAX_PUMPS {
    if data.is_empty() {
      return;
    }
    match stream.write(data) {
      Ok(n) => data = &data[n..],
      Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
      Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
      Err(e) => panic!("write failed: {e}"),
    }
    engine.tick(Some(TICK)).unwrap();
  }
  panic!("write did not complete");
}

/// Pump ticks while reading until `want` bytes arrived or the peer closed;
/// returns (bytes, saw_eof)
fn read_pumped(engine: &mut RelayEngine, stream: &mut TcpStream, want: usize) -> (Vec<u8>, bool) {
  let mut out = Vec::new();
  for _ in 0..MAX_PUMPS {
    engine.tick(Some(TICK)).unwrap();
    let mut chunk = [0u8; 4096];
    match stream.read(&mut chunk) {
      Ok(0) => return (out, true),
      Ok(n) => {
        out.extend_from_slice(&chunk[..n]);
        if out.len() >= want {
          return (out, false);
        }
      }
      Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
      Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
      Err(e) => panic!("read failed: {e}"),
    }
  }
  (out, false)
}

fn accept_pumped(engine: &mut RelayEngine, listener: &TcpListener) -> TcpStream {
  for _ in 0..MAX_PUMPS {
    engine.tick(Some(TICK)).unwrap();
    match listener.accept() {
      Ok((stream, _)) => {
        stream.set_nonblocking(true).unwrap();
        return stream;
      }
      Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
      Err(e) => panic!("backend accept failed: {e}"),
    }
  }
  panic!("backend was never dialed");
}

fn tick_until(engine: &mut RelayEngine, mut pred: impl FnMut(&RelayEngine) -> bool) -> bool {
  for _ in 0..MAX_PUMPS {
    engine.tick(Some(TICK)).unwrap();
    if pred(engine) {
      return true;
    }
  }
  false
}

/* ---------------------------------------------------------- */

#[test]
fn tls_sni_happy_path() {
  let (backend, backend_addr) = backend_listener();
  let mut engine = engine_with_routes(
    ProbeProtocol::Tls,
    vec![Route {
      host: "example.com".parse().unwrap(),
      target: TargetAddr::Socket(backend_addr),
    }],
  );

  let mut client = connect_client(&engine);
  let hello = client_hello("example.com", 517);
  assert_eq!(hello.len(), 517);
  write_all_pumped(&mut engine, &mut client, &hello);

  // the full ClientHello reaches the backend byte-for-byte
  let mut backend_conn = accept_pumped(&mut engine, &backend);
  let (forwarded, _) = read_pumped(&mut engine, &mut backend_conn, hello.len());
  assert_eq!(forwarded, hello);

  // the backend reply reaches the client byte-for-byte
  let reply = vec![0xabu8; 1200];
  write_all_pumped(&mut engine, &mut backend_conn, &reply);
  let (received, _) = read_pumped(&mut engine, &mut client, reply.len());
  assert_eq!(received, reply);

  // client closes; nothing is queued, the pairing tears down completely
  drop(client);
  assert!(tick_until(&mut engine, |e| e.connection_count() == 0));
  let (rest, eof) = read_pumped(&mut engine, &mut backend_conn, usize::MAX);
  assert!(rest.is_empty());
  assert!(eof);
}

#[test]
fn short_client_hello_waits_for_the_rest() {
  let (backend, backend_addr) = backend_listener();
  let mut engine = engine_with_routes(ProbeProtocol::Tls, route_all_to(backend_addr));

  let mut client = connect_client(&engine);
  let hello = client_hello("example.com", 0);

  // first 40 bytes: parser needs more, no backend is dialed
  write_all_pumped(&mut engine, &mut client, &hello[..40]);
  for _ in 0..20 {
    engine.tick(Some(TICK)).unwrap();
  }
  assert_eq!(engine.connection_count(), 1);
  assert!(matches!(
    backend.accept(),
    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock
  ));

  // the remainder arrives; parse succeeds and the whole hello is forwarded
  write_all_pumped(&mut engine, &mut client, &hello[40..]);
  let mut backend_conn = accept_pumped(&mut engine, &backend);
  let (forwarded, _) = read_pumped(&mut engine, &mut backend_conn, hello.len());
  assert_eq!(forwarded, hello);
}

#[test]
fn malformed_head_closes_without_dialing() {
  let (backend, backend_addr) = backend_listener();
  let mut engine = engine_with_routes(ProbeProtocol::Tls, route_all_to(backend_addr));

  let mut client = connect_client(&engine);
  write_all_pumped(&mut engine, &mut client, &[0x42u8; 200]);

  assert!(tick_until(&mut engine, |e| e.connection_count() == 0));
  assert!(matches!(
    backend.accept(),
    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock
  ));
  // the client observes the close
  let (_, eof) = read_pumped(&mut engine, &mut client, usize::MAX);
  assert!(eof);
}

#[test]
fn unrouted_hostname_closes_connection() {
  let mut engine = engine_with_routes(
    ProbeProtocol::Tls,
    vec![Route {
      host: "app.test".parse().unwrap(),
      target: TargetAddr::Socket("192.0.2.1:443".parse().unwrap()),
    }],
  );

  let mut client = connect_client(&engine);
  write_all_pumped(&mut engine, &mut client, &client_hello("unreachable.test", 0));

  assert!(tick_until(&mut engine, |e| e.connection_count() == 0));
  let (_, eof) = read_pumped(&mut engine, &mut client, usize::MAX);
  assert!(eof);
}

#[test]
fn backend_close_drains_pending_bytes_to_client() {
  let (backend, backend_addr) = backend_listener();
  let mut engine = engine_with_routes(ProbeProtocol::Tls, route_all_to(backend_addr));

  let mut client = connect_client(&engine);
  write_all_pumped(&mut engine, &mut client, &client_hello("example.com", 0));
  let mut backend_conn = accept_pumped(&mut engine, &backend);

  // backend pushes one buffer's worth and goes away immediately
  let payload = vec![0x5au8; 4096];
  write_all_pumped(&mut engine, &mut backend_conn, &payload);
  drop(backend_conn);

  // every byte still reaches the client, then the relay closes it
  let (received, _) = read_pumped(&mut engine, &mut client, payload.len());
  assert_eq!(received, payload);
  let (rest, eof) = read_pumped(&mut engine, &mut client, usize::MAX);
  assert!(rest.is_empty());
  assert!(eof);
  assert!(tick_until(&mut engine, |e| e.connection_count() == 0));
}

#[test]
fn http_host_routing() {
  let (backend, backend_addr) = backend_listener();
  let mut engine = engine_with_routes(
    ProbeProtocol::Http,
    vec![Route {
      host: "app.test".parse().unwrap(),
      target: TargetAddr::Socket(backend_addr),
    }],
  );

  let mut client = connect_client(&engine);
  let request = b"GET /health HTTP/1.1\r\nHost: app.test\r\nUser-Agent: check\r\n\r\n";
  write_all_pumped(&mut engine, &mut client, request);

  let mut backend_conn = accept_pumped(&mut engine, &backend);
  let (forwarded, _) = read_pumped(&mut engine, &mut backend_conn, request.len());
  assert_eq!(forwarded, request);

  write_all_pumped(&mut engine, &mut backend_conn, b"HTTP/1.1 204 No Content\r\n\r\n");
  let (reply, _) = read_pumped(&mut engine, &mut client, 27);
  assert!(reply.starts_with(b"HTTP/1.1 204"));
}
