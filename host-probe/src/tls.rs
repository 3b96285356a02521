use crate::{error::ProbeFailure, serialize::read_lengthed, trace::*, SUPPORTED_TLS_VERSIONS};
use bytes::{Buf, Bytes};

const TLS_RECORD_HEADER_LEN: usize = 5;
const TLS_HANDSHAKE_MESSAGE_HEADER_LEN: usize = 4;
const TLS_HANDSHAKE_CONTENT_TYPE: u8 = 0x16;
const TLS_HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;
const TLS_EXTENSION_TYPE_SNI: u16 = 0x0000;
const TLS_SNI_NAME_TYPE_HOSTNAME: u8 = 0x00;

/* ---------------------------------------------------------- */
/// Extract the SNI hostname from the head of a TLS stream.
///
/// The caller hands in whatever it has peeked so far; `Incomplete` means the
/// record (or the ClientHello inside it) is not fully buffered yet and the
/// probe should be retried once more bytes arrive.
///
/// Record layout per https://datatracker.ietf.org/doc/html/rfc8446#section-5.1 ,
/// ClientHello per https://datatracker.ietf.org/doc/html/rfc8446#section-4.1.2 ,
/// SNI extension per https://datatracker.ietf.org/doc/html/rfc6066#section-3
pub fn probe_tls_sni(buf: &[u8]) -> Result<String, ProbeFailure> {
  if buf.is_empty() {
    return Err(ProbeFailure::Incomplete);
  }
  // TLS record header:
  // - content type: 1 byte (0x16 = handshake)
  // - version: 2 bytes
  // - length: 2 bytes
  if buf[0] != TLS_HANDSHAKE_CONTENT_TYPE {
    return Err(ProbeFailure::Malformed);
  }
  if buf.len() < TLS_RECORD_HEADER_LEN {
    return Err(ProbeFailure::Incomplete);
  }
  // Initial ClientHello carries a legacy record version like 0x0301 for
  // interoperability; anything below major version 3 is SSL and rejected.
  if buf[1] < 3 {
    return Err(ProbeFailure::Malformed);
  }
  let record_len = ((buf[3] as usize) << 8) + buf[4] as usize;
  if record_len < TLS_HANDSHAKE_MESSAGE_HEADER_LEN {
    return Err(ProbeFailure::Malformed);
  }
  if buf.len() < TLS_RECORD_HEADER_LEN + record_len {
    debug!("TLS record not fully buffered yet ({}/{})", buf.len(), TLS_RECORD_HEADER_LEN + record_len);
    return Err(ProbeFailure::Incomplete);
  }

  let mut record = Bytes::copy_from_slice(&buf[TLS_RECORD_HEADER_LEN..TLS_RECORD_HEADER_LEN + record_len]);

  // Handshake message header:
  // - msg_type: 1 byte (0x01 = ClientHello)
  // - length: 3 bytes
  if record.get_u8() != TLS_HANDSHAKE_TYPE_CLIENT_HELLO {
    return Err(ProbeFailure::Malformed);
  }
  let msg_len = ((record.get_u16() as usize) << 8) + record.get_u8() as usize;
  if msg_len > record.remaining() {
    // ClientHello spanning multiple records; wait for the rest
    debug!("TLS ClientHello body is not fully received");
    return Err(ProbeFailure::Incomplete);
  }
  let hello = record.copy_to_bytes(msg_len);

  probe_client_hello_body(hello)
}

/// Walk the ClientHello body and pull the hostname out of the SNI extension
fn probe_client_hello_body(mut hello: Bytes) -> Result<String, ProbeFailure> {
  // - 2: legacy_version
  // - 32: random
  // - 1 + <var>: legacy_session_id
  // - 2 + <var>: cipher_suites
  // - 1 + <var>: legacy_compression_methods
  // - 2 + <var>: extensions
  if hello.remaining() < 34 {
    return Err(ProbeFailure::Malformed);
  }
  let legacy_version = hello.get_u16();
  if !SUPPORTED_TLS_VERSIONS.contains(&legacy_version) {
    return Err(ProbeFailure::Malformed);
  }
  hello.advance(32);

  let _legacy_session_id = read_lengthed(&mut hello, 1)?;

  let cipher_suites = read_lengthed(&mut hello, 2)?;
  if cipher_suites.len() < 2 || cipher_suites.len() % 2 != 0 {
    return Err(ProbeFailure::Malformed);
  }

  let compression_methods = read_lengthed(&mut hello, 1)?;
  if compression_methods.is_empty() {
    return Err(ProbeFailure::Malformed);
  }

  if hello.remaining() == 0 {
    // Legal pre-extension ClientHello; nothing to route on
    return Err(ProbeFailure::NoHostname);
  }
  let mut extensions = read_lengthed(&mut hello, 2)?;

  while extensions.remaining() > 0 {
    // extension_type (2) + extension length (2)
    if extensions.remaining() < 4 {
      return Err(ProbeFailure::Malformed);
    }
    let extension_type = extensions.get_u16();
    let mut extension_payload = read_lengthed(&mut extensions, 2)?;
    if extension_type != TLS_EXTENSION_TYPE_SNI {
      continue;
    }

    let mut server_name_list = read_lengthed(&mut extension_payload, 2)?;
    while server_name_list.remaining() > 0 {
      if server_name_list.remaining() < 3 {
        return Err(ProbeFailure::Malformed);
      }
      let name_type = server_name_list.get_u8();
      let name = read_lengthed(&mut server_name_list, 2)?;
      if name_type != TLS_SNI_NAME_TYPE_HOSTNAME {
        warn!("Unknown SNI name type: {:x}", name_type);
        continue;
      }
      if name.is_empty() {
        return Err(ProbeFailure::Malformed);
      }
      let name = String::from_utf8_lossy(&name).to_ascii_lowercase();
      debug!("TLS ClientHello with SNI {name}");
      return Ok(name);
    }
    // SNI extension present but no host_name entry in the list
    return Err(ProbeFailure::NoHostname);
  }

  Err(ProbeFailure::NoHostname)
}
