use crate::{error::ProbeFailure, trace::*};

/* ---------------------------------------------------------- */
/// Extract the Host header value from the head of an HTTP/1.x request.
///
/// Header lines are scanned as they become available; `Incomplete` is
/// returned until either a Host header or the end of the header section has
/// been buffered. Field names are case-insensitive per
/// https://datatracker.ietf.org/doc/html/rfc9112#section-5
pub fn probe_http_host(buf: &[u8]) -> Result<String, ProbeFailure> {
  let mut rest = buf;
  let mut request_line = true;

  loop {
    let Some(pos) = rest.iter().position(|&b| b == b'\n') else {
      if request_line && !plausible_request_head(rest) {
        return Err(ProbeFailure::Malformed);
      }
      return Err(ProbeFailure::Incomplete);
    };
    let mut line = &rest[..pos];
    if line.last() == Some(&b'\r') {
      line = &line[..line.len() - 1];
    }
    rest = &rest[pos + 1..];

    if request_line {
      if !valid_request_line(line) {
        return Err(ProbeFailure::Malformed);
      }
      request_line = false;
      continue;
    }
    if line.is_empty() {
      // header section ended without a Host field
      return Err(ProbeFailure::NoHostname);
    }
    if let Some(value) = header_value(line, b"host") {
      return host_from_value(value);
    }
  }
}

/// A partially received request line can only become valid if everything so
/// far is printable ASCII
fn plausible_request_head(head: &[u8]) -> bool {
  head.iter().all(|&b| (0x20..0x7f).contains(&b) || b == b'\t' || b == b'\r')
}

/// `METHOD request-target HTTP/x.y`
fn valid_request_line(line: &[u8]) -> bool {
  if !plausible_request_head(line) {
    return false;
  }
  let Some(pos) = line.iter().rposition(|&b| b == b' ') else {
    return false;
  };
  line[pos + 1..].starts_with(b"HTTP/")
}

/// Return the value of `line` if its field name matches `name` (ASCII
/// case-insensitive), with surrounding whitespace trimmed
fn header_value<'a>(line: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
  let (field, value) = line.split_at_checked(name.len())?;
  if !field.eq_ignore_ascii_case(name) {
    return None;
  }
  let value = value.strip_prefix(b":")?;
  let value = value.trim_ascii();
  Some(value)
}

/// Strip an optional `:port` suffix and lowercase. An IPv6 literal keeps its
/// colons: `[::1]:8080` routes as `::1`.
fn host_from_value(value: &[u8]) -> Result<String, ProbeFailure> {
  if value.is_empty() {
    return Err(ProbeFailure::NoHostname);
  }
  let value = String::from_utf8_lossy(value).to_ascii_lowercase();

  if let Some(v6) = value.strip_prefix('[') {
    let Some((host, _)) = v6.split_once(']') else {
      return Err(ProbeFailure::Malformed);
    };
    if host.is_empty() {
      return Err(ProbeFailure::Malformed);
    }
    return Ok(host.to_string());
  }

  let host = match value.rsplit_once(':') {
    Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => host,
    Some(_) => return Err(ProbeFailure::Malformed),
    None => value.as_str(),
  };
  if host.is_empty() {
    return Err(ProbeFailure::NoHostname);
  }
  debug!("HTTP request for host {host}");
  Ok(host.to_string())
}
