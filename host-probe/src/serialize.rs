use crate::error::ProbeFailure;
use bytes::{Buf, Bytes};

/// Reads a length-prefixed vector from the buffer, where the length field is
/// `len_prefix` bytes of network byte order. A declared length running past
/// the end of the buffer is a framing violation, not a short read: every
/// caller has already verified the enclosing record is complete.
pub(crate) fn read_lengthed<B: Buf>(b: &mut B, len_prefix: usize) -> Result<Bytes, ProbeFailure> {
  if b.remaining() < len_prefix {
    return Err(ProbeFailure::Malformed);
  }
  let mut len = 0usize;
  for _ in 0..len_prefix {
    len = (len << 8) + b.get_u8() as usize;
  }
  if len > b.remaining() {
    return Err(ProbeFailure::Malformed);
  }
  Ok(b.copy_to_bytes(len))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reads_u16_prefixed() {
    let mut buf = Bytes::from_static(&[0x00, 0x03, b'a', b'b', b'c', 0xff]);
    let v = read_lengthed(&mut buf, 2).unwrap();
    assert_eq!(v.as_ref(), b"abc");
    assert_eq!(buf.remaining(), 1);
  }

  #[test]
  fn rejects_overlong_declared_length() {
    let mut buf = Bytes::from_static(&[0x00, 0x10, b'a']);
    assert_eq!(read_lengthed(&mut buf, 2), Err(ProbeFailure::Malformed));
  }

  #[test]
  fn rejects_truncated_prefix() {
    let mut buf = Bytes::from_static(&[0x00]);
    assert_eq!(read_lengthed(&mut buf, 2), Err(ProbeFailure::Malformed));
  }
}
