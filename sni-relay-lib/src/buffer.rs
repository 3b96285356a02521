use std::io::{self, Read, Write};

/// Fixed-capacity FIFO ring buffer carrying one direction of a relayed
/// stream. `recv` appends at the tail from a socket, `send` drains from the
/// head into the peer socket, `peek` copies from the head without consuming
/// so the probed bytes can still be forwarded verbatim.
///
/// Would-block and interrupted results pass through as their
/// `io::ErrorKind`s so the caller can tell a transient stall from a dead
/// socket.
#[derive(Debug)]
pub struct RingBuffer {
  data: Box<[u8]>,
  head: usize,
  len: usize,
}

impl RingBuffer {
  pub fn new(capacity: usize) -> Self {
    Self {
      data: vec![0u8; capacity].into_boxed_slice(),
      head: 0,
      len: 0,
    }
  }

  pub fn capacity(&self) -> usize {
    self.data.len()
  }

  /// Bytes queued and awaiting transmission
  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  /// Bytes of free space behind the tail
  pub fn room(&self) -> usize {
    self.capacity() - self.len
  }

  /// Copy up to `dst.len()` queued bytes from the head without consuming
  /// them. Returns the number of bytes copied.
  pub fn peek(&self, dst: &mut [u8]) -> usize {
    let n = dst.len().min(self.len);
    let first = n.min(self.capacity() - self.head);
    dst[..first].copy_from_slice(&self.data[self.head..self.head + first]);
    if n > first {
      dst[first..n].copy_from_slice(&self.data[..n - first]);
    }
    n
  }

  /// Read from `src` into the free space at the tail. Returns `Ok(0)` for an
  /// orderly peer close. A partial read is normal; at most one contiguous
  /// region is filled per call, the wrapped remainder is picked up on the
  /// next readiness cycle.
  pub fn recv<R: Read>(&mut self, src: &mut R) -> io::Result<usize> {
    if self.room() == 0 {
      // nothing can be appended; let the caller retry once the peer drains
      return Err(io::ErrorKind::WouldBlock.into());
    }
    let tail = (self.head + self.len) % self.capacity();
    let writable = if tail >= self.head {
      self.capacity() - tail
    } else {
      self.head - tail
    };
    let n = src.read(&mut self.data[tail..tail + writable])?;
    self.len += n;
    Ok(n)
  }

  /// Write queued bytes from the head into `dst` and consume what was
  /// accepted. A short write is not an error.
  pub fn send<W: Write>(&mut self, dst: &mut W) -> io::Result<usize> {
    if self.len == 0 {
      return Ok(0);
    }
    let readable = self.len.min(self.capacity() - self.head);
    let n = dst.write(&self.data[self.head..self.head + readable])?;
    self.head = (self.head + n) % self.capacity();
    self.len -= n;
    if self.len == 0 {
      self.head = 0;
    }
    Ok(n)
  }
}
