use crate::connection::Connection;
use slab::Slab;

/* ---------------------------------------------------------- */
/// Ordered collection of live connections. Slab slots give stable keys for
/// the poll tokens; an intrusive prev/next chain threads the slots into a
/// recency order with O(1) head-insert, O(1) unlink and a forward walk that
/// tolerates removal of the current element.
///
/// Position encodes recency: any successful socket I/O moves the connection
/// to the head, so idle connections drift toward the tail.
#[derive(Debug, Default)]
pub(crate) struct ConnectionTable {
  slots: Slab<Node>,
  head: Option<usize>,
  tail: Option<usize>,
}

#[derive(Debug)]
struct Node {
  conn: Connection,
  prev: Option<usize>,
  next: Option<usize>,
}

impl ConnectionTable {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn len(&self) -> usize {
    self.slots.len()
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.slots.is_empty()
  }

  pub(crate) fn get(&self, key: usize) -> Option<&Connection> {
    self.slots.get(key).map(|n| &n.conn)
  }

  pub(crate) fn get_mut(&mut self, key: usize) -> Option<&mut Connection> {
    self.slots.get_mut(key).map(|n| &mut n.conn)
  }

  /// Insert at the head of the recency order, returning the stable key
  pub(crate) fn insert_head(&mut self, conn: Connection) -> usize {
    let old_head = self.head;
    let key = self.slots.insert(Node {
      conn,
      prev: None,
      next: old_head,
    });
    if let Some(h) = old_head {
      self.slots[h].prev = Some(key);
    }
    self.head = Some(key);
    if self.tail.is_none() {
      self.tail = Some(key);
    }
    key
  }

  /// Unlink and return the connection at `key`
  pub(crate) fn remove(&mut self, key: usize) -> Connection {
    self.unlink(key);
    self.slots.remove(key).conn
  }

  /// Move `key` to the head of the recency order
  pub(crate) fn move_to_head(&mut self, key: usize) {
    if self.head == Some(key) {
      return;
    }
    self.unlink(key);
    let old_head = self.head;
    {
      let node = &mut self.slots[key];
      node.prev = None;
      node.next = old_head;
    }
    if let Some(h) = old_head {
      self.slots[h].prev = Some(key);
    }
    self.head = Some(key);
    if self.tail.is_none() {
      self.tail = Some(key);
    }
  }

  /// First key in recency order
  pub(crate) fn first(&self) -> Option<usize> {
    self.head
  }

  /// Successor of `key` in recency order. Grab this before acting on `key`
  /// so the walk survives removal of the current element.
  pub(crate) fn next_key(&self, key: usize) -> Option<usize> {
    self.slots.get(key).and_then(|n| n.next)
  }

  /// Walk connections in recency order (head first)
  pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, &Connection)> {
    std::iter::successors(self.head, |&k| self.slots[k].next).map(|k| (k, &self.slots[k].conn))
  }

  /// Detach `key` from the chain without freeing its slot
  fn unlink(&mut self, key: usize) {
    let (prev, next) = {
      let node = &self.slots[key];
      (node.prev, node.next)
    };
    match prev {
      Some(p) => self.slots[p].next = next,
      None => self.head = next,
    }
    match next {
      Some(n) => self.slots[n].prev = prev,
      None => self.tail = prev,
    }
    let node = &mut self.slots[key];
    node.prev = None;
    node.next = None;
  }
}
