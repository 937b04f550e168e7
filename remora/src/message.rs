//! Message buffer rings.
//!
//! Fetched rows are staged in per-slot rings of reusable buffers. The ring
//! replaces the original engine's circular linked list: the front entry is
//! the current message, rotation moves it to the back.
use std::collections::VecDeque;

use bytes::BytesMut;

/// One buffered protocol message (a row or record fragment).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    /// Message number within the owning request's message space.
    pub number: u16,
    pub data: BytesMut,
    /// Whether `data` currently holds a received, undelivered row.
    pub occupied: bool,
}

impl Message {
    pub fn new(number: u16, capacity: usize) -> Self {
        Self { number, data: BytesMut::with_capacity(capacity), occupied: false }
    }
}

/// Ring of message buffers with a current entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageRing {
    entries: VecDeque<Message>,
}

impl MessageRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// A ring of `count` fresh buffers sharing one message number.
    pub fn with_buffers(count: usize, number: u16, capacity: usize) -> Self {
        Self {
            entries: (0..count).map(|_| Message::new(number, capacity)).collect(),
        }
    }

    pub fn single(number: u16, capacity: usize) -> Self {
        Self::with_buffers(1, number, capacity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current(&self) -> Option<&Message> {
        self.entries.front()
    }

    pub fn current_mut(&mut self) -> Option<&mut Message> {
        self.entries.front_mut()
    }

    /// Advance the current entry to the next one in the ring.
    pub fn rotate(&mut self) {
        if let Some(front) = self.entries.pop_front() {
            self.entries.push_back(front);
        }
    }

    /// Grow the ring with a buffer placed behind the current entry.
    pub fn push(&mut self, message: Message) {
        self.entries.push_back(message);
    }

    /// Shrink the ring to exactly the current entry, releasing the rest.
    /// A no-op on an empty or single-entry ring. Returns the number of
    /// buffers released.
    pub fn retain_current(&mut self) -> usize {
        let released = self.entries.len().saturating_sub(1);
        self.entries.truncate(1);
        released
    }

    /// Clear per-message addressing on every entry; the buffers themselves
    /// stay allocated for reuse.
    pub fn clear_addresses(&mut self) {
        for entry in &mut self.entries {
            entry.occupied = false;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rotate_cycles_through_entries() {
        let mut ring = MessageRing::with_buffers(3, 7, 16);
        for m in [0, 1, 2, 0, 1] {
            assert_eq!(ring.current().unwrap().number, 7);
            ring.current_mut().unwrap().data.extend_from_slice(&[m]);
            ring.rotate();
        }
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn retain_current_keeps_exactly_one() {
        let mut ring = MessageRing::with_buffers(4, 0, 8);
        ring.current_mut().unwrap().occupied = true;
        assert_eq!(ring.retain_current(), 3);
        assert_eq!(ring.len(), 1);
        assert!(ring.current().unwrap().occupied);

        // defensive single-buffer case
        assert_eq!(ring.retain_current(), 0);
        assert_eq!(ring.len(), 1);
        assert_eq!(MessageRing::new().retain_current(), 0);
    }

    #[test]
    fn clear_addresses_preserves_buffers() {
        let mut ring = MessageRing::with_buffers(2, 0, 8);
        for _ in 0..2 {
            ring.current_mut().unwrap().occupied = true;
            ring.rotate();
        }
        ring.clear_addresses();
        assert!(ring.current().is_some());
        assert_eq!(ring.len(), 2);
        assert!(!ring.entries.iter().any(|m| m.occupied));
    }
}
