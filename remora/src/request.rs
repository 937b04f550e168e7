//! Compiled request bookkeeping.
//!
//! A request is a compiled, possibly re-entrant executable unit. Each
//! recursion depth is a [`RequestLevel`] holding per-message slots with
//! their buffer rings and pipelining counters. Format descriptors are
//! created once at level 0 and shared by reference into cloned levels, so
//! releasing a request releases every buffer across every level while each
//! format goes away exactly once.
use std::sync::Arc;

use crate::{message::MessageRing, status::DbError};

/// Row format descriptor for one message slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFormat {
    /// Materialized row length in bytes.
    pub length: u32,
    /// Row length in external (wire) representation.
    pub net_length: u32,
    /// Field count.
    pub count: u16,
}

/// Per-message-slot buffers and pipelining state.
#[derive(Debug, Default)]
pub struct MessageSlot {
    pub format: Option<Arc<RowFormat>>,
    pub ring: MessageRing,
    /// Rows requested from the server but not yet received.
    pub rows_pending: u32,
    pub reorder_level: u32,
    /// Fetch batches in flight.
    pub batch_count: u32,
}

impl MessageSlot {
    fn cloned_shape(&self) -> Self {
        Self {
            format: self.format.clone(),
            // fresh buffers for every slot with a known format
            ring: match &self.format {
                Some(f) => {
                    let number = self.ring.current().map(|m| m.number).unwrap_or_default();
                    MessageRing::single(number, f.length as usize)
                }
                None => MessageRing::new(),
            },
            rows_pending: 0,
            reorder_level: 0,
            batch_count: 0,
        }
    }
}

/// One recursion depth of a [`Request`].
#[derive(Debug)]
pub struct RequestLevel {
    pub level: u16,
    /// Owning transaction, detached on transaction end.
    pub transaction: Option<u32>,
    pub slots: Vec<MessageSlot>,
    status: Option<DbError>,
}

impl RequestLevel {
    /// Clean the level up in preparation to use it again: zero the
    /// pipelining counters and clear per-message addressing on every slot
    /// except the one whose current message is still in flight.
    pub fn reset(&mut self, active_slot: Option<usize>) {
        for (n, slot) in self.slots.iter_mut().enumerate() {
            if Some(n) == active_slot {
                continue;
            }
            slot.rows_pending = 0;
            slot.reorder_level = 0;
            slot.batch_count = 0;
            slot.ring.clear_addresses();
        }
        self.status = None;
    }

    /// Record an error against the level; the first error wins until the
    /// status is cleared.
    pub fn save_status(&mut self, error: DbError) {
        if self.status.is_none() {
            self.status = Some(error);
        }
    }

    pub fn status(&self) -> Option<&DbError> {
        self.status.as_ref()
    }

    pub fn take_status(&mut self) -> Option<DbError> {
        self.status.take()
    }
}

/// A compiled request and all its recursion levels. Level 0 always exists.
#[derive(Debug)]
pub struct Request {
    pub id: u32,
    levels: Vec<RequestLevel>,
}

impl Request {
    /// A request whose message space is described by `formats`, one entry
    /// per message slot; slots without a known format get no buffers.
    pub fn new(id: u32, formats: Vec<Option<RowFormat>>) -> Self {
        let slots = formats
            .into_iter()
            .enumerate()
            .map(|(number, format)| match format {
                Some(format) => {
                    let ring = MessageRing::single(number as u16, format.length as usize);
                    MessageSlot { format: Some(Arc::new(format)), ring, ..Default::default() }
                }
                None => MessageSlot::default(),
            })
            .collect();

        Self {
            id,
            levels: vec![RequestLevel { level: 0, transaction: None, slots, status: None }],
        }
    }

    /// Find the bookkeeping for a recursion level, cloning the top level's
    /// shape into a new node when the level is seen for the first time.
    pub fn find_level(&mut self, level: u16) -> &mut RequestLevel {
        if let Some(n) = self.levels.iter().position(|l| l.level == level) {
            return &mut self.levels[n];
        }

        let slots = self.levels[0].slots.iter().map(MessageSlot::cloned_shape).collect();
        self.levels.push(RequestLevel { level, transaction: None, slots, status: None });
        self.levels.last_mut().expect("level just pushed")
    }

    pub fn level(&self, level: u16) -> Option<&RequestLevel> {
        self.levels.iter().find(|l| l.level == level)
    }

    pub fn levels(&self) -> impl Iterator<Item = &RequestLevel> {
        self.levels.iter()
    }

    pub fn levels_mut(&mut self) -> impl Iterator<Item = &mut RequestLevel> {
        self.levels.iter_mut()
    }

    /// Total buffered messages across all levels and slots.
    pub fn message_buffers(&self) -> usize {
        self.levels
            .iter()
            .flat_map(|l| l.slots.iter())
            .map(|s| s.ring.len())
            .sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::status::{StatusVector, codes};

    fn fmt(length: u32) -> RowFormat {
        RowFormat { length, net_length: length + 8, count: 2 }
    }

    fn sample() -> Request {
        Request::new(1, vec![Some(fmt(64)), None, Some(fmt(128))])
    }

    #[test]
    fn level_zero_always_exists() {
        let rq = sample();
        assert_eq!(rq.levels().count(), 1);
        assert_eq!(rq.level(0).unwrap().slots.len(), 3);
        assert_eq!(rq.message_buffers(), 2);
    }

    #[test]
    fn find_level_reuses_known_levels() {
        let mut rq = sample();
        rq.find_level(1).transaction = Some(9);
        assert_eq!(rq.levels().count(), 2);
        assert_eq!(rq.find_level(1).transaction, Some(9));
        assert_eq!(rq.levels().count(), 2);
        rq.find_level(0);
        assert_eq!(rq.levels().count(), 2);
    }

    #[test]
    fn cloned_level_gets_fresh_buffers_for_known_formats() {
        let mut rq = sample();
        let level = rq.find_level(2);
        assert_eq!(level.slots[0].ring.len(), 1);
        assert_eq!(level.slots[1].ring.len(), 0);
        assert_eq!(level.slots[2].ring.len(), 1);
        assert_eq!(level.slots[0].rows_pending, 0);
        assert_eq!(rq.message_buffers(), 4);
    }

    #[test]
    fn formats_are_shared_not_duplicated() {
        let mut rq = sample();
        rq.find_level(1);
        rq.find_level(2);

        let format = rq.level(0).unwrap().slots[0].format.clone().unwrap();
        // level 0 + two clones + the probe
        assert_eq!(Arc::strong_count(&format), 4);

        drop(rq);
        // releasing the request dropped every share exactly once
        assert_eq!(Arc::strong_count(&format), 1);
    }

    #[test]
    fn reset_spares_the_active_slot() {
        let mut rq = sample();
        let level = rq.find_level(0);
        for slot in &mut level.slots {
            slot.rows_pending = 5;
            slot.batch_count = 2;
            slot.ring.clear_addresses();
            if let Some(m) = slot.ring.current_mut() {
                m.occupied = true;
            }
        }

        level.reset(Some(2));
        assert_eq!(level.slots[0].rows_pending, 0);
        assert!(!level.slots[0].ring.current().unwrap().occupied);
        assert_eq!(level.slots[2].rows_pending, 5);
        assert!(level.slots[2].ring.current().unwrap().occupied);
    }

    #[test]
    fn first_error_wins() {
        let mut rq = sample();
        let level = rq.find_level(0);
        level.save_status(DbError::new(StatusVector::error(codes::NETWORK_READ)));
        level.save_status(DbError::new(StatusVector::error(codes::SHUTDOWN)));
        assert_eq!(level.status().unwrap().code(), codes::NETWORK_READ);

        level.take_status();
        level.save_status(DbError::new(StatusVector::error(codes::SHUTDOWN)));
        assert_eq!(level.status().unwrap().code(), codes::SHUTDOWN);
    }
}
