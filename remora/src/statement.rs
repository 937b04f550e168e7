//! Open cursor bookkeeping.
use crate::{message::MessageRing, status::DbError};

/// An open SQL cursor: a ring of staged row buffers, the fetch pipelining
/// counters, and a saved error holder.
#[derive(Debug, Default)]
pub struct Statement {
    pub id: u32,
    /// Owning transaction, detached on transaction end.
    pub transaction: Option<u32>,
    pub ring: MessageRing,
    /// Rows requested from the server but not yet received.
    pub rows_pending: u32,
    /// Rows received and staged but not yet delivered to the caller.
    pub msgs_waiting: u32,
    pub reorder_level: u32,
    /// Fetch batches in flight.
    pub batch_count: u32,
    fetched: bool,
    status: Option<DbError>,
}

impl Statement {
    pub fn new(id: u32) -> Self {
        Self { id, ..Default::default() }
    }

    /// Reset the cursor for reuse: zero every pipelining counter and
    /// shrink the buffer ring down to exactly one retained entry, the
    /// current one. Defensive against an empty or single-buffer ring.
    pub fn reset(&mut self) {
        self.rows_pending = 0;
        self.msgs_waiting = 0;
        self.reorder_level = 0;
        self.batch_count = 0;
        self.ring.retain_current();
    }

    /// Whether any batch was fetched since the cursor was (re)opened.
    pub fn is_fetched(&self) -> bool {
        self.fetched
    }

    pub fn set_fetched(&mut self, fetched: bool) {
        self.fetched = fetched;
    }

    /// Record an error against the statement. Without `overwrite` the
    /// first error wins; with it the holder is replaced unconditionally.
    pub fn save_status(&mut self, error: DbError, overwrite: bool) {
        if overwrite || self.status.is_none() {
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

#[cfg(test)]
mod test {
    use super::*;
    use crate::status::{StatusVector, codes};

    #[test]
    fn reset_retains_exactly_one_buffer() {
        let mut st = Statement::new(1);
        st.ring = MessageRing::with_buffers(5, 0, 32);
        st.rows_pending = 7;
        st.msgs_waiting = 3;
        st.batch_count = 2;

        st.reset();
        assert_eq!(st.ring.len(), 1);
        assert_eq!(st.rows_pending, 0);
        assert_eq!(st.msgs_waiting, 0);
        assert_eq!(st.batch_count, 0);

        // single buffer case is a no-op
        st.reset();
        assert_eq!(st.ring.len(), 1);
    }

    #[test]
    fn reset_on_empty_ring_is_defensive() {
        let mut st = Statement::new(1);
        st.reset();
        assert!(st.ring.is_empty());
    }

    #[test]
    fn save_status_overwrite_variants() {
        let mut st = Statement::new(1);
        st.save_status(DbError::new(StatusVector::error(codes::NETWORK_READ)), false);
        st.save_status(DbError::new(StatusVector::error(codes::SHUTDOWN)), false);
        assert_eq!(st.status().unwrap().code(), codes::NETWORK_READ);

        st.save_status(DbError::new(StatusVector::error(codes::SHUTDOWN)), true);
        assert_eq!(st.status().unwrap().code(), codes::SHUTDOWN);
    }
}
