//! Per-attachment registries.
//!
//! A [`Session`] tracks the client-side bookkeeping of one attachment: the
//! live requests (with every recursion level), open cursors and blobs.
//! Registries are plain maps keyed by the remote object id; removal is the
//! only unlink there is.
use std::collections::HashMap;

use crate::{blob::Blob, request::Request, statement::Statement};

/// Client-side bookkeeping for one attachment.
#[derive(Debug, Default)]
pub struct Session {
    /// Remote object id of the attachment itself.
    pub attachment: u32,
    requests: HashMap<u32, Request>,
    statements: HashMap<u32, Statement>,
    blobs: HashMap<u32, Blob>,
}

impl Session {
    pub fn new(attachment: u32) -> Self {
        Self { attachment, ..Default::default() }
    }

    pub fn register_request(&mut self, request: Request) {
        self.requests.insert(request.id, request);
    }

    pub fn request(&self, id: u32) -> Option<&Request> {
        self.requests.get(&id)
    }

    pub fn request_mut(&mut self, id: u32) -> Option<&mut Request> {
        self.requests.get_mut(&id)
    }

    /// Detach the request from the registry, releasing all levels, every
    /// message buffer in every slot, and the formats owned through level 0.
    pub fn release_request(&mut self, id: u32) -> Option<Request> {
        self.requests.remove(&id)
    }

    pub fn register_statement(&mut self, statement: Statement) {
        self.statements.insert(statement.id, statement);
    }

    pub fn statement(&self, id: u32) -> Option<&Statement> {
        self.statements.get(&id)
    }

    pub fn statement_mut(&mut self, id: u32) -> Option<&mut Statement> {
        self.statements.get_mut(&id)
    }

    pub fn release_statement(&mut self, id: u32) -> Option<Statement> {
        self.statements.remove(&id)
    }

    pub fn register_blob(&mut self, blob: Blob) {
        self.blobs.insert(blob.object, blob);
    }

    pub fn blob(&self, object: u32) -> Option<&Blob> {
        self.blobs.get(&object)
    }

    pub fn blob_mut(&mut self, object: u32) -> Option<&mut Blob> {
        self.blobs.get_mut(&object)
    }

    pub fn release_blob(&mut self, object: u32) -> Option<Blob> {
        self.blobs.remove(&object)
    }

    /// The transaction is being committed or rolled back: purge any staged
    /// messages so a later receive can never deliver rows cached under the
    /// ended transaction, and detach every back-reference to it.
    pub fn cleanup_transaction(&mut self, transaction: u32) {
        for request in self.requests.values_mut() {
            for level in request.levels_mut() {
                if level.transaction == Some(transaction) {
                    level.reset(None);
                    level.transaction = None;
                }
            }
        }

        for statement in self.statements.values_mut() {
            if statement.transaction == Some(transaction) {
                statement.reset();
                statement.set_fetched(false);
                statement.transaction = None;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::request::RowFormat;

    fn request_under(id: u32, transaction: u32) -> Request {
        let mut rq = Request::new(
            id,
            vec![Some(RowFormat { length: 32, net_length: 40, count: 1 })],
        );
        let level = rq.find_level(0);
        level.transaction = Some(transaction);
        level.slots[0].rows_pending = 4;
        level.slots[0].batch_count = 2;
        rq
    }

    #[test]
    fn transaction_cleanup_purges_owned_entities() {
        let mut session = Session::new(1);
        session.register_request(request_under(10, 77));
        session.register_request(request_under(11, 77));

        let mut st = Statement::new(20);
        st.transaction = Some(77);
        st.rows_pending = 9;
        st.batch_count = 3;
        st.set_fetched(true);
        session.register_statement(st);

        session.cleanup_transaction(77);

        for id in [10, 11] {
            let level = session.request(id).unwrap().level(0).unwrap();
            assert_eq!(level.transaction, None);
            assert_eq!(level.slots[0].rows_pending, 0);
            assert_eq!(level.slots[0].batch_count, 0);
        }
        let st = session.statement(20).unwrap();
        assert_eq!(st.transaction, None);
        assert_eq!(st.rows_pending, 0);
        assert_eq!(st.batch_count, 0);
        assert!(!st.is_fetched());
    }

    #[test]
    fn cleanup_spares_other_transactions() {
        let mut session = Session::new(1);
        session.register_request(request_under(10, 77));
        session.register_request(request_under(11, 88));

        session.cleanup_transaction(77);

        let level = session.request(11).unwrap().level(0).unwrap();
        assert_eq!(level.transaction, Some(88));
        assert_eq!(level.slots[0].rows_pending, 4);
    }

    #[test]
    fn cleanup_reaches_nested_levels() {
        let mut session = Session::new(1);
        let mut rq = request_under(10, 77);
        let nested = rq.find_level(2);
        nested.transaction = Some(77);
        nested.slots[0].rows_pending = 6;
        session.register_request(rq);

        session.cleanup_transaction(77);

        let rq = session.request(10).unwrap();
        assert_eq!(rq.level(2).unwrap().transaction, None);
        assert_eq!(rq.level(2).unwrap().slots[0].rows_pending, 0);
    }

    #[test]
    fn release_request_removes_registration() {
        let mut session = Session::new(1);
        session.register_request(request_under(10, 77));
        assert!(session.release_request(10).is_some());
        assert!(session.request(10).is_none());
        assert!(session.release_request(10).is_none());
    }
}
