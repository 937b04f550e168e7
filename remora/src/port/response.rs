//! Response checking: status translation, shutdown detection and server
//! key harvesting.
use super::{Port, PortState};
use crate::{
    Result,
    crypt::parse_known_keys,
    proto::{packet::{Packet, Response}, params::ParamBuf},
    status::{DbError, StatusVector, codes},
    transport::Transport,
};

impl<T: Transport> Port<T> {
    /// Check the reply to a remote call.
    ///
    /// The raw status vector is re-walked into its normalized form. A
    /// shutdown code marks the port so later operations short-circuit. A
    /// successful [`Response`] comes back with its warnings intact; any
    /// error, or a non-response packet, raises as a structured database
    /// error (a generic network-read error when the vector is empty).
    pub fn check_response(&mut self, packet: Packet) -> Result<Response> {
        self.check_response_inner(packet, false)
    }

    /// [`check_response`][Self::check_response], additionally harvesting
    /// wire-crypt keys the server advertised in the response data.
    pub fn check_response_keys(&mut self, packet: Packet) -> Result<Response> {
        self.check_response_inner(packet, true)
    }

    fn check_response_inner(&mut self, packet: Packet, check_keys: bool) -> Result<Response> {
        let Packet::Response(mut response) = packet else {
            // no status vector to report, surface the generic read error
            return Err(DbError::new(StatusVector::error(codes::NETWORK_READ)).into());
        };

        response.status = response.status.normalize();
        let code = response.status.primary_code();

        if code == codes::SHUTDOWN || code == codes::ATTACHMENT_SHUTDOWN {
            self.mark_shutdown();
        } else if check_keys {
            self.add_server_keys(&response.data);
        }

        if code == codes::SUCCESS {
            return Ok(response);
        }
        Err(DbError::new(response.status).into())
    }

    /// Record that the peer is shutting down; the state machine degrades
    /// and new operations fail with a clear shutdown error instead of a
    /// generic I/O failure.
    pub(super) fn mark_shutdown(&mut self) {
        if !self.shutdown_seen {
            log::debug!("port {}: peer shutdown seen", self.life.id());
        }
        self.shutdown_seen = true;
        if self.state == PortState::Active {
            self.state = PortState::Degrading;
        }
    }

    fn add_server_keys(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let block = ParamBuf::from_bytes(bytes::Bytes::copy_from_slice(data));
        let keys = parse_known_keys(&block);
        if !keys.is_empty() {
            log::debug!(
                "port {}: server advertised {} crypt key type(s)",
                self.life.id(),
                keys.len(),
            );
            self.known_server_keys.extend(keys);
        }
    }
}
