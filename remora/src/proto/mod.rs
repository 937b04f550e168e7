//! Remote Protocol Operations
//!
//! The wire format is an external data representation: big-endian multi-byte
//! integers, every field padded to a 4 byte boundary, variable-length fields
//! length-prefixed. A packet is an operation code followed by the payload of
//! that operation.
pub mod packet;
pub mod params;
pub mod wire;

pub use packet::Packet;
pub use wire::{PacketDecoder, RecvQueue, WireBufExt};

/// Oldest protocol version the engine will negotiate.
pub const PROTOCOL_VERSION_10: u16 = 10;
/// Lazy-send protocol: response packets may be piggybacked.
pub const PROTOCOL_VERSION_11: u16 = 11;
pub const PROTOCOL_VERSION_12: u16 = 12;
/// Current protocol: fixed fetch batch cap, auxiliary channel abort,
/// wire crypt and wire compression support.
pub const PROTOCOL_VERSION_13: u16 = 13;

pub const PROTOCOL_OLDEST: u16 = PROTOCOL_VERSION_10;
pub const PROTOCOL_CURRENT: u16 = PROTOCOL_VERSION_13;

/// Architecture code for the portable external data representation.
pub const ARCH_GENERIC: u32 = 1;

/// Connection types a client may ask for in a protocol offer.
pub const P_TYPE_BATCH_SEND: u32 = 3;
pub const P_TYPE_LAZY_SEND: u32 = 5;

/// Flag bit carried in an offer's `max_type` and echoed in the accept
/// type: both sides are willing to compress the stream.
pub const P_FLAG_COMPRESS: u32 = 0x100;

/// A protocol fault is fatal to the port that produced it.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown operation code {0}")]
    UnknownOperation(u32),
    #[error("unexpected operation {got}, expected {expected}")]
    UnexpectedOperation {
        expected: &'static str,
        got: &'static str,
    },
    #[error("malformed {0}")]
    Malformed(&'static str),
    #[error("{0} is not valid utf-8")]
    NonUtf8(&'static str),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),
    #[error("{what} length {len} exceeds protocol limit")]
    Oversized { what: &'static str, len: u32 },
}

macro_rules! operations {
    ($($(#[$doc:meta])* $name:ident = $code:literal,)*) => {
        /// Operation code of a [`Packet`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum Operation {
            $($(#[$doc])* $name = $code,)*
        }

        impl Operation {
            pub fn code(self) -> u32 {
                self as u32
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$name => stringify!($name),)*
                }
            }
        }

        impl TryFrom<u32> for Operation {
            type Error = ProtocolError;

            fn try_from(code: u32) -> Result<Self, ProtocolError> {
                match code {
                    $($code => Ok(Self::$name),)*
                    _ => Err(ProtocolError::UnknownOperation(code)),
                }
            }
        }
    };
}

operations! {
    /// Reclaimed packet, never sent.
    Void = 0,
    /// Establish a connection, carries protocol offers.
    Connect = 1,
    /// Server accepted a connection, carries the settled protocol.
    Accept = 2,
    /// Server refused the connection.
    Reject = 3,
    /// Orderly connection teardown.
    Disconnect = 4,
    /// Keep-alive probe, expects a response and nothing else.
    Dummy = 5,
    /// Generic response: object id, blob id, data, status vector.
    Response = 6,
    /// Attach to a database.
    Attach = 7,
    /// Detach from a database.
    Detach = 8,
    StartTransaction = 9,
    CommitTransaction = 10,
    RollbackTransaction = 11,
    /// Compile an executable request from its binary form.
    CompileRequest = 12,
    /// Start (or re-enter at a level) a compiled request.
    StartRequest = 13,
    ReleaseRequest = 14,
    AllocateStatement = 15,
    PrepareStatement = 16,
    ExecuteStatement = 17,
    /// Ask for a batch of rows from an open cursor.
    Fetch = 18,
    /// One fetched row, or an end-of-batch / end-of-cursor marker.
    FetchResponse = 19,
    FreeStatement = 20,
    OpenBlob = 21,
    CreateBlob = 22,
    GetSegment = 23,
    PutSegment = 24,
    CancelBlob = 25,
    CloseBlob = 26,
    /// Information request against any remote object.
    InfoRequest = 27,
    /// Wire encryption negotiation; never itself encrypted.
    Crypt = 28,
    /// Tell the peer a pending auxiliary channel will never arrive.
    AbortAux = 29,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn operation_codes_round_trip() {
        for code in 0..64u32 {
            if let Ok(op) = Operation::try_from(code) {
                assert_eq!(op.code(), code);
            }
        }
        assert!(matches!(
            Operation::try_from(999),
            Err(ProtocolError::UnknownOperation(999))
        ));
    }
}
