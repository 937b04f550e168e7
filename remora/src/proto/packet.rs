//! Protocol packets.
//!
//! A [`Packet`] is one framed protocol message: an operation code plus the
//! payload of that operation. The payload structs mirror the external data
//! representation field for field; see [`wire`][super::wire] for the codec.
use bytes::{BufMut, Bytes, BytesMut};

use super::{
    Operation,
    params::ParamBuf,
    wire::{FieldKind, WireBufExt, WireValue},
};
use crate::status::StatusVector;

/// One protocol version a client offers during connection establishment.
///
/// The server picks the best offer it supports, weight breaking ties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolOffer {
    pub version: u32,
    pub architecture: u32,
    pub min_type: u32,
    pub max_type: u32,
    pub weight: u32,
}

impl ProtocolOffer {
    pub fn new(version: u16, weight: u32) -> Self {
        Self {
            version: version.into(),
            architecture: super::ARCH_GENERIC,
            min_type: super::P_TYPE_BATCH_SEND,
            max_type: super::P_TYPE_LAZY_SEND,
            weight,
        }
    }
}

macro_rules! wire_type {
    (u32) => { u32 };
    (u64) => { u64 };
    (blob) => { Bytes };
    (str) => { String };
    (status) => { StatusVector };
    (params) => { ParamBuf };
    (offers) => { Vec<ProtocolOffer> };
}

macro_rules! field_kind {
    (u32) => { FieldKind::U32 };
    (u64) => { FieldKind::U64 };
    (blob) => { FieldKind::Blob };
    (str) => { FieldKind::Str };
    (status) => { FieldKind::Status };
    (params) => { FieldKind::Params };
    (offers) => { FieldKind::Offers };
}

macro_rules! take_value {
    ($it:ident, u32) => { take_value!(@ $it, U32) };
    ($it:ident, u64) => { take_value!(@ $it, U64) };
    ($it:ident, blob) => { take_value!(@ $it, Blob) };
    ($it:ident, str) => { take_value!(@ $it, Str) };
    ($it:ident, status) => { take_value!(@ $it, Status) };
    ($it:ident, params) => { take_value!(@ $it, Params) };
    ($it:ident, offers) => { take_value!(@ $it, Offers) };
    (@ $it:ident, $variant:ident) => {
        match $it.next() {
            Some(WireValue::$variant(v)) => v,
            _ => unreachable!("decoded fields diverge from operation schema"),
        }
    };
}

macro_rules! put_value {
    ($buf:ident, u32, $v:expr) => { $buf.put_wire_u32(*$v) };
    ($buf:ident, u64, $v:expr) => { $buf.put_wire_u64(*$v) };
    ($buf:ident, blob, $v:expr) => { $buf.put_wire_bytes($v) };
    ($buf:ident, str, $v:expr) => { $buf.put_wire_str($v) };
    ($buf:ident, status, $v:expr) => { $buf.put_wire_status($v) };
    ($buf:ident, params, $v:expr) => { $buf.put_wire_bytes($v.as_bytes()) };
    ($buf:ident, offers, $v:expr) => { $buf.put_wire_offers($v) };
}

macro_rules! packets {
    (
        $(
            $(#[$doc:meta])*
            $name:ident {
                $( $(#[$fdoc:meta])* $field:ident: $kind:ident, )*
            }
        )*
        ;
        $( $(#[$udoc:meta])* $unit:ident, )*
    ) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Default, PartialEq)]
            pub struct $name {
                $( $(#[$fdoc])* pub $field: wire_type!($kind), )*
            }

            impl From<$name> for Packet {
                fn from(p: $name) -> Packet {
                    Packet::$name(p)
                }
            }
        )*

        /// One framed protocol message, operation-tagged.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Packet {
            $( $name($name), )*
            $( $(#[$udoc])* $unit, )*
        }

        impl Packet {
            /// Operation code of this packet.
            pub fn op(&self) -> Operation {
                match self {
                    $( Self::$name(_) => Operation::$name, )*
                    $( Self::$unit => Operation::$unit, )*
                }
            }

            /// Decode field schema of `op`'s payload, in wire order.
            pub(crate) fn schema(op: Operation) -> &'static [FieldKind] {
                match op {
                    $( Operation::$name => &[ $( field_kind!($kind), )* ], )*
                    $( Operation::$unit => &[], )*
                }
            }

            /// Assemble a packet from fields decoded per [`schema`][Self::schema].
            pub(crate) fn from_values(op: Operation, values: Vec<WireValue>) -> Self {
                let mut values = values.into_iter();
                let packet = match op {
                    $( Operation::$name => Self::$name($name {
                        $( $field: take_value!(values, $kind), )*
                    }), )*
                    $( Operation::$unit => Self::$unit, )*
                };
                debug_assert!(values.next().is_none());
                packet
            }

            fn encode_body(&self, buf: &mut BytesMut) {
                match self {
                    $( Self::$name(p) => { $( put_value!(buf, $kind, &p.$field); )* } )*
                    $( Self::$unit => {} )*
                }
            }
        }
    };
}

packets! {
    /// Establish a connection: the client's architecture, target database
    /// and identification, plus the protocol versions it can speak.
    Connect {
        client_arch: u32,
        database: str,
        /// User identification block; long entries are multi-part.
        user_id: params,
        offers: offers,
    }

    /// The server's pick among the offered protocols.
    Accept {
        version: u32,
        architecture: u32,
        accept_type: u32,
        /// Advertised wire-crypt key types and compatible plugins.
        keys: params,
    }

    /// Generic response to most operations.
    Response {
        /// Object id allocated or addressed by the operation.
        object: u32,
        blob_id: u64,
        data: blob,
        status: status,
    }

    Attach {
        database: str,
        params: params,
    }

    Detach {
        object: u32,
    }

    StartTransaction {
        attachment: u32,
        /// Transaction parameter block, opaque to the wire layer.
        params: blob,
    }

    CommitTransaction {
        transaction: u32,
    }

    RollbackTransaction {
        transaction: u32,
    }

    CompileRequest {
        attachment: u32,
        /// Compiled request body, opaque to the wire layer.
        blr: blob,
    }

    /// Start, or re-enter at a recursion level, a compiled request.
    StartRequest {
        request: u32,
        level: u32,
        transaction: u32,
    }

    ReleaseRequest {
        request: u32,
    }

    AllocateStatement {
        attachment: u32,
    }

    PrepareStatement {
        statement: u32,
        transaction: u32,
        dialect: u32,
        sql: str,
    }

    ExecuteStatement {
        statement: u32,
        transaction: u32,
        /// Input message (bound parameter values).
        message: blob,
        message_count: u32,
    }

    /// Ask for a batch of rows from an open cursor; `count` is computed by
    /// [`compute_batch_size`][crate::fetch::compute_batch_size].
    Fetch {
        statement: u32,
        message_length: u32,
        count: u32,
    }

    /// One row of a fetched batch. A zero `count` ends the batch; a
    /// non-zero `status` ends the cursor.
    FetchResponse {
        status: u32,
        count: u32,
        row: blob,
    }

    FreeStatement {
        statement: u32,
        /// [`FREE_CLOSE`] or [`FREE_DROP`].
        option: u32,
    }

    OpenBlob {
        transaction: u32,
        blob_id: u64,
    }

    CreateBlob {
        transaction: u32,
    }

    GetSegment {
        blob: u32,
        length: u32,
    }

    PutSegment {
        blob: u32,
        segment: blob,
    }

    CancelBlob {
        blob: u32,
    }

    CloseBlob {
        blob: u32,
    }

    /// Information request against any remote object; the reply arrives in
    /// a [`Response`]'s data field as an info-item stream.
    InfoRequest {
        object: u32,
        items: blob,
        buffer_length: u32,
    }

    /// Wire encryption choice: sent in the clear, confirmed in the clear,
    /// everything after the confirmation is encrypted.
    Crypt {
        key_type: str,
        plugin: str,
    }

    ;
    /// Reclaimed packet, safe to drop or reuse.
    Void,
    Reject,
    Disconnect,
    /// Keep-alive probe.
    Dummy,
    /// The auxiliary channel the peer waits for will never arrive.
    AbortAux,
}

/// Close the cursor, keep the statement.
pub const FREE_CLOSE: u32 = 1;
/// Drop the statement entirely.
pub const FREE_DROP: u32 = 2;

impl Packet {
    /// Encode the packet into `buf` in external representation.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.op().code());
        self.encode_body(buf);
    }

    /// Reclaim the packet, releasing every owned sub-buffer and leaving it
    /// in the safe [`Void`][Packet::Void] state. Idempotent: voiding a
    /// voided packet is a no-op.
    pub fn void(&mut self) {
        *self = Packet::Void;
    }
}

impl Default for Packet {
    fn default() -> Self {
        Packet::Void
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn void_is_idempotent() {
        let mut p: Packet = Response {
            object: 1,
            blob_id: 2,
            data: Bytes::from_static(b"xyz"),
            status: StatusVector::success(),
        }
        .into();

        p.void();
        assert_eq!(p, Packet::Void);
        p.void();
        assert_eq!(p, Packet::Void);
        assert_eq!(p.op(), Operation::Void);
    }

    #[test]
    fn from_payload_sets_operation() {
        let p: Packet = Fetch { statement: 3, message_length: 128, count: 20 }.into();
        assert_eq!(p.op(), Operation::Fetch);
    }
}
