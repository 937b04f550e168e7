//! External data representation codec.
//!
//! Encoding is plain: big-endian integers, variable-length fields prefixed
//! with a 4 byte length and padded to a 4 byte boundary.
//!
//! Decoding is *resumable*. Inbound transport bytes land in a [`RecvQueue`]
//! as fragments; [`PacketDecoder::decode`] consumes whole fields off the
//! queue and keeps them until the packet completes. Running out of buffered
//! bytes mid-packet is not an error: the decoder returns `None`, the caller
//! reads more transport data, and the next call continues from the first
//! incomplete field rather than the packet start.
use std::collections::VecDeque;
use std::mem;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{Operation, ProtocolError, packet::{Packet, ProtocolOffer}, params::ParamBuf};
use crate::status::{
    StatusEntry, StatusVector, TAG_END, TAG_ERROR, TAG_NUMBER, TAG_TEXT, TAG_WARNING,
};

/// Sanity cap on a single variable-length field.
const MAX_FIELD_LEN: u32 = 1 << 24;
/// Sanity cap on the protocol offer list.
const MAX_OFFERS: u32 = 16;

/// Wire size of one protocol offer (5 integers).
const OFFER_LEN: usize = 20;

pub(crate) fn pad4(len: usize) -> usize {
    len.wrapping_neg() & 3
}

/// Field shapes a packet payload is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldKind {
    U32,
    U64,
    Blob,
    Str,
    Status,
    Params,
    Offers,
}

/// One decoded payload field.
#[derive(Debug)]
pub(crate) enum WireValue {
    U32(u32),
    U64(u64),
    Blob(Bytes),
    Str(String),
    Status(StatusVector),
    Params(ParamBuf),
    Offers(Vec<ProtocolOffer>),
}

/// Encoding halves of the external representation.
pub trait WireBufExt {
    fn put_wire_u32(&mut self, v: u32);
    fn put_wire_u64(&mut self, v: u64);
    /// Length-prefixed opaque bytes, padded to the 4 byte boundary.
    fn put_wire_bytes(&mut self, v: &[u8]);
    fn put_wire_str(&mut self, v: &str);
    /// Tag/argument stream closed with the end marker.
    fn put_wire_status(&mut self, v: &StatusVector);
    fn put_wire_offers(&mut self, v: &[ProtocolOffer]);
}

impl<B: BufMut> WireBufExt for B {
    fn put_wire_u32(&mut self, v: u32) {
        self.put_u32(v);
    }

    fn put_wire_u64(&mut self, v: u64) {
        self.put_u64(v);
    }

    fn put_wire_bytes(&mut self, v: &[u8]) {
        self.put_u32(v.len() as u32);
        self.put_slice(v);
        self.put_bytes(0, pad4(v.len()));
    }

    fn put_wire_str(&mut self, v: &str) {
        self.put_wire_bytes(v.as_bytes());
    }

    fn put_wire_status(&mut self, v: &StatusVector) {
        for entry in v.entries() {
            self.put_u32(entry.tag());
            match entry {
                StatusEntry::Error(code) | StatusEntry::Warning(code) => self.put_u32(*code),
                StatusEntry::Number(n) => self.put_u32(*n),
                StatusEntry::Text(text) => self.put_wire_str(text),
            }
        }
        self.put_u32(TAG_END);
    }

    fn put_wire_offers(&mut self, v: &[ProtocolOffer]) {
        self.put_u32(v.len() as u32);
        for offer in v {
            self.put_u32(offer.version);
            self.put_u32(offer.architecture);
            self.put_u32(offer.min_type);
            self.put_u32(offer.max_type);
            self.put_u32(offer.weight);
        }
    }
}

/// Queue of raw inbound fragments the decoder drains.
///
/// Fragments arrive in transport read sizes; field reads span fragment
/// boundaries transparently.
#[derive(Debug, Default)]
pub struct RecvQueue {
    frags: VecDeque<Bytes>,
    remaining: usize,
}

impl RecvQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frag: Bytes) {
        if !frag.is_empty() {
            self.remaining += frag.len();
            self.frags.push_back(frag);
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }

    /// Read a big-endian integer `offset` bytes ahead without consuming.
    fn peek_u32_at(&self, offset: usize) -> Option<u32> {
        if self.remaining < offset + 4 {
            return None;
        }
        let mut out = [0u8; 4];
        let mut filled = 0;
        let mut offset = offset;
        for frag in &self.frags {
            if offset >= frag.len() {
                offset -= frag.len();
                continue;
            }
            let take = (frag.len() - offset).min(4 - filled);
            out[filled..filled + take].copy_from_slice(&frag[offset..offset + take]);
            filled += take;
            offset = 0;
            if filled == 4 {
                return Some(u32::from_be_bytes(out));
            }
        }
        None
    }

    /// Consume exactly `dst.len()` bytes; caller checked [`remaining`][Self::remaining].
    fn copy_out(&mut self, dst: &mut [u8]) {
        debug_assert!(self.remaining >= dst.len());
        let mut filled = 0;
        while filled < dst.len() {
            let Some(frag) = self.frags.front_mut() else { break };
            let take = frag.len().min(dst.len() - filled);
            dst[filled..filled + take].copy_from_slice(&frag[..take]);
            frag.advance(take);
            if frag.is_empty() {
                self.frags.pop_front();
            }
            filled += take;
        }
        self.remaining -= filled;
    }

    fn take_u32(&mut self) -> u32 {
        let mut b = [0u8; 4];
        self.copy_out(&mut b);
        u32::from_be_bytes(b)
    }

    fn take_bytes(&mut self, n: usize) -> Bytes {
        debug_assert!(self.remaining >= n);
        if let Some(front) = self.frags.front_mut() {
            // zero-copy when the field sits inside one fragment
            if front.len() >= n {
                let out = front.split_to(n);
                if front.is_empty() {
                    self.frags.pop_front();
                }
                self.remaining -= n;
                return out;
            }
        }
        let mut out = BytesMut::zeroed(n);
        self.copy_out(&mut out);
        out.freeze()
    }

    fn skip(&mut self, n: usize) {
        debug_assert!(self.remaining >= n);
        let mut left = n;
        while left > 0 {
            let Some(frag) = self.frags.front_mut() else { break };
            let take = frag.len().min(left);
            frag.advance(take);
            if frag.is_empty() {
                self.frags.pop_front();
            }
            left -= take;
        }
        self.remaining -= n - left;
    }
}

fn read_u32(q: &mut RecvQueue) -> Option<u32> {
    (q.remaining() >= 4).then(|| q.take_u32())
}

fn read_u64(q: &mut RecvQueue) -> Option<u64> {
    if q.remaining() < 8 {
        return None;
    }
    let mut b = [0u8; 8];
    q.copy_out(&mut b);
    Some(u64::from_be_bytes(b))
}

fn read_blob(q: &mut RecvQueue, what: &'static str) -> Result<Option<Bytes>, ProtocolError> {
    let Some(len) = q.peek_u32_at(0) else {
        return Ok(None);
    };
    if len > MAX_FIELD_LEN {
        return Err(ProtocolError::Oversized { what, len });
    }
    let len = len as usize;
    if q.remaining() < 4 + len + pad4(len) {
        return Ok(None);
    }
    q.skip(4);
    let out = q.take_bytes(len);
    q.skip(pad4(len));
    Ok(Some(out))
}

fn read_str(q: &mut RecvQueue, what: &'static str) -> Result<Option<String>, ProtocolError> {
    let Some(bytes) = read_blob(q, what)? else {
        return Ok(None);
    };
    match String::from_utf8(bytes.into()) {
        Ok(s) => Ok(Some(s)),
        Err(_) => Err(ProtocolError::NonUtf8(what)),
    }
}

/// Decode status entries into `acc` until the end marker; `acc` persists
/// across partial-data retries so consumed entries are never re-read.
fn read_status(
    q: &mut RecvQueue,
    acc: &mut StatusVector,
) -> Result<Option<StatusVector>, ProtocolError> {
    loop {
        let Some(tag) = q.peek_u32_at(0) else {
            return Ok(None);
        };
        match tag {
            TAG_END => {
                q.skip(4);
                return Ok(Some(mem::take(acc)));
            }
            TAG_ERROR | TAG_WARNING | TAG_NUMBER => {
                if q.remaining() < 8 {
                    return Ok(None);
                }
                q.skip(4);
                let arg = q.take_u32();
                acc.push(match tag {
                    TAG_ERROR => StatusEntry::Error(arg),
                    TAG_WARNING => StatusEntry::Warning(arg),
                    _ => StatusEntry::Number(arg),
                });
            }
            TAG_TEXT => {
                let Some(len) = q.peek_u32_at(4) else {
                    return Ok(None);
                };
                if len > MAX_FIELD_LEN {
                    return Err(ProtocolError::Oversized { what: "status text", len });
                }
                let len = len as usize;
                if q.remaining() < 8 + len + pad4(len) {
                    return Ok(None);
                }
                q.skip(8);
                let text = q.take_bytes(len);
                q.skip(pad4(len));
                let text = String::from_utf8(text.into())
                    .map_err(|_| ProtocolError::NonUtf8("status text"))?;
                acc.push(StatusEntry::Text(text));
            }
            _ => return Err(ProtocolError::Malformed("status vector tag")),
        }
    }
}

fn read_offers(q: &mut RecvQueue) -> Result<Option<Vec<ProtocolOffer>>, ProtocolError> {
    let Some(count) = q.peek_u32_at(0) else {
        return Ok(None);
    };
    if count > MAX_OFFERS {
        return Err(ProtocolError::Oversized { what: "protocol offers", len: count });
    }
    if q.remaining() < 4 + count as usize * OFFER_LEN {
        return Ok(None);
    }
    q.skip(4);
    let mut offers = Vec::with_capacity(count as usize);
    for _ in 0..count {
        offers.push(ProtocolOffer {
            version: q.take_u32(),
            architecture: q.take_u32(),
            min_type: q.take_u32(),
            max_type: q.take_u32(),
            weight: q.take_u32(),
        });
    }
    Ok(Some(offers))
}

/// Incremental packet decoder.
///
/// One decoder lives per port; its partial state *is* the logical decode
/// offset within the current inbound packet.
#[derive(Debug, Default)]
pub struct PacketDecoder {
    op: Option<Operation>,
    values: Vec<WireValue>,
    status_acc: StatusVector,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one packet from buffered fragments.
    ///
    /// `Ok(None)` means more transport bytes are required; fields decoded
    /// so far are retained and the next call resumes at the first
    /// incomplete field.
    pub fn decode(&mut self, q: &mut RecvQueue) -> Result<Option<Packet>, ProtocolError> {
        let op = match self.op {
            Some(op) => op,
            None => match read_u32(q) {
                Some(code) => {
                    let op = Operation::try_from(code)?;
                    self.op = Some(op);
                    op
                }
                None => return Ok(None),
            },
        };

        let schema = Packet::schema(op);
        while self.values.len() < schema.len() {
            let what = op.name();
            let value = match schema[self.values.len()] {
                FieldKind::U32 => match read_u32(q) {
                    Some(v) => WireValue::U32(v),
                    None => return Ok(None),
                },
                FieldKind::U64 => match read_u64(q) {
                    Some(v) => WireValue::U64(v),
                    None => return Ok(None),
                },
                FieldKind::Blob => match read_blob(q, what)? {
                    Some(v) => WireValue::Blob(v),
                    None => return Ok(None),
                },
                FieldKind::Str => match read_str(q, what)? {
                    Some(v) => WireValue::Str(v),
                    None => return Ok(None),
                },
                FieldKind::Params => match read_blob(q, what)? {
                    Some(v) => WireValue::Params(ParamBuf::from_bytes(v)),
                    None => return Ok(None),
                },
                FieldKind::Status => match read_status(q, &mut self.status_acc)? {
                    Some(v) => WireValue::Status(v),
                    None => return Ok(None),
                },
                FieldKind::Offers => match read_offers(q)? {
                    Some(v) => WireValue::Offers(v),
                    None => return Ok(None),
                },
            };
            self.values.push(value);
        }

        self.op = None;
        let values = mem::take(&mut self.values);
        Ok(Some(Packet::from_values(op, values)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::proto::packet::*;
    use crate::status::codes;

    fn sample_status() -> StatusVector {
        let mut v = StatusVector::new();
        v.push(StatusEntry::Error(codes::NETWORK_READ));
        v.push(StatusEntry::Text("request failed".into()));
        v.push(StatusEntry::Number(3));
        v.push(StatusEntry::Warning(7));
        v.push(StatusEntry::Text("w".into()));
        v
    }

    fn samples() -> Vec<Packet> {
        let mut user_id = ParamBuf::new();
        user_id.insert_str(1, "sysdba");
        user_id.insert_multi_part(5, &vec![0xabu8; 600]);

        let mut keys = ParamBuf::new();
        keys.insert_str(1, "Symmetric");
        keys.insert_str(2, "ChaCha Arc4");

        vec![
            Connect {
                client_arch: crate::proto::ARCH_GENERIC,
                database: "employee".into(),
                user_id,
                offers: vec![
                    ProtocolOffer::new(crate::proto::PROTOCOL_VERSION_13, 2),
                    ProtocolOffer::new(crate::proto::PROTOCOL_VERSION_12, 1),
                ],
            }
            .into(),
            Accept {
                version: 13,
                architecture: crate::proto::ARCH_GENERIC,
                accept_type: crate::proto::P_TYPE_BATCH_SEND,
                keys,
            }
            .into(),
            Response {
                object: 17,
                blob_id: 0xdead_beef_0102_0304,
                data: Bytes::from_static(b"info"),
                status: sample_status(),
            }
            .into(),
            Response::default().into(),
            Attach { database: String::new(), params: ParamBuf::new() }.into(),
            Detach { object: 1 }.into(),
            StartTransaction { attachment: 1, params: Bytes::from_static(&[9, 9, 9]) }.into(),
            CommitTransaction { transaction: 5 }.into(),
            RollbackTransaction { transaction: 5 }.into(),
            CompileRequest { attachment: 1, blr: Bytes::from_static(&[1, 2, 3, 4, 5]) }.into(),
            StartRequest { request: 2, level: 1, transaction: 5 }.into(),
            ReleaseRequest { request: 2 }.into(),
            AllocateStatement { attachment: 1 }.into(),
            PrepareStatement {
                statement: 3,
                transaction: 5,
                dialect: 3,
                sql: "select * from rdb$relations".into(),
            }
            .into(),
            ExecuteStatement {
                statement: 3,
                transaction: 5,
                message: Bytes::from_static(b"xx"),
                message_count: 1,
            }
            .into(),
            Fetch { statement: 3, message_length: 128, count: 20 }.into(),
            FetchResponse { status: 0, count: 1, row: Bytes::from_static(b"rowdata") }.into(),
            FetchResponse { status: 100, count: 0, row: Bytes::new() }.into(),
            FreeStatement { statement: 3, option: FREE_CLOSE }.into(),
            OpenBlob { transaction: 5, blob_id: 42 }.into(),
            CreateBlob { transaction: 5 }.into(),
            GetSegment { blob: 6, length: 4096 }.into(),
            PutSegment { blob: 6, segment: Bytes::from_static(b"segment-bytes") }.into(),
            CancelBlob { blob: 6 }.into(),
            CloseBlob { blob: 6 }.into(),
            InfoRequest {
                object: 6,
                items: Bytes::from_static(&[4, 5, 6, 7]),
                buffer_length: 512,
            }
            .into(),
            Crypt { key_type: "Symmetric".into(), plugin: "ChaCha".into() }.into(),
            Packet::Void,
            Packet::Reject,
            Packet::Disconnect,
            Packet::Dummy,
            Packet::AbortAux,
        ]
    }

    #[test]
    fn round_trip_every_operation() {
        for packet in samples() {
            let mut buf = BytesMut::new();
            packet.encode(&mut buf);
            assert_eq!(buf.len() % 4, 0, "unaligned encoding of {}", packet.op());

            let mut q = RecvQueue::new();
            q.push(buf.freeze());
            let mut dec = PacketDecoder::new();
            let out = dec.decode(&mut q).unwrap().expect("complete packet");
            assert_eq!(out, packet);
            assert!(q.is_empty(), "trailing bytes after {}", packet.op());
        }
    }

    #[test]
    fn decode_resumes_across_fragments() {
        for packet in samples() {
            let mut buf = BytesMut::new();
            packet.encode(&mut buf);
            let buf = buf.freeze();

            // feed one byte at a time; decode must report partial data
            // without consuming a field twice
            let mut q = RecvQueue::new();
            let mut dec = PacketDecoder::new();
            for i in 0..buf.len() {
                q.push(buf.slice(i..i + 1));
                if i + 1 < buf.len() {
                    assert!(dec.decode(&mut q).unwrap().is_none());
                }
            }
            let out = dec.decode(&mut q).unwrap().expect("complete packet");
            assert_eq!(out, packet);
        }
    }

    #[test]
    fn back_to_back_packets_in_one_fragment() {
        let mut buf = BytesMut::new();
        Packet::Dummy.encode(&mut buf);
        Packet::from(Detach { object: 9 }).encode(&mut buf);

        let mut q = RecvQueue::new();
        q.push(buf.freeze());
        let mut dec = PacketDecoder::new();
        assert_eq!(dec.decode(&mut q).unwrap(), Some(Packet::Dummy));
        assert_eq!(dec.decode(&mut q).unwrap(), Some(Detach { object: 9 }.into()));
        assert_eq!(dec.decode(&mut q).unwrap(), None);
    }

    #[test]
    fn unknown_operation_is_protocol_fault() {
        let mut q = RecvQueue::new();
        q.push(Bytes::copy_from_slice(&999u32.to_be_bytes()));
        let mut dec = PacketDecoder::new();
        assert!(matches!(
            dec.decode(&mut q),
            Err(ProtocolError::UnknownOperation(999))
        ));
    }

    #[test]
    fn oversized_field_is_protocol_fault() {
        let mut buf = BytesMut::new();
        buf.put_u32(Operation::PutSegment.code());
        buf.put_u32(6); // blob object
        buf.put_u32(MAX_FIELD_LEN + 1); // absurd segment length
        let mut q = RecvQueue::new();
        q.push(buf.freeze());
        let mut dec = PacketDecoder::new();
        assert!(matches!(
            dec.decode(&mut q),
            Err(ProtocolError::Oversized { .. })
        ));
    }

    #[test]
    fn status_vector_mixed_tags_round_trip() {
        let mut buf = BytesMut::new();
        buf.put_wire_status(&sample_status());
        let mut q = RecvQueue::new();
        q.push(buf.freeze());
        let mut acc = StatusVector::new();
        let out = read_status(&mut q, &mut acc).unwrap().expect("complete vector");
        assert_eq!(out, sample_status());
        assert!(q.is_empty());
    }

    #[test]
    fn zero_and_max_length_fields() {
        let empty = PutSegment { blob: 1, segment: Bytes::new() };
        let full = PutSegment { blob: 1, segment: Bytes::from(vec![7u8; 65_535]) };
        for packet in [Packet::from(empty), Packet::from(full)] {
            let mut buf = BytesMut::new();
            packet.encode(&mut buf);
            let mut q = RecvQueue::new();
            q.push(buf.freeze());
            let out = PacketDecoder::new().decode(&mut q).unwrap().expect("complete");
            assert_eq!(out, packet);
        }
    }
}
