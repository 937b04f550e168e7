//! Tag-length-value parameter blocks.
//!
//! Parameter blocks travel inside packets as opaque byte fields: the
//! handshake user-identification block, transaction parameter blocks, and
//! the server key advertisement all use this shape. Each entry is a 1 byte
//! tag, a 1 byte length and up to 255 value bytes; integers inside entries
//! are little-endian, unlike the wire proper.
use bytes::{BufMut, Bytes, BytesMut};

/// Tags of the connection user-identification block.
pub mod tags {
    pub const LOGIN: u8 = 1;
    pub const HOST: u8 = 2;
    pub const PLUGIN_NAME: u8 = 3;
    pub const PLUGIN_LIST: u8 = 4;
    /// Key-exchange payload; long values are multi-part.
    pub const SPECIFIC_DATA: u8 = 5;
    /// Client's wire-crypt requirement level.
    pub const CLIENT_CRYPT: u8 = 6;
    /// Caller override for the connection establishment timeout.
    pub const CONNECT_TIMEOUT: u8 = 7;
}

/// Per-entry value limit imposed by the 1 byte length field.
pub const MAX_ENTRY_LEN: usize = 255;

/// Payload bytes per part of a multi-part value; the first byte of each
/// part is the part index.
pub const PART_LEN: usize = 254;

/// A tag-length-value parameter block.
#[derive(Clone, Default, PartialEq)]
pub struct ParamBuf {
    buf: BytesMut,
}

impl ParamBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_bytes(bytes: Bytes) -> Self {
        Self { buf: BytesMut::from(&bytes[..]) }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Insert a raw entry.
    ///
    /// # Panics
    ///
    /// Panics when `value` exceeds [`MAX_ENTRY_LEN`]; longer values go
    /// through [`insert_multi_part`][Self::insert_multi_part].
    pub fn insert_bytes(&mut self, tag: u8, value: &[u8]) {
        assert!(value.len() <= MAX_ENTRY_LEN, "parameter entry too long");
        self.buf.reserve(2 + value.len());
        self.buf.put_u8(tag);
        self.buf.put_u8(value.len() as u8);
        self.buf.put_slice(value);
    }

    pub fn insert_str(&mut self, tag: u8, value: &str) {
        self.insert_bytes(tag, value.as_bytes());
    }

    pub fn insert_int(&mut self, tag: u8, value: i32) {
        self.insert_bytes(tag, &value.to_le_bytes());
    }

    /// Insert a value of arbitrary length as a run of parts under one tag,
    /// each part prefixed with its index. The index wraps at 256 parts,
    /// bounding a value at `254 * 256` bytes.
    pub fn insert_multi_part(&mut self, tag: u8, value: &[u8]) {
        let mut remaining = value;
        let mut part = 0u8;
        let mut scratch = [0u8; PART_LEN + 1];

        loop {
            let step = remaining.len().min(PART_LEN);
            scratch[0] = part;
            scratch[1..1 + step].copy_from_slice(&remaining[..step]);
            self.insert_bytes(tag, &scratch[..1 + step]);
            remaining = &remaining[step..];

            if remaining.is_empty() {
                break;
            }
            part = match part.checked_add(1) {
                Some(part) => part,
                // 256 parts written, value cannot be represented further
                None => break,
            };
        }
    }

    /// First entry with `tag`, if any.
    pub fn find(&self, tag: u8) -> Option<&[u8]> {
        self.iter().find(|(t, _)| *t == tag).map(|(_, v)| v)
    }

    pub fn find_int(&self, tag: u8) -> Option<i32> {
        let v = self.find(tag)?;
        Some(i32::from_le_bytes(v.try_into().ok()?))
    }

    pub fn find_str(&self, tag: u8) -> Option<&str> {
        std::str::from_utf8(self.find(tag)?).ok()
    }

    /// Reassemble a multi-part value written by
    /// [`insert_multi_part`][Self::insert_multi_part].
    ///
    /// Parts arrive in stream order; the index byte guards against a peer
    /// reordering or dropping parts, in which case the value is rejected.
    pub fn read_multi_part(&self, tag: u8) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        let mut expect = 0u8;
        let mut found = false;

        for (t, v) in self.iter() {
            if t != tag {
                continue;
            }
            let (&part, data) = v.split_first()?;
            if part != expect {
                return None;
            }
            out.extend_from_slice(data);
            expect = expect.wrapping_add(1);
            found = true;
        }

        found.then_some(out)
    }

    pub fn iter(&self) -> Params<'_> {
        Params { rest: &self.buf }
    }
}

impl std::fmt::Debug for ParamBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(t, v)| (t, v.len())))
            .finish()
    }
}

/// Iterator over `(tag, value)` entries of a [`ParamBuf`].
///
/// A truncated trailing entry terminates iteration; the block is untrusted
/// input and a short entry is treated as end of data.
pub struct Params<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Params<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.len() < 2 {
            return None;
        }
        let tag = self.rest[0];
        let len = self.rest[1] as usize;
        if self.rest.len() < 2 + len {
            return None;
        }
        let value = &self.rest[2..2 + len];
        self.rest = &self.rest[2 + len..];
        Some((tag, value))
    }
}
