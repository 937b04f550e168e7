//! Blob bookkeeping and the blob info cache.
use bytes::{Buf, BufMut, BytesMut};

/// Info item codes answerable from the client-side blob cache.
pub mod info {
    /// Terminates an item list and an answer stream.
    pub const END: u8 = 1;
    /// The answer buffer was too small; written instead of further items.
    pub const TRUNCATED: u8 = 2;
    pub const BLOB_NUM_SEGMENTS: u8 = 4;
    pub const BLOB_MAX_SEGMENT: u8 = 5;
    pub const BLOB_TOTAL_LENGTH: u8 = 6;
    pub const BLOB_TYPE: u8 = 7;
}

/// Write one integer info item: code, 2 byte little-endian length, value.
pub(crate) fn put_info_int(buf: &mut BytesMut, item: u8, value: u32) {
    buf.put_u8(item);
    buf.put_u16_le(4);
    buf.put_u32_le(value);
}

/// Server-reported blob shape, cached so repeated info requests avoid a
/// round trip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlobInfo {
    valid: bool,
    pub num_segments: u32,
    pub max_segment: u32,
    pub total_length: u32,
    pub blob_type: u32,
}

impl BlobInfo {
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Parse a server info answer stream into the cache. The cache turns
    /// valid only when all four known items were present.
    pub fn parse_info(&mut self, mut data: &[u8]) {
        let mut seen = 0;
        self.valid = false;

        while !data.is_empty() {
            // the end marker may stand alone, without a length
            if data[0] == info::END {
                break;
            }
            if data.len() < 3 {
                return;
            }
            let item = data.get_u8();
            let len = data.get_u16_le() as usize;
            if data.len() < len {
                return;
            }
            let mut value = &data[..len];
            data = &data[len..];
            if len != 4 {
                continue;
            }
            let value = value.get_u32_le();
            match item {
                info::BLOB_NUM_SEGMENTS => self.num_segments = value,
                info::BLOB_MAX_SEGMENT => self.max_segment = value,
                info::BLOB_TOTAL_LENGTH => self.total_length = value,
                info::BLOB_TYPE => self.blob_type = value,
                _ => continue,
            }
            seen += 1;
        }

        self.valid = seen == 4;
    }

    /// Answer an info request from the cache into `buffer`, up to
    /// `buffer_length` bytes. Returns `false` when the cache is invalid or
    /// an unknown item is requested, in which case the caller defers to
    /// the remote server.
    pub fn local_info(&self, items: &[u8], buffer_length: usize, buffer: &mut BytesMut) -> bool {
        if !self.valid {
            return false;
        }

        buffer.clear();
        for &item in items {
            if item == info::END {
                break;
            }
            let value = match item {
                info::BLOB_NUM_SEGMENTS => self.num_segments,
                info::BLOB_MAX_SEGMENT => self.max_segment,
                info::BLOB_TOTAL_LENGTH => self.total_length,
                info::BLOB_TYPE => self.blob_type,
                // unknown item, let the remote server handle it
                _ => return false,
            };
            if buffer.len() + 7 + 1 > buffer_length {
                buffer.put_u8(info::TRUNCATED);
                return true;
            }
            put_info_int(buffer, item, value);
        }

        buffer.put_u8(info::END);
        true
    }
}

/// One open or created blob under a transaction.
#[derive(Debug, Default)]
pub struct Blob {
    /// Blob id within the owning transaction.
    pub blob_id: u64,
    /// Remote object handle addressing segment operations.
    pub object: u32,
    pub transaction: u32,
    /// Buffered segment bytes.
    pub segment: BytesMut,
    /// Every segment was consumed.
    pub eof: bool,
    /// Created locally rather than opened from an existing id.
    pub created: bool,
    pub info: BlobInfo,
}

impl Blob {
    pub fn open(object: u32, transaction: u32, blob_id: u64) -> Self {
        Self { object, transaction, blob_id, ..Default::default() }
    }

    pub fn create(object: u32, transaction: u32) -> Self {
        Self { object, transaction, created: true, ..Default::default() }
    }
}
