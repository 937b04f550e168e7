//! Streaming wire compression.
//!
//! An optional deflate filter between the packet codec and the raw
//! transport, one independent stateful direction each way. The send side
//! forces a sync flush at the end of every logical send so the peer can
//! decode already-sent bytes without waiting for more; the receive side
//! inflates raw transport bytes on demand and distinguishes "no data yet"
//! (poll the transport) from "more data already buffered" (skip the next
//! transport read).
//!
//! Any codec-level failure is fatal to the connection.
use bytes::{Buf, BytesMut};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

/// A compression fault, fatal to the port.
#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    #[error("deflate: {0}")]
    Deflate(String),
    #[error("inflate: {0}")]
    Inflate(String),
}

/// Both directions of the wire compression filter.
pub struct WireZip {
    deflate: Compress,
    inflate: Decompress,
    /// Raw compressed bytes received but not yet inflated.
    zin: BytesMut,
    /// Inflate filled the caller's buffer while `zin` still held input.
    pending: bool,
    buf_size: usize,
}

impl std::fmt::Debug for WireZip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireZip")
            .field("buffered", &self.zin.len())
            .field("pending", &self.pending)
            .finish()
    }
}

impl WireZip {
    /// `buf_size` is the transport buffer size; deflate output drains in
    /// chunks of this size.
    pub fn new(buf_size: usize) -> Self {
        Self {
            deflate: Compress::new(Compression::default(), true),
            inflate: Decompress::new(true),
            zin: BytesMut::with_capacity(buf_size),
            pending: false,
            buf_size,
        }
    }

    /// Whether inflatable input is already buffered, making the next
    /// transport read unnecessary.
    pub fn has_pending(&self) -> bool {
        self.pending
    }

    /// Hand raw transport bytes to the receive direction.
    pub fn feed(&mut self, raw: &[u8]) {
        self.zin.extend_from_slice(raw);
    }

    /// Inflate buffered input into `out`, returning the byte count
    /// produced. Zero means the decompressor drained its input without
    /// producing output: the caller must poll the transport, this is not
    /// end of stream.
    pub fn decompress(&mut self, out: &mut [u8]) -> Result<usize, CompressError> {
        let mut produced = 0;

        while produced < out.len() && !self.zin.is_empty() {
            let before_in = self.inflate.total_in();
            let before_out = self.inflate.total_out();

            let status = self
                .inflate
                .decompress(&self.zin, &mut out[produced..], FlushDecompress::None)
                .map_err(|e| CompressError::Inflate(e.to_string()))?;

            let consumed = (self.inflate.total_in() - before_in) as usize;
            let written = (self.inflate.total_out() - before_out) as usize;
            self.zin.advance(consumed);
            produced += written;

            match status {
                Status::Ok | Status::StreamEnd => {}
                Status::BufError => break,
            }
            if consumed == 0 && written == 0 {
                break;
            }
        }

        self.pending = produced > 0 && !self.zin.is_empty();
        Ok(produced)
    }

    /// Deflate `input`, appending compressed chunks to `out`. With `flush`
    /// the stream is sync-flushed even if the compressor's internal buffer
    /// is not full, so everything handed in so far becomes decodable on
    /// the peer.
    pub fn compress_into(
        &mut self,
        input: &[u8],
        flush: bool,
        out: &mut BytesMut,
    ) -> Result<(), CompressError> {
        let mut rest = input;
        let mut chunk = vec![0u8; self.buf_size];
        let flush = if flush { FlushCompress::Sync } else { FlushCompress::None };

        loop {
            let before_in = self.deflate.total_in();
            let before_out = self.deflate.total_out();

            // a buf-error status here only means "made no progress", which
            // the byte accounting below already detects
            self.deflate
                .compress(rest, &mut chunk, flush)
                .map_err(|e| CompressError::Deflate(e.to_string()))?;

            let consumed = (self.deflate.total_in() - before_in) as usize;
            let written = (self.deflate.total_out() - before_out) as usize;
            rest = &rest[consumed..];
            out.extend_from_slice(&chunk[..written]);

            if consumed == 0 && written == 0 {
                break;
            }
        }

        debug_assert!(rest.is_empty());
        Ok(())
    }
}
