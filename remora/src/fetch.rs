//! Batched row fetch.
//!
//! Fetched rows return as a run of `FetchResponse` packets, one row each;
//! a zero row count ends the batch and a non-zero status ends the cursor.
//! The whole batch is awaited before the first row reaches the caller, so
//! the batch size balances latency against client memory: at least the
//! configured minimum, at most what the protocol and the client cache
//! budget allow.
use std::{
    pin::Pin,
    task::{Context, Poll, ready},
};

use bytes::Bytes;
use futures_core::Stream;

use crate::{
    Result,
    port::Port,
    proto::{PROTOCOL_VERSION_13, ProtocolError, packet::{Fetch, Packet}},
    request::RowFormat,
    statement::Statement,
    transport::Transport,
};

/// Rows a batch always asks for, even when one row exceeds the packet.
pub const MIN_ROWS_PER_BATCH: u32 = 10;
/// Batch cap for the current protocol.
pub const MAX_ROWS_PER_BATCH: u32 = 20;
/// Packets one batch may span under older protocols.
pub const MAX_PACKETS_PER_BATCH: u32 = 4;
/// Client-side cache budget a batch must fit.
pub const MAX_BATCH_CACHE_SIZE: u32 = 1024 * 1024;

/// Wire overhead of one `FetchResponse` ahead of the row data: operation,
/// status, count and the row length prefix.
const FETCH_RESPONSE_OVERHEAD: u32 = 16;

fn round4(n: u32) -> u32 {
    (n + 3) & !3
}

/// Guess the optimal number of rows per fetch batch.
///
/// The per-row wire size picks the architecture-appropriate length first
/// (a symmetric connection ships rows in memory layout, otherwise the
/// external representation length applies), rounded up to the alignment
/// boundary, plus the per-row packet overhead. The current protocol caps
/// the count outright; older protocols fit the batch into a fixed number
/// of transport buffers, minus what the current packet already used. The
/// count never exceeds the cache budget and never drops below the
/// configured minimum.
pub fn compute_batch_size(
    version: u16,
    buf_size: usize,
    symmetric: bool,
    buffer_used: usize,
    format: &RowFormat,
) -> u16 {
    let data_len = if symmetric {
        round4(format.length)
    } else {
        round4(format.net_length)
    };
    let row_size = FETCH_RESPONSE_OVERHEAD + data_len;

    let mut count = if version >= PROTOCOL_VERSION_13 {
        MAX_ROWS_PER_BATCH
    } else {
        let budget = (MAX_PACKETS_PER_BATCH * buf_size as u32).saturating_sub(buffer_used as u32);
        budget / row_size
    };

    // don't ask for more rows than we can cache
    count = count.min(MAX_BATCH_CACHE_SIZE / format.length.max(1));

    // must always ask for some rows, even if a row outgrows the packet
    count = count.max(MIN_ROWS_PER_BATCH);

    count.min(u16::MAX as u32) as u16
}

/// Ask the server for the next batch of rows on an open cursor and bump
/// the statement's pipelining counters. Returns the row count requested.
pub async fn request_batch<T: Transport>(
    port: &mut Port<T>,
    statement: &mut Statement,
    format: &RowFormat,
    buffer_used: usize,
) -> Result<u16> {
    let count = compute_batch_size(
        port.version(),
        port.buffer_size(),
        port.is_symmetric(),
        buffer_used,
        format,
    );

    let fetch: Packet = Fetch {
        statement: statement.id,
        message_length: format.net_length,
        count: count.into(),
    }
    .into();
    port.send(&fetch).await?;

    statement.rows_pending += u32::from(count);
    statement.batch_count += 1;
    Ok(count)
}

/// Stream of rows from one fetch batch.
///
/// Yields row payloads until the batch ends; [`end_of_cursor`][Self::end_of_cursor]
/// tells whether the cursor itself is exhausted.
#[must_use = "streams do nothing unless polled"]
pub struct FetchStream<'a, T: Transport> {
    port: &'a mut Port<T>,
    statement: &'a mut Statement,
    done: bool,
    eof: bool,
}

impl<'a, T: Transport> FetchStream<'a, T> {
    pub fn new(port: &'a mut Port<T>, statement: &'a mut Statement) -> Self {
        Self { port, statement, done: false, eof: false }
    }

    /// The server reported end of cursor while this stream ran.
    pub fn end_of_cursor(&self) -> bool {
        self.eof
    }
}

impl<T: Transport> Stream for FetchStream<'_, T> {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let me = self.get_mut();
        if me.done {
            return Poll::Ready(None);
        }

        match ready!(me.port.poll_receive(cx)) {
            Ok(Packet::FetchResponse(fr)) => {
                if fr.status != 0 {
                    me.done = true;
                    me.eof = true;
                    me.statement.rows_pending = 0;
                    return Poll::Ready(None);
                }
                if fr.count == 0 {
                    me.done = true;
                    return Poll::Ready(None);
                }
                me.statement.rows_pending = me.statement.rows_pending.saturating_sub(1);
                me.statement.set_fetched(true);
                Poll::Ready(Some(Ok(fr.row)))
            }
            Ok(other) => {
                me.done = true;
                Poll::Ready(Some(Err(ProtocolError::UnexpectedOperation {
                    expected: "FetchResponse",
                    got: other.op().name(),
                }
                .into())))
            }
            Err(e) => {
                me.done = true;
                Poll::Ready(Some(Err(e)))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{config::Config, proto::packet::FetchResponse};

    fn fmt(length: u32, net_length: u32) -> RowFormat {
        RowFormat { length, net_length, count: 4 }
    }

    #[test]
    fn pre_13_batch_fits_packet_budget_and_cache() {
        let format = fmt(100, 100);
        let count = compute_batch_size(12, 4096, false, 0, &format) as u32;

        assert!(count >= MIN_ROWS_PER_BATCH);
        assert!(count * format.length <= MAX_BATCH_CACHE_SIZE);
        // four packets of 4096 at 116 bytes per row
        assert_eq!(count, (4 * 4096) / (FETCH_RESPONSE_OVERHEAD + 100));
    }

    #[test]
    fn buffer_used_shrinks_the_budget() {
        let format = fmt(100, 100);
        let fresh = compute_batch_size(12, 4096, false, 0, &format);
        let used = compute_batch_size(12, 4096, false, 2048, &format);
        assert!(used < fresh);
    }

    #[test]
    fn current_protocol_uses_fixed_cap() {
        let format = fmt(100, 100);
        assert_eq!(
            compute_batch_size(PROTOCOL_VERSION_13, 4096, false, 0, &format) as u32,
            MAX_ROWS_PER_BATCH,
        );
    }

    #[test]
    fn architecture_selects_the_row_length() {
        // wire representation much wider than the in-memory row
        let format = fmt(100, 3000);
        let wire = compute_batch_size(12, 4096, false, 0, &format) as u32;
        let native = compute_batch_size(12, 4096, true, 0, &format) as u32;

        assert_eq!(wire, MIN_ROWS_PER_BATCH.max((4 * 4096) / (16 + 3000)));
        assert_eq!(native, (4 * 4096) / (16 + 100));
        assert!(native > wire);
    }

    #[test]
    fn huge_rows_still_request_the_minimum() {
        let format = fmt(MAX_BATCH_CACHE_SIZE, MAX_BATCH_CACHE_SIZE);
        let count = compute_batch_size(PROTOCOL_VERSION_13, 4096, false, 0, &format) as u32;
        assert_eq!(count, MIN_ROWS_PER_BATCH);
    }

    async fn active_pair() -> (Port<tokio::io::DuplexStream>, Port<tokio::io::DuplexStream>) {
        let (client_io, server_io) = tokio::io::duplex(1 << 16);
        tokio::try_join!(
            Port::connect(client_io, Config::default()),
            Port::accept(server_io, Config::default(), &[]),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn request_batch_sends_fetch_and_tracks_pipeline() {
        let (mut client, mut server) = active_pair().await;
        let mut st = Statement::new(3);
        let format = fmt(100, 100);

        let count = request_batch(&mut client, &mut st, &format, 0).await.unwrap();
        assert_eq!(count as u32, MAX_ROWS_PER_BATCH);
        assert_eq!(st.rows_pending, count as u32);
        assert_eq!(st.batch_count, 1);

        match server.receive().await.unwrap() {
            Packet::Fetch(fetch) => {
                assert_eq!(fetch.statement, 3);
                assert_eq!(fetch.count, count as u32);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_stream_yields_rows_until_batch_end() {
        let (mut client, mut server) = active_pair().await;
        let mut st = Statement::new(3);
        st.rows_pending = 3;

        for i in 0..3u8 {
            let row: Packet = FetchResponse {
                status: 0,
                count: 1,
                row: Bytes::from(vec![i; 8]),
            }
            .into();
            server.send(&row).await.unwrap();
        }
        server
            .send(&FetchResponse { status: 0, count: 0, row: Bytes::new() }.into())
            .await
            .unwrap();

        let mut stream = FetchStream::new(&mut client, &mut st);
        let mut rows = Vec::new();
        while let Some(row) =
            std::future::poll_fn(|cx| Pin::new(&mut stream).poll_next(cx)).await
        {
            rows.push(row.unwrap());
        }

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2], Bytes::from(vec![2u8; 8]));
        assert!(!stream.end_of_cursor());
        assert_eq!(st.rows_pending, 0);
        assert!(st.is_fetched());
    }

    #[tokio::test]
    async fn end_of_cursor_reported() {
        let (mut client, mut server) = active_pair().await;
        let mut st = Statement::new(3);
        st.rows_pending = 5;

        server
            .send(&FetchResponse { status: 100, count: 0, row: Bytes::new() }.into())
            .await
            .unwrap();

        let mut stream = FetchStream::new(&mut client, &mut st);
        assert!(
            std::future::poll_fn(|cx| Pin::new(&mut stream).poll_next(cx))
                .await
                .is_none()
        );
        assert!(stream.end_of_cursor());
        assert_eq!(st.rows_pending, 0);
    }
}
