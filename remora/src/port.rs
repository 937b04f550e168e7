//! The connection (port) state machine.
//!
//! A [`Port`] owns one transport endpoint and everything layered on it:
//! the negotiated protocol version, the inbound fragment queue and packet
//! decoder, the optional compression filter, the optional wire-crypt
//! plugin, and the tree of auxiliary child ports spawned for blob and
//! batch streaming.
//!
//! Outbound packets flow codec → compression → encryption → transport;
//! inbound bytes flow the opposite way. The negotiation packets of the
//! crypt handshake are the single exception that bypasses encryption.
use std::{
    io,
    pin::Pin,
    sync::{
        Arc, Mutex, MutexGuard, Weak,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll, Waker},
};

use bytes::{Buf, BytesMut};
use tokio::io::ReadBuf;

use crate::{
    Error, Result,
    common::PortId,
    compress::WireZip,
    config::{Config, Timeouts, WireCrypt},
    crypt::{CryptError, CryptKey, KnownServerKey, WireCryptPlugin, parse_known_keys,
        write_known_keys},
    proto::{
        ARCH_GENERIC, P_FLAG_COMPRESS, P_TYPE_BATCH_SEND, PROTOCOL_CURRENT, PROTOCOL_OLDEST,
        PROTOCOL_VERSION_13, PacketDecoder, ProtocolError, RecvQueue,
        packet::{Accept, Connect, Packet, ProtocolOffer},
        params::{ParamBuf, tags},
    },
    status::AttachmentShutdown,
    transport::Transport,
};

pub mod cleanup;
mod negotiate;
mod response;

/// Lifecycle of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    /// Transport exists, nothing negotiated yet.
    Connecting,
    /// Protocol version (and possibly crypt) being settled.
    Negotiating,
    Active,
    /// A shutdown condition was seen; new operations short-circuit.
    Degrading,
    /// Transport gone, resources released.
    Closed,
}

/// Byte counters, logical (before/after the filters) and wire (on the
/// transport) per direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficCounters {
    pub logical_sent: u64,
    pub wire_sent: u64,
    pub logical_received: u64,
    pub wire_received: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Shared liveness handle of a port.
///
/// The handle outlives the `Port` borrow rules: the cleanup registry and a
/// parent port hold it to force a port closed from outside its owning
/// task. Force-close flips the closed flag, wakes a receive blocked on the
/// transport, and recurses into children. The child list lock is held only
/// for list mutation, never across I/O.
#[derive(Debug)]
pub struct PortLife {
    id: PortId,
    closed: AtomicBool,
    waker: Mutex<Option<Waker>>,
    children: Mutex<Vec<Arc<PortLife>>>,
    parent: Mutex<Weak<PortLife>>,
}

impl PortLife {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            id: PortId::next(),
            closed: AtomicBool::new(false),
            waker: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            parent: Mutex::new(Weak::new()),
        })
    }

    pub fn id(&self) -> &PortId {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the port closed and wake any blocked receive so it fails
    /// rather than hangs. Children close recursively.
    pub fn force_close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!("port {}: force close", self.id);
        if let Some(waker) = lock(&self.waker).take() {
            waker.wake();
        }
        let children = lock(&self.children).clone();
        for child in children {
            child.force_close();
        }
    }

    fn register_waker(&self, cx: &Context<'_>) {
        *lock(&self.waker) = Some(cx.waker().clone());
    }

    fn link_child(self: &Arc<Self>, child: &Arc<PortLife>) {
        *lock(&child.parent) = Arc::downgrade(self);
        lock(&self.children).push(child.clone());
    }

    fn unlink(self: &Arc<Self>) {
        let Some(parent) = lock(&self.parent).upgrade() else {
            return;
        };
        lock(&parent.children).retain(|c| !Arc::ptr_eq(c, self));
        *lock(&self.parent) = Weak::new();
    }
}

fn closed_err() -> Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "port closed").into()
}

/// One multiplexed connection endpoint.
pub struct Port<T> {
    transport: T,
    state: PortState,
    version: u16,
    symmetric: bool,
    buf_size: usize,
    config: Config,
    timeouts: Timeouts,

    queue: RecvQueue,
    decoder: PacketDecoder,
    read_buf: Box<[u8]>,
    wire_out: BytesMut,

    zip: Option<WireZip>,
    /// Compressed bytes buffered without a sync flush yet.
    zip_dirty: bool,
    crypt_plugin: Option<Box<dyn WireCryptPlugin>>,
    crypt_complete: bool,
    known_server_keys: Vec<KnownServerKey>,
    pending_keys: Vec<CryptKey>,

    shutdown_seen: bool,
    counters: TrafficCounters,
    life: Arc<PortLife>,
    address: String,
}

impl<T> std::fmt::Debug for Port<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("id", self.life.id())
            .field("state", &self.state)
            .field("version", &self.version)
            .field("crypt", &self.crypt_complete)
            .field("compressed", &self.zip.is_some())
            .finish()
    }
}

impl<T: Transport> Port<T> {
    fn new(transport: T, config: Config) -> Self {
        let buf_size = config.buffer_size;
        let timeouts = config.resolve_timeouts(None);
        Self {
            transport,
            state: PortState::Connecting,
            version: 0,
            symmetric: false,
            buf_size,
            config,
            timeouts,
            queue: RecvQueue::new(),
            decoder: PacketDecoder::new(),
            read_buf: vec![0u8; buf_size].into_boxed_slice(),
            wire_out: BytesMut::new(),
            zip: None,
            zip_dirty: false,
            crypt_plugin: None,
            crypt_complete: false,
            known_server_keys: Vec::new(),
            pending_keys: Vec::new(),
            shutdown_seen: false,
            counters: TrafficCounters::default(),
            life: PortLife::new(),
            address: String::new(),
        }
    }

    /// Establish the client side of a connection: offer every protocol
    /// version this engine speaks, wait for the server's pick, and settle
    /// compression.
    pub async fn connect(transport: T, config: Config) -> Result<Self> {
        let mut port = Self::new(transport, config);

        let mut user_id = ParamBuf::new();
        user_id.insert_int(tags::CLIENT_CRYPT, port.config.wire_crypt.as_int());
        if !port.config.crypt_plugins.is_empty() {
            user_id.insert_str(tags::PLUGIN_LIST, &port.config.crypt_plugins.join(" "));
        }

        let type_flags = if port.config.compression { P_FLAG_COMPRESS } else { 0 };
        let offers = (PROTOCOL_OLDEST..=PROTOCOL_CURRENT)
            .rev()
            .map(|v| {
                let mut offer = ProtocolOffer::new(v, v.into());
                offer.max_type |= type_flags;
                offer
            })
            .collect();

        let connect = Connect {
            client_arch: ARCH_GENERIC,
            database: String::new(),
            user_id,
            offers,
        };
        port.send(&connect.into()).await?;
        port.state = PortState::Negotiating;

        let accept = match port.receive().await? {
            Packet::Accept(accept) => accept,
            Packet::Reject => return Err(closed_err().context("connection rejected")),
            other => {
                return Err(ProtocolError::UnexpectedOperation {
                    expected: "Accept",
                    got: other.op().name(),
                }
                .into());
            }
        };

        let version = accept.version as u16;
        if !(PROTOCOL_OLDEST..=PROTOCOL_CURRENT).contains(&version) {
            return Err(ProtocolError::UnsupportedVersion(version).into());
        }
        port.version = version;
        port.symmetric = accept.architecture != ARCH_GENERIC;
        port.known_server_keys.extend(parse_known_keys(&accept.keys));
        if accept.accept_type & P_FLAG_COMPRESS != 0 {
            port.init_compression();
        }

        port.state = PortState::Active;
        log::debug!(
            "port {}: connected, protocol {}, compression {}",
            port.life.id(),
            port.version,
            port.zip.is_some(),
        );
        Ok(port)
    }

    /// Establish the server side of a connection: read the client's
    /// offers, pick the newest protocol both sides speak, advertise the
    /// wire-crypt keys this server can serve, and settle compression.
    pub async fn accept(
        transport: T,
        config: Config,
        server_keys: &[KnownServerKey],
    ) -> Result<Self> {
        let mut port = Self::new(transport, config);
        port.state = PortState::Negotiating;

        let connect = match port.receive().await? {
            Packet::Connect(connect) => connect,
            other => {
                return Err(ProtocolError::UnexpectedOperation {
                    expected: "Connect",
                    got: other.op().name(),
                }
                .into());
            }
        };

        let client_crypt = connect
            .user_id
            .find_int(tags::CLIENT_CRYPT)
            .map(WireCrypt::from_int)
            .unwrap_or_default();
        if port.config.wire_crypt.resolve(client_crypt) == crate::config::WireCryptResolution::Broken {
            port.send(&Packet::Reject).await?;
            return Err(CryptError::Incompatible.into());
        }

        let best = connect
            .offers
            .iter()
            .filter(|o| (PROTOCOL_OLDEST..=PROTOCOL_CURRENT).contains(&(o.version as u16)))
            .max_by_key(|o| (o.version, o.weight))
            .copied();
        let Some(best) = best else {
            let highest = connect.offers.iter().map(|o| o.version).max().unwrap_or(0);
            port.send(&Packet::Reject).await?;
            return Err(ProtocolError::UnsupportedVersion(highest as u16).into());
        };

        port.version = best.version as u16;
        port.symmetric = connect.client_arch != ARCH_GENERIC;
        let compress = port.config.compression
            && port.version >= PROTOCOL_VERSION_13
            && best.max_type & P_FLAG_COMPRESS != 0;

        // remembered for the crypt exchange: specific data handed to the
        // plugin must match what was advertised
        port.known_server_keys = server_keys.to_vec();

        let mut keys = ParamBuf::new();
        write_known_keys(server_keys, &mut keys);
        let accept = Accept {
            version: best.version,
            architecture: ARCH_GENERIC,
            accept_type: P_TYPE_BATCH_SEND | if compress { P_FLAG_COMPRESS } else { 0 },
            keys,
        };
        port.send(&accept.into()).await?;

        if compress {
            port.init_compression();
        }
        port.state = PortState::Active;
        log::debug!(
            "port {}: accepted, protocol {}, compression {}",
            port.life.id(),
            port.version,
            port.zip.is_some(),
        );
        Ok(port)
    }

    fn init_compression(&mut self) {
        if self.version >= PROTOCOL_VERSION_13 && self.zip.is_none() {
            self.zip = Some(WireZip::new(self.buf_size));
        }
    }

    /// Transport, protocol and compression faults abort the current
    /// operation and leave the port unusable.
    fn fail(&mut self, error: Error) -> Error {
        if error.is_fatal() {
            log::warn!("port {}: fatal, {error}", self.life.id());
            self.state = PortState::Closed;
        }
        error
    }

    fn ensure_sendable(&self, packet: &Packet) -> Result<()> {
        if self.state == PortState::Closed || self.life.is_closed() {
            return Err(closed_err());
        }
        if self.shutdown_seen && !matches!(packet, Packet::Disconnect) {
            return Err(AttachmentShutdown.into());
        }
        Ok(())
    }

    /// Stage a packet without flushing, for pipelined sends. The caller
    /// must [`flush`][Self::flush] before expecting the peer to see it.
    pub fn send_buffered(&mut self, packet: &Packet) -> Result<()> {
        self.ensure_sendable(packet)?;
        self.stage(packet, false).map_err(|e| self.fail(e))
    }

    /// Send a packet and flush it all the way to the transport.
    pub async fn send(&mut self, packet: &Packet) -> Result<()> {
        self.ensure_sendable(packet)?;
        self.stage(packet, true).map_err(|e| self.fail(e))?;
        self.flush().await
    }

    /// Encode and run the packet through the filter chain into the wire
    /// buffer. `flush` marks the end of a logical send: the compressor is
    /// sync-flushed so the peer can decode without waiting for more.
    fn stage(&mut self, packet: &Packet, flush: bool) -> Result<()> {
        let mut plain = BytesMut::new();
        packet.encode(&mut plain);
        self.counters.logical_sent += plain.len() as u64;

        let staged = match &mut self.zip {
            Some(zip) => {
                let mut compressed = BytesMut::new();
                zip.compress_into(&plain, flush, &mut compressed)?;
                self.zip_dirty = !flush;
                compressed
            }
            None => plain,
        };
        self.wire_staged(staged)
    }

    fn wire_staged(&mut self, mut staged: BytesMut) -> Result<()> {
        if self.crypt_complete {
            if let Some(plugin) = &mut self.crypt_plugin {
                plugin.encrypt(&mut staged)?;
            }
        }
        self.wire_out.extend_from_slice(&staged);
        Ok(())
    }

    /// Poll to drain the wire buffer into the transport.
    ///
    /// Buffered sends left the compressor without a sync point; one is
    /// forced here so the peer can decode everything flushed.
    pub fn poll_flush(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        if self.zip_dirty {
            let mut compressed = BytesMut::new();
            let flushed = match &mut self.zip {
                Some(zip) => zip.compress_into(&[], true, &mut compressed),
                None => Ok(()),
            };
            if let Err(e) = flushed {
                return Poll::Ready(Err(self.fail(e.into())));
            }
            self.zip_dirty = false;
            if let Err(e) = self.wire_staged(compressed) {
                return Poll::Ready(Err(self.fail(e)));
            }
        }
        while !self.wire_out.is_empty() {
            if self.life.is_closed() {
                return Poll::Ready(Err(closed_err()));
            }
            let n = match self.transport.poll_write(cx, &self.wire_out) {
                Poll::Ready(Ok(n)) => n,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(self.fail(e.into()))),
                Poll::Pending => return Poll::Pending,
            };
            if n == 0 {
                let e = io::Error::from(io::ErrorKind::WriteZero);
                return Poll::Ready(Err(self.fail(e.into())));
            }
            self.wire_out.advance(n);
            self.counters.wire_sent += n as u64;
        }
        match self.transport.poll_flush(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(())),
            Poll::Ready(Err(e)) => Poll::Ready(Err(self.fail(e.into()))),
            Poll::Pending => Poll::Pending,
        }
    }

    /// Flush staged packets to the transport.
    pub fn flush(&mut self) -> impl Future<Output = Result<()>> {
        std::future::poll_fn(|cx| self.poll_flush(cx))
    }

    /// Poll to receive one packet.
    ///
    /// Drives the inbound chain: transport bytes are decrypted, inflated,
    /// queued as fragments and decoded incrementally. A force-close from
    /// another task wakes this poll and fails it rather than leaving it
    /// blocked.
    pub fn poll_receive(&mut self, cx: &mut Context<'_>) -> Poll<Result<Packet>> {
        loop {
            if self.life.is_closed() || self.state == PortState::Closed {
                return Poll::Ready(Err(closed_err()));
            }

            match self.decoder.decode(&mut self.queue) {
                Ok(Some(packet)) => return Poll::Ready(Ok(packet)),
                Ok(None) => {}
                Err(e) => return Poll::Ready(Err(self.fail(e.into()))),
            }

            // compressed input may already be buffered, skip the transport
            match self.drain_zip() {
                Ok(0) => {}
                Ok(_) => continue,
                Err(e) => return Poll::Ready(Err(self.fail(e))),
            }

            self.life.register_waker(cx);
            let n = {
                let mut buf = ReadBuf::new(&mut self.read_buf);
                match self.transport.poll_read(cx, &mut buf) {
                    Poll::Ready(Ok(())) => buf.filled().len(),
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(self.fail(e.into()))),
                    Poll::Pending => return Poll::Pending,
                }
            };
            if n == 0 {
                let e = io::Error::from(io::ErrorKind::UnexpectedEof);
                return Poll::Ready(Err(self.fail(e.into())));
            }
            self.counters.wire_received += n as u64;

            let mut data = BytesMut::from(&self.read_buf[..n]);
            if self.crypt_complete {
                if let Some(plugin) = &mut self.crypt_plugin {
                    if let Err(e) = plugin.decrypt(&mut data) {
                        return Poll::Ready(Err(self.fail(e.into())));
                    }
                }
            }

            match &mut self.zip {
                Some(zip) => {
                    zip.feed(&data);
                    if let Err(e) = self.drain_zip() {
                        return Poll::Ready(Err(self.fail(e)));
                    }
                }
                None => {
                    self.counters.logical_received += n as u64;
                    self.queue.push(data.freeze());
                }
            }
        }
    }

    /// Inflate whatever compressed input is buffered into the fragment
    /// queue, returning the plaintext byte count produced.
    fn drain_zip(&mut self) -> Result<usize> {
        let Some(zip) = &mut self.zip else {
            return Ok(0);
        };
        let mut total = 0;
        loop {
            let mut out = BytesMut::zeroed(self.buf_size);
            let n = zip.decompress(&mut out)?;
            if n == 0 {
                break;
            }
            out.truncate(n);
            self.queue.push(out.freeze());
            total += n;
        }
        self.counters.logical_received += total as u64;
        Ok(total)
    }

    /// Receive one packet; resolves once a whole packet is decoded.
    pub fn receive(&mut self) -> Receive<'_, T> {
        Receive { port: self }
    }

    /// Spawn an auxiliary child port for blob or batch streaming over its
    /// own transport. The child shares the parent's protocol version,
    /// architecture and configuration, and is force-closed with it.
    pub fn spawn_aux<U: Transport>(&mut self, transport: U) -> Port<U> {
        let mut child = Port::new(transport, self.config.clone());
        child.version = self.version;
        child.symmetric = self.symmetric;
        child.buf_size = self.buf_size;
        child.state = PortState::Active;
        self.life.link_child(&child.life);
        log::debug!("port {}: spawned aux {}", self.life.id(), child.life.id());
        child
    }

    /// The auxiliary channel this port promised will never be established;
    /// tell the peer so it does not wait indefinitely. Only the current
    /// protocol understands the packet, and the error return is ignored
    /// because an auxiliary failure is already being processed.
    pub async fn abort_aux_connection(&mut self) {
        if self.version >= PROTOCOL_VERSION_13 {
            let _ = self.send(&Packet::AbortAux).await;
        }
    }

    /// Orderly teardown: a best-effort goodbye packet, transport shutdown,
    /// filter and plugin release, unlink from the parent and force-close
    /// of every auxiliary child.
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.state == PortState::Closed {
            return Ok(());
        }
        if matches!(self.state, PortState::Active | PortState::Degrading) && !self.life.is_closed()
        {
            // goodbye is best effort, the transport may already be gone
            let _ = self.send(&Packet::Disconnect).await;
        }
        let _ = std::future::poll_fn(|cx| self.transport.poll_shutdown(cx)).await;
        self.close_resources();
        Ok(())
    }

    fn close_resources(&mut self) {
        self.state = PortState::Closed;
        self.crypt_plugin = None;
        self.crypt_complete = false;
        self.zip = None;
        self.life.unlink();
        self.life.force_close();
    }

    /// Timeout values external callers arm their timers from.
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Re-resolve timeouts from a caller-supplied parameter block, e.g.
    /// the attach parameters.
    pub fn set_timeout_params(&mut self, params: &ParamBuf) {
        self.timeouts = self.config.resolve_timeouts(Some(params));
    }

    pub fn state(&self) -> PortState {
        self.state
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    /// Same-architecture connection: rows travel in memory layout rather
    /// than external representation.
    pub fn is_symmetric(&self) -> bool {
        self.symmetric
    }

    pub fn buffer_size(&self) -> usize {
        self.buf_size
    }

    pub fn counters(&self) -> TrafficCounters {
        self.counters
    }

    pub fn crypt_complete(&self) -> bool {
        self.crypt_complete
    }

    /// Keys the server advertised during connection establishment.
    pub fn known_server_keys(&self) -> &[KnownServerKey] {
        &self.known_server_keys
    }

    /// Keys offered by the auth phase that matched no advertised key type
    /// yet; candidates for a retry once more key types are harvested.
    pub fn pending_keys(&self) -> &[CryptKey] {
        &self.pending_keys
    }

    /// Liveness handle for the cleanup registry and out-of-task closing.
    pub fn life(&self) -> Arc<PortLife> {
        self.life.clone()
    }

    /// Peer address for diagnostics, set by whoever created the transport.
    pub fn set_address(&mut self, address: impl Into<String>) {
        self.address = address.into();
    }

    /// Printable identity of the remote end: protocol id plus address.
    pub fn remote_id(&self) -> String {
        let mut id = format!("P{}", self.version);
        if !self.address.is_empty() {
            id.push('/');
            id.push_str(&self.address);
        }
        id
    }

    /// Version string suffixed with the active wire features: `C` for
    /// encryption, `Z` for compression.
    pub fn version_info(&self, engine: &str) -> String {
        let mut version = format!("{engine}/P{}", self.version);
        if self.crypt_plugin.is_some() || self.zip.is_some() {
            version.push(':');
        }
        if self.crypt_plugin.is_some() {
            version.push('C');
        }
        if self.zip.is_some() {
            version.push('Z');
        }
        version
    }
}

impl<T> Drop for Port<T> {
    fn drop(&mut self) {
        self.life.unlink();
        self.life.force_close();
    }
}

pin_project_lite::pin_project! {
    /// Future of one inbound packet.
    #[must_use = "futures do nothing unless you `.await` or poll them"]
    #[project = ReceiveProject]
    pub struct Receive<'p, T> {
        port: &'p mut Port<T>,
    }
}

impl<T: Transport> Future for Receive<'_, T> {
    type Output = Result<Packet>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let ReceiveProject { port } = self.as_mut().project();
        port.poll_receive(cx)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;
    use crate::proto::packet::{Detach, PutSegment};

    fn pair(config: Config) -> (
        impl Future<Output = Result<Port<tokio::io::DuplexStream>>>,
        impl Future<Output = Result<Port<tokio::io::DuplexStream>>>,
    ) {
        let (client_io, server_io) = tokio::io::duplex(1 << 16);
        let server_cfg = config.clone();
        (
            Port::connect(client_io, config),
            Port::accept(server_io, server_cfg, &[]),
        )
    }

    #[tokio::test]
    async fn handshake_settles_newest_protocol() {
        let (client, server) = pair(Config::default());
        let (client, server) = tokio::try_join!(client, server).unwrap();

        assert_eq!(client.version(), PROTOCOL_CURRENT);
        assert_eq!(server.version(), PROTOCOL_CURRENT);
        assert_eq!(client.state(), PortState::Active);
        assert!(!client.crypt_complete());
    }

    #[tokio::test]
    async fn packets_cross_the_wire() {
        let (client, server) = pair(Config::default());
        let (mut client, mut server) = tokio::try_join!(client, server).unwrap();

        let packet: Packet = PutSegment {
            blob: 7,
            segment: Bytes::from(vec![0x5a; 10_000]),
        }
        .into();
        client.send(&packet).await.unwrap();
        assert_eq!(server.receive().await.unwrap(), packet);

        server.send(&Packet::Dummy).await.unwrap();
        assert_eq!(client.receive().await.unwrap(), Packet::Dummy);
    }

    #[tokio::test]
    async fn compression_negotiated_and_transparent() {
        let config = Config { compression: true, ..Config::default() };
        let (client, server) = pair(config);
        let (mut client, mut server) = tokio::try_join!(client, server).unwrap();

        let packet: Packet = PutSegment {
            blob: 1,
            segment: Bytes::from(vec![b'z'; 50_000]),
        }
        .into();
        client.send(&packet).await.unwrap();
        assert_eq!(server.receive().await.unwrap(), packet);

        // a highly repetitive payload must shrink on the wire
        let c = client.counters();
        assert!(c.wire_sent < c.logical_sent, "{c:?}");
        let s = server.counters();
        assert!(s.wire_received < s.logical_received, "{s:?}");
    }

    #[tokio::test]
    async fn pipelined_sends_flush_together() {
        let (client, server) = pair(Config::default());
        let (mut client, mut server) = tokio::try_join!(client, server).unwrap();

        client.send_buffered(&Packet::Dummy).unwrap();
        client.send_buffered(&Detach { object: 4 }.into()).unwrap();
        client.flush().await.unwrap();

        assert_eq!(server.receive().await.unwrap(), Packet::Dummy);
        assert_eq!(server.receive().await.unwrap(), Detach { object: 4 }.into());
    }

    #[tokio::test]
    async fn force_close_fails_blocked_receive() {
        let (client, server) = pair(Config::default());
        let (mut client, _server) = tokio::try_join!(client, server).unwrap();

        let life = client.life();
        let blocked = tokio::spawn(async move { client.receive().await.map(|_| ()) });
        tokio::task::yield_now().await;

        life.force_close();
        let result = tokio::time::timeout(std::time::Duration::from_secs(1), blocked)
            .await
            .expect("blocked receive must fail, not hang")
            .unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn aux_child_inherits_and_closes_with_parent() {
        let (client, server) = pair(Config::default());
        let (mut client, _server) = tokio::try_join!(client, server).unwrap();

        let (aux_io, _aux_peer) = tokio::io::duplex(4096);
        let aux = client.spawn_aux(aux_io);
        assert_eq!(aux.version(), client.version());
        assert_eq!(aux.state(), PortState::Active);

        let aux_life = aux.life();
        client.life().force_close();
        assert!(aux_life.is_closed());
    }

    #[tokio::test]
    async fn unlink_detaches_child_from_parent() {
        let (client, server) = pair(Config::default());
        let (mut client, _server) = tokio::try_join!(client, server).unwrap();

        let (aux_io, _aux_peer) = tokio::io::duplex(4096);
        let aux = client.spawn_aux(aux_io);
        let aux_life = aux.life();
        drop(aux); // drop unlinks and closes the child only

        assert!(aux_life.is_closed());
        assert!(!client.life().is_closed());
    }

    #[tokio::test]
    async fn shutdown_seen_short_circuits_sends() {
        let (client, server) = pair(Config::default());
        let (mut client, _server) = tokio::try_join!(client, server).unwrap();

        client.shutdown_seen = true;
        client.state = PortState::Degrading;
        let err = client.send(&Packet::Dummy).await.unwrap_err();
        assert!(matches!(err.kind(), crate::ErrorKind::Shutdown(_)));

        // teardown is still allowed
        client.send(&Packet::Disconnect).await.unwrap();
    }

    #[tokio::test]
    async fn version_info_reflects_wire_features() {
        let config = Config { compression: true, ..Config::default() };
        let (client, server) = pair(config);
        let (client, _server) = tokio::try_join!(client, server).unwrap();

        assert_eq!(client.version_info("RM-1.0"), "RM-1.0/P13:Z");

        let mut id_port = client;
        id_port.set_address("10.0.0.5:3050");
        assert_eq!(id_port.remote_id(), "P13/10.0.0.5:3050");
    }
}
