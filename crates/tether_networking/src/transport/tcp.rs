//! # TCP Transport
//!
//! A non-blocking reactor on its own thread, driving every peer socket from
//! a current-thread `tokio` runtime.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐  crossbeam (bounded)   ┌──────────────────────────┐
//! │  Tick thread  │ <───── events ──────── │  Reactor thread (tokio)  │
//! │  poll / send  │ ── OutboundQueue ────> │  accept / dial / session │
//! └───────────────┘  (per peer, bounded)   └──────────────────────────┘
//! ```
//!
//! Each session exchanges `Hello`, then runs a reader and a writer side by
//! side. The reader drops the session after `dead_peer_timeout` of silence;
//! the writer emits a heartbeat after `heartbeat_interval` of idleness.
//! Dialed peers are redialed with exponential backoff; accepted peers get a
//! fresh token per connection.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tether_core::{InstanceId, PeerToken};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use super::backoff::Backoff;
use super::queue::{OutboundQueue, PushOutcome};
use super::{SendOutcome, Transport, TransportConfig, TransportEvent, TransportStats};
use crate::error::{TransportError, TransportResult, WireError};
use crate::protocol::{encode_single, is_heartbeat_only, FrameAssembler, Hello, Op, OpReader};
use crate::{PROTOCOL_MAGIC, PROTOCOL_VERSION_MAJOR};

/// Socket read chunk size.
const READ_BUFFER_BYTES: usize = 8 * 1024;

/// Pause before retrying a full inbound event queue.
const EVENT_RETRY: Duration = Duration::from_millis(1);

/// Pause after a failed `accept`.
const ACCEPT_RETRY: Duration = Duration::from_millis(100);

/// Command to the reactor thread.
enum Command {
    /// Start dialing.
    Dial {
        token: PeerToken,
        addr: SocketAddr,
        cancel: watch::Receiver<bool>,
    },
    /// Stop everything.
    Shutdown,
}

/// How a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionEnd {
    /// Operator disconnect or shutdown.
    Cancelled,
    /// Handshake refused; do not retry.
    Rejected,
    /// Link failure; retry if dialed.
    Lost { established: bool },
}

/// State shared between the tick thread and the reactor.
struct Shared {
    config: TransportConfig,
    instance: InstanceId,
    events: Sender<TransportEvent>,
    sessions: Mutex<HashMap<PeerToken, Arc<OutboundQueue>>>,
    cancels: Mutex<HashMap<PeerToken, watch::Sender<bool>>>,
    next_token: AtomicU32,
}

impl Shared {
    fn allocate_token(&self) -> PeerToken {
        PeerToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    fn register_cancel(&self, token: PeerToken) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        self.cancels.lock().insert(token, tx);
        rx
    }

    fn cancel(&self, token: PeerToken) {
        if let Some(tx) = self.cancels.lock().remove(&token) {
            let _ = tx.send(true);
        }
        if let Some(queue) = self.sessions.lock().remove(&token) {
            queue.close();
        }
    }

    /// Hands an event to the tick thread, waiting while its queue is full.
    /// Returns false once the tick side is gone.
    async fn emit(&self, mut event: TransportEvent) -> bool {
        loop {
            match self.events.try_send(event) {
                Ok(()) => return true,
                Err(TrySendError::Full(returned)) => {
                    event = returned;
                    tokio::time::sleep(EVENT_RETRY).await;
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
    }
}

/// TCP implementation of [`Transport`].
pub struct TcpTransport {
    shared: Arc<Shared>,
    events: Receiver<TransportEvent>,
    commands: mpsc::UnboundedSender<Command>,
    local_addr: Option<SocketAddr>,
    reactor: Option<JoinHandle<()>>,
    stats: TransportStats,
}

impl TcpTransport {
    /// Binds the listener (if configured), starts the reactor thread and
    /// dials every configured peer.
    ///
    /// # Errors
    ///
    /// Fails if the listen address cannot be bound or the runtime cannot be
    /// built.
    pub fn start(config: TransportConfig, instance: InstanceId) -> TransportResult<Self> {
        let listener = match config.listen_addr {
            Some(addr) => {
                let listener = std::net::TcpListener::bind(addr)?;
                listener.set_nonblocking(true)?;
                Some(listener)
            }
            None => None,
        };
        let local_addr = listener
            .as_ref()
            .map(std::net::TcpListener::local_addr)
            .transpose()?;

        let (event_tx, event_rx) = bounded(config.inbound_queue_frames.max(1));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let peers = config.peers.clone();

        let shared = Arc::new(Shared {
            config,
            instance,
            events: event_tx,
            sessions: Mutex::new(HashMap::new()),
            cancels: Mutex::new(HashMap::new()),
            next_token: AtomicU32::new(1),
        });

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let reactor = std::thread::Builder::new()
            .name("tether-reactor".to_owned())
            .spawn({
                let shared = Arc::clone(&shared);
                move || runtime.block_on(reactor_main(shared, listener, command_rx))
            })?;

        let mut transport = Self {
            shared,
            events: event_rx,
            commands: command_tx,
            local_addr,
            reactor: Some(reactor),
            stats: TransportStats::default(),
        };
        for addr in peers {
            transport.connect(addr)?;
        }

        info!(instance = %instance, listen = ?local_addr, "transport started");
        Ok(transport)
    }

    /// Address the listener is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Tokens with an established session.
    #[must_use]
    pub fn connected_peers(&self) -> Vec<PeerToken> {
        let mut peers: Vec<_> = self.shared.sessions.lock().keys().copied().collect();
        peers.sort_unstable();
        peers
    }
}

impl Transport for TcpTransport {
    fn poll_event(&mut self) -> Option<TransportEvent> {
        let event = self.events.try_recv().ok()?;
        self.stats.record_event(&event);
        Some(event)
    }

    fn send_batch(&mut self, peer: PeerToken, batch: Vec<Vec<u8>>) -> SendOutcome {
        let Some(queue) = self.shared.sessions.lock().get(&peer).cloned() else {
            return SendOutcome::NoSuchPeer;
        };
        let frames = batch.len();
        let bytes: usize = batch.iter().map(Vec::len).sum();
        let (outcome, dropped) = match queue.push(batch) {
            PushOutcome::Queued => (SendOutcome::Queued, 0),
            PushOutcome::DroppedOldest { frames: dropped } => (SendOutcome::DroppedOldest, dropped),
            PushOutcome::Closed => return SendOutcome::NoSuchPeer,
        };
        self.stats.record_send(frames, bytes, dropped);
        outcome
    }

    fn connect(&mut self, addr: SocketAddr) -> TransportResult<PeerToken> {
        let token = self.shared.allocate_token();
        let cancel = self.shared.register_cancel(token);
        self.commands
            .send(Command::Dial {
                token,
                addr,
                cancel,
            })
            .map_err(|_| TransportError::Closed)?;
        debug!(peer = %token, %addr, "dialing");
        Ok(token)
    }

    fn disconnect(&mut self, peer: PeerToken) {
        debug!(peer = %peer, "disconnect requested");
        self.shared.cancel(peer);
    }

    fn local_instance(&self) -> InstanceId {
        self.shared.instance
    }

    fn stats(&self) -> TransportStats {
        self.stats
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        for (_, tx) in self.shared.cancels.lock().drain() {
            let _ = tx.send(true);
        }
        let _ = self.commands.send(Command::Shutdown);
        if let Some(reactor) = self.reactor.take() {
            if reactor.join().is_err() {
                warn!("reactor thread panicked");
            }
        }
    }
}

// ============================================================================
// REACTOR
// ============================================================================

async fn reactor_main(
    shared: Arc<Shared>,
    listener: Option<std::net::TcpListener>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    if let Some(listener) = listener {
        match TcpListener::from_std(listener) {
            Ok(listener) => {
                tokio::spawn(accept_loop(Arc::clone(&shared), listener));
            }
            Err(err) => warn!(error = %err, "listener unusable, not accepting"),
        }
    }

    while let Some(command) = commands.recv().await {
        match command {
            Command::Dial {
                token,
                addr,
                cancel,
            } => {
                tokio::spawn(dial_loop(Arc::clone(&shared), token, addr, cancel));
            }
            Command::Shutdown => break,
        }
    }
    debug!("reactor stopping");
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|stop| *stop).await;
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let token = shared.allocate_token();
                let mut cancel = shared.register_cancel(token);
                debug!(peer = %token, %addr, "accepted");
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    run_session(&shared, token, stream, addr, &mut cancel).await;
                    shared.cancels.lock().remove(&token);
                });
            }
            Err(err) => {
                warn!(error = %err, "accept failed");
                tokio::time::sleep(ACCEPT_RETRY).await;
            }
        }
    }
}

async fn dial_loop(
    shared: Arc<Shared>,
    token: PeerToken,
    addr: SocketAddr,
    mut cancel: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::new(
        shared.config.reconnect_initial,
        shared.config.reconnect_max,
    );
    loop {
        let attempt = tokio::select! {
            result = TcpStream::connect(addr) => result,
            () = cancelled(&mut cancel) => break,
        };
        match attempt {
            Ok(stream) => match run_session(&shared, token, stream, addr, &mut cancel).await {
                SessionEnd::Cancelled | SessionEnd::Rejected => break,
                SessionEnd::Lost { established } => {
                    if established {
                        backoff.reset();
                    }
                }
            },
            Err(err) if backoff.attempts() == 0 => {
                warn!(peer = %token, %addr, error = %err, "connect failed, retrying");
            }
            Err(err) => debug!(peer = %token, %addr, error = %err, "connect failed"),
        }

        let delay = backoff.next_delay();
        debug!(peer = %token, %addr, delay_ms = delay.as_millis() as u64, "reconnecting");
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = cancelled(&mut cancel) => break,
        }
    }
    shared.cancels.lock().remove(&token);
    debug!(peer = %token, "dialer stopped");
}

// ============================================================================
// SESSION
// ============================================================================

/// Checks a peer's first frame. Returns its instance id.
pub(crate) fn validate_hello(body: &[u8], local: InstanceId) -> Result<InstanceId, WireError> {
    let mut reader = OpReader::new(body);
    match reader.next_op()? {
        Some(Op::Hello(hello)) => {
            if hello.magic != PROTOCOL_MAGIC {
                return Err(WireError::BadMagic(hello.magic));
            }
            if hello.major != PROTOCOL_VERSION_MAJOR {
                return Err(WireError::IncompatibleVersion {
                    ours: PROTOCOL_VERSION_MAJOR,
                    theirs: hello.major,
                });
            }
            if hello.instance == local {
                return Err(WireError::SelfConnection);
            }
            Ok(hello.instance)
        }
        Some(other) => Err(WireError::ExpectedHello(other.code() as u8)),
        None => Err(WireError::ExpectedHello(0)),
    }
}

async fn read_frame(
    reader: &mut OwnedReadHalf,
    assembler: &mut FrameAssembler,
    buf: &mut [u8],
) -> TransportResult<Option<Vec<u8>>> {
    loop {
        if let Some(body) = assembler.next_frame()? {
            return Ok(Some(body));
        }
        let read = reader.read(buf).await?;
        if read == 0 {
            return Ok(None);
        }
        assembler.push(&buf[..read]);
    }
}

async fn handshake(
    shared: &Shared,
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    assembler: &mut FrameAssembler,
    buf: &mut [u8],
) -> TransportResult<InstanceId> {
    let hello = encode_single(
        &Op::Hello(Hello::new(shared.instance)),
        shared.config.max_frame_bytes,
    )?;
    writer.write_all(&hello).await?;

    let body = read_frame(reader, assembler, buf).await?.ok_or_else(|| {
        TransportError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "closed during handshake",
        ))
    })?;
    Ok(validate_hello(&body, shared.instance)?)
}

async fn run_session(
    shared: &Arc<Shared>,
    token: PeerToken,
    stream: TcpStream,
    addr: SocketAddr,
    cancel: &mut watch::Receiver<bool>,
) -> SessionEnd {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(peer = %token, error = %err, "nodelay unavailable");
    }
    let (mut reader, mut writer) = stream.into_split();
    let mut assembler = FrameAssembler::new(shared.config.max_frame_bytes);
    let mut buf = vec![0u8; READ_BUFFER_BYTES];

    let exchange = tokio::time::timeout(
        shared.config.dead_peer_timeout,
        handshake(shared, &mut reader, &mut writer, &mut assembler, &mut buf),
    );
    let remote = tokio::select! {
        result = exchange => match result {
            Ok(Ok(remote)) => remote,
            Ok(Err(TransportError::Wire(err))) => {
                warn!(peer = %token, %addr, error = %err, "handshake rejected");
                shared
                    .emit(TransportEvent::Rejected {
                        peer: token,
                        addr: Some(addr),
                        reason: err.to_string(),
                    })
                    .await;
                return SessionEnd::Rejected;
            }
            Ok(Err(err)) => {
                debug!(peer = %token, %addr, error = %err, "handshake failed");
                return SessionEnd::Lost { established: false };
            }
            Err(_) => {
                debug!(peer = %token, %addr, "handshake timed out");
                return SessionEnd::Lost { established: false };
            }
        },
        () = cancelled(cancel) => return SessionEnd::Cancelled,
    };

    let queue = Arc::new(OutboundQueue::new(shared.config.outbound_queue_frames));
    shared.sessions.lock().insert(token, Arc::clone(&queue));
    info!(peer = %token, %addr, remote = %remote, "peer connected");
    let connected = TransportEvent::Connected {
        peer: token,
        addr: Some(addr),
        remote,
    };
    if !shared.emit(connected).await {
        queue.close();
        return SessionEnd::Cancelled;
    }

    let (reason, end) = tokio::select! {
        reason = read_loop(shared, token, &mut reader, &mut assembler, &mut buf) => {
            (reason, SessionEnd::Lost { established: true })
        }
        reason = write_loop(shared, &mut writer, &queue) => {
            (reason, SessionEnd::Lost { established: true })
        }
        () = cancelled(cancel) => ("disconnected by operator".to_owned(), SessionEnd::Cancelled),
    };

    queue.close();
    {
        let mut sessions = shared.sessions.lock();
        if sessions
            .get(&token)
            .is_some_and(|current| Arc::ptr_eq(current, &queue))
        {
            sessions.remove(&token);
        }
    }
    info!(peer = %token, %addr, %reason, "peer disconnected");
    shared
        .emit(TransportEvent::Disconnected {
            peer: token,
            reason,
        })
        .await;
    end
}

async fn read_loop(
    shared: &Shared,
    token: PeerToken,
    reader: &mut OwnedReadHalf,
    assembler: &mut FrameAssembler,
    buf: &mut [u8],
) -> String {
    let timeout = shared.config.dead_peer_timeout;
    loop {
        let body = match tokio::time::timeout(timeout, read_frame(reader, assembler, buf)).await {
            Err(_) => return format!("no traffic for {} ms", timeout.as_millis()),
            Ok(Err(err)) => return err.to_string(),
            Ok(Ok(None)) => return "connection closed by peer".to_owned(),
            Ok(Ok(Some(body))) => body,
        };
        if is_heartbeat_only(&body) {
            trace!(peer = %token, "heartbeat");
            continue;
        }
        if !shared.emit(TransportEvent::Frame { peer: token, body }).await {
            return "transport shut down".to_owned();
        }
    }
}

async fn write_loop(shared: &Shared, writer: &mut OwnedWriteHalf, queue: &OutboundQueue) -> String {
    let heartbeat = match encode_single(&Op::Heartbeat, shared.config.max_frame_bytes) {
        Ok(frame) => frame,
        Err(err) => return err.to_string(),
    };
    loop {
        let frame = match tokio::time::timeout(shared.config.heartbeat_interval, queue.next()).await
        {
            Ok(Some(frame)) => frame,
            Ok(None) => return "outbound queue closed".to_owned(),
            Err(_) => heartbeat.clone(),
        };
        if let Err(err) = writer.write_all(&frame).await {
            return err.to_string();
        }
    }
}
