//! The connections between neighbouring machines.
//!
//! Each machine has two [`PeerLink`]s: the outbound one it opened to its
//! successor and the inbound one it accepted from its predecessor. Both carry
//! messages in both directions. Each link runs a read loop that pushes every
//! frame it receives onto the machine's [`InboundQueue`].

use crate::{
    config::MachineConfig,
    logging::{link_connected_event, link_terminated_event},
    message::FRAME_SIZE,
    InboundQueue, Shutdown,
};
use std::{
    fmt::Display,
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};
use thiserror::Error as ThisError;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::watch,
    task::JoinHandle,
    time::{sleep, timeout},
};

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Which end of the connection a machine is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// This machine connected out to its successor (the "client" side).
    Outbound,
    /// This machine accepted a connection from its predecessor (the "server"
    /// side).
    Inbound,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Outbound => write!(f, "outbound"),
            Self::Inbound => write!(f, "inbound"),
        }
    }
}

/// Timings shared by the link tasks of one machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    /// The machine the links belong to, for logging
    pub machine: usize,
    pub read_timeout: Duration,
    pub connect_delay: Duration,
    pub connect_retry: Duration,
}

impl From<&MachineConfig> for LinkSettings {
    fn from(config: &MachineConfig) -> Self {
        Self {
            machine: config.id,
            read_timeout: config.read_timeout,
            connect_delay: config.connect_delay,
            connect_retry: config.connect_retry,
        }
    }
}

/// One connection of a machine.
///
/// A link starts out detached. Once a connection is
/// [attached](PeerLink::attach) it can [send](PeerLink::send) and its read
/// loop feeds the machine's queue until the connection fails, the machine
/// shuts down, or the link is [closed](PeerLink::close).
pub struct PeerLink {
    machine: usize,
    role: Role,
    /// The write half, present while connected
    writer: tokio::sync::Mutex<Option<Writer>>,
    /// Cleared to stop the read loop
    listening: AtomicBool,
    /// Set once a connection is attached
    ready: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
    closed: AtomicBool,
    last_error: Mutex<Option<LinkError>>,
    connections: AtomicU64,
    sent: AtomicU64,
    received: AtomicU64,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl PeerLink {
    pub fn new(machine: usize, role: Role) -> Self {
        let (ready, ready_rx) = watch::channel(false);
        Self {
            machine,
            role,
            writer: Default::default(),
            listening: AtomicBool::new(false),
            ready,
            ready_rx,
            closed: AtomicBool::new(false),
            last_error: Default::default(),
            connections: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            reader: Default::default(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Attaches a connection to the link and spawns its read loop. Frames read
    /// from `reader` are pushed onto `queue`; `writer` is used by
    /// [`send`](PeerLink::send).
    ///
    /// Does nothing if the link has already been closed.
    pub async fn attach<R, W>(
        self: &Arc<Self>,
        reader: R,
        writer: W,
        queue: Arc<InboundQueue>,
        shutdown: Shutdown,
        read_timeout: Duration,
    ) where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        if self.is_closed() {
            tracing::debug!(machine = self.machine, role = %self.role, "Link closed, dropping connection");
            return;
        }
        *self.writer.lock().await = Some(Box::new(writer));
        self.listening.store(true, Ordering::SeqCst);
        self.connections.fetch_add(1, Ordering::SeqCst);
        let handle = tokio::spawn(read_loop(
            self.clone(),
            reader,
            queue,
            shutdown,
            read_timeout,
        ));
        *lock(&self.reader) = Some(handle);
        // The link keeps its own receiver, so this cannot fail
        let _ = self.ready.send(true);
    }

    /// Writes one message to the connection.
    pub async fn send(&self, message: &str) -> Result<(), LinkError> {
        if message.len() > FRAME_SIZE {
            return Err(LinkError::FrameTooLarge(message.len()));
        }
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(LinkError::NotConnected(self.role))?;
        let result = async {
            writer.write_all(message.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        match result {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                let error = LinkError::from(e);
                self.set_last_error(error.clone());
                Err(error)
            }
        }
    }

    /// Whether a connection has been attached.
    pub fn is_ready(&self) -> bool {
        *self.ready_rx.borrow()
    }

    /// Waits until a connection has been attached.
    pub async fn wait_ready(&self) {
        let mut ready = self.ready_rx.clone();
        while !*ready.borrow_and_update() {
            if ready.changed().await.is_err() {
                return;
            }
        }
    }

    /// Whether the read loop is still running.
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Tells the read loop to stop after its current read.
    pub fn stop_listening(&self) {
        self.listening.store(false, Ordering::SeqCst);
    }

    /// Shuts the connection down and waits for the read loop to end. Only
    /// the first call has any effect; it returns `true`.
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.stop_listening();
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(machine = self.machine, role = %self.role, "Error closing connection: {}", e);
            }
        }
        let reader = lock(&self.reader).take();
        if let Some(reader) = reader {
            reader.abort();
            if let Err(e) = reader.await {
                if e.is_panic() {
                    tracing::error!(machine = self.machine, role = %self.role, "Read loop panicked");
                }
            }
        }
        tracing::debug!(machine = self.machine, role = %self.role, "Link closed");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The last error seen on the connection, if any.
    pub fn last_error(&self) -> Option<LinkError> {
        lock(&self.last_error).clone()
    }

    /// How many connections have been attached. At most one in practice.
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }

    /// How many messages were written successfully.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }

    /// How many frames the read loop pushed onto the queue.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::SeqCst)
    }

    fn set_last_error(&self, error: LinkError) {
        *lock(&self.last_error) = Some(error);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reads frames off a connection until it fails or the link stops.
///
/// Each read is bounded by `read_timeout` so the loop notices a cleared
/// `listening` flag; timeouts are not errors. A reset, an abort, or the
/// peer closing the connection ends the loop for good. There is no
/// reconnection.
///
/// Every successful read becomes one queued message, with no delimiter
/// scanning. Writes that reach the socket back to back can arrive in one
/// read and are queued as a single chunk of up to [`FRAME_SIZE`] bytes,
/// cutting a message in two if they overflow it. Such chunks fail to parse
/// or carry only the last clock value, and the event loop drops or merges
/// them like any other message.
pub(crate) async fn read_loop<R>(
    link: Arc<PeerLink>,
    mut reader: R,
    queue: Arc<InboundQueue>,
    shutdown: Shutdown,
    read_timeout: Duration,
) where
    R: AsyncRead + Unpin,
{
    let mut frame = [0u8; FRAME_SIZE];
    while link.is_listening() && !shutdown.is_shut_down() {
        let read = tokio::select! {
            _ = shutdown.cancelled() => break,
            read = timeout(read_timeout, reader.read(&mut frame)) => read,
        };
        match read {
            // Timed out, check the flags and try again
            Err(_) => continue,
            Ok(Ok(0)) => {
                link_terminated_event(link.machine, link.role, &"closed by peer");
                link.set_last_error(LinkError::ClosedByPeer);
                break;
            }
            Ok(Ok(n)) => match std::str::from_utf8(&frame[..n]) {
                Ok(text) => {
                    queue.push(text);
                    link.received.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    tracing::warn!(machine = link.machine, role = %link.role, "Dropping frame that is not UTF-8: {}", e);
                }
            },
            Ok(Err(e)) if is_transient(&e) => continue,
            Ok(Err(e)) => {
                link_terminated_event(link.machine, link.role, &e);
                link.set_last_error(e.into());
                break;
            }
        }
    }
    link.stop_listening();
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Connects to `address`, retrying every `retry` until it succeeds. Returns
/// `None` if the machine shuts down first.
pub async fn connect_with_retry(
    address: SocketAddr,
    retry: Duration,
    shutdown: &Shutdown,
    machine: usize,
) -> Option<TcpStream> {
    loop {
        let attempt = tokio::select! {
            _ = shutdown.cancelled() => return None,
            attempt = TcpStream::connect(address) => attempt,
        };
        match attempt {
            Ok(stream) => return Some(stream),
            Err(e) => {
                tracing::info!(machine, "Could not connect to {}: {}", address, e);
            }
        }
        tokio::select! {
            _ = shutdown.cancelled() => return None,
            _ = sleep(retry) => {}
        }
    }
}

/// Accepts one connection from `listener`. Returns `None` if the machine
/// shuts down first.
pub async fn accept_one(
    listener: &TcpListener,
    retry: Duration,
    shutdown: &Shutdown,
    machine: usize,
) -> Option<(TcpStream, SocketAddr)> {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => return None,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok(accepted) => return Some(accepted),
            Err(e) => {
                tracing::warn!(machine, "Failed to accept a connection: {}", e);
            }
        }
        tokio::select! {
            _ = shutdown.cancelled() => return None,
            _ = sleep(retry) => {}
        }
    }
}

/// The server side of a machine: accepts the predecessor's connection and
/// attaches it to the inbound link. The listener is dropped afterwards, so
/// no further connections are accepted.
pub(crate) async fn serve_inbound(
    listener: TcpListener,
    link: Arc<PeerLink>,
    queue: Arc<InboundQueue>,
    shutdown: Shutdown,
    settings: LinkSettings,
) {
    let Some((stream, peer)) =
        accept_one(&listener, settings.connect_retry, &shutdown, settings.machine).await
    else {
        return;
    };
    drop(listener);
    link_connected_event(settings.machine, Role::Inbound, peer);
    attach_stream(stream, &link, queue, shutdown, settings).await;
}

/// The client side of a machine: connects to the successor and attaches the
/// connection to the outbound link.
pub(crate) async fn connect_outbound(
    address: SocketAddr,
    link: Arc<PeerLink>,
    queue: Arc<InboundQueue>,
    shutdown: Shutdown,
    settings: LinkSettings,
) {
    tokio::select! {
        _ = shutdown.cancelled() => return,
        _ = sleep(settings.connect_delay) => {}
    }
    let Some(stream) =
        connect_with_retry(address, settings.connect_retry, &shutdown, settings.machine).await
    else {
        return;
    };
    link_connected_event(settings.machine, Role::Outbound, address);
    attach_stream(stream, &link, queue, shutdown, settings).await;
}

async fn attach_stream(
    stream: TcpStream,
    link: &Arc<PeerLink>,
    queue: Arc<InboundQueue>,
    shutdown: Shutdown,
    settings: LinkSettings,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(machine = settings.machine, "Could not disable Nagle's algorithm: {}", e);
    }
    let (reader, writer) = stream.into_split();
    link.attach(reader, writer, queue, shutdown, settings.read_timeout)
        .await;
}

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("The {0} link has no connection")]
    NotConnected(Role),
    #[error("A {0} byte message does not fit in a frame")]
    FrameTooLarge(usize),
    #[error("The peer closed the connection")]
    ClosedByPeer,
    #[error("{message}")]
    Io { kind: io::ErrorKind, message: String },
}

impl From<io::Error> for LinkError {
    fn from(error: io::Error) -> Self {
        Self::Io {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}
