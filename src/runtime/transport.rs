//! Frame transports.
//!
//! A transport moves whole frames (indicator plus payload) between the agent
//! and the controller. [`TcpTransport`] writes one frame per line over TCP;
//! [`MemoryTransport`] is an in-process pair used by tests and embedders.

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex as SyncMutex;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc, watch};

use super::error::TransportError;

/// Duplex frame channel to the controller.
pub trait Transport: Send + Sync {
    /// Open (or reopen) the channel at `url`.
    fn open<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<(), TransportError>>;

    /// Whether the channel is currently usable.
    fn is_open(&self) -> bool;

    /// Send one frame.
    fn send(&self, frame: String) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Receive the next frame. `Ok(None)` means the far end closed the channel.
    fn recv(&self) -> BoxFuture<'_, Result<Option<String>, TransportError>>;

    /// Close the channel.
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Split `tcp://host:port/path?query` into a socket address.
pub fn tcp_address(url: &str) -> Result<&str, TransportError> {
    let rest = url
        .strip_prefix("tcp://")
        .ok_or_else(|| TransportError::InvalidUrl(url.to_string()))?;
    let end = rest.find(['/', '?']).unwrap_or(rest.len());
    let address = &rest[..end];
    if address.is_empty() || !address.contains(':') {
        return Err(TransportError::InvalidUrl(url.to_string()));
    }
    Ok(address)
}

/// Newline-delimited frames over TCP.
///
/// The first line written on every connection is the full URL, including the
/// reconnect id, so the controller can pair a reconnect with its session.
#[derive(Debug, Default)]
pub struct TcpTransport {
    reader: Mutex<Option<Lines<BufReader<OwnedReadHalf>>>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    open: AtomicBool,
}

impl TcpTransport {
    /// Create a closed transport.
    pub fn new() -> Self {
        Self::default()
    }

    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        let address = tcp_address(url)?;
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(url.as_bytes()).await?;
        write_half.write_all(b"\n").await?;

        *self.writer.lock().await = Some(write_half);
        *self.reader.lock().await = Some(BufReader::new(read_half).lines());
        self.open.store(true, Ordering::SeqCst);
        tracing::info!(%address, "tcp transport connected");
        Ok(())
    }

    async fn write_frame(&self, frame: String) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        let stream = writer.as_mut().ok_or(TransportError::Closed)?;
        let result = async {
            stream.write_all(frame.as_bytes()).await?;
            stream.write_all(b"\n").await?;
            stream.flush().await
        }
        .await;
        if let Err(err) = result {
            self.open.store(false, Ordering::SeqCst);
            writer.take();
            return Err(err.into());
        }
        Ok(())
    }

    async fn read_frame(&self) -> Result<Option<String>, TransportError> {
        let mut reader = self.reader.lock().await;
        let lines = reader.as_mut().ok_or(TransportError::Closed)?;
        match lines.next_line().await {
            Ok(Some(line)) => Ok(Some(line)),
            Ok(None) => {
                self.open.store(false, Ordering::SeqCst);
                reader.take();
                Ok(None)
            }
            Err(err) => {
                self.open.store(false, Ordering::SeqCst);
                reader.take();
                Err(err.into())
            }
        }
    }
}

impl Transport for TcpTransport {
    fn open<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<(), TransportError>> {
        self.connect(url).boxed()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, frame: String) -> BoxFuture<'_, Result<(), TransportError>> {
        self.write_frame(frame).boxed()
    }

    fn recv(&self) -> BoxFuture<'_, Result<Option<String>, TransportError>> {
        self.read_frame().boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        async move {
            self.open.store(false, Ordering::SeqCst);
            if let Some(mut writer) = self.writer.lock().await.take() {
                let _ = writer.shutdown().await;
            }
        }
        .boxed()
    }
}

struct MemoryShared {
    open: watch::Sender<bool>,
    refuse: AtomicBool,
    opened_urls: SyncMutex<Vec<String>>,
}

/// Agent half of an in-process frame channel.
pub struct MemoryTransport {
    shared: Arc<MemoryShared>,
    outbound: mpsc::UnboundedSender<String>,
    inbound: Mutex<mpsc::UnboundedReceiver<String>>,
}

/// Controller half of a [`MemoryTransport`].
pub struct MemoryPeer {
    shared: Arc<MemoryShared>,
    inbound: mpsc::UnboundedSender<String>,
    outbound: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl MemoryTransport {
    /// Create a connected transport/peer pair. The transport starts closed
    /// and must be opened like a real one.
    pub fn pair() -> (MemoryTransport, MemoryPeer) {
        let (open, _) = watch::channel(false);
        let shared = Arc::new(MemoryShared {
            open,
            refuse: AtomicBool::new(false),
            opened_urls: SyncMutex::new(Vec::new()),
        });
        let (to_peer, from_agent) = mpsc::unbounded_channel();
        let (to_agent, from_peer) = mpsc::unbounded_channel();
        (
            MemoryTransport {
                shared: shared.clone(),
                outbound: to_peer,
                inbound: Mutex::new(from_peer),
            },
            MemoryPeer {
                shared,
                inbound: to_agent,
                outbound: Mutex::new(from_agent),
            },
        )
    }
}

impl Transport for MemoryTransport {
    fn open<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<(), TransportError>> {
        async move {
            if self.shared.refuse.load(Ordering::SeqCst) {
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("connection to {url} refused"),
                )));
            }
            self.shared.opened_urls.lock().push(url.to_string());
            self.shared.open.send_replace(true);
            Ok(())
        }
        .boxed()
    }

    fn is_open(&self) -> bool {
        *self.shared.open.borrow()
    }

    fn send(&self, frame: String) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            if !self.is_open() {
                return Err(TransportError::Closed);
            }
            self.outbound.send(frame).map_err(|_| TransportError::Closed)
        }
        .boxed()
    }

    fn recv(&self) -> BoxFuture<'_, Result<Option<String>, TransportError>> {
        async move {
            if !self.is_open() {
                return Err(TransportError::Closed);
            }
            let mut state = self.shared.open.subscribe();
            let closed = async move {
                while *state.borrow_and_update() {
                    if state.changed().await.is_err() {
                        break;
                    }
                }
            };
            let mut inbound = self.inbound.lock().await;
            tokio::select! {
                frame = inbound.recv() => Ok(frame),
                () = closed => Ok(None),
            }
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        async move {
            self.shared.open.send_replace(false);
        }
        .boxed()
    }
}

impl MemoryPeer {
    /// Deliver a frame to the agent.
    pub fn send(&self, frame: impl Into<String>) {
        if self.inbound.send(frame.into()).is_err() {
            tracing::debug!("memory transport dropped; frame discarded");
        }
    }

    /// Next frame sent by the agent, or `None` once the agent half is gone.
    pub async fn recv(&self) -> Option<String> {
        self.outbound.lock().await.recv().await
    }

    /// Drop the channel as if the network failed.
    pub fn disconnect(&self) {
        self.shared.open.send_replace(false);
    }

    /// Refuse (or accept again) new connection attempts.
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Every URL the agent opened, in order.
    pub fn opened_urls(&self) -> Vec<String> {
        self.shared.opened_urls.lock().clone()
    }

    /// Whether the agent half is open.
    pub fn is_open(&self) -> bool {
        *self.shared.open.borrow()
    }
}
