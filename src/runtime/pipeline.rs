//! Pipeline: one transport, one packetizer, one dispatcher
//!
//! Inbound frames flow through the packetizer, the codec and the dispatcher.
//! Outbound envelopes queued by the dispatcher (replies, exceptions,
//! callbacks, heartbeats) are drained in order by a writer task and sent
//! through the codec and packetizer. Sends reconnect a closed transport a
//! bounded number of times before the connection halts.

use parking_lot::Mutex;
use serde_json::Value as Json;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::JoinHandle;

use super::AgentConfig;
use super::codec::JsonCodec;
use super::connection::ConnectionState;
use super::error::{AgentError, CodecError, Result, TransportError};
use super::packetizer::Packetizer;
use super::transport::Transport;
use crate::interpreter::outbox::{ChannelOutbox, Outbox};
use crate::interpreter::protocol;
use crate::interpreter::{Dispatcher, Interpreter, Outcome, Value};

struct Shared<T> {
    config: AgentConfig,
    transport: T,
    codec: JsonCodec,
    packetizer: Packetizer,
    connection: ConnectionState,
    dispatcher: Dispatcher,
    outbox: ChannelOutbox,
    outbound: Mutex<Option<mpsc::UnboundedReceiver<Json>>>,
    reconnecting: AsyncMutex<()>,
    halt_signal: watch::Sender<bool>,
}

/// Agent connection over one transport.
pub struct Pipeline<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Pipeline<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Transport + 'static> Pipeline<T> {
    /// Build a pipeline whose commands evaluate against `root`.
    pub fn new(config: AgentConfig, transport: T, root: Value) -> Self {
        let connection = ConnectionState::new(config.url.clone(), config.reconnect_limit);
        let (outbox, outbound) = ChannelOutbox::new(connection.halted_flag());

        let interp = Interpreter::new(root, Arc::new(outbox.clone()))
            .with_default_depth(config.default_depth);
        let dispatcher = Dispatcher::new(interp);

        let reporter = outbox.clone();
        let codec = JsonCodec::with_reporter(Arc::new(move |err: &CodecError| {
            if reporter.is_halted() {
                return;
            }
            tracing::warn!(error = %err, "reporting codec failure");
            reporter.emit(protocol::exception(&err.to_string(), None));
        }));

        let (halt_signal, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                packetizer: Packetizer::from_config(&config),
                config,
                transport,
                codec,
                connection,
                dispatcher,
                outbox,
                outbound: Mutex::new(Some(outbound)),
                reconnecting: AsyncMutex::new(()),
                halt_signal,
            }),
        }
    }

    /// Message dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.shared.dispatcher
    }

    /// Connection state.
    pub fn connection(&self) -> &ConnectionState {
        &self.shared.connection
    }

    /// Packetizer.
    pub fn packetizer(&self) -> &Packetizer {
        &self.shared.packetizer
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    /// Outbox feeding the writer task.
    pub fn outbox(&self) -> &dyn Outbox {
        &self.shared.outbox
    }

    /// Open the transport with the reconnect id attached.
    pub async fn connect(&self) -> Result<()> {
        let url = self.shared.connection.connect_url();
        self.shared.transport.open(&url).await?;
        tracing::info!(%url, "connected");
        Ok(())
    }

    /// Halt the connection. Further sends fail and `run` returns.
    pub fn halt(&self) {
        tracing::info!("halting connection");
        self.shared.connection.halt();
        self.shared.halt_signal.send_replace(true);
    }

    /// Whether the connection is halted.
    pub fn is_halted(&self) -> bool {
        self.shared.connection.is_halted()
    }

    /// Encode and send one envelope, reconnecting if the transport is closed.
    pub async fn send_envelope(&self, envelope: &Json) -> Result<()> {
        if self.is_halted() {
            return Err(TransportError::Halted.into());
        }
        let text = self.shared.codec.encode(envelope)?;
        loop {
            self.ensure_open().await?;
            match self.shared.packetizer.send(&self.shared.transport, &text).await {
                Ok(()) => {
                    self.shared.connection.reset();
                    return Ok(());
                }
                Err(TransportError::Closed | TransportError::Io(_))
                    if !self.shared.transport.is_open() =>
                {
                    tracing::info!("transport closed during send; retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Reopen the transport if it is closed. Attempts count against the
    /// reconnect limit; running out halts the connection.
    pub async fn ensure_open(&self) -> Result<()> {
        let _reconnecting = self.shared.reconnecting.lock().await;
        loop {
            if self.is_halted() {
                return Err(TransportError::Halted.into());
            }
            if self.shared.transport.is_open() {
                return Ok(());
            }
            let attempt = match self.shared.connection.record_attempt() {
                Ok(attempt) => attempt,
                Err(err) => {
                    self.shared.halt_signal.send_replace(true);
                    return Err(err.into());
                }
            };
            tracing::info!(attempt, "reconnecting");
            tokio::time::sleep(self.shared.config.reconnect_delay()).await;
            if let Err(err) = self.connect().await {
                tracing::warn!(error = %err, attempt, "reconnect failed");
            }
        }
    }

    /// Handle one inbound frame.
    pub async fn handle_frame(&self, text: &str) -> Result<Option<Outcome>> {
        match self
            .shared
            .packetizer
            .handle(&self.shared.transport, text)
            .await?
        {
            Some(packet) => self.handle_packet(&packet).map(Some),
            None => Ok(None),
        }
    }

    /// Decode and dispatch one complete packet.
    pub fn handle_packet(&self, text: &str) -> Result<Outcome> {
        let envelope = self.shared.codec.decode(text)?;
        self.shared.dispatcher.dispatch(&envelope)
    }

    /// Drive the connection until it halts.
    ///
    /// Spawns the writer (and, if configured, the heartbeat) and then reads
    /// frames, reconnecting when the transport closes. Returns `Ok` after
    /// [`Pipeline::halt`] and `ReconnectLimit` once either the reader or the
    /// writer runs out of reconnects.
    pub async fn run(&self) -> Result<()> {
        let outbound = self
            .shared
            .outbound
            .lock()
            .take()
            .ok_or_else(|| AgentError::Config("pipeline is already running".into()))?;

        let writer = self.spawn_writer(outbound);
        let heartbeat = self.spawn_heartbeat();
        let result = self.read_loop().await;

        writer.abort();
        if let Some(heartbeat) = heartbeat {
            heartbeat.abort();
        }
        self.shared.transport.close().await;
        result
    }

    async fn read_loop(&self) -> Result<()> {
        let mut halted = self.shared.halt_signal.subscribe();
        if self.is_halted() {
            return self.halt_result();
        }
        if !self.shared.transport.is_open() {
            self.connect().await?;
        }
        loop {
            if self.is_halted() {
                return self.halt_result();
            }
            let frame = tokio::select! {
                frame = self.shared.transport.recv() => frame,
                _ = halted.changed() => continue,
            };
            match frame {
                Ok(Some(text)) => {
                    if let Err(err) = self.handle_frame(&text).await {
                        tracing::debug!(error = %err, "frame handling failed");
                    }
                }
                Ok(None) | Err(TransportError::Closed) => {
                    tracing::info!("transport closed");
                    self.reopen().await?;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "receive failed");
                    self.reopen().await?;
                }
            }
        }
    }

    fn halt_result(&self) -> Result<()> {
        let connection = &self.shared.connection;
        if connection.is_exhausted() {
            return Err(TransportError::ReconnectLimit(connection.limit()).into());
        }
        Ok(())
    }

    async fn reopen(&self) -> Result<()> {
        match self.ensure_open().await {
            Err(AgentError::Transport(TransportError::Halted)) => Ok(()),
            other => other,
        }
    }

    fn spawn_writer(&self, mut outbound: mpsc::UnboundedReceiver<Json>) -> JoinHandle<()> {
        let pipeline = self.clone();
        tokio::spawn(async move {
            while let Some(envelope) = outbound.recv().await {
                match pipeline.send_envelope(&envelope).await {
                    Ok(()) => {}
                    Err(AgentError::Transport(
                        err @ (TransportError::Halted | TransportError::ReconnectLimit(_)),
                    )) => {
                        tracing::warn!(error = %err, "writer stopping");
                        break;
                    }
                    Err(err) => tracing::warn!(error = %err, "failed to send envelope"),
                }
            }
        })
    }

    fn spawn_heartbeat(&self) -> Option<JoinHandle<()>> {
        let interval = self.shared.config.keepalive_interval()?;
        let pipeline = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if pipeline.is_halted() {
                    break;
                }
                pipeline.shared.outbox.emit(protocol::keepalive());
            }
        }))
    }
}
