//! Packetizer: frames payloads and reassembles them
//!
//! Outbound payloads longer than the frame limit are cut into `continue`
//! frames followed by one `final` frame. Each `continue` frame must be
//! acknowledged by the far end before the next chunk goes out, and only one
//! payload is in flight at a time. Inbound `continue` frames accumulate in a
//! buffer until the `final` frame completes the packet.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use super::AgentConfig;
use super::error::{ProtocolError, TransportError};
use super::transport::Transport;

/// Frame indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// More chunks follow; the receiver acknowledges this one.
    Continue,
    /// Last chunk of a packet.
    Final,
    /// Flow-control acknowledgment of a continue frame.
    Acknowledge,
}

impl FrameKind {
    /// Leading character on the wire.
    pub fn indicator(self) -> char {
        match self {
            FrameKind::Continue => 'C',
            FrameKind::Final => 'F',
            FrameKind::Acknowledge => 'A',
        }
    }

    fn from_indicator(indicator: char) -> Option<Self> {
        match indicator {
            'C' => Some(FrameKind::Continue),
            'F' => Some(FrameKind::Final),
            'A' => Some(FrameKind::Acknowledge),
            _ => None,
        }
    }
}

/// One transport unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Indicator.
    pub kind: FrameKind,
    /// Payload slice.
    pub payload: String,
}

impl Frame {
    /// Acknowledgment frame.
    pub fn ack() -> Self {
        Frame {
            kind: FrameKind::Acknowledge,
            payload: String::new(),
        }
    }

    /// Split wire text into indicator and payload.
    pub fn parse(text: &str) -> Result<Frame, TransportError> {
        let mut chars = text.chars();
        let indicator = chars.next();
        match indicator.and_then(FrameKind::from_indicator) {
            Some(kind) => Ok(Frame {
                kind,
                payload: chars.as_str().to_string(),
            }),
            None => Err(TransportError::UnknownIndicator(
                text.chars().take(10).collect(),
            )),
        }
    }

    /// Wire text.
    pub fn encode(&self) -> String {
        let mut text = String::with_capacity(self.payload.len() + 1);
        text.push(self.kind.indicator());
        text.push_str(&self.payload);
        text
    }
}

/// What an inbound frame amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A continue frame was buffered; it must be acknowledged.
    Continued,
    /// A final frame completed this packet.
    Packet(String),
    /// An acknowledgment released the waiting sender.
    Acknowledged,
    /// An acknowledgment arrived with nobody waiting for it.
    StrayAcknowledgment,
}

/// Frame splitter, reassembler and send-order guard for one connection.
pub struct Packetizer {
    frame_limit: usize,
    buffer: Mutex<String>,
    sending: AtomicBool,
    pending_ack: Mutex<Option<oneshot::Sender<()>>>,
    lock_timeout: Duration,
    lock_poll: Duration,
    ack_timeout: Duration,
}

impl Packetizer {
    /// Create a packetizer with default timeouts.
    pub fn new(frame_limit: usize) -> Self {
        let defaults = AgentConfig::default();
        Self {
            frame_limit: frame_limit.max(1),
            buffer: Mutex::new(String::new()),
            sending: AtomicBool::new(false),
            pending_ack: Mutex::new(None),
            lock_timeout: defaults.lock_timeout(),
            lock_poll: defaults.lock_poll(),
            ack_timeout: defaults.ack_timeout(),
        }
    }

    /// Create a packetizer from connection configuration.
    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.frame_limit).with_timeouts(
            config.lock_timeout(),
            config.lock_poll(),
            config.ack_timeout(),
        )
    }

    /// Override lock and acknowledgment timing.
    pub fn with_timeouts(
        mut self,
        lock_timeout: Duration,
        lock_poll: Duration,
        ack_timeout: Duration,
    ) -> Self {
        self.lock_timeout = lock_timeout;
        self.lock_poll = lock_poll;
        self.ack_timeout = ack_timeout;
        self
    }

    /// Maximum characters per frame.
    pub fn frame_limit(&self) -> usize {
        self.frame_limit
    }

    /// Characters buffered from continue frames so far.
    pub fn buffered_len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Whether a send currently holds the lock.
    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::SeqCst)
    }

    /// Cut a payload into frames, every `frame_limit` characters.
    pub fn chunks(&self, payload: &str) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut start = 0;
        let mut count = 0;
        for (offset, _) in payload.char_indices() {
            if count == self.frame_limit {
                frames.push(Frame {
                    kind: FrameKind::Continue,
                    payload: payload[start..offset].to_string(),
                });
                start = offset;
                count = 0;
            }
            count += 1;
        }
        frames.push(Frame {
            kind: FrameKind::Final,
            payload: payload[start..].to_string(),
        });
        frames
    }

    /// Account for one inbound frame.
    ///
    /// An unknown indicator is an error and leaves the buffer untouched.
    pub fn receive(&self, text: &str) -> Result<Received, TransportError> {
        let frame = Frame::parse(text)?;
        match frame.kind {
            FrameKind::Continue => {
                self.buffer.lock().push_str(&frame.payload);
                Ok(Received::Continued)
            }
            FrameKind::Final => {
                let mut buffer = self.buffer.lock();
                let mut packet = std::mem::take(&mut *buffer);
                packet.push_str(&frame.payload);
                Ok(Received::Packet(packet))
            }
            FrameKind::Acknowledge => match self.pending_ack.lock().take() {
                Some(waiter) => {
                    if waiter.send(()).is_err() {
                        tracing::debug!("acknowledged sender already gave up");
                    }
                    Ok(Received::Acknowledged)
                }
                None => {
                    let error = ProtocolError::UnexpectedAcknowledgment;
                    tracing::warn!(%error, "ignoring frame");
                    Ok(Received::StrayAcknowledgment)
                }
            },
        }
    }

    /// Handle one inbound frame, acknowledging continue frames on
    /// `transport`. Returns the packet when a final frame completes one.
    pub async fn handle<T: Transport + ?Sized>(
        &self,
        transport: &T,
        text: &str,
    ) -> Result<Option<String>, TransportError> {
        match self.receive(text)? {
            Received::Continued => {
                transport.send(Frame::ack().encode()).await?;
                Ok(None)
            }
            Received::Packet(packet) => Ok(Some(packet)),
            Received::Acknowledged | Received::StrayAcknowledgment => Ok(None),
        }
    }

    /// Send one payload, waiting for an acknowledgment after every continue
    /// frame.
    pub async fn send<T: Transport + ?Sized>(
        &self,
        transport: &T,
        payload: &str,
    ) -> Result<(), TransportError> {
        let _guard = self.acquire().await?;
        let frames = self.chunks(payload);
        tracing::debug!(frames = frames.len(), chars = payload.len(), "sending payload");

        for frame in frames {
            match frame.kind {
                FrameKind::Continue => {
                    let (tx, rx) = oneshot::channel();
                    *self.pending_ack.lock() = Some(tx);
                    transport.send(frame.encode()).await?;
                    match tokio::time::timeout(self.ack_timeout, rx).await {
                        Ok(Ok(())) => {}
                        Ok(Err(_)) => return Err(TransportError::Closed),
                        Err(_) => return Err(TransportError::AckTimeout(self.ack_timeout)),
                    }
                }
                _ => transport.send(frame.encode()).await?,
            }
        }
        Ok(())
    }

    async fn acquire(&self) -> Result<SendGuard<'_>, TransportError> {
        let started = Instant::now();
        loop {
            if self
                .sending
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(SendGuard { packetizer: self });
            }
            if started.elapsed() >= self.lock_timeout {
                return Err(TransportError::LockTimeout(self.lock_timeout));
            }
            tokio::time::sleep(self.lock_poll).await;
        }
    }
}

impl fmt::Debug for Packetizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packetizer")
            .field("frame_limit", &self.frame_limit)
            .field("buffered", &self.buffered_len())
            .field("sending", &self.is_sending())
            .finish()
    }
}

/// Releases the send lock, even when a send fails.
struct SendGuard<'a> {
    packetizer: &'a Packetizer,
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        self.packetizer.pending_ack.lock().take();
        self.packetizer.sending.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_parse_and_encode() {
        let frame = Frame::parse("Cabc").unwrap();
        assert_eq!(frame.kind, FrameKind::Continue);
        assert_eq!(frame.payload, "abc");
        assert_eq!(frame.encode(), "Cabc");
        assert_eq!(Frame::ack().encode(), "A");
        assert!(matches!(Frame::parse(""), Err(TransportError::UnknownIndicator(_))));
    }

    #[test]
    fn chunks_respect_char_boundaries() {
        let packetizer = Packetizer::new(2);
        let frames: Vec<String> = packetizer.chunks("héllo").iter().map(Frame::encode).collect();
        assert_eq!(frames, vec!["Ché", "Cll", "Fo"]);
        assert_eq!(packetizer.chunks("").iter().map(Frame::encode).collect::<Vec<_>>(), vec!["F"]);
        assert_eq!(packetizer.chunks("ab").len(), 1);
    }

    #[test]
    fn reassembles_continue_frames() {
        let packetizer = Packetizer::new(4);
        assert_eq!(packetizer.receive("C[\"E\",").unwrap(), Received::Continued);
        assert_eq!(packetizer.receive("C[\"L\",").unwrap(), Received::Continued);
        assert_eq!(
            packetizer.receive("F1]]").unwrap(),
            Received::Packet("[\"E\",[\"L\",1]]".to_string())
        );
        assert_eq!(packetizer.buffered_len(), 0);
    }

    #[test]
    fn stray_acknowledgment_is_not_fatal() {
        let packetizer = Packetizer::new(4);
        assert_eq!(packetizer.receive("A").unwrap(), Received::StrayAcknowledgment);
    }

    #[tokio::test]
    async fn lock_times_out_when_held() {
        let packetizer = Packetizer::new(4).with_timeouts(
            Duration::from_millis(20),
            Duration::from_millis(1),
            Duration::from_secs(1),
        );
        let _held = packetizer.acquire().await.unwrap();
        assert!(matches!(
            packetizer.acquire().await,
            Err(TransportError::LockTimeout(_))
        ));
    }
}
