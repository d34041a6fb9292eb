//! Packetizer tests
//!
//! Chunked sends, acknowledgment flow control and reassembly over the memory
//! transport.

use std::sync::Arc;
use std::time::Duration;

use tendril::runtime::error::TransportError;
use tendril::runtime::{MemoryPeer, MemoryTransport, Packetizer, Received, Transport};

async fn opened_pair() -> (Arc<MemoryTransport>, MemoryPeer) {
    let (transport, peer) = MemoryTransport::pair();
    transport.open("mem://controller").await.unwrap();
    (Arc::new(transport), peer)
}

async fn next_frame(peer: &MemoryPeer) -> String {
    tokio::time::timeout(Duration::from_secs(2), peer.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("transport dropped")
}

/// Acknowledge continue frames as they arrive, returning every frame up to
/// and including the final one.
async fn collect_packet(peer: &MemoryPeer, packetizer: &Packetizer) -> Vec<String> {
    let mut frames = Vec::new();
    loop {
        let frame = next_frame(peer).await;
        let done = frame.starts_with('F');
        if frame.starts_with('C') {
            assert_eq!(packetizer.receive("A").unwrap(), Received::Acknowledged);
        }
        frames.push(frame);
        if done {
            return frames;
        }
    }
}

#[tokio::test]
async fn long_payload_is_sent_as_acknowledged_chunks() {
    let (transport, peer) = opened_pair().await;
    let packetizer = Arc::new(Packetizer::new(4));

    let sender = {
        let packetizer = packetizer.clone();
        let transport = transport.clone();
        tokio::spawn(async move { packetizer.send(transport.as_ref(), "abcdefghij").await })
    };

    let frames = collect_packet(&peer, &packetizer).await;
    assert_eq!(frames, vec!["Cabcd", "Cefgh", "Fij"]);
    sender.await.unwrap().unwrap();
    assert!(!packetizer.is_sending());
}

#[tokio::test]
async fn short_payload_is_a_single_final_frame() {
    let (transport, peer) = opened_pair().await;
    let packetizer = Packetizer::new(100);
    packetizer.send(transport.as_ref(), "[\"K\"]").await.unwrap();
    assert_eq!(next_frame(&peer).await, "F[\"K\"]");
}

#[tokio::test]
async fn concurrent_sends_do_not_interleave() {
    let (transport, peer) = opened_pair().await;
    let packetizer = Arc::new(Packetizer::new(2));

    let mut senders = Vec::new();
    for payload in ["aaaaaa", "bbbbbb"] {
        let packetizer = packetizer.clone();
        let transport = transport.clone();
        senders.push(tokio::spawn(async move {
            packetizer.send(transport.as_ref(), payload).await
        }));
    }

    let first = collect_packet(&peer, &packetizer).await;
    let second = collect_packet(&peer, &packetizer).await;
    for sender in senders {
        sender.await.unwrap().unwrap();
    }

    let join = |frames: &[String]| frames.iter().map(|f| &f[1..]).collect::<String>();
    let mut payloads = vec![join(&first), join(&second)];
    payloads.sort();
    assert_eq!(payloads, vec!["aaaaaa", "bbbbbb"]);
}

#[tokio::test]
async fn missing_acknowledgment_times_out_and_releases_lock() {
    let (transport, peer) = opened_pair().await;
    let packetizer = Packetizer::new(2).with_timeouts(
        Duration::from_secs(1),
        Duration::from_millis(1),
        Duration::from_millis(20),
    );

    let err = packetizer.send(transport.as_ref(), "abcd").await.unwrap_err();
    assert!(matches!(err, TransportError::AckTimeout(_)));
    assert_eq!(next_frame(&peer).await, "Cab");
    assert!(!packetizer.is_sending());

    // The lock is free again for the next payload.
    packetizer.send(transport.as_ref(), "x").await.unwrap();
    assert_eq!(next_frame(&peer).await, "Fx");
}

#[tokio::test]
async fn inbound_continue_frames_are_acknowledged() {
    let (transport, peer) = opened_pair().await;
    let packetizer = Packetizer::new(100);

    assert_eq!(packetizer.handle(transport.as_ref(), "C[\"D\",").await.unwrap(), None);
    assert_eq!(next_frame(&peer).await, "A");
    assert_eq!(
        packetizer.handle(transport.as_ref(), "F\"x\"]").await.unwrap(),
        Some("[\"D\",\"x\"]".to_string())
    );
}

#[test]
fn unknown_indicator_leaves_buffer_intact() {
    let packetizer = Packetizer::new(100);
    packetizer.receive("C[1,").unwrap();
    let buffered = packetizer.buffered_len();

    let err = packetizer.receive("Zjunk").unwrap_err();
    assert!(matches!(err, TransportError::UnknownIndicator(ref text) if text == "Zjunk"));
    assert_eq!(packetizer.buffered_len(), buffered);

    assert_eq!(
        packetizer.receive("F2]").unwrap(),
        Received::Packet("[1,2]".to_string())
    );
}
