//! Integration tests for the pipeline
//!
//! Drives a running pipeline through the memory transport: round trips,
//! reconnect bookkeeping, halting and the heartbeat.

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Value as Json, json};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

use tendril::interpreter::{Outbox, PropertyBag, Value};
use tendril::runtime::error::{AgentError, Result, TransportError};
use tendril::runtime::{AgentConfig, MemoryPeer, MemoryTransport, Pipeline, Transport};

fn config() -> AgentConfig {
    AgentConfig {
        url: "mem://controller/session".to_string(),
        reconnect_delay_ms: 0,
        lock_timeout_ms: 1_000,
        lock_poll_ms: 1,
        ack_timeout_ms: 1_000,
        ..AgentConfig::default()
    }
}

fn start(config: AgentConfig) -> (Pipeline<MemoryTransport>, MemoryPeer, JoinHandle<Result<()>>) {
    let (transport, peer) = MemoryTransport::pair();
    let root = PropertyBag::new("root").with("name", Value::from("agent"));
    let pipeline = Pipeline::new(config, transport, Value::host(root));
    let runner = pipeline.clone();
    let handle = tokio::spawn(async move { runner.run().await });
    (pipeline, peer, handle)
}

async fn next_frame(peer: &MemoryPeer) -> String {
    tokio::time::timeout(Duration::from_secs(2), peer.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("transport dropped")
}

/// Read one complete packet from the agent, acknowledging continue frames.
async fn next_packet(peer: &MemoryPeer) -> Json {
    let mut text = String::new();
    loop {
        let frame = next_frame(peer).await;
        let (indicator, payload) = frame.split_at(1);
        text.push_str(payload);
        match indicator {
            "C" => peer.send("A"),
            "F" => return serde_json::from_str(&text).expect("agent sent invalid JSON"),
            other => panic!("unexpected indicator {other}"),
        }
    }
}

fn send_envelope(peer: &MemoryPeer, envelope: Json) {
    peer.send(format!("F{envelope}"));
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition never held");
}

#[tokio::test]
async fn get_round_trip_over_memory_transport() {
    let (pipeline, peer, handle) = start(config());
    send_envelope(&peer, json!(["G", "oid123", ["L", ["some", "value"]], 5]));
    assert_eq!(next_packet(&peer).await, json!(["G", "oid123", ["some", "value"]]));

    pipeline.halt();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn inbound_packets_may_span_frames() {
    let (pipeline, peer, handle) = start(config());
    peer.send("C[\"G\",\"r\",");
    assert_eq!(next_frame(&peer).await, "A");
    peer.send("F[\"G\",[\"R\",\"missing\"],[\"L\",0]],1]");
    // The id was never cached, so the agent answers with a tagged exception.
    let reply = next_packet(&peer).await;
    assert_eq!(reply[0], json!("X"));
    assert_eq!(reply[2], json!("r"));

    pipeline.halt();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn large_replies_are_chunked() {
    let (pipeline, peer, handle) = start(AgentConfig {
        frame_limit: 8,
        ..config()
    });
    let text = "x".repeat(40);
    send_envelope(&peer, json!(["G", "big", ["L", text.clone()], 1]));
    assert_eq!(next_packet(&peer).await, json!(["G", "big", text]));
    assert!(!pipeline.packetizer().is_sending());

    pipeline.halt();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_json_is_reported() {
    let (pipeline, peer, handle) = start(config());
    peer.send("F{not json");
    let reply = next_packet(&peer).await;
    assert_eq!(reply[0], json!("X"));
    assert!(reply[1].as_str().unwrap().starts_with("failed to parse JSON: {not json"));
    assert_eq!(reply[2], Json::Null);

    // The channel keeps working afterwards.
    send_envelope(&peer, json!(["G", "next", ["L", 1], 1]));
    assert_eq!(next_packet(&peer).await, json!(["G", "next", 1]));

    pipeline.halt();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn reconnect_reuses_the_reconnect_id() {
    let (pipeline, peer, handle) = start(config());
    wait_for(|| peer.opened_urls().len() == 1).await;

    peer.disconnect();
    wait_for(|| peer.opened_urls().len() == 2).await;

    let urls = peer.opened_urls();
    let expected = format!(
        "mem://controller/session?reconnect_id={}",
        pipeline.connection().reconnect_id()
    );
    assert_eq!(urls, vec![expected.clone(), expected]);

    send_envelope(&peer, json!(["G", "after", ["L", true], 1]));
    assert_eq!(next_packet(&peer).await, json!(["G", "after", true]));
    wait_for(|| pipeline.connection().attempts() == 0).await;

    pipeline.halt();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn exhausted_reconnects_halt_the_connection() {
    let (pipeline, peer, handle) = start(AgentConfig {
        reconnect_limit: 2,
        ..config()
    });
    wait_for(|| peer.is_open()).await;

    peer.refuse_connections(true);
    peer.disconnect();

    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("run did not finish")
        .unwrap();
    assert!(matches!(
        result,
        Err(AgentError::Transport(TransportError::ReconnectLimit(2)))
    ));
    assert!(pipeline.is_halted());

    let err = pipeline.send_envelope(&json!(["K"])).await.unwrap_err();
    assert!(matches!(err, AgentError::Transport(TransportError::Halted)));
}

#[tokio::test]
async fn halted_pipeline_refuses_sends() {
    let (transport, _peer) = MemoryTransport::pair();
    let pipeline = Pipeline::new(config(), transport, Value::Null);
    pipeline.connect().await.unwrap();
    pipeline.send_envelope(&json!(["K"])).await.unwrap();

    pipeline.halt();
    let err = pipeline.send_envelope(&json!(["K"])).await.unwrap_err();
    assert!(matches!(err, AgentError::Transport(TransportError::Halted)));
}

#[tokio::test]
async fn heartbeat_emits_keepalives() {
    let (pipeline, peer, handle) = start(AgentConfig {
        keepalive_interval_ms: Some(10),
        ..config()
    });
    assert_eq!(next_packet(&peer).await, json!(["K"]));

    pipeline.halt();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn second_run_is_rejected() {
    let (pipeline, _peer, handle) = start(config());
    wait_for(|| pipeline.transport().is_open()).await;
    let err = pipeline.run().await.unwrap_err();
    assert!(matches!(err, AgentError::Config(_)));

    pipeline.halt();
    handle.await.unwrap().unwrap();
}

/// Reads never complete and every write finds the channel gone, so only the
/// writer task sees the connection die. Only the first open succeeds.
#[derive(Default)]
struct WriteOnlyFailure {
    open: AtomicBool,
    opens: AtomicU32,
}

impl Transport for WriteOnlyFailure {
    fn open<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, std::result::Result<(), TransportError>> {
        async move {
            if self.opens.fetch_add(1, Ordering::SeqCst) > 0 {
                let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
                return Err(TransportError::Io(refused));
            }
            self.open.store(true, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, _frame: String) -> BoxFuture<'_, std::result::Result<(), TransportError>> {
        async move {
            self.open.store(false, Ordering::SeqCst);
            Err(TransportError::Closed)
        }
        .boxed()
    }

    fn recv(&self) -> BoxFuture<'_, std::result::Result<Option<String>, TransportError>> {
        futures::future::pending().boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        async move { self.open.store(false, Ordering::SeqCst) }.boxed()
    }
}

#[tokio::test]
async fn writer_exhausting_reconnects_stops_a_blocked_reader() {
    let pipeline = Pipeline::new(
        AgentConfig {
            reconnect_limit: 2,
            ..config()
        },
        WriteOnlyFailure::default(),
        Value::Null,
    );
    let runner = pipeline.clone();
    let handle = tokio::spawn(async move { runner.run().await });
    wait_for(|| pipeline.transport().is_open()).await;

    pipeline.outbox().emit(json!(["K"]));

    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("reader was never woken")
        .unwrap();
    assert!(matches!(
        result,
        Err(AgentError::Transport(TransportError::ReconnectLimit(2)))
    ));
    assert!(pipeline.is_halted());
}
