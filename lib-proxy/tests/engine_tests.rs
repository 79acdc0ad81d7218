//! End-to-end engine test over real sockets
//!
//! A peer dials the listening proxy while a stub validator accepts the
//! proxied upstream connection; one consensus frame crosses the whole
//! accept -> handshake -> dial -> handshake -> session path.

use std::sync::Arc;
use std::time::Duration;

use prost::Message as _;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use lib_codec::{ByzantineAction, ByzantineOptions};
use lib_proxy::config::{Direction, Hooks, ProxyConfig, ProxyConfigOptions, Trigger};
use lib_proxy::consensus::{
    consensus_sum, decode_envelope, default_descriptors, ConsensusEnvelope, ProtoBlockId,
    ProtoPartSetHeader, ProtoTimestamp, ProtoVote, VoteEnvelope, VOTE_CHANNEL_ID,
};
use lib_proxy::node_key::NodeKey;
use lib_proxy::transport::{Mux, MuxEvent, SecretConnection};
use lib_proxy::Engine;

/// Reserve a local port by binding and releasing it.
async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    listener.local_addr().expect("local addr").port()
}

fn vote_frame(height: i64) -> Vec<u8> {
    let vote = ProtoVote {
        msg_type: 2,
        height,
        round: 0,
        block_id: Some(ProtoBlockId {
            hash: vec![0x0f; 32],
            part_set_header: Some(ProtoPartSetHeader { total: 1, hash: vec![0x01] }),
        }),
        timestamp: Some(ProtoTimestamp { seconds: 1_760_783_400, nanos: 0 }),
        validator_address: vec![0x22; 20],
        validator_index: 1,
        signature: b"sealed".to_vec(),
        extension: Vec::new(),
        extension_signature: Vec::new(),
    };
    ConsensusEnvelope {
        sum: Some(consensus_sum::Sum::Vote(VoteEnvelope { vote: Some(vote) })),
    }
    .encode_to_vec()
}

#[tokio::test]
async fn frame_crosses_the_full_proxy_path() {
    let listen_port = free_port().await;
    let upstream_listener = TcpListener::bind("127.0.0.1:0").await.expect("upstream bind");
    let upstream_addr = upstream_listener.local_addr().expect("upstream addr");

    let cfg = ProxyConfig::new(ProxyConfigOptions {
        listen_address: format!("tcp://127.0.0.1:{listen_port}"),
        upstream_target: format!("tcp://{upstream_addr}"),
        chain_id: "engine-e2e".into(),
        node_key: Some(NodeKey::generate()),
        action: ByzantineAction::None,
        options: ByzantineOptions::default(),
        trigger: Trigger::default(),
        hooks: Hooks::default(),
        direction: Direction::Upstream,
        dial_timeout: Some(Duration::from_secs(2)),
    })
    .expect("config");

    let engine = Arc::new(Engine::new(cfg));
    let metrics = engine.metrics();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine_task = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run(shutdown_rx).await })
    };

    // Stub validator: accept the proxied connection and speak the transport.
    let validator_task = tokio::spawn(async move {
        let (socket, _) = upstream_listener.accept().await.expect("accept");
        SecretConnection::handshake(socket, &NodeKey::generate())
            .await
            .expect("validator handshake")
    });

    // External peer dials the proxy; retry briefly while the listener comes up.
    let peer_socket = {
        let mut attempt = 0;
        loop {
            match TcpStream::connect(("127.0.0.1", listen_port)).await {
                Ok(socket) => break socket,
                Err(_) if attempt < 50 => {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Err(e) => panic!("peer could not reach the proxy: {e}"),
            }
        }
    };
    let peer_conn = SecretConnection::handshake(peer_socket, &NodeKey::generate())
        .await
        .expect("peer handshake");
    let validator_conn = timeout(Duration::from_secs(2), validator_task)
        .await
        .expect("validator handshake timed out")
        .expect("join");

    let (peer_events_tx, mut peer_events) = mpsc::channel(16);
    let peer_mux = Mux::spawn(peer_conn, default_descriptors(), peer_events_tx);
    let (validator_events_tx, _validator_events) = mpsc::channel(16);
    let validator_mux = Mux::spawn(validator_conn, default_descriptors(), validator_events_tx);

    // Validator emits a precommit; the session re-encodes and forwards it.
    assert!(validator_mux.send(VOTE_CHANNEL_ID, vote_frame(64)));

    let frame = match timeout(Duration::from_secs(2), peer_events.recv()).await {
        Ok(Some(MuxEvent::Frame(frame))) => frame,
        other => panic!("expected a forwarded frame, got {other:?}"),
    };
    assert_eq!(frame.channel_id, VOTE_CHANNEL_ID);

    let envelope = decode_envelope(&frame.payload).expect("decode");
    let Some(consensus_sum::Sum::Vote(wrapper)) = envelope.sum else {
        panic!("expected vote");
    };
    let vote = wrapper.vote.expect("inner vote");
    assert_eq!(vote.height, 64);
    assert_eq!(vote.msg_type, 2);
    assert_eq!(vote.validator_address, vec![0x22; 20]);

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while metrics.snapshot()["mutated"] != 1 {
        assert!(std::time::Instant::now() < deadline, "mutated counter never reached 1");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(metrics.snapshot()["dropped"], 0);

    shutdown_tx.send(true).expect("signal");
    let result = timeout(Duration::from_secs(2), engine_task)
        .await
        .expect("engine must stop")
        .expect("join");
    assert!(result.is_ok(), "engine exits cleanly on shutdown: {result:?}");

    peer_mux.flush_and_stop().await;
    validator_mux.flush_and_stop().await;
}
