use crate::client::Client;
use crate::close::CloseCode;
use crate::compiler::FrameCompiler;
use crate::compression::DeflateContext;
use crate::config::WebSocketConfig;
use crate::extensions::Extensions;
use crate::frame::{Frame, OpCode, Role};
use crate::heartbeat::HeartbeatQueue;
use crate::parser::Parser;
use futures::stream;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

const PIPE_CAPACITY: usize = 1 << 20;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn server_endpoint_with(config: WebSocketConfig) -> (Client, DuplexStream) {
    init_logger();
    let (local, remote) = duplex(PIPE_CAPACITY);
    let client = Client::new(local, Role::Server, config, None, None, None);
    (client, remote)
}

fn server_endpoint() -> (Client, DuplexStream) {
    server_endpoint_with(WebSocketConfig::default())
}

fn quick_close_config() -> WebSocketConfig {
    WebSocketConfig {
        close_period: Duration::from_millis(500),
        ..WebSocketConfig::default()
    }
}

// The peer side of every test: masks like a browser would.
fn peer_compiler() -> FrameCompiler {
    FrameCompiler::new(Role::Client, None)
}

fn peer_parser() -> Parser {
    Parser::new(Role::Client, &WebSocketConfig::default(), None)
}

async fn read_frames(remote: &mut DuplexStream, parser: &mut Parser, count: usize) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut buffer = [0u8; 4096];
    while frames.len() < count {
        let n = remote.read(&mut buffer).await.unwrap();
        if n == 0 {
            break;
        }
        frames.extend(parser.push(&buffer[..n]).unwrap());
    }
    frames
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_echo_text_then_unexpected_eof() {
    let (mut client, mut remote) = server_endpoint();
    let mut compiler = peer_compiler();

    let bytes = compiler
        .compile(Frame::data(OpCode::Text, b"hello".to_vec(), true))
        .unwrap();
    remote.write_all(&bytes).await.unwrap();
    drop(remote);

    let message = client.receive().await.unwrap().expect("one text message");
    assert!(message.is_text());
    assert_eq!(message.buffer().await.unwrap(), b"hello");

    assert!(client.receive().await.unwrap().is_none());

    let info = client.close_info().expect("close info recorded");
    assert_eq!(info.code, CloseCode::ABNORMAL_CLOSE);
    assert!(info.reason.contains("TCP connection closed"));
    assert!(info.by_peer);
}

#[tokio::test]
async fn test_fragmented_binary_reassembles() {
    let (mut client, mut remote) = server_endpoint();
    let mut compiler = peer_compiler();

    let first = compiler
        .compile(Frame::data(OpCode::Binary, b"chunk1chunk2".to_vec(), false))
        .unwrap();
    let second = compiler
        .compile(Frame::data(OpCode::Continue, b"chunk3".to_vec(), true))
        .unwrap();
    remote.write_all(&first).await.unwrap();
    remote.write_all(&second).await.unwrap();

    let message = client.receive().await.unwrap().expect("one binary message");
    assert!(!message.is_text());
    assert!(message.is_streaming());
    assert_eq!(message.buffer().await.unwrap(), b"chunk1chunk2chunk3");
}

#[tokio::test]
async fn test_invalid_close_code_from_peer() {
    let (mut client, mut remote) = server_endpoint_with(quick_close_config());
    let mut compiler = peer_compiler();

    let bytes = compiler
        .compile(Frame::control(OpCode::Close, 5000u16.to_be_bytes().to_vec()))
        .unwrap();
    remote.write_all(&bytes).await.unwrap();

    assert!(client.receive().await.unwrap().is_none());

    let info = client.close_info().expect("close info recorded");
    assert_eq!(info.code, CloseCode::PROTOCOL_ERROR);
    assert_eq!(info.reason, "Invalid close code");
    assert!(info.by_peer);

    // The reciprocal close frame on the wire carries the protocol-error
    // code back to the peer.
    let mut parser = peer_parser();
    let frames = read_frames(&mut remote, &mut parser, 1).await;
    assert_eq!(frames[0].opcode, OpCode::Close);
    assert_eq!(
        u16::from_be_bytes([frames[0].payload[0], frames[0].payload[1]]),
        1002
    );
}

#[tokio::test]
async fn test_oversized_control_frame() {
    let (mut client, mut remote) = server_endpoint_with(quick_close_config());

    // A compliant compiler refuses this, so craft the bytes by hand: a
    // masked ping announcing a 126-byte payload.
    let payload = vec![b'*'; 126];
    let mask = [0x0A, 0x0B, 0x0C, 0x0D];
    let mut bytes = vec![0x89, 0x80 | 126];
    bytes.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    bytes.extend_from_slice(&mask);
    bytes.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
    remote.write_all(&bytes).await.unwrap();

    let error = client.receive().await.expect_err("protocol violation");
    assert_eq!(error.close_code(), CloseCode::PROTOCOL_ERROR);

    let info = client.close_info().expect("close info recorded");
    assert_eq!(info.code, CloseCode::PROTOCOL_ERROR);
    assert_eq!(
        info.reason,
        "Control frame payload must be of maximum 125 bytes or less"
    );
}

#[tokio::test]
async fn test_utf8_character_split_across_fragments() {
    let (mut client, mut remote) = server_endpoint();
    let mut compiler = peer_compiler();

    let text = format!("H{}", "ö".repeat(32770));
    let bytes = text.as_bytes();
    // 32770 lands between the two bytes of one "ö".
    let (head, tail) = bytes.split_at(32770);
    assert_eq!(head[head.len() - 1], 0xC3);

    let first = compiler
        .compile(Frame::data(OpCode::Text, head.to_vec(), false))
        .unwrap();
    let second = compiler
        .compile(Frame::data(OpCode::Continue, tail.to_vec(), true))
        .unwrap();
    remote.write_all(&first).await.unwrap();
    remote.write_all(&second).await.unwrap();

    let message = client.receive().await.unwrap().expect("one text message");
    assert!(message.is_text());
    assert_eq!(message.buffer().await.unwrap(), bytes);
}

#[tokio::test]
async fn test_ping_answered_with_matching_pong() {
    let (client, mut remote) = server_endpoint();
    let mut compiler = peer_compiler();

    let bytes = compiler
        .compile(Frame::control(OpCode::Ping, b"payload".to_vec()))
        .unwrap();
    remote.write_all(&bytes).await.unwrap();

    let mut parser = peer_parser();
    let frames = read_frames(&mut remote, &mut parser, 1).await;
    assert_eq!(frames[0].opcode, OpCode::Pong);
    assert!(frames[0].final_fragment);
    assert_eq!(frames[0].payload, b"payload");

    wait_until(|| {
        let metadata = client.metadata();
        metadata.pings_received == 1 && metadata.pongs_sent == 1
    })
    .await;
}

#[tokio::test]
async fn test_close_is_idempotent_and_writes_one_frame() {
    let (client, mut remote) = server_endpoint_with(quick_close_config());
    let client = Arc::new(client);

    let first = tokio::spawn({
        let client = client.clone();
        async move { client.close(CloseCode::NORMAL_CLOSE, "all done").await }
    });
    let second = tokio::spawn({
        let client = client.clone();
        async move { client.close(CloseCode::GOING_AWAY, "me too").await }
    });

    // The peer answers the close so the handshake completes promptly, then
    // drains the connection to count close frames.
    let mut parser = peer_parser();
    let mut compiler = peer_compiler();
    let frames = read_frames(&mut remote, &mut parser, 1).await;
    assert_eq!(frames[0].opcode, OpCode::Close);
    let reply = compiler
        .compile(Frame::control(OpCode::Close, frames[0].payload.clone()))
        .unwrap();
    remote.write_all(&reply).await.unwrap();

    let info_a = first.await.unwrap();
    let info_b = second.await.unwrap();
    assert_eq!(info_a.code, info_b.code);
    assert_eq!(info_a.reason, info_b.reason);
    assert!(!info_a.by_peer);

    let mut close_frames = 1;
    let mut buffer = [0u8; 1024];
    loop {
        let n = remote.read(&mut buffer).await.unwrap();
        if n == 0 {
            break;
        }
        for frame in parser.push(&buffer[..n]).unwrap() {
            if frame.opcode == OpCode::Close {
                close_frames += 1;
            }
        }
    }
    assert_eq!(close_frames, 1, "exactly one close frame may hit the wire");
}

#[tokio::test]
async fn test_send_text_splits_large_payloads() {
    let config = WebSocketConfig {
        frame_split_threshold: 4,
        ..WebSocketConfig::default()
    };
    let (client, mut remote) = server_endpoint_with(config);

    client.send_text("abcdefghij".to_string()).await.unwrap();

    let mut parser = peer_parser();
    let frames = read_frames(&mut remote, &mut parser, 3).await;
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].opcode, OpCode::Text);
    assert!(!frames[0].final_fragment);
    assert_eq!(frames[1].opcode, OpCode::Continue);
    assert!(!frames[1].final_fragment);
    assert_eq!(frames[2].opcode, OpCode::Continue);
    assert!(frames[2].final_fragment);

    let payload: Vec<u8> = frames.into_iter().flat_map(|frame| frame.payload).collect();
    assert_eq!(payload, b"abcdefghij");

    assert_eq!(client.metadata().messages_sent, 1);
}

#[tokio::test]
async fn test_stream_binary_one_read_ahead() {
    let config = WebSocketConfig {
        stream_threshold: 4,
        ..WebSocketConfig::default()
    };
    let (client, mut remote) = server_endpoint_with(config);

    let chunks: Vec<io::Result<Vec<u8>>> =
        vec![Ok(b"aaaa".to_vec()), Ok(b"bbbb".to_vec()), Ok(b"cc".to_vec())];
    client.stream_binary(stream::iter(chunks)).await.unwrap();

    let mut parser = peer_parser();
    let frames = read_frames(&mut remote, &mut parser, 3).await;
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].opcode, OpCode::Binary);
    assert!(frames[2].final_fragment);
    // Every frame before the last carries data; the stream ending on a
    // chunk boundary must not force an empty trailing frame.
    assert!(frames.iter().all(|frame| !frame.payload.is_empty()));

    let payload: Vec<u8> = frames.into_iter().flat_map(|frame| frame.payload).collect();
    assert_eq!(payload, b"aaaabbbbcc");
}

#[tokio::test]
async fn test_empty_stream_sends_single_final_frame() {
    let (client, mut remote) = server_endpoint();

    let chunks: Vec<io::Result<Vec<u8>>> = Vec::new();
    client.stream_text(stream::iter(chunks)).await.unwrap();

    let mut parser = peer_parser();
    let frames = read_frames(&mut remote, &mut parser, 1).await;
    assert_eq!(frames[0].opcode, OpCode::Text);
    assert!(frames[0].final_fragment);
    assert!(frames[0].payload.is_empty());
}

#[tokio::test]
async fn test_pong_counter_clamped_against_inflation() {
    let (client, mut remote) = server_endpoint();
    let mut compiler = peer_compiler();

    client.ping().await;
    let mut parser = peer_parser();
    let frames = read_frames(&mut remote, &mut parser, 1).await;
    assert_eq!(frames[0].opcode, OpCode::Ping);
    assert_eq!(frames[0].payload, b"1");

    // A forged pong claiming far more pings than were ever sent.
    let forged = compiler
        .compile(Frame::control(OpCode::Pong, b"999".to_vec()))
        .unwrap();
    remote.write_all(&forged).await.unwrap();

    wait_until(|| client.metadata().pongs_received == 1).await;
    assert_eq!(client.metadata().unanswered_pings(), 0);
}

#[tokio::test]
async fn test_non_numeric_pong_payload_ignored() {
    let (client, mut remote) = server_endpoint();
    let mut compiler = peer_compiler();

    client.ping().await;
    let mut parser = peer_parser();
    read_frames(&mut remote, &mut parser, 1).await;

    let pong = compiler
        .compile(Frame::control(OpCode::Pong, b"not a number".to_vec()))
        .unwrap();
    remote.write_all(&pong).await.unwrap();

    wait_until(|| client.metadata().last_heartbeat_at.is_some()).await;
    assert_eq!(client.metadata().pongs_received, 0);
    assert_eq!(client.metadata().unanswered_pings(), 1);
}

#[tokio::test]
async fn test_on_close_fires_exactly_once() {
    let (client, mut remote) = server_endpoint_with(quick_close_config());
    let calls = Arc::new(AtomicUsize::new(0));
    let observed = Arc::new(Mutex::new(None));

    client.on_close({
        let calls = calls.clone();
        let observed = observed.clone();
        move |id, info| {
            calls.fetch_add(1, Ordering::SeqCst);
            *observed.lock().unwrap() = Some((id, info));
        }
    });

    // Peer answers the handshake in the background.
    tokio::spawn(async move {
        let mut parser = peer_parser();
        let mut compiler = peer_compiler();
        let frames = read_frames(&mut remote, &mut parser, 1).await;
        let reply = compiler
            .compile(Frame::control(OpCode::Close, frames[0].payload.clone()))
            .unwrap();
        let _ = remote.write_all(&reply).await;
    });

    client.close(CloseCode::NORMAL_CLOSE, "done").await;
    client.close(CloseCode::NORMAL_CLOSE, "again").await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let (id, info) = observed.lock().unwrap().clone().expect("callback ran");
    assert_eq!(id, client.id());
    assert_eq!(info.code, CloseCode::NORMAL_CLOSE);
    assert_eq!(info.reason, "done");

    // Late registration fires immediately with the recorded info.
    let late = Arc::new(AtomicUsize::new(0));
    client.on_close({
        let late = late.clone();
        move |_, _| {
            late.fetch_add(1, Ordering::SeqCst);
        }
    });
    assert_eq!(late.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_send_after_close_fails_with_recorded_info() {
    let (client, remote) = server_endpoint_with(quick_close_config());
    drop(remote);

    wait_until(|| client.is_closed()).await;

    let error = client
        .send_text("too late".to_string())
        .await
        .expect_err("sends must fail after close");
    assert_eq!(error.close_code(), CloseCode::ABNORMAL_CLOSE);
}

#[tokio::test]
async fn test_compressed_round_trip_both_directions() {
    init_logger();
    let extensions = Extensions::default();
    let (local, mut remote) = duplex(PIPE_CAPACITY);
    let mut client = Client::new(
        local,
        Role::Server,
        WebSocketConfig::default(),
        Some(DeflateContext::new(Role::Server, &extensions)),
        None,
        None,
    );

    let peer_context = Arc::new(Mutex::new(DeflateContext::new(Role::Client, &extensions)));
    let mut compiler = FrameCompiler::new(Role::Client, Some(peer_context.clone()));
    let mut parser = Parser::new(
        Role::Client,
        &WebSocketConfig::default(),
        Some(peer_context),
    );

    // Inbound: a deflated message inflates transparently.
    let text = "compression pays off once the payload repeats itself ".repeat(50);
    let bytes = compiler
        .compile(Frame::data(OpCode::Text, text.clone().into_bytes(), true))
        .unwrap();
    remote.write_all(&bytes).await.unwrap();

    let message = client.receive().await.unwrap().expect("one text message");
    assert_eq!(message.text().await.unwrap(), text);

    // Outbound: our compressed frames inflate on the peer side.
    client.send_text(text.clone()).await.unwrap();
    let frames = read_frames(&mut remote, &mut parser, 1).await;
    assert_eq!(frames[0].payload, text.as_bytes());
    assert!(client.metadata().compression_enabled);
}

#[tokio::test]
async fn test_message_order_matches_final_frame_order() {
    let (mut client, mut remote) = server_endpoint();
    let mut compiler = peer_compiler();

    // A fragmented message starts first but finishes after a ping and
    // before a second buffered message.
    let opening = compiler
        .compile(Frame::data(OpCode::Text, b"fragmented ".to_vec(), false))
        .unwrap();
    let closing = compiler
        .compile(Frame::data(OpCode::Continue, b"message".to_vec(), true))
        .unwrap();
    let buffered = compiler
        .compile(Frame::data(OpCode::Text, b"buffered".to_vec(), true))
        .unwrap();
    remote.write_all(&opening).await.unwrap();
    remote.write_all(&closing).await.unwrap();
    remote.write_all(&buffered).await.unwrap();

    let first = client.receive().await.unwrap().unwrap();
    assert_eq!(first.buffer().await.unwrap(), b"fragmented message");
    let second = client.receive().await.unwrap().unwrap();
    assert_eq!(second.buffer().await.unwrap(), b"buffered");
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_pings_then_policy_close() {
    init_logger();
    let queue = HeartbeatQueue::new(Duration::from_secs(10), 0);
    let (local, mut remote) = duplex(PIPE_CAPACITY);
    let client = Client::new(
        local,
        Role::Server,
        quick_close_config(),
        None,
        Some(queue.clone()),
        None,
    );

    // First period elapses: the queue pings the silent client.
    advance_until(|| client.metadata().pings_sent == 1).await;

    let mut parser = peer_parser();
    let frames = read_frames(&mut remote, &mut parser, 1).await;
    assert_eq!(frames[0].opcode, OpCode::Ping);

    // The pong never comes; the next due date exceeds the limit of zero
    // queued pings and the client is closed for policy violation.
    advance_until(|| client.close_info().is_some()).await;

    let info = client.close_info().unwrap();
    assert_eq!(info.code, CloseCode::POLICY_VIOLATION);
    assert_eq!(info.reason, "Exceeded unanswered PING limit");
}

/// Steps virtual time forward until the condition holds; only usable under
/// a paused clock.
async fn advance_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if condition() {
            return;
        }
        tokio::time::advance(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;
    }
    panic!("condition not reached while advancing the clock");
}
