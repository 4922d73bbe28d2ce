use crate::close::{CloseCode, CloseInfo, MAX_CLOSE_REASON_LENGTH};
use crate::compiler::FrameCompiler;
use crate::compression::DeflateContext;
use crate::config::WebSocketConfig;
use crate::error::Error;
use crate::frame::{Frame, OpCode, Role};
use crate::heartbeat::HeartbeatQueue;
use crate::limiter::RateLimiter;
use crate::message::{Message, MessageKind};
use crate::metadata::ClientMetadata;
use crate::parser::Parser;
use crate::transport::{TlsInfo, Transport};
use futures::{Stream, StreamExt};
use log::{debug, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use time::OffsetDateTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout_at;
use tokio::time::Instant;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

type BoxTransport = Box<dyn Transport>;
type OnClose = Box<dyn FnOnce(u64, CloseInfo) + Send>;
type ChunkSender = Sender<Result<Vec<u8>, Error>>;

const MESSAGE_QUEUE_CAPACITY: usize = 16;
const CHUNK_QUEUE_CAPACITY: usize = 16;

/// A WebSocket endpoint over an established, already-upgraded transport.
///
/// The client owns its transport exclusively: a spawned read loop feeds the
/// incoming side, writes go through an internal serializer so that at most
/// one write (including a whole streamed message) is in flight, and the
/// close handshake is bounded by the configured close period no matter what
/// the peer does.
///
/// Dropping the handle cancels the read loop, completes the message queue
/// and closes the transport; nothing is left running.
pub struct Client {
    shared: Arc<ClientShared>,
    messages: Receiver<Result<Message, Error>>,
    read_task: JoinHandle<()>,
}

impl Client {
    pub fn new<T: Transport + 'static>(
        transport: T,
        role: Role,
        config: WebSocketConfig,
        compression: Option<DeflateContext>,
        heartbeat: Option<HeartbeatQueue>,
        limiter: Option<RateLimiter>,
    ) -> Self {
        let id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
        let local_addr = transport.local_addr();
        let remote_addr = transport.remote_addr();
        let tls = transport.tls_info();

        let boxed: BoxTransport = Box::new(transport);
        let (read_half, write_half) = tokio::io::split(boxed);

        let compression = compression.map(|context| Arc::new(StdMutex::new(context)));
        let parser = Parser::new(role, &config, compression.clone());
        let compiler = FrameCompiler::new(role, compression.clone());

        let (queue_tx, queue_rx) = mpsc::channel(MESSAGE_QUEUE_CAPACITY);

        let heartbeat = if config.heartbeat_enabled {
            heartbeat
        } else {
            None
        };

        let shared = Arc::new(ClientShared {
            id,
            config,
            metadata: StdMutex::new(ClientMetadata::new(id, compression.is_some())),
            writer: Mutex::new(FrameWriter {
                transport: write_half,
                compiler,
            }),
            close_info: StdMutex::new(None),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_seen: AtomicBool::new(false),
            peer_close: Notify::new(),
            shutdown: Notify::new(),
            on_close: StdMutex::new(Vec::new()),
            heartbeat,
            limiter,
            local_addr,
            remote_addr,
            tls,
        });

        if let Some(queue) = &shared.heartbeat {
            queue.register(id, Arc::downgrade(&shared));
        }

        let read_task = tokio::spawn(read_loop(shared.clone(), read_half, parser, queue_tx));

        Client {
            shared,
            messages: queue_rx,
            read_task,
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// The next incoming message.
    ///
    /// Returns `Ok(None)` once the connection has closed and every queued
    /// message was consumed; protocol, size-limit and IO violations arrive
    /// as an `Err` carrying the recorded close code and reason. The future
    /// is cancel safe: dropping it does not consume a message.
    pub async fn receive(&mut self) -> Result<Option<Message>, Error> {
        match self.messages.recv().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(error)) => Err(error),
            None => Ok(None),
        }
    }

    pub async fn send_text(&self, text: String) -> Result<(), Error> {
        self.shared
            .send_message(MessageKind::Text, text.into_bytes())
            .await
    }

    pub async fn send_binary(&self, data: Vec<u8>) -> Result<(), Error> {
        self.shared.send_message(MessageKind::Binary, data).await
    }

    /// Sends a text message from a finite chunk stream without buffering it
    /// whole.
    pub async fn stream_text<S>(&self, stream: S) -> Result<(), Error>
    where
        S: Stream<Item = io::Result<Vec<u8>>> + Unpin,
    {
        self.shared.stream_message(MessageKind::Text, stream).await
    }

    pub async fn stream_binary<S>(&self, stream: S) -> Result<(), Error>
    where
        S: Stream<Item = io::Result<Vec<u8>>> + Unpin,
    {
        self.shared
            .stream_message(MessageKind::Binary, stream)
            .await
    }

    /// Sends one ping, best effort. The payload carries the ping counter so
    /// the matching pong reports how many pings the peer has seen.
    pub async fn ping(&self) {
        self.shared.ping().await;
    }

    /// Starts (or joins) the close handshake. The first caller decides the
    /// code and reason; later calls return the recorded close info without
    /// touching the wire. Bounded by the configured close period.
    pub async fn close(&self, code: CloseCode, reason: &str) -> CloseInfo {
        self.shared.close(code, reason).await
    }

    /// Registers a callback fired exactly once with `(id, close_info)`
    /// after the transport has closed. Registering on an already-closed
    /// client fires immediately.
    pub fn on_close<F>(&self, callback: F)
    where
        F: FnOnce(u64, CloseInfo) + Send + 'static,
    {
        self.shared.add_on_close(Box::new(callback));
    }

    /// A point-in-time copy of the connection counters and timestamps.
    pub fn metadata(&self) -> ClientMetadata {
        self.shared.with_metadata(|metadata| metadata.clone())
    }

    pub fn close_info(&self) -> Option<CloseInfo> {
        self.shared
            .close_info
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.shared.remote_addr
    }

    pub fn tls_info(&self) -> Option<TlsInfo> {
        self.shared.tls.clone()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.read_task.abort();

        let info = CloseInfo::new(CloseCode::GOING_AWAY, "Client dropped", false);
        {
            let mut slot = self
                .shared
                .close_info
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if slot.is_some() {
                return;
            }
            *slot = Some(info.clone());
            self.shared.closing.store(true, Ordering::SeqCst);
        }

        // Tear the transport down without a handshake; there is nobody left
        // to wait for the peer's reply.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let shared = self.shared.clone();
            handle.spawn(async move {
                let mut writer = shared.writer.lock().await;
                let _ = writer.transport.shutdown().await;
                drop(writer);
                shared.finish_close(&info);
            });
        } else {
            self.shared.finish_close(&info);
        }
    }
}

struct FrameWriter {
    transport: WriteHalf<BoxTransport>,
    compiler: FrameCompiler,
}

pub(crate) struct ClientShared {
    id: u64,
    config: WebSocketConfig,
    metadata: StdMutex<ClientMetadata>,
    writer: Mutex<FrameWriter>,
    close_info: StdMutex<Option<CloseInfo>>,
    // Lifecycle latches: `closing` flips once when the close sequence is
    // claimed, `closed` once the transport is down and observers ran.
    closing: AtomicBool,
    closed: AtomicBool,
    close_seen: AtomicBool,
    peer_close: Notify,
    shutdown: Notify,
    on_close: StdMutex<Vec<OnClose>>,
    heartbeat: Option<HeartbeatQueue>,
    limiter: Option<RateLimiter>,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    tls: Option<TlsInfo>,
}

impl ClientShared {
    pub(crate) fn unanswered_pings(&self) -> u64 {
        self.with_metadata(|metadata| metadata.unanswered_pings())
    }

    fn with_metadata<R>(&self, f: impl FnOnce(&mut ClientMetadata) -> R) -> R {
        let mut metadata = self.metadata.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut metadata)
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if !self.closing.load(Ordering::SeqCst) {
            return Ok(());
        }
        let info = self
            .close_info
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        Err(match info {
            Some(info) => Error::closed(info.code, info.reason),
            None => Error::closed(CloseCode::NONE, ""),
        })
    }

    pub(crate) async fn ping(&self) {
        if self.closing.load(Ordering::SeqCst) {
            return;
        }
        let count = self.with_metadata(|metadata| {
            metadata.pings_sent += 1;
            metadata.pings_sent
        });
        let frame = Frame::control(OpCode::Ping, count.to_string().into_bytes());
        if let Err(error) = self.write_frame(frame).await {
            debug!("client {}: ping failed: {error}", self.id);
        }
    }

    pub(crate) async fn close(&self, code: CloseCode, reason: &str) -> CloseInfo {
        let mut reason = reason.as_bytes().to_vec();
        if reason.len() > MAX_CLOSE_REASON_LENGTH {
            let mut end = MAX_CLOSE_REASON_LENGTH;
            while end > 0 && reason[end] & 0b1100_0000 == 0b1000_0000 {
                end -= 1;
            }
            reason.truncate(end);
        }
        let reason = String::from_utf8(reason).unwrap_or_default();
        self.close_with(CloseInfo::new(code, reason, false)).await
    }

    /// Claims the close latch and runs the handshake; a losing caller gets
    /// the recorded info back untouched. The latch lives under the
    /// close-info lock so a loser always observes the winner's record.
    async fn close_with(&self, info: CloseInfo) -> CloseInfo {
        {
            let mut slot = self.close_info.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(existing) = slot.clone() {
                return existing;
            }
            *slot = Some(info.clone());
            self.closing.store(true, Ordering::SeqCst);
        }
        self.with_metadata(|metadata| metadata.close_info = Some(info.clone()));

        self.run_close_sequence(&info).await;
        info
    }

    async fn run_close_sequence(&self, info: &CloseInfo) {
        debug!(
            "client {}: closing with code {} ({})",
            self.id, info.code, info.reason
        );
        let deadline = Instant::now() + self.config.close_period;

        // Reciprocal close frame first, bounded by the close period.
        let payload = encode_close_payload(info);
        let frame = Frame::control(OpCode::Close, payload);
        match timeout_at(deadline, self.write_frame(frame)).await {
            Ok(Err(error)) => debug!("client {}: close frame write failed: {error}", self.id),
            Err(_) => debug!("client {}: close frame write timed out", self.id),
            Ok(Ok(())) => {}
        }

        // Wait for the peer's close (or EOF) unless it already arrived.
        if !self.close_seen.load(Ordering::SeqCst)
            && timeout_at(deadline, self.peer_close.notified()).await.is_err()
        {
            debug!("client {}: peer never answered the close", self.id);
        }

        // Transport down regardless of how the handshake went.
        if let Ok(mut writer) = timeout_at(deadline, self.writer.lock()).await {
            let _ = writer.transport.shutdown().await;
        }

        self.finish_close(info);
        self.shutdown.notify_waiters();
    }

    fn finish_close(&self, info: &CloseInfo) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.with_metadata(|metadata| {
            metadata.closed_at = Some(OffsetDateTime::now_utc());
            if metadata.close_info.is_none() {
                metadata.close_info = Some(info.clone());
            }
        });

        if let Some(queue) = &self.heartbeat {
            queue.remove(self.id);
        }

        let callbacks = {
            let mut list = self.on_close.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *list)
        };
        for callback in callbacks {
            callback(self.id, info.clone());
        }
    }

    fn add_on_close(&self, callback: OnClose) {
        let mut list = self.on_close.lock().unwrap_or_else(|e| e.into_inner());
        if self.closed.load(Ordering::SeqCst) {
            drop(list);
            let info = self
                .close_info
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
                .unwrap_or_else(|| CloseInfo::new(CloseCode::NONE, "", false));
            callback(self.id, info);
        } else {
            list.push(callback);
        }
    }

    async fn write_frame(&self, frame: Frame) -> Result<(), Error> {
        let mut writer = self.writer.lock().await;
        self.write_frame_locked(&mut writer, frame).await
    }

    async fn write_frame_locked(
        &self,
        writer: &mut FrameWriter,
        frame: Frame,
    ) -> Result<(), Error> {
        let bytes = writer.compiler.compile(frame)?;
        writer.transport.write_all(&bytes).await?;
        self.with_metadata(|metadata| metadata.note_sent(bytes.len()));
        Ok(())
    }

    async fn send_message(&self, kind: MessageKind, payload: Vec<u8>) -> Result<(), Error> {
        self.ensure_open()?;
        let opcode = data_opcode(kind);
        let split = self.config.frame_split_threshold;

        let result = async {
            let mut writer = self.writer.lock().await;
            if payload.len() <= split {
                self.write_frame_locked(&mut writer, Frame::data(opcode, payload, true))
                    .await
            } else {
                let chunks: Vec<&[u8]> = payload.chunks(split).collect();
                let last = chunks.len() - 1;
                for (index, chunk) in chunks.into_iter().enumerate() {
                    let frame_opcode = if index == 0 { opcode } else { OpCode::Continue };
                    let frame =
                        Frame::data(frame_opcode, chunk.to_vec(), index == last);
                    self.write_frame_locked(&mut writer, frame).await?;
                }
                Ok(())
            }
        }
        .await;

        match result {
            Ok(()) => {
                self.with_metadata(|metadata| metadata.note_data_sent());
                Ok(())
            }
            Err(error) => {
                self.fail_after_write_error().await;
                Err(error)
            }
        }
    }

    async fn stream_message<S>(&self, kind: MessageKind, mut stream: S) -> Result<(), Error>
    where
        S: Stream<Item = io::Result<Vec<u8>>> + Unpin,
    {
        self.ensure_open()?;
        let opcode = data_opcode(kind);
        let threshold = self.config.stream_threshold;

        // The writer lock spans the whole stream so other sends queue up
        // behind this message instead of interleaving with it.
        let mut wrote_frames = false;
        let outcome: Result<(), StreamAbort> = {
            let mut writer = self.writer.lock().await;
            let mut buffer: Vec<u8> = Vec::new();
            loop {
                // One-read-ahead: the buffered bytes are only flushed as a
                // non-final frame once more input actually exists, so a
                // stream ending on a chunk boundary still produces a final
                // data frame instead of a trailing empty one.
                match stream.next().await {
                    Some(Ok(chunk)) => {
                        buffer.extend_from_slice(&chunk);
                        let mut aborted = None;
                        while buffer.len() > threshold {
                            let rest = buffer.split_off(threshold);
                            let chunk = std::mem::replace(&mut buffer, rest);
                            let frame_opcode =
                                if wrote_frames { OpCode::Continue } else { opcode };
                            let written = self
                                .write_frame_locked(
                                    &mut writer,
                                    Frame::data(frame_opcode, chunk, false),
                                )
                                .await;
                            if let Err(error) = written {
                                aborted = Some(error);
                                break;
                            }
                            wrote_frames = true;
                        }
                        if let Some(error) = aborted {
                            break Err(StreamAbort::Transport(error));
                        }
                    }
                    Some(Err(error)) => break Err(StreamAbort::Source(error)),
                    None => {
                        let frame_opcode = if wrote_frames { OpCode::Continue } else { opcode };
                        let written = self
                            .write_frame_locked(
                                &mut writer,
                                Frame::data(frame_opcode, buffer, true),
                            )
                            .await;
                        break match written {
                            Ok(()) => Ok(()),
                            Err(error) => Err(StreamAbort::Transport(error)),
                        };
                    }
                }
            }
        };

        match outcome {
            Ok(()) => {
                self.with_metadata(|metadata| metadata.note_data_sent());
                Ok(())
            }
            Err(StreamAbort::Source(error)) => {
                if wrote_frames {
                    // Fragments are already on the wire and the message can
                    // never be completed; the connection is unusable.
                    self.close_with(CloseInfo::new(
                        CloseCode::UNEXPECTED_SERVER_ERROR,
                        "Stream source failed",
                        false,
                    ))
                    .await;
                }
                Err(error.into())
            }
            Err(StreamAbort::Transport(error)) => {
                self.fail_after_write_error().await;
                Err(error)
            }
        }
    }

    async fn fail_after_write_error(&self) {
        warn!("client {}: write failed, closing", self.id);
        self.close_with(CloseInfo::new(
            CloseCode::ABNORMAL_CLOSE,
            "TCP connection closed unexpectedly",
            false,
        ))
        .await;
    }

    fn note_peer_gone(&self) {
        self.close_seen.store(true, Ordering::SeqCst);
        self.peer_close.notify_one();
    }
}

enum StreamAbort {
    Source(io::Error),
    Transport(Error),
}

fn data_opcode(kind: MessageKind) -> OpCode {
    match kind {
        MessageKind::Text => OpCode::Text,
        MessageKind::Binary => OpCode::Binary,
    }
}

fn encode_close_payload(info: &CloseInfo) -> Vec<u8> {
    // NONE and the other reserved codes (1006 among them) may be recorded
    // locally but must never travel in a close frame.
    if !CloseCode::is_valid_on_wire(info.code.code()) {
        return Vec::new();
    }
    let mut payload = info.code.code().to_be_bytes().to_vec();
    payload.extend_from_slice(info.reason.as_bytes());
    payload
}

pub(crate) fn decode_close_payload(payload: &[u8]) -> Result<(CloseCode, String), Error> {
    if payload.is_empty() {
        return Ok((CloseCode::NONE, String::new()));
    }
    if payload.len() == 1 {
        return Err(Error::InvalidClosePayload);
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    if !CloseCode::is_valid_on_wire(code) {
        return Err(Error::InvalidCloseCode);
    }
    let reason =
        String::from_utf8(payload[2..].to_vec()).map_err(|_| Error::InvalidTextData)?;
    Ok((CloseCode::new(code), reason))
}

enum LoopAction {
    Continue,
    Stop,
}

async fn read_loop(
    shared: Arc<ClientShared>,
    mut read_half: ReadHalf<BoxTransport>,
    mut parser: Parser,
    queue: Sender<Result<Message, Error>>,
) {
    let mut buffer = vec![0u8; 8192];
    let mut assembly: Option<(MessageKind, ChunkSender)> = None;

    'outer: loop {
        if shared.closed.load(Ordering::SeqCst) {
            break;
        }

        let read = tokio::select! {
            _ = shared.shutdown.notified() => break,
            result = read_half.read(&mut buffer) => result,
        };

        match read {
            Ok(0) => {
                shared.note_peer_gone();
                if !shared.closing.load(Ordering::SeqCst) {
                    shared
                        .close_with(CloseInfo::new(
                            CloseCode::ABNORMAL_CLOSE,
                            "TCP connection closed unexpectedly",
                            true,
                        ))
                        .await;
                }
                break;
            }
            Ok(n) => {
                shared.with_metadata(|metadata| metadata.note_read(n));
                if let Some(heartbeat) = &shared.heartbeat {
                    heartbeat.update(shared.id);
                }
                if let Some(limiter) = &shared.limiter {
                    limiter.notify_bytes_received(shared.id, n).await;
                }

                let frames = match parser.push(&buffer[..n]) {
                    Ok(frames) => frames,
                    Err(error) => {
                        warn!("client {}: protocol failure: {error}", shared.id);
                        let info = CloseInfo::new(error.close_code(), error.to_string(), false);
                        fail_assembly(&mut assembly, &info);
                        let _ = queue.send(Err(error)).await;
                        shared.close_with(info).await;
                        break;
                    }
                };

                if let Some(limiter) = &shared.limiter {
                    limiter
                        .notify_frames_received(shared.id, frames.len())
                        .await;
                }

                for frame in frames {
                    shared.with_metadata(|metadata| metadata.frames_received += 1);
                    match handle_frame(&shared, frame, &queue, &mut assembly).await {
                        LoopAction::Continue => {}
                        LoopAction::Stop => break 'outer,
                    }
                }
            }
            Err(error) => {
                shared.note_peer_gone();
                if !shared.closing.load(Ordering::SeqCst) {
                    let info = CloseInfo::new(CloseCode::ABNORMAL_CLOSE, error.to_string(), true);
                    fail_assembly(&mut assembly, &info);
                    let _ = queue.send(Err(error.into())).await;
                    shared.close_with(info).await;
                }
                break;
            }
        }
    }

    if let Some(info) = shared
        .close_info
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
    {
        fail_assembly(&mut assembly, &info);
    }
}

async fn handle_frame(
    shared: &Arc<ClientShared>,
    frame: Frame,
    queue: &Sender<Result<Message, Error>>,
    assembly: &mut Option<(MessageKind, ChunkSender)>,
) -> LoopAction {
    match frame.opcode {
        OpCode::Close => {
            shared.close_seen.store(true, Ordering::SeqCst);
            shared.peer_close.notify_one();

            if shared.closing.load(Ordering::SeqCst) {
                // We initiated; the reply completes our handshake and the
                // close sequence owns the rest of the teardown.
                return LoopAction::Stop;
            }

            let info = match decode_close_payload(&frame.payload) {
                Ok((code, reason)) => CloseInfo::new(code, reason, true),
                Err(error) => CloseInfo::new(error.close_code(), error.to_string(), true),
            };
            fail_assembly(assembly, &info);
            shared.close_with(info).await;
            LoopAction::Stop
        }
        OpCode::Ping => {
            shared.with_metadata(|metadata| metadata.pings_received += 1);
            let pong = Frame::control(OpCode::Pong, frame.payload);
            match shared.write_frame(pong).await {
                Ok(()) => {
                    shared.with_metadata(|metadata| metadata.pongs_sent += 1);
                    LoopAction::Continue
                }
                Err(error) => {
                    debug!("client {}: pong write failed: {error}", shared.id);
                    shared.fail_after_write_error().await;
                    LoopAction::Stop
                }
            }
        }
        OpCode::Pong => {
            // Numeric payloads echo our ping counter; anything else is
            // still a liveness signal but carries no count.
            if let Some(count) = std::str::from_utf8(&frame.payload)
                .ok()
                .and_then(|text| text.parse::<u64>().ok())
            {
                shared.with_metadata(|metadata| metadata.note_pong_received(count));
            } else {
                shared.with_metadata(|metadata| metadata.note_heartbeat());
            }
            LoopAction::Continue
        }
        OpCode::Text | OpCode::Binary => {
            let kind = if frame.opcode == OpCode::Text {
                MessageKind::Text
            } else {
                MessageKind::Binary
            };

            if frame.final_fragment {
                shared.with_metadata(|metadata| metadata.note_data_read());
                let message = Message::buffered(kind, frame.payload);
                if queue.send(Ok(message)).await.is_err() {
                    return LoopAction::Stop;
                }
            } else {
                let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_QUEUE_CAPACITY);
                let _ = chunk_tx.send(Ok(frame.payload)).await;
                *assembly = Some((kind, chunk_tx));
                let message = Message::streaming(kind, chunk_rx);
                if queue.send(Ok(message)).await.is_err() {
                    return LoopAction::Stop;
                }
            }
            LoopAction::Continue
        }
        OpCode::Continue => {
            let final_fragment = frame.final_fragment;
            if let Some((_, chunk_tx)) = assembly.as_ref() {
                // A dropped message handle just discards the rest of the
                // fragments; the connection stays healthy.
                let _ = chunk_tx.send(Ok(frame.payload)).await;
            }
            if final_fragment {
                *assembly = None;
                shared.with_metadata(|metadata| metadata.note_data_read());
            }
            LoopAction::Continue
        }
    }
}

fn fail_assembly(assembly: &mut Option<(MessageKind, ChunkSender)>, info: &CloseInfo) {
    if let Some((_, chunk_tx)) = assembly.take() {
        let _ = chunk_tx.try_send(Err(Error::closed(info.code, info.reason.clone())));
    }
}
