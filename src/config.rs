use std::time::Duration;

/// Tunables for a single endpoint.
///
/// `Default` carries the server-oriented values; [`WebSocketConfig::client`]
/// raises the size limits and effectively disables the inbound rate limits,
/// since a client only ever reads from the one server it chose to talk to.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Bytes buffered from a streamed send before a frame is emitted.
    pub stream_threshold: usize,
    /// Maximum payload carried by a single outgoing frame; larger messages
    /// are fragmented.
    pub frame_split_threshold: usize,
    /// Maximum accepted payload of a single incoming frame.
    pub frame_size_limit: usize,
    /// Maximum accepted aggregate size of a fragmented incoming message.
    pub message_size_limit: usize,
    /// Inbound byte budget per one-second window.
    pub bytes_per_second_limit: usize,
    /// Inbound frame budget per one-second window.
    pub frames_per_second_limit: usize,
    /// Reject incoming binary messages.
    pub text_only: bool,
    /// Enforce UTF-8 on incoming text messages.
    pub validate_utf8: bool,
    /// Bound on each half of the close handshake.
    pub close_period: Duration,
    /// Negotiate permessage-deflate during the upgrade.
    pub compression_enabled: bool,
    /// Ping idle peers periodically.
    pub heartbeat_enabled: bool,
    /// Interval between heartbeat pings.
    pub heartbeat_period: Duration,
    /// Unanswered pings tolerated before the connection is closed with a
    /// policy violation.
    pub queued_ping_limit: u32,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            stream_threshold: 32768,
            frame_split_threshold: 32768,
            frame_size_limit: 2097152,
            message_size_limit: 10485760,
            bytes_per_second_limit: 1048576,
            frames_per_second_limit: 100,
            text_only: false,
            validate_utf8: true,
            close_period: Duration::from_secs(3),
            compression_enabled: true,
            heartbeat_enabled: true,
            heartbeat_period: Duration::from_secs(10),
            queued_ping_limit: 3,
        }
    }
}

impl WebSocketConfig {
    pub fn client() -> Self {
        WebSocketConfig {
            frame_size_limit: 104857600,
            message_size_limit: 1073741824,
            bytes_per_second_limit: usize::MAX,
            frames_per_second_limit: usize::MAX,
            ..WebSocketConfig::default()
        }
    }
}
