use std::time::Duration;

/// Tunables for a single WebSocket connection, shared by every client the
/// server accepts. Limits, fragment size and the negotiated RSV mask live
/// here as plain fields of one cohesive struct rather than as separately
/// swappable subobjects.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Raw HTTP request bytes admitted before the handshake buffer is
    /// declared over budget and answered with `413`.
    pub max_handshake_bytes: usize,
    /// Per-frame inbound payload limit. The protocol floor is 125 bytes
    /// (a control frame's maximum payload); configuring less than that
    /// would make every control frame untransportable.
    pub max_frame_payload: usize,
    /// Assembled (post-fragmentation) message inbound limit.
    pub max_message_bytes: usize,
    /// Outbound fragmentation granularity.
    pub fragment_size: usize,
    /// RSV bits a negotiated extension has claimed; any RSV bit outside
    /// this mask on an inbound frame is a protocol error. Zero unless an
    /// extension hook sets it during the handshake.
    pub rsv_mask: u8,
    /// Upper bound on how long `write_all` will keep retrying a
    /// would-block write before giving up on a stalled peer. `None` means
    /// retry indefinitely (the teacher's default).
    pub io_timeout: Option<Duration>,
}

pub const MIN_FRAME_PAYLOAD: usize = 125;

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            max_handshake_bytes: 4096,
            max_frame_payload: 128 * 1024,
            max_message_bytes: 10 * 1024 * 1024,
            fragment_size: 128 * 1024,
            rsv_mask: 0,
            io_timeout: None,
        }
    }
}

impl WebSocketConfig {
    /// Clamps `max_frame_payload` to the protocol floor so a misconfigured
    /// server can never reject every control frame it receives.
    pub fn max_frame_payload(&self) -> usize {
        self.max_frame_payload.max(MIN_FRAME_PAYLOAD)
    }
}

/// Binds the listener address alongside the per-connection tunables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: std::net::SocketAddr,
    pub web_socket_config: WebSocketConfig,
}

impl ServerConfig {
    pub fn new(bind_addr: std::net::SocketAddr) -> Self {
        Self {
            bind_addr,
            web_socket_config: WebSocketConfig::default(),
        }
    }

    pub fn with_web_socket_config(mut self, config: WebSocketConfig) -> Self {
        self.web_socket_config = config;
        self
    }
}
