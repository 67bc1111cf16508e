use std::io;
use std::net::SocketAddr;

use mio::net::TcpStream;

use crate::config::WebSocketConfig;
use crate::error::{close_code, Error, Result};
use crate::frame::OpCode;
use crate::frame_handler::{
    encode_close, encode_frame, ClientHandler, DefaultHandler, FrameHandler, InboundEvent,
    Responder,
};
use crate::frame_reader::FrameReader;
use crate::handshake::Handshake;
use crate::reactor::ReactiveHandle;
use crate::transport::{RecvOutcome, Transport};

/// Largest chunk pulled off the socket per `recv_nonblocking` call while
/// draining a readable connection.
const RECV_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Handshake,
    Ok,
    Closed,
}

/// One accepted peer, owning its transport and the full per-connection
/// pipeline: the handshake parser until OK, then the frame reader and frame
/// handler for the lifetime of the connection.
pub struct WebSocketClient {
    transport: Transport,
    handshake: Handshake,
    frame_reader: FrameReader,
    frame_handler: FrameHandler,
    handler: Box<dyn ClientHandler>,
    state: ConnectionState,
}

impl WebSocketClient {
    pub fn new(stream: TcpStream, config: &WebSocketConfig, handler: Box<dyn ClientHandler>) -> Self {
        Self {
            transport: Transport::new(stream, config.io_timeout),
            handshake: Handshake::new(config.max_handshake_bytes),
            frame_reader: FrameReader::new(config.max_frame_payload(), config.rsv_mask),
            frame_handler: FrameHandler::new(config),
            handler,
            state: ConnectionState::Handshake,
        }
    }

    pub fn id(&self) -> usize {
        self.transport.id() as usize
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.state, ConnectionState::Closed)
    }

    pub fn peer_name(&self) -> io::Result<SocketAddr> {
        self.transport.peer_name()
    }

    pub fn send_text(&mut self, text: &str) -> Result<()> {
        self.send(OpCode::Text, text.as_bytes())
    }

    pub fn send_binary(&mut self, data: &[u8]) -> Result<()> {
        self.send(OpCode::Binary, data)
    }

    /// Fragments `payload` per the configured `fragment_size` and writes
    /// every resulting frame. Only valid once the connection is OK.
    pub fn send(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        if !matches!(self.state, ConnectionState::Ok) {
            return Err(Error::Internal(
                "cannot write to a connection that is not in the OK state".into(),
            ));
        }
        for frame in self.frame_handler.write(opcode, payload) {
            let bytes = encode_frame(&frame)?;
            self.transport.write_all(&bytes)?;
        }
        Ok(())
    }

    fn write_control(&mut self, opcode: OpCode, payload: Vec<u8>) -> Result<()> {
        let bytes = encode_frame(&crate::frame::Frame::new(true, opcode, payload))?;
        self.transport.write_all(&bytes)?;
        Ok(())
    }

    /// RFC 6455 close. If `code >= 1000` and the connection is still OK, a
    /// CLOSE frame is written first. All three teardown steps (attempt the
    /// wire notification, close the transport, mark CLOSED) run
    /// unconditionally, even if the write fails.
    pub fn close(&mut self, code: u16, reason: Vec<u8>) {
        if matches!(self.state, ConnectionState::Closed) {
            return;
        }
        if code >= 1000 && matches!(self.state, ConnectionState::Ok) {
            let bytes = encode_close(code, &reason);
            let _ = self.transport.write_all(&bytes);
        }
        self.state = ConnectionState::Closed;
        self.transport.close();
    }

    fn drive(&mut self) -> Result<()> {
        loop {
            match self.transport.recv_nonblocking(RECV_CHUNK)? {
                RecvOutcome::WouldBlock => return Ok(()),
                RecvOutcome::Eof => {
                    self.close(0, Vec::new());
                    return Ok(());
                }
                RecvOutcome::Data(bytes) => {
                    match self.state {
                        ConnectionState::Handshake => self.drive_handshake(&bytes)?,
                        ConnectionState::Ok => self.drive_frames(&bytes)?,
                        ConnectionState::Closed => return Ok(()),
                    }
                    if matches!(self.state, ConnectionState::Closed) {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn drive_handshake(&mut self, bytes: &[u8]) -> Result<()> {
        self.handshake.feed(bytes);
        match self.handshake.try_complete() {
            Ok(None) => Ok(()),
            Ok(Some(response)) => {
                self.transport.write_all(&response)?;
                self.state = ConnectionState::Ok;
                let mut handler = std::mem::replace(&mut self.handler, Box::new(DefaultHandler));
                handler.on_state_ok(self);
                self.handler = handler;
                Ok(())
            }
            Err(failure) => {
                let _ = self.transport.write_all(&failure.response);
                Err(Error::Handshake(failure.error))
            }
        }
    }

    fn drive_frames(&mut self, bytes: &[u8]) -> Result<()> {
        self.frame_reader.feed(bytes);
        loop {
            let frame = match self.frame_reader.next_frame()? {
                Some(frame) => frame,
                None => return Ok(()),
            };
            if let Some(event) = self.frame_handler.on_frame(frame)? {
                self.dispatch_event(event);
                if matches!(self.state, ConnectionState::Closed) {
                    return Ok(());
                }
            }
        }
    }

    fn dispatch_event(&mut self, event: InboundEvent) {
        let mut handler = std::mem::replace(&mut self.handler, Box::new(DefaultHandler));
        match event {
            InboundEvent::Text(text) => handler.on_text(self, text),
            InboundEvent::Binary(data) => handler.on_binary(self, data),
            InboundEvent::Ping(payload) => handler.on_ping(self, payload),
            InboundEvent::Pong(payload) => handler.on_pong(self, payload),
            InboundEvent::Close(code, reason) => handler.on_close(self, code, reason),
        }
        self.handler = handler;
    }

    fn handle_error(&mut self, err: &Error) {
        if matches!(self.state, ConnectionState::Closed) {
            return;
        }
        match err {
            Error::Protocol(protocol_error) => {
                self.close(protocol_error.code, protocol_error.message.clone().into_bytes());
            }
            // The status-line response was already written by drive_handshake;
            // codes below 1000 never produce a wire-level CLOSE frame.
            Error::Handshake(_) => self.close(0, Vec::new()),
            Error::Io { .. } | Error::Internal(_) => self.close(close_code::INTERNAL, Vec::new()),
        }
    }
}

impl Responder for WebSocketClient {
    fn send_text(&mut self, text: &str) -> Result<()> {
        self.send_text(text)
    }

    fn send_binary(&mut self, data: &[u8]) -> Result<()> {
        self.send_binary(data)
    }

    fn send_pong(&mut self, payload: Vec<u8>) -> Result<()> {
        self.write_control(OpCode::Pong, payload)
    }

    fn initiate_close(&mut self, code: u16, reason: Vec<u8>) {
        self.close(code, reason);
    }

    fn set_rsv_mask(&mut self, rsv_mask: u8) {
        self.frame_reader.set_rsv_mask(rsv_mask);
    }
}

impl ReactiveHandle for WebSocketClient {
    fn id(&self) -> usize {
        self.id()
    }

    fn is_open(&self) -> bool {
        self.is_open()
    }

    fn source(&mut self) -> &mut dyn mio::event::Source {
        self.transport.stream_mut()
    }

    fn on_readable(&mut self) -> Result<()> {
        match self.drive() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.handle_error(&err);
                Err(err)
            }
        }
    }

    fn on_out_of_band(&mut self) -> Result<()> {
        let err = Error::Protocol(crate::error::ProtocolError::protocol_error(
            "out-of-band data",
        ));
        self.close(close_code::PROTOCOL_ERROR, b"out-of-band data".to_vec());
        Err(err)
    }

    fn force_close(&mut self) {
        if !matches!(self.state, ConnectionState::Closed) {
            self.close(close_code::INTERNAL, Vec::new());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener as StdListener;

    const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    fn connected_pair() -> (WebSocketClient, std::net::TcpStream) {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = std::net::TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        let config = WebSocketConfig::default();
        let client = WebSocketClient::new(
            TcpStream::from_std(server),
            &config,
            Box::new(DefaultHandler),
        );
        (client, peer)
    }

    fn handshake_request() -> String {
        format!(
            "GET /chat HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {KEY}\r\nSec-WebSocket-Version: 13\r\n\r\n"
        )
    }

    fn read_available(peer: &mut std::net::TcpStream) -> Vec<u8> {
        std::thread::sleep(std::time::Duration::from_millis(20));
        peer.set_nonblocking(true).unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match peer.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        buf
    }

    #[test]
    fn successful_handshake_transitions_to_ok_and_writes_101() {
        let (mut client, mut peer) = connected_pair();
        peer.write_all(handshake_request().as_bytes()).unwrap();

        client.on_readable().unwrap();

        assert!(matches!(client.state, ConnectionState::Ok));
        let response = String::from_utf8(read_available(&mut peer)).unwrap();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    }

    #[test]
    fn text_frame_after_handshake_closes_with_unhandled_data_by_default() {
        let (mut client, mut peer) = connected_pair();
        peer.write_all(handshake_request().as_bytes()).unwrap();
        client.on_readable().unwrap();
        let _ = read_available(&mut peer);

        let mut frame = vec![0x81u8, 0x82, 1, 2, 3, 4];
        for (i, b) in b"hi".iter().enumerate() {
            frame.push(b ^ [1, 2, 3, 4][i % 4]);
        }
        peer.write_all(&frame).unwrap();
        client.on_readable().unwrap();

        assert!(!client.is_open());
        let response = read_available(&mut peer);
        assert_eq!(response[0], 0x88); // FIN + CLOSE
        let code = u16::from_be_bytes([response[2], response[3]]);
        assert_eq!(code, close_code::UNHANDLED_DATA);
    }

    #[test]
    fn malformed_handshake_is_rejected_with_400_and_closes() {
        let (mut client, mut peer) = connected_pair();
        peer.write_all(b"GET /chat HTTP/1.0\r\n\r\n").unwrap();

        let result = client.on_readable();
        assert!(result.is_err());
        assert!(!client.is_open());
        let response = String::from_utf8(read_available(&mut peer)).unwrap();
        assert!(response.starts_with("HTTP/1.1 400"));
    }

    #[test]
    fn peer_shutdown_before_handshake_closes_without_error() {
        let (mut client, peer) = connected_pair();
        drop(peer);
        client.on_readable().unwrap();
        assert!(!client.is_open());
    }

    #[test]
    fn out_of_band_is_fatal_with_protocol_error() {
        let (mut client, _peer) = connected_pair();
        assert!(client.on_out_of_band().is_err());
        assert!(!client.is_open());
    }

    #[test]
    fn send_before_ok_state_is_rejected() {
        let (mut client, _peer) = connected_pair();
        assert!(client.send_text("too early").is_err());
    }

    #[test]
    fn close_is_idempotent() {
        let (mut client, _peer) = connected_pair();
        client.close(close_code::NORMAL, Vec::new());
        assert!(!client.is_open());
        client.close(close_code::NORMAL, Vec::new());
        assert!(!client.is_open());
    }
}
