use crate::config::WebSocketConfig;
use crate::error::{close_code, Error, ProtocolError, Result};
use crate::frame::{Frame, OpCode};

/// What a fully-assembled inbound frame (or message) resolves to once the
/// state machine has processed it. Control frames are delivered whole and
/// immediately; data frames are delivered only once their final fragment
/// has arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(u16, Vec<u8>),
}

/// Lets a `ClientHandler` reply without depending on the concrete
/// `WebSocketClient`/transport types — the capability object is the seam
/// between the protocol core and whatever owns the socket.
pub trait Responder {
    /// Sends a TEXT message, fragmenting per the connection's configured
    /// `fragment_size`. The natural way a `ClientHandler` replies in-band
    /// (an echo server's `on_text` calls this with the text it received).
    fn send_text(&mut self, text: &str) -> Result<()>;
    fn send_binary(&mut self, data: &[u8]) -> Result<()>;
    fn send_pong(&mut self, payload: Vec<u8>) -> Result<()>;
    /// Sends a CLOSE frame (if appropriate) and tears the connection down,
    /// exactly as `WebSocketClient::close` does in §4.7.
    fn initiate_close(&mut self, code: u16, reason: Vec<u8>);
    /// Sets the RSV mask a negotiated extension has claimed. Meant to be
    /// called at most once, from `on_state_ok`, before any frame is read.
    fn set_rsv_mask(&mut self, rsv_mask: u8);
}

/// User overrides for the six extension points of §6/§9, modeled as a
/// capability object injected at construction rather than an inheritance
/// chain. Every method has the default documented in the spec; a consumer
/// only overrides what it cares about.
#[allow(unused_variables)]
pub trait ClientHandler {
    fn on_state_ok(&mut self, responder: &mut dyn Responder) {}

    fn on_text(&mut self, responder: &mut dyn Responder, text: String) {
        responder.initiate_close(close_code::UNHANDLED_DATA, b"text frames not handled".to_vec());
    }

    fn on_binary(&mut self, responder: &mut dyn Responder, data: Vec<u8>) {
        responder.initiate_close(
            close_code::UNHANDLED_DATA,
            b"binary frames not handled".to_vec(),
        );
    }

    fn on_ping(&mut self, responder: &mut dyn Responder, payload: Vec<u8>) {
        let _ = responder.send_pong(payload);
    }

    fn on_pong(&mut self, responder: &mut dyn Responder, payload: Vec<u8>) {}

    fn on_close(&mut self, responder: &mut dyn Responder, code: u16, reason: Vec<u8>) {
        responder.initiate_close(code, reason);
    }
}

/// Default `ClientHandler` used when a consumer doesn't supply one: every
/// hook falls back to the documented default behavior.
pub struct DefaultHandler;
impl ClientHandler for DefaultHandler {}

/// Per-connection inbound fragment assembly, and outbound fragmentation and
/// framing. One instance lives for the lifetime of a connection's OK state.
pub struct FrameHandler {
    continue_opcode: Option<OpCode>,
    assembly_buffer: Vec<u8>,
    max_message_bytes: usize,
    fragment_size: usize,
}

impl FrameHandler {
    pub fn new(config: &WebSocketConfig) -> Self {
        Self {
            continue_opcode: None,
            assembly_buffer: Vec::new(),
            max_message_bytes: config.max_message_bytes,
            fragment_size: config.fragment_size,
        }
    }

    /// Feeds one already-validated frame through the inbound state machine.
    /// Returns `Ok(None)` for a non-final fragment (still accumulating) or
    /// `Ok(Some(event))` once a whole message/control frame is ready for
    /// dispatch to a `ClientHandler`.
    pub fn on_frame(&mut self, frame: Frame) -> std::result::Result<Option<InboundEvent>, ProtocolError> {
        if frame.opcode.is_control() {
            return self.on_control_frame(frame).map(Some);
        }

        match frame.opcode {
            OpCode::Continuation => {
                if self.continue_opcode.is_none() {
                    return Err(ProtocolError::protocol_error(
                        "CONTINUATION frame without a prior fragment",
                    ));
                }
            }
            OpCode::Text | OpCode::Binary => {
                if self.continue_opcode.is_some() {
                    return Err(ProtocolError::protocol_error(
                        "data frame interleaved with an in-progress fragmented message",
                    ));
                }
            }
            OpCode::Close | OpCode::Ping | OpCode::Pong => unreachable!("handled above"),
        }

        if self.assembly_buffer.len() + frame.payload.len() > self.max_message_bytes {
            self.continue_opcode = None;
            self.assembly_buffer.clear();
            return Err(ProtocolError::too_large(format!(
                "assembled message would exceed max_message_bytes {}",
                self.max_message_bytes
            )));
        }

        let message_opcode = match frame.opcode {
            OpCode::Continuation => self.continue_opcode.expect("checked above"),
            other => other,
        };
        self.assembly_buffer.extend_from_slice(&frame.payload);

        if !frame.final_fragment {
            self.continue_opcode = Some(message_opcode);
            return Ok(None);
        }

        let payload = std::mem::take(&mut self.assembly_buffer);
        self.continue_opcode = None;

        let event = match message_opcode {
            OpCode::Text => {
                let text = String::from_utf8(payload)
                    .map_err(|_| ProtocolError::bad_data("text message is not valid UTF-8"))?;
                InboundEvent::Text(text)
            }
            OpCode::Binary => InboundEvent::Binary(payload),
            _ => unreachable!("only TEXT/BINARY reach here"),
        };
        Ok(Some(event))
    }

    fn on_control_frame(&mut self, frame: Frame) -> std::result::Result<InboundEvent, ProtocolError> {
        match frame.opcode {
            OpCode::Close => {
                let (code, reason) = frame.close_code()?;
                let reason = String::from_utf8(reason)
                    .map_err(|_| ProtocolError::bad_data("close reason is not valid UTF-8"))?
                    .into_bytes();
                Ok(InboundEvent::Close(code, reason))
            }
            OpCode::Ping => Ok(InboundEvent::Ping(frame.payload)),
            OpCode::Pong => Ok(InboundEvent::Pong(frame.payload)),
            _ => unreachable!("only control opcodes reach here"),
        }
    }

    /// Fragments `payload` into one or more outbound frames carrying
    /// `opcode`: the first frame carries `opcode`, every following frame
    /// carries CONTINUATION, and the last has `final_fragment = true`. A
    /// zero-length payload still yields exactly one final frame.
    pub fn write(&self, opcode: OpCode, payload: &[u8]) -> Vec<Frame> {
        if payload.is_empty() {
            return vec![Frame::new(true, opcode, Vec::new())];
        }

        let chunks: Vec<&[u8]> = payload.chunks(self.fragment_size.max(1)).collect();
        let last = chunks.len() - 1;
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let frame_opcode = if i == 0 { opcode } else { OpCode::Continuation };
                Frame::new(i == last, frame_opcode, chunk.to_vec())
            })
            .collect()
    }
}

/// Encodes one outbound frame per §4.6: bit-exact header layout, never
/// masked (server → client), `final=true` mandatory for control opcodes.
/// A fragmented control frame here is a programmer error in the caller
/// (every control frame this crate builds is always final), so it
/// surfaces as `Error::Internal` rather than a `ProtocolError`. It must
/// never be mistaken for a peer protocol violation and answered with a
/// wire CLOSE frame.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>> {
    if frame.opcode.is_control() && !frame.final_fragment {
        return Err(Error::Internal(
            "control frames must not be fragmented".to_string(),
        ));
    }

    let mut out = Vec::with_capacity(frame.payload.len() + 14);
    let first_byte = (frame.final_fragment as u8) << 7 | (frame.rsv << 4) | frame.opcode.as_u8();
    out.push(first_byte);

    let len = frame.payload.len();
    if len <= 125 {
        out.push(len as u8);
    } else if len <= 0xFFFF {
        out.push(126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    out.extend_from_slice(&frame.payload);
    Ok(out)
}

pub fn encode_close(code: u16, reason: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(reason);
    encode_frame(&Frame::new(true, OpCode::Close, payload)).expect("close frame is always final")
}

pub fn encode_ping(payload: &[u8]) -> Vec<u8> {
    encode_frame(&Frame::new(true, OpCode::Ping, payload.to_vec()))
        .expect("ping frame is always final")
}

pub fn encode_pong(payload: &[u8]) -> Vec<u8> {
    encode_frame(&Frame::new(true, OpCode::Pong, payload.to_vec()))
        .expect("pong frame is always final")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WebSocketConfig {
        WebSocketConfig {
            max_message_bytes: 1024,
            fragment_size: 4,
            ..Default::default()
        }
    }

    #[test]
    fn single_final_frame_delivers_immediately() {
        let mut handler = FrameHandler::new(&config());
        let event = handler
            .on_frame(Frame::new(true, OpCode::Text, b"hi".to_vec()))
            .unwrap();
        assert_eq!(event, Some(InboundEvent::Text("hi".into())));
    }

    #[test]
    fn fragmented_message_waits_for_final_frame() {
        let mut handler = FrameHandler::new(&config());
        assert_eq!(
            handler
                .on_frame(Frame::new(false, OpCode::Text, b"ab".to_vec()))
                .unwrap(),
            None
        );
        assert_eq!(
            handler
                .on_frame(Frame::new(false, OpCode::Continuation, b"cd".to_vec()))
                .unwrap(),
            None
        );
        let event = handler
            .on_frame(Frame::new(true, OpCode::Continuation, b"ef".to_vec()))
            .unwrap();
        assert_eq!(event, Some(InboundEvent::Text("abcdef".into())));
    }

    #[test]
    fn continuation_without_start_is_protocol_error() {
        let mut handler = FrameHandler::new(&config());
        assert!(handler
            .on_frame(Frame::new(true, OpCode::Continuation, Vec::new()))
            .is_err());
    }

    #[test]
    fn interleaved_data_frame_is_protocol_error() {
        let mut handler = FrameHandler::new(&config());
        handler
            .on_frame(Frame::new(false, OpCode::Text, b"ab".to_vec()))
            .unwrap();
        let err = handler
            .on_frame(Frame::new(false, OpCode::Binary, b"x".to_vec()))
            .unwrap_err();
        assert_eq!(err.code, close_code::PROTOCOL_ERROR);
    }

    #[test]
    fn invalid_utf8_text_is_bad_data() {
        let mut handler = FrameHandler::new(&config());
        let err = handler
            .on_frame(Frame::new(true, OpCode::Text, vec![0xC3, 0x28]))
            .unwrap_err();
        assert_eq!(err.code, close_code::BAD_DATA);
    }

    #[test]
    fn oversize_message_is_too_large() {
        let mut handler = FrameHandler::new(&config());
        let err = handler
            .on_frame(Frame::new(true, OpCode::Binary, vec![0u8; 2000]))
            .unwrap_err();
        assert_eq!(err.code, close_code::TOO_LARGE);
    }

    #[test]
    fn close_frame_delivers_code_and_reason() {
        let mut handler = FrameHandler::new(&config());
        let mut payload = 1000u16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"bye");
        let event = handler
            .on_frame(Frame::new(true, OpCode::Close, payload))
            .unwrap();
        assert_eq!(event, Some(InboundEvent::Close(1000, b"bye".to_vec())));
    }

    #[test]
    fn write_fragments_at_fragment_size_with_continuation() {
        let handler = FrameHandler::new(&config());
        let frames = handler.write(OpCode::Text, b"abcdefgh");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].opcode, OpCode::Text);
        assert!(!frames[0].final_fragment);
        assert_eq!(frames[1].opcode, OpCode::Continuation);
        assert!(frames[1].final_fragment);
    }

    #[test]
    fn write_empty_payload_is_one_final_frame() {
        let handler = FrameHandler::new(&config());
        let frames = handler.write(OpCode::Text, b"");
        assert_eq!(frames.len(), 1);
        assert!(frames[0].final_fragment);
    }

    #[test]
    fn encoded_frames_never_set_the_mask_bit() {
        let frame = Frame::new(true, OpCode::Text, b"hi".to_vec());
        let encoded = encode_frame(&frame).unwrap();
        assert_eq!(encoded[1] & 0x80, 0);
    }

    #[test]
    fn fragmented_control_frame_cannot_be_encoded() {
        let frame = Frame::new(false, OpCode::Ping, Vec::new());
        assert!(encode_frame(&frame).is_err());
    }

    #[test]
    fn encode_close_packs_code_and_reason() {
        let bytes = encode_close(1000, b"bye");
        assert_eq!(bytes[0], 0x88); // FIN + CLOSE
        assert_eq!(&bytes[2..4], &1000u16.to_be_bytes());
        assert_eq!(&bytes[4..], b"bye");
    }
}
