use crate::error::ProtocolError;

/// A WebSocket opcode (RFC 6455 §5.2). Values 0x3..=0x7 and 0xB..=0xF are
/// reserved and must never reach this type — `OpCode::from` rejects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(ProtocolError::protocol_error(format!(
                "reserved opcode 0x{other:x}"
            ))),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    /// Control opcodes (>= 0x8) are always final and never fragmented,
    /// and carry at most 125 bytes of payload.
    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// An immutable, fully-validated WebSocket frame. `FrameReader` only ever
/// hands out frames that already satisfy the invariants below; `FrameHandler`
/// only ever builds frames that satisfy them on the way out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub final_fragment: bool,
    pub rsv: u8,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(final_fragment: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            final_fragment,
            rsv: 0,
            opcode,
            payload,
        }
    }

    /// Decodes a CLOSE frame's payload into `(code, reason)` per §4.5: an
    /// empty payload means code 1000 with no reason; otherwise the first two
    /// bytes are a big-endian close code and the rest is the UTF-8 reason.
    pub fn close_code(&self) -> Result<(u16, Vec<u8>), ProtocolError> {
        debug_assert_eq!(self.opcode, OpCode::Close);
        if self.payload.is_empty() {
            return Ok((crate::error::close_code::NORMAL, Vec::new()));
        }
        if self.payload.len() < 2 {
            return Err(ProtocolError::protocol_error(
                "close frame payload shorter than a close code",
            ));
        }
        let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
        let reason = self.payload[2..].to_vec();
        Ok((code, reason))
    }
}
