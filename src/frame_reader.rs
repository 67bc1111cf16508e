use bytes::{Buf, BytesMut};

use crate::error::ProtocolError;
use crate::frame::{Frame, OpCode};

/// The largest a frame header can ever be: 2 base bytes, up to 8 bytes of
/// extended length, and a 4-byte masking key. A header never needs more
/// bytes than this to become fully readable.
const MAX_HEADER_BYTES: usize = 14;

/// Incrementally parses RFC 6455 frames out of a byte stream, server-side
/// only (masked frames required from the client). Bytes are fed in
/// arbitrarily-sized chunks across any number of `feed` calls; `next_frame`
/// drains as many complete, validated frames as the buffer currently holds
/// and leaves exactly the trailing partial bytes of the next frame behind.
pub struct FrameReader {
    buffer: BytesMut,
    max_frame_payload: usize,
    rsv_mask: u8,
}

impl FrameReader {
    pub fn new(max_frame_payload: usize, rsv_mask: u8) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_payload,
            rsv_mask,
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of bytes currently buffered, awaiting a complete frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Updates the RSV mask an extension has negotiated. Intended to be
    /// called once, right after the handshake transitions to OK.
    pub fn set_rsv_mask(&mut self, rsv_mask: u8) {
        self.rsv_mask = rsv_mask;
    }

    /// Returns the next complete frame, `None` if the buffer doesn't yet
    /// hold one, or a `ProtocolError` if the buffered bytes can never form a
    /// valid frame. Call in a loop until it returns `None` to drain every
    /// frame the current buffer contains.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        if self.buffer.len() < 2 {
            return Ok(None);
        }

        let b0 = self.buffer[0];
        let b1 = self.buffer[1];

        let final_fragment = b0 & 0b1000_0000 != 0;
        let rsv = (b0 & 0b0111_0000) >> 4;
        let opcode = OpCode::from(b0 & 0b0000_1111)?;

        if rsv & !self.rsv_mask != 0 {
            return Err(ProtocolError::protocol_error(
                "RSV bit set outside the negotiated extension mask",
            ));
        }

        let masked = b1 & 0b1000_0000 != 0;
        if !masked {
            return Err(ProtocolError::protocol_error(
                "client frame missing required MASK bit",
            ));
        }

        let len7 = b1 & 0b0111_1111;
        if opcode.is_control() && len7 > 125 {
            return Err(ProtocolError::protocol_error(
                "control frame payload exceeds 125 bytes",
            ));
        }
        if opcode.is_control() && !final_fragment {
            return Err(ProtocolError::protocol_error(
                "control frame must not be fragmented",
            ));
        }

        let ext_len_bytes = match len7 {
            0..=125 => 0,
            126 => 2,
            127 => 8,
            _ => unreachable!("len7 is 7 bits wide"),
        };
        let header_len = 2 + ext_len_bytes + 4;
        debug_assert!(header_len <= MAX_HEADER_BYTES);

        if self.buffer.len() < 2 + ext_len_bytes {
            return Ok(None);
        }

        let payload_len: u64 = match len7 {
            0..=125 => len7 as u64,
            126 => u16::from_be_bytes([self.buffer[2], self.buffer[3]]) as u64,
            127 => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&self.buffer[2..10]);
                let len = u64::from_be_bytes(bytes);
                if len & (1 << 63) != 0 {
                    return Err(ProtocolError::protocol_error(
                        "64-bit payload length has its high bit set",
                    ));
                }
                len
            }
            _ => unreachable!(),
        };

        if payload_len as usize > self.max_frame_payload {
            return Err(ProtocolError::too_large(format!(
                "frame payload {payload_len} exceeds max_frame_payload {}",
                self.max_frame_payload
            )));
        }

        let total_len = header_len + payload_len as usize;
        if self.buffer.len() < total_len {
            return Ok(None);
        }

        let mask_offset = 2 + ext_len_bytes;
        let mask = [
            self.buffer[mask_offset],
            self.buffer[mask_offset + 1],
            self.buffer[mask_offset + 2],
            self.buffer[mask_offset + 3],
        ];

        let mut payload = self.buffer[header_len..total_len].to_vec();
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }

        self.buffer.advance(total_len);

        Ok(Some(Frame {
            final_fragment,
            rsv,
            opcode,
            payload,
        }))
    }
}
