use base64::prelude::*;
use bytes::BytesMut;
use sha1::{Digest, Sha1};
use std::collections::HashMap;

use crate::error::HandshakeError;

const UUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const HEADER_DELIMITER: &[u8] = b"\r\n\r\n";
const MAX_HEADERS: usize = 64;

/// A rejected handshake carries both the protocol-level error and the exact
/// bytes to write back (`HTTP/1.1 <code> <phrase>\r\n\r\n`) before the
/// connection is dropped.
pub struct HandshakeFailure {
    pub error: HandshakeError,
    pub response: Vec<u8>,
}

/// Accumulates bytes into the handshake buffer and incrementally parses an
/// HTTP/1.1 upgrade request, emitting the 101 response on success.
pub struct Handshake {
    buffer: BytesMut,
    max_handshake_bytes: usize,
}

impl Handshake {
    pub fn new(max_handshake_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_handshake_bytes,
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// `Ok(None)` means more bytes are needed. `Ok(Some(response))` means the
    /// handshake succeeded and `response` is the 101 reply to write.
    /// `Err(failure)` carries the status-line response to write before
    /// propagating the error and dropping the connection.
    pub fn try_complete(&mut self) -> Result<Option<Vec<u8>>, HandshakeFailure> {
        if self.buffer.len() > self.max_handshake_bytes {
            let error = HandshakeError::too_large();
            return Err(HandshakeFailure {
                response: status_line_response(error.status, &error.reason),
                error,
            });
        }

        let header_end = match find_subslice(&self.buffer, HEADER_DELIMITER) {
            Some(pos) => pos + HEADER_DELIMITER.len(),
            None => return Ok(None),
        };

        let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut header_storage);
        let parsed = match req.parse(&self.buffer[..header_end]) {
            Ok(httparse::Status::Complete(_)) => req,
            Ok(httparse::Status::Partial) => {
                return self.reject(HandshakeError::bad_request(
                    "incomplete request line or headers",
                ))
            }
            Err(e) => return self.reject(HandshakeError::bad_request(e.to_string())),
        };

        if parsed.version != Some(1) {
            return self.reject(HandshakeError::bad_request(
                "request line is not HTTP/1.1",
            ));
        }

        let headers = match normalize_headers(parsed.headers) {
            Ok(headers) => headers,
            Err(e) => return self.reject(e),
        };

        if !header_token_matches(&headers, "connection", "upgrade") {
            return self.reject(HandshakeError::bad_request(
                "Connection header does not request an upgrade",
            ));
        }
        if !headers
            .get("upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
        {
            return self.reject(HandshakeError::bad_request(
                "Upgrade header is not websocket",
            ));
        }
        if headers.get("sec-websocket-version").map(String::as_str) != Some("13") {
            return self.reject(HandshakeError::bad_request(
                "Sec-WebSocket-Version must be 13",
            ));
        }
        let key = match headers.get("sec-websocket-key") {
            Some(key) => key.clone(),
            None => {
                return self.reject(HandshakeError::bad_request(
                    "Sec-WebSocket-Key header missing",
                ))
            }
        };
        match BASE64_STANDARD.decode(key.trim()) {
            Ok(decoded) if decoded.len() == 16 => {}
            _ => {
                return self.reject(HandshakeError::bad_request(
                    "Sec-WebSocket-Key must decode to 16 bytes",
                ))
            }
        }

        let accept = accept_value(key.trim());
        Ok(Some(switching_protocols_response(&accept)))
    }

    fn reject(&mut self, error: HandshakeError) -> Result<Option<Vec<u8>>, HandshakeFailure> {
        Err(HandshakeFailure {
            response: status_line_response(error.status, &error.reason),
            error,
        })
    }
}

/// RFC 6455 §1.3: `base64(sha1(key ++ magic_guid))`.
fn accept_value(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(UUID.as_bytes());
    BASE64_STANDARD.encode(hasher.finalize())
}

fn switching_protocols_response(accept: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         \r\n"
    )
    .into_bytes()
}

fn status_line_response(status: u16, reason: &str) -> Vec<u8> {
    format!("HTTP/1.1 {status} {reason}\r\n\r\n").into_bytes()
}

/// Lower-cases and trims header names and values; repeated headers are
/// joined with `, ` in the order their first occurrence appeared, per
/// RFC 7230 §3.2.2.
fn normalize_headers(
    raw: &[httparse::Header<'_>],
) -> Result<HashMap<String, String>, HandshakeError> {
    let mut headers = HashMap::new();
    for header in raw {
        let name = header.name.trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err(HandshakeError::bad_request("header line missing a name"));
        }
        let value = std::str::from_utf8(header.value)
            .map_err(|_| HandshakeError::bad_request("header value is not valid UTF-8"))?
            .trim()
            .to_string();
        match headers.get_mut(&name) {
            Some(existing) => {
                let existing: &mut String = existing;
                existing.push_str(", ");
                existing.push_str(&value);
            }
            None => {
                headers.insert(name, value);
            }
        }
    }
    Ok(headers)
}

fn header_token_matches(headers: &HashMap<String, String>, name: &str, token: &str) -> bool {
    headers
        .get(name)
        .map(|value| {
            value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
        .unwrap_or(false)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: &str = "GET /chat HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";

    #[test]
    fn valid_handshake_produces_expected_accept() {
        let mut hs = Handshake::new(4096);
        hs.feed(REQUEST.as_bytes());
        let response = hs.try_complete().unwrap().unwrap();
        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    }

    #[test]
    fn incomplete_request_needs_more_bytes() {
        let mut hs = Handshake::new(4096);
        hs.feed(b"GET /chat HTTP/1.1\r\nHost: x\r\n");
        assert!(hs.try_complete().unwrap().is_none());
    }

    #[test]
    fn split_across_feeds_still_completes() {
        let mut hs = Handshake::new(4096);
        let (a, b) = REQUEST.as_bytes().split_at(17);
        hs.feed(a);
        assert!(hs.try_complete().unwrap().is_none());
        hs.feed(b);
        assert!(hs.try_complete().unwrap().is_some());
    }

    #[test]
    fn oversized_handshake_is_413() {
        let mut hs = Handshake::new(8);
        hs.feed(REQUEST.as_bytes());
        let failure = hs.try_complete().unwrap_err();
        assert_eq!(failure.error.status, 413);
        assert!(String::from_utf8(failure.response).unwrap().starts_with("HTTP/1.1 413"));
    }

    #[test]
    fn missing_upgrade_header_is_400() {
        let bad = "GET /chat HTTP/1.1\r\nHost: x\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";
        let mut hs = Handshake::new(4096);
        hs.feed(bad.as_bytes());
        let failure = hs.try_complete().unwrap_err();
        assert_eq!(failure.error.status, 400);
    }

    #[test]
    fn wrong_websocket_version_is_400() {
        let bad = "GET /chat HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 8\r\n\r\n";
        let mut hs = Handshake::new(4096);
        hs.feed(bad.as_bytes());
        let failure = hs.try_complete().unwrap_err();
        assert_eq!(failure.error.status, 400);
    }

    #[test]
    fn short_key_is_400() {
        let bad = "GET /chat HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dG9vc2hvcnQ=\r\nSec-WebSocket-Version: 13\r\n\r\n";
        let mut hs = Handshake::new(4096);
        hs.feed(bad.as_bytes());
        let failure = hs.try_complete().unwrap_err();
        assert_eq!(failure.error.status, 400);
    }

    #[test]
    fn duplicate_headers_are_comma_joined() {
        let raw = "GET /chat HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";
        let mut hs = Handshake::new(4096);
        hs.feed(raw.as_bytes());
        assert!(hs.try_complete().unwrap().is_some());
    }
}
