//! HTTP upgrade handshake
//!
//! Parses the client's opening `GET` request, derives `Sec-WebSocket-Accept`
//! and renders the `101 Switching Protocols` response.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha1::{Digest, Sha1};
use thiserror::Error;

/// GUID appended to the client key before hashing (RFC 6455 section 1.3)
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Header carrying the client nonce
pub const KEY_HEADER: &str = "Sec-WebSocket-Key";

/// Upper bound on the size of the opening request
pub const MAX_HANDSHAKE_LEN: usize = 8 * 1024;

const REQUEST_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Errors that can occur while processing the opening handshake
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("Missing or empty {KEY_HEADER} header")]
    MissingKey,

    #[error("Handshake request is not valid UTF-8")]
    InvalidEncoding,

    #[error("Handshake request exceeds {MAX_HANDSHAKE_LEN} bytes")]
    TooLarge,
}

/// Result type for handshake operations
pub type HandshakeResult<T> = Result<T, HandshakeError>;

/// Returns true if the bytes look like an HTTP `GET` request line
pub fn is_upgrade_request(data: &[u8]) -> bool {
    data.len() >= 3 && data[..3].eq_ignore_ascii_case(b"GET")
}

/// Find the end of the request header block.
///
/// Returns the number of bytes up to and including the blank line, or `None`
/// if the terminator has not arrived yet.
pub fn find_request_end(data: &[u8]) -> Option<usize> {
    data.windows(REQUEST_TERMINATOR.len())
        .position(|w| w == REQUEST_TERMINATOR)
        .map(|pos| pos + REQUEST_TERMINATOR.len())
}

/// Compute `Base64(SHA-1(key + GUID))`
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// The parts of the opening request the server cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Trimmed value of `Sec-WebSocket-Key`
    pub key: String,
}

impl HandshakeRequest {
    /// Extract the client key from raw request text
    pub fn parse(raw: &str) -> HandshakeResult<Self> {
        let key = raw
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.trim()
                    .eq_ignore_ascii_case(KEY_HEADER)
                    .then(|| value.trim())
            })
            .filter(|key| !key.is_empty())
            .ok_or(HandshakeError::MissingKey)?;

        Ok(Self {
            key: key.to_string(),
        })
    }
}

/// The `101 Switching Protocols` reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Value of `Sec-WebSocket-Accept`
    pub accept: String,
}

impl HandshakeResponse {
    /// Build the response for a parsed request
    pub fn for_request(request: &HandshakeRequest) -> Self {
        Self {
            accept: accept_key(&request.key),
        }
    }

    /// Serialize to the exact wire bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Connection: Upgrade\r\n\
             Upgrade: websocket\r\n\
             Sec-WebSocket-Accept: {}\r\n\r\n",
            self.accept
        )
        .into_bytes()
    }
}

/// Turn a raw upgrade request into the response bytes to write back
pub fn process_handshake(raw_request: &str) -> HandshakeResult<Vec<u8>> {
    let request = HandshakeRequest::parse(raw_request)?;
    Ok(HandshakeResponse::for_request(&request).to_bytes())
}

/// Same as [`process_handshake`], starting from the bytes read off the wire
pub fn process_handshake_bytes(raw: &[u8]) -> HandshakeResult<Vec<u8>> {
    if raw.len() > MAX_HANDSHAKE_LEN {
        return Err(HandshakeError::TooLarge);
    }
    let text = std::str::from_utf8(raw).map_err(|_| HandshakeError::InvalidEncoding)?;
    process_handshake(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_REQUEST: &str = "GET /chat HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    #[test]
    fn test_accept_key_rfc_example() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_process_handshake_exact_bytes() {
        let response = process_handshake(SAMPLE_REQUEST).unwrap();
        assert_eq!(
            response,
            b"HTTP/1.1 101 Switching Protocols\r\n\
              Connection: Upgrade\r\n\
              Upgrade: websocket\r\n\
              Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n"
                .to_vec()
        );
    }

    #[test]
    fn test_key_whitespace_is_trimmed() {
        let raw = "GET / HTTP/1.1\r\nSec-WebSocket-Key:   dGhlIHNhbXBsZSBub25jZQ==  \t\r\n\r\n";
        let request = HandshakeRequest::parse(raw).unwrap();
        assert_eq!(request.key, "dGhlIHNhbXBsZSBub25jZQ==");
    }

    #[test]
    fn test_header_name_case_insensitive() {
        let raw = "GET / HTTP/1.1\r\nsec-websocket-key: abc\r\n\r\n";
        assert_eq!(HandshakeRequest::parse(raw).unwrap().key, "abc");
    }

    #[test]
    fn test_missing_key() {
        let raw = "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        assert_eq!(
            process_handshake(raw).unwrap_err(),
            HandshakeError::MissingKey
        );
    }

    #[test]
    fn test_empty_key() {
        let raw = "GET / HTTP/1.1\r\nSec-WebSocket-Key:   \r\n\r\n";
        assert_eq!(
            HandshakeRequest::parse(raw).unwrap_err(),
            HandshakeError::MissingKey
        );
    }

    #[test]
    fn test_invalid_utf8() {
        let raw = b"GET / HTTP/1.1\r\nSec-WebSocket-Key: \xff\xfe\r\n\r\n";
        assert_eq!(
            process_handshake_bytes(raw).unwrap_err(),
            HandshakeError::InvalidEncoding
        );
    }

    #[test]
    fn test_oversized_request() {
        let mut raw = b"GET / HTTP/1.1\r\nX-Padding: ".to_vec();
        raw.resize(MAX_HANDSHAKE_LEN + 1, b'a');
        assert_eq!(
            process_handshake_bytes(&raw).unwrap_err(),
            HandshakeError::TooLarge
        );
    }

    #[test]
    fn test_is_upgrade_request() {
        assert!(is_upgrade_request(b"GET / HTTP/1.1"));
        assert!(is_upgrade_request(b"get / HTTP/1.1"));
        assert!(!is_upgrade_request(b"POST / HTTP/1.1"));
        assert!(!is_upgrade_request(b"GE"));
        assert!(!is_upgrade_request(&[0x81, 0x85]));
    }

    #[test]
    fn test_find_request_end() {
        assert_eq!(find_request_end(b"GET / HTTP/1.1\r\n"), None);
        let data = b"GET / HTTP/1.1\r\n\r\n\x81\x80";
        assert_eq!(find_request_end(data), Some(18));
    }
}
