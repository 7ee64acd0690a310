//! WebSocket frame codec
//!
//! Base framing from RFC 6455 section 5.2, no extensions:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```
//!
//! The decoder only accepts client frames (masked). The encoder only
//! produces server frames (unmasked).

use thiserror::Error;

const FIN_BIT: u8 = 0b1000_0000;
const MASK_BIT: u8 = 0b1000_0000;
const OPCODE_BITS: u8 = 0b0000_1111;
const LENGTH_BITS: u8 = 0b0111_1111;

/// Largest length that fits in the 7-bit field
const MAX_INLINE_LEN: u8 = 125;
/// Length marker for a 16-bit extended length
const EXT_LEN_16: u8 = 126;
/// Length marker for a 64-bit extended length
const EXT_LEN_64: u8 = 127;

/// Control frames may not carry more than this
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Close status sent when the server shuts down
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Errors raised for frames that violate the protocol
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Client frame is not masked")]
    UnmaskedClientFrame,

    #[error("Reserved opcode {0:#x}")]
    InvalidOpcode(u8),

    #[error("Invalid control frame: {0}")]
    InvalidControlFrame(&'static str),

    #[error("Payload of {len} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge { len: u64, max: u64 },
}

/// Result type for frame operations
pub type FrameResult<T> = Result<T, FrameError>;

/// Frame opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    /// Control frames are close, ping and pong
    pub fn is_control(self) -> bool {
        (self as u8) & 0x8 != 0
    }
}

impl TryFrom<u8> for Opcode {
    type Error = FrameError;

    fn try_from(value: u8) -> FrameResult<Self> {
        match value {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            other => Err(FrameError::InvalidOpcode(other)),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> Self {
        opcode as u8
    }
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment of a message
    pub fin: bool,
    /// Frame type
    pub opcode: Opcode,
    /// Whether the payload arrived masked
    pub masked: bool,
    /// Masking key, present iff `masked`
    pub mask_key: Option<[u8; 4]>,
    /// Unmasked payload bytes
    pub payload: Vec<u8>,
}

impl Frame {
    /// Declared payload length
    pub fn payload_len(&self) -> u64 {
        self.payload.len() as u64
    }

    /// Status code carried by a close frame, if any
    pub fn close_code(&self) -> Option<u16> {
        match (self.opcode, self.payload.as_slice()) {
            (Opcode::Close, [hi, lo, ..]) => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }
}

/// Outcome of a decode attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A whole frame was parsed; `consumed` bytes can be dropped from the buffer
    Frame { frame: Frame, consumed: usize },
    /// The buffer ends before the frame does
    NeedMoreBytes,
}

/// XOR `data` in place with the 4-byte key, starting at key index 0
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Decode one client frame from the front of `buf`.
///
/// Never reads past `buf`; a short buffer yields [`Decoded::NeedMoreBytes`].
/// Lengths above `max_payload` are rejected as soon as the length field is
/// readable.
pub fn decode(buf: &[u8], max_payload: u64) -> FrameResult<Decoded> {
    let [b0, b1, rest @ ..] = buf else {
        return Ok(Decoded::NeedMoreBytes);
    };

    let fin = b0 & FIN_BIT != 0;
    let opcode = Opcode::try_from(b0 & OPCODE_BITS)?;
    let masked = b1 & MASK_BIT != 0;

    let (payload_len, mut offset) = match b1 & LENGTH_BITS {
        len @ 0..=MAX_INLINE_LEN => (u64::from(len), 2),
        EXT_LEN_16 => match rest {
            [a, b, ..] => (u64::from(u16::from_be_bytes([*a, *b])), 4),
            _ => return Ok(Decoded::NeedMoreBytes),
        },
        _ => match rest.get(..8) {
            Some(ext) => {
                let mut be = [0u8; 8];
                be.copy_from_slice(ext);
                (u64::from_be_bytes(be), 10)
            }
            None => return Ok(Decoded::NeedMoreBytes),
        },
    };

    if opcode.is_control() {
        if payload_len > MAX_CONTROL_PAYLOAD as u64 {
            return Err(FrameError::InvalidControlFrame("payload exceeds 125 bytes"));
        }
        if !fin {
            return Err(FrameError::InvalidControlFrame("fragmented control frame"));
        }
    }

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            len: payload_len,
            max: max_payload,
        });
    }

    if !masked {
        return Err(FrameError::UnmaskedClientFrame);
    }

    let Some(key_bytes) = buf.get(offset..offset + 4) else {
        return Ok(Decoded::NeedMoreBytes);
    };
    let mask_key = [key_bytes[0], key_bytes[1], key_bytes[2], key_bytes[3]];
    offset += 4;

    // Bounded by max_payload, which the caller sizes to memory
    let Ok(len) = usize::try_from(payload_len) else {
        return Err(FrameError::PayloadTooLarge {
            len: payload_len,
            max: usize::MAX as u64,
        });
    };
    let Some(raw) = offset
        .checked_add(len)
        .and_then(|end| buf.get(offset..end))
    else {
        return Ok(Decoded::NeedMoreBytes);
    };

    let mut payload = raw.to_vec();
    apply_mask(&mut payload, mask_key);

    Ok(Decoded::Frame {
        frame: Frame {
            fin,
            opcode,
            masked,
            mask_key: Some(mask_key),
            payload,
        },
        consumed: offset + len,
    })
}

/// Encode a server frame. The mask bit is never set.
pub fn encode(opcode: Opcode, payload: &[u8], fin: bool) -> Vec<u8> {
    let len = payload.len();
    let mut out = Vec::with_capacity(len + 10);

    let fin_bit = if fin { FIN_BIT } else { 0 };
    out.push(fin_bit | u8::from(opcode));

    if len <= MAX_INLINE_LEN as usize {
        out.push(len as u8);
    } else if let Ok(short) = u16::try_from(len) {
        out.push(EXT_LEN_16);
        out.extend_from_slice(&short.to_be_bytes());
    } else {
        out.push(EXT_LEN_64);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    out.extend_from_slice(payload);
    out
}

/// A final text frame
pub fn encode_text(text: &str) -> Vec<u8> {
    encode(Opcode::Text, text.as_bytes(), true)
}

/// A close frame, optionally carrying a status code
pub fn encode_close(code: Option<u16>) -> Vec<u8> {
    match code {
        Some(code) => encode(Opcode::Close, &code.to_be_bytes(), true),
        None => encode(Opcode::Close, &[], true),
    }
}

/// A pong answering a ping with the given payload
pub fn encode_pong(payload: &[u8]) -> Vec<u8> {
    encode(Opcode::Pong, payload, true)
}

/// Turn a server-shaped frame into a client-shaped one
#[cfg(test)]
pub(crate) fn mask_frame(frame: &[u8], key: [u8; 4]) -> Vec<u8> {
    let header_len = match frame[1] & LENGTH_BITS {
        EXT_LEN_16 => 4,
        EXT_LEN_64 => 10,
        _ => 2,
    };
    let mut out = frame[..header_len].to_vec();
    out[1] |= MASK_BIT;
    out.extend_from_slice(&key);
    let mut payload = frame[header_len..].to_vec();
    apply_mask(&mut payload, key);
    out.extend_from_slice(&payload);
    out
}
