//! Minimal RFC 6455 frame codec for the dashboard fan-out.
//!
//! Only the shapes this server exchanges are supported: masked client
//! frames with short or 16-bit lengths (64-bit extended lengths are
//! rejected), and unmasked server frames. Text payloads over 65535 bytes
//! are truncated to fit the 16-bit length; control payloads over 125 bytes
//! degrade to an empty control frame (RFC 6455 §5.5).

pub const OP_TEXT: u8 = 0x1;
pub const OP_CLOSE: u8 = 0x8;
pub const OP_PING: u8 = 0x9;
pub const OP_PONG: u8 = 0xA;

const FIN: u8 = 0x80;
const MASK: u8 = 0x80;
const MAX_CONTROL_PAYLOAD: usize = 125;
const MAX_TEXT_PAYLOAD: usize = 65535;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// 64-bit extended payload lengths are not accepted.
    #[error("64-bit payload length rejected")]
    LengthTooLarge,

    /// Client-to-server frames must be masked (RFC 6455 §5.1).
    #[error("unmasked client frame")]
    Unmasked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: u8,
    pub payload: Vec<u8>,
}

/// Outcome of attempting to parse one frame from the front of a buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Parsed {
    /// Not enough bytes buffered yet.
    NeedMore,
    /// One complete frame plus the number of bytes it consumed.
    Frame(Frame, usize),
}

/// Parse one masked client frame from the front of `buf`.
pub fn parse_client_frame(buf: &[u8]) -> Result<Parsed, FrameError> {
    if buf.len() < 2 {
        return Ok(Parsed::NeedMore);
    }

    let fin = buf[0] & FIN != 0;
    let opcode = buf[0] & 0x0F;
    if buf[1] & MASK == 0 {
        return Err(FrameError::Unmasked);
    }

    let len7 = (buf[1] & 0x7F) as usize;
    let (payload_len, mut offset) = match len7 {
        127 => return Err(FrameError::LengthTooLarge),
        126 => {
            if buf.len() < 4 {
                return Ok(Parsed::NeedMore);
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as usize, 4)
        }
        n => (n, 2),
    };

    if buf.len() < offset + 4 + payload_len {
        return Ok(Parsed::NeedMore);
    }

    let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
    offset += 4;

    let payload: Vec<u8> = buf[offset..offset + payload_len]
        .iter()
        .enumerate()
        .map(|(i, &b)| b ^ key[i % 4])
        .collect();

    Ok(Parsed::Frame(
        Frame {
            fin,
            opcode,
            payload,
        },
        offset + payload_len,
    ))
}

/// Encode an unmasked control frame. Oversized payloads produce an empty
/// control frame rather than an invalid one.
pub fn encode_control(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let payload = if payload.len() > MAX_CONTROL_PAYLOAD {
        &[]
    } else {
        payload
    };
    let mut frame = Vec::with_capacity(2 + payload.len());
    frame.push(FIN | (opcode & 0x0F));
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame
}

/// Encode an unmasked single text frame, truncating the payload to the
/// 16-bit length limit.
pub fn encode_text(data: &str) -> Vec<u8> {
    let bytes = data.as_bytes();
    let bytes = &bytes[..bytes.len().min(MAX_TEXT_PAYLOAD)];

    let mut frame = Vec::with_capacity(4 + bytes.len());
    frame.push(FIN | OP_TEXT);
    if bytes.len() <= 125 {
        frame.push(bytes.len() as u8);
    } else {
        frame.push(126);
        frame.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    }
    frame.extend_from_slice(bytes);
    frame
}

/// Mask a server-shaped frame the way a client would (tests and tooling).
#[cfg(test)]
pub fn mask_frame(unmasked: &[u8], key: [u8; 4]) -> Vec<u8> {
    let len7 = unmasked[1] & 0x7F;
    let header_len = if len7 == 126 { 4 } else { 2 };
    let mut frame = Vec::with_capacity(unmasked.len() + 4);
    frame.extend_from_slice(&unmasked[..header_len]);
    frame[1] |= MASK;
    frame.extend_from_slice(&key);
    frame.extend(
        unmasked[header_len..]
            .iter()
            .enumerate()
            .map(|(i, &b)| b ^ key[i % 4]),
    );
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masked_text_frame_roundtrips() {
        let masked = mask_frame(&encode_text("hello"), [0xA1, 0x02, 0x33, 0x44]);
        match parse_client_frame(&masked).unwrap() {
            Parsed::Frame(frame, consumed) => {
                assert!(frame.fin);
                assert_eq!(frame.opcode, OP_TEXT);
                assert_eq!(frame.payload, b"hello");
                assert_eq!(consumed, masked.len());
            }
            Parsed::NeedMore => panic!("expected a complete frame"),
        }
    }

    #[test]
    fn partial_frame_waits_for_more() {
        let masked = mask_frame(&encode_text("hello"), [1, 2, 3, 4]);
        assert_eq!(parse_client_frame(&masked[..3]).unwrap(), Parsed::NeedMore);
        assert_eq!(parse_client_frame(&[]).unwrap(), Parsed::NeedMore);
    }

    #[test]
    fn two_buffered_frames_parse_in_sequence() {
        let mut buf = mask_frame(&encode_text("one"), [9, 8, 7, 6]);
        buf.extend(mask_frame(&encode_control(OP_PING, b"hb"), [5, 5, 5, 5]));

        let Parsed::Frame(first, consumed) = parse_client_frame(&buf).unwrap() else {
            panic!("expected first frame");
        };
        assert_eq!(first.payload, b"one");

        let Parsed::Frame(second, _) = parse_client_frame(&buf[consumed..]).unwrap() else {
            panic!("expected second frame");
        };
        assert_eq!(second.opcode, OP_PING);
        assert_eq!(second.payload, b"hb");
    }

    #[test]
    fn unmasked_client_frame_is_an_error() {
        assert_eq!(
            parse_client_frame(&encode_text("nope")),
            Err(FrameError::Unmasked)
        );
    }

    #[test]
    fn sixty_four_bit_length_is_rejected() {
        // byte1: mask bit + 127 announces a 64-bit extended length.
        assert_eq!(
            parse_client_frame(&[FIN | OP_TEXT, MASK | 127]),
            Err(FrameError::LengthTooLarge)
        );
    }

    #[test]
    fn extended_16bit_length_roundtrips() {
        let body = "x".repeat(300);
        let masked = mask_frame(&encode_text(&body), [0, 1, 2, 3]);
        let Parsed::Frame(frame, _) = parse_client_frame(&masked).unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(frame.payload.len(), 300);
    }

    #[test]
    fn oversized_control_payload_degrades_to_empty() {
        let frame = encode_control(OP_PING, &[0u8; 126]);
        assert_eq!(frame, vec![FIN | OP_PING, 0]);
    }

    #[test]
    fn oversized_text_is_truncated() {
        let frame = encode_text(&"y".repeat(70_000));
        assert_eq!(frame[1], 126);
        let len = u16::from_be_bytes([frame[2], frame[3]]) as usize;
        assert_eq!(len, MAX_TEXT_PAYLOAD);
        assert_eq!(frame.len(), 4 + MAX_TEXT_PAYLOAD);
    }

    #[test]
    fn short_text_uses_short_length() {
        let frame = encode_text("hi");
        assert_eq!(frame, vec![FIN | OP_TEXT, 2, b'h', b'i']);
    }
}
