//! Client-to-server RFB message framing.
//!
//! After the handshake every inbound byte belongs to a client message
//! whose first byte selects its type (and therefore its length). Bytes
//! arrive in arbitrary chunks, so [`ClientMessageCodec`] implements a
//! `tokio_util` [`Decoder`] that yields `None` until a whole message is
//! buffered.
//!
//! An unknown type byte cannot be skipped (its length is unknown), so
//! the rest of the buffer is discarded and [`ClientMessage::Unknown`] is
//! returned. The caller logs it and carries on with the next delivery.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::error::RfbError;
use crate::rfb::pixel_format::PixelFormat;
use crate::rfb::types::Region;

// ── Constants ────────────────────────────────────────────────────

/// Version string sent by the server when the connection opens.
pub const PROTOCOL_VERSION: &[u8; 12] = b"RFB 003.008\n";

/// Desktop name announced in `ServerInit`.
pub const SERVER_NAME: &str = "wc:6";

pub const MSG_SET_PIXEL_FORMAT: u8 = 0;
pub const MSG_SET_ENCODINGS: u8 = 2;
pub const MSG_FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;
pub const MSG_KEY_EVENT: u8 = 4;
pub const MSG_POINTER_EVENT: u8 = 5;
pub const MSG_CLIENT_CUT_TEXT: u8 = 6;

/// Cut text above this size is treated as a broken stream.
pub const MAX_CUT_TEXT: usize = 16 * 1024 * 1024;

// ── ClientMessage ────────────────────────────────────────────────

/// A fully received client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    SetPixelFormat(PixelFormat),
    SetEncodings(Vec<i32>),
    FramebufferUpdateRequest { incremental: bool, region: Region },
    KeyEvent { down: bool, key: u32 },
    PointerEvent { buttons: u8, x: u16, y: u16 },
    ClientCutText(Bytes),
    /// Unrecognised type byte; the rest of the buffer was dropped.
    Unknown(u8),
}

impl ClientMessage {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetPixelFormat(_) => "SetPixelFormat",
            Self::SetEncodings(_) => "SetEncodings",
            Self::FramebufferUpdateRequest { .. } => "FramebufferUpdateRequest",
            Self::KeyEvent { .. } => "KeyEvent",
            Self::PointerEvent { .. } => "PointerEvent",
            Self::ClientCutText(_) => "ClientCutText",
            Self::Unknown(_) => "Unknown",
        }
    }
}

// ── ClientMessageCodec ───────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ClientMessageCodec;

impl ClientMessageCodec {
    /// Total length of the message at the head of `src`, if enough of it
    /// is buffered to tell. `Some(None)` marks an unknown type.
    fn frame_len(src: &[u8]) -> Result<Option<Option<usize>>, RfbError> {
        let Some(&kind) = src.first() else {
            return Ok(None);
        };
        let len = match kind {
            MSG_SET_PIXEL_FORMAT => 4 + PixelFormat::SIZE,
            MSG_SET_ENCODINGS => {
                if src.len() < 4 {
                    return Ok(None);
                }
                4 + 4 * u16::from_be_bytes([src[2], src[3]]) as usize
            }
            MSG_FRAMEBUFFER_UPDATE_REQUEST => 10,
            MSG_KEY_EVENT => 8,
            MSG_POINTER_EVENT => 6,
            MSG_CLIENT_CUT_TEXT => {
                if src.len() < 8 {
                    return Ok(None);
                }
                let text = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
                if text > MAX_CUT_TEXT {
                    return Err(RfbError::ProtocolViolation("client cut text too large"));
                }
                8 + text
            }
            _ => return Ok(Some(None)),
        };
        Ok(Some(Some(len)))
    }
}

impl Decoder for ClientMessageCodec {
    type Item = ClientMessage;
    type Error = RfbError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let len = match Self::frame_len(src)? {
            None => return Ok(None),
            Some(None) => {
                let kind = src[0];
                src.clear();
                return Ok(Some(ClientMessage::Unknown(kind)));
            }
            Some(Some(len)) => len,
        };
        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        let mut msg = src.split_to(len);
        let kind = msg.get_u8();
        let message = match kind {
            MSG_SET_PIXEL_FORMAT => {
                msg.advance(3);
                let mut raw = [0u8; PixelFormat::SIZE];
                msg.copy_to_slice(&mut raw);
                ClientMessage::SetPixelFormat(PixelFormat::from_bytes(&raw))
            }
            MSG_SET_ENCODINGS => {
                msg.advance(1);
                let count = msg.get_u16();
                ClientMessage::SetEncodings((0..count).map(|_| msg.get_i32()).collect())
            }
            MSG_FRAMEBUFFER_UPDATE_REQUEST => ClientMessage::FramebufferUpdateRequest {
                incremental: msg.get_u8() != 0,
                region: Region::new(msg.get_u16(), msg.get_u16(), msg.get_u16(), msg.get_u16()),
            },
            MSG_KEY_EVENT => {
                let down = msg.get_u8() != 0;
                msg.advance(2);
                ClientMessage::KeyEvent {
                    down,
                    key: msg.get_u32(),
                }
            }
            MSG_POINTER_EVENT => ClientMessage::PointerEvent {
                buttons: msg.get_u8(),
                x: msg.get_u16(),
                y: msg.get_u16(),
            },
            MSG_CLIENT_CUT_TEXT => {
                msg.advance(7);
                ClientMessage::ClientCutText(msg.freeze())
            }
            other => ClientMessage::Unknown(other),
        };
        Ok(Some(message))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> (Vec<ClientMessage>, BytesMut) {
        let mut codec = ClientMessageCodec;
        let mut buf = BytesMut::from(bytes);
        let mut out = Vec::new();
        while let Some(m) = codec.decode(&mut buf).unwrap() {
            out.push(m);
        }
        (out, buf)
    }

    const UPDATE_REQUEST: [u8; 10] = [3, 1, 0, 10, 0, 20, 0, 30, 0, 40];

    #[test]
    fn update_request() {
        let (msgs, rest) = decode_all(&UPDATE_REQUEST);
        assert_eq!(
            msgs,
            vec![ClientMessage::FramebufferUpdateRequest {
                incremental: true,
                region: Region::new(10, 20, 30, 40),
            }]
        );
        assert!(rest.is_empty());
    }

    #[test]
    fn several_messages_in_one_delivery() {
        let mut bytes = vec![4, 1, 0, 0, 0, 0, 0xff, 0x0d]; // key down, Return
        bytes.extend_from_slice(&[5, 1, 0, 7, 0, 9]); // pointer
        bytes.extend_from_slice(&[2, 0, 0, 2, 0, 0, 0, 7, 0xff, 0xff, 0xff, 0x21]);
        bytes.extend_from_slice(&[6, 0, 0, 0, 0, 0, 0, 2, b'h', b'i']);
        bytes.extend_from_slice(&UPDATE_REQUEST);

        let (msgs, rest) = decode_all(&bytes);
        assert!(rest.is_empty());
        assert_eq!(msgs.len(), 5);
        assert_eq!(msgs[0], ClientMessage::KeyEvent { down: true, key: 0xff0d });
        assert_eq!(msgs[1], ClientMessage::PointerEvent { buttons: 1, x: 7, y: 9 });
        assert_eq!(msgs[2], ClientMessage::SetEncodings(vec![7, -223]));
        assert_eq!(msgs[3], ClientMessage::ClientCutText(Bytes::from_static(b"hi")));
        assert_eq!(msgs[4].name(), "FramebufferUpdateRequest");
    }

    #[test]
    fn partial_message_waits_for_more() {
        let mut codec = ClientMessageCodec;
        let mut buf = BytesMut::from(&UPDATE_REQUEST[..6]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 6);
        buf.extend_from_slice(&UPDATE_REQUEST[6..]);
        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(ClientMessage::FramebufferUpdateRequest { .. })
        ));
        assert!(buf.is_empty());

        // Length fields themselves may be split.
        let mut buf = BytesMut::from(&[2u8, 0, 0][..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn unknown_type_discards_rest_of_buffer() {
        let mut bytes = vec![9, 1, 2, 3];
        bytes.extend_from_slice(&UPDATE_REQUEST);
        let (msgs, rest) = decode_all(&bytes);
        assert_eq!(msgs, vec![ClientMessage::Unknown(9)]);
        assert!(rest.is_empty());
    }

    #[test]
    fn set_pixel_format() {
        let pf = PixelFormat {
            bits_per_pixel: 16,
            depth: 16,
            big_endian: true,
            true_color: true,
            red_max: 31,
            green_max: 63,
            blue_max: 31,
            red_shift: 11,
            green_shift: 5,
            blue_shift: 0,
        };
        let mut bytes = vec![0, 0, 0, 0];
        bytes.extend_from_slice(&pf.to_bytes());
        let (msgs, _) = decode_all(&bytes);
        assert_eq!(msgs, vec![ClientMessage::SetPixelFormat(pf)]);
    }

    #[test]
    fn oversized_cut_text_is_rejected() {
        let mut codec = ClientMessageCodec;
        let mut buf = BytesMut::from(&[6u8, 0, 0, 0, 0x7f, 0xff, 0xff, 0xff][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(RfbError::ProtocolViolation(_))
        ));
    }
}
