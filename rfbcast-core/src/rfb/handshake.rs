//! RFB handshake state machine.
//!
//! The server speaks first with [`PROTOCOL_VERSION`]; every later step
//! waits for the client's message and answers with a fixed reply:
//!
//! ```text
//!  AwaitVersionAck ──► AwaitSecurityAck ──► AwaitClientInit ──► Established
//!   (12-byte version)   (security choice)    (shared flag)
//!   reply: 01 01        reply: 00 00 00 00   reply: ServerInit
//! ```
//!
//! Exactly one security type (None) is offered and the security result
//! always reports success.

use std::time::Instant;

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{PROTOCOL_VERSION, SERVER_NAME};
use crate::error::RfbError;
use crate::rfb::pixel_format::PixelFormat;

/// One security type offered: None.
pub const SECURITY_TYPES: [u8; 2] = [1, 1];

/// SecurityResult OK.
pub const SECURITY_RESULT_OK: [u8; 4] = [0; 4];

// ── ServerInit ───────────────────────────────────────────────────

/// Screen geometry, pixel format and name announced to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInit {
    pub width: u16,
    pub height: u16,
    pub pixel_format: PixelFormat,
    pub name: String,
}

impl ServerInit {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            pixel_format: PixelFormat::default(),
            name: SERVER_NAME.to_string(),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(24 + self.name.len());
        out.put_u16(self.width);
        out.put_u16(self.height);
        out.put_slice(&self.pixel_format.to_bytes());
        out.put_u32(self.name.len() as u32);
        out.put_slice(self.name.as_bytes());
        out.freeze()
    }
}

// ── HandshakePhase ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HandshakePhase {
    /// Version sent; waiting for the client's version string.
    #[default]
    AwaitVersionAck,

    /// Security types sent; waiting for the client's choice.
    AwaitSecurityAck,

    /// Security result sent; waiting for `ClientInit`.
    AwaitClientInit,

    /// `ServerInit` sent; normal message traffic.
    Established {
        /// When the handshake completed.
        since: Instant,
    },
}

impl std::fmt::Display for HandshakePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitVersionAck => write!(f, "AwaitVersionAck"),
            Self::AwaitSecurityAck => write!(f, "AwaitSecurityAck"),
            Self::AwaitClientInit => write!(f, "AwaitClientInit"),
            Self::Established { .. } => write!(f, "Established"),
        }
    }
}

impl HandshakePhase {
    pub fn is_established(&self) -> bool {
        matches!(self, Self::Established { .. })
    }

    /// How long the session has been established, `None` before that.
    pub fn established_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Established { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    /// Bytes the client message of this phase needs before a reply is due.
    pub fn required_len(&self) -> usize {
        match self {
            Self::AwaitVersionAck => PROTOCOL_VERSION.len(),
            Self::AwaitSecurityAck | Self::AwaitClientInit => 1,
            Self::Established { .. } => 0,
        }
    }

    /// Consume the pending handshake input and produce the server reply.
    ///
    /// Returns `Ok(None)` while `input` is still too short. Once enough
    /// bytes are present the whole buffer is consumed and the phase
    /// advances.
    pub fn advance(
        &mut self,
        input: &mut BytesMut,
        init: &ServerInit,
    ) -> Result<Option<Bytes>, RfbError> {
        if input.len() < self.required_len() {
            return Ok(None);
        }

        let reply = match self {
            Self::AwaitVersionAck => {
                let version = String::from_utf8_lossy(&input[..PROTOCOL_VERSION.len()]);
                if !version.starts_with("RFB ") {
                    tracing::warn!(version = %version.trim_end(), "unexpected client version");
                } else {
                    tracing::debug!(version = %version.trim_end(), "client version");
                }
                *self = Self::AwaitSecurityAck;
                Bytes::from_static(&SECURITY_TYPES)
            }
            Self::AwaitSecurityAck => {
                tracing::debug!(security_type = input[0], "client security selection");
                *self = Self::AwaitClientInit;
                Bytes::from_static(&SECURITY_RESULT_OK)
            }
            Self::AwaitClientInit => {
                tracing::debug!(shared = input[0], "client init");
                *self = Self::Established {
                    since: Instant::now(),
                };
                init.to_bytes()
            }
            Self::Established { .. } => {
                return Err(RfbError::ProtocolViolation(
                    "cannot advance handshake: already Established",
                ));
            }
        };
        input.clear();
        Ok(Some(reply))
    }
}

// ── Tests ────────────────────────────────────────────────────────
