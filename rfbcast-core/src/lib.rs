//! # rfbcast-core
//!
//! Core library for serving a captured screen over the RFB (VNC) protocol.
//!
//! This crate contains:
//! - **Pixel model**: `Framebuffer`, `Region`, `Rect`, `Encoding`, `PixelFormat`
//! - **Engine**: background estimation, scroll detection and rectangle decomposition
//! - **Wire**: `RectEncoder` for `FramebufferUpdate`s, `ClientMessageCodec` for client messages
//! - **Session**: handshake state machine, update gate and per-viewer loop
//! - **Transport**: `RfbConnection` over TCP or WebSocket
//! - **Error**: `RfbError`, a `thiserror`-based error type

pub mod codec;
pub mod error;
pub mod rfb;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{ClientMessage, ClientMessageCodec};
pub use error::RfbError;
pub use rfb::{
    Admission, DecomposeConfig, Decomposer, Encoding, FrameSource, Framebuffer, HandshakePhase,
    PixelFormat, Rect, RectEncoder, Region, RfbConnection, RfbSession, ScrollConfig,
    ScrollDetector, ServerInit, SessionConfig, SessionStats, SharedFrame, UpdateEngine,
    UpdateGate,
};
