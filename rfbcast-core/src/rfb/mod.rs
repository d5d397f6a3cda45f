//! # rfb: frame-differencing RFB server
//!
//! Serves a captured frame to one viewer over RFB 3.8, sending only what
//! changed since the last update.
//!
//! ## Architecture
//!
//! ```text
//!  FrameSource ─► UpdateEngine ──────────────────────────────► RfbConnection
//!                  │ estimate_background (full updates)          ▲
//!                  │ ScrollDetector      (optional)              │
//!                  │ Decomposer                                  │
//!                  └ RectEncoder ─► FramebufferUpdate ──► RfbSession
//! ```
//!
//! ## Sub-modules
//!
//! | Module         | Purpose                                              |
//! |----------------|------------------------------------------------------|
//! | `types`        | Regions, rectangles and `0x00RRGGBB` framebuffers    |
//! | `pixel_format` | Client pixel format and per-pixel serialisation      |
//! | `background`   | Sampled modal-colour estimation                      |
//! | `decompose`    | Axis-alternating difference decomposition            |
//! | `scroll`       | Sampling scroll / translation detection              |
//! | `encoder`      | Rectangle and `FramebufferUpdate` serialisation      |
//! | `handshake`    | Version / security / init state machine              |
//! | `capture`      | `FrameSource` trait and an in-memory source          |
//! | `transport`    | TCP and WebSocket byte-stream plumbing               |
//! | `service`      | Update cycle orchestration and the abort gate        |
//! | `session`      | Per-viewer message loop                              |

pub mod background;
pub mod capture;
pub mod decompose;
pub mod encoder;
pub mod handshake;
pub mod pixel_format;
pub mod scroll;
pub mod service;
pub mod session;
pub mod transport;
pub mod types;

// ── Re-exports ───────────────────────────────────────────────────

pub use capture::{FrameSource, SharedFrame};
pub use decompose::{DecomposeConfig, Decomposer};
pub use encoder::RectEncoder;
pub use handshake::{HandshakePhase, ServerInit};
pub use pixel_format::PixelFormat;
pub use scroll::{ScrollCandidate, ScrollConfig, ScrollDetector};
pub use service::{Admission, SessionConfig, UpdateEngine, UpdateGate};
pub use session::{RfbSession, SessionStats};
pub use transport::{ConnectionSender, RfbConnection};
pub use types::{Encoding, Framebuffer, Rect, Region};
