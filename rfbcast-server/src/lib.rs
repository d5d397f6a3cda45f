//! # rfbcast-server: frame-differencing VNC server
//!
//! Serves a frame source to a single VNC viewer using the
//! `rfbcast-core` session engine.
//!
//! ## Modes
//!
//! - **Listen**: accept viewers on a local TCP port (default 5900).
//! - **WebSocket**: dial out to a relay (`ws://` or `wss://`) and serve
//!   the viewer connected behind it.
//!
//! ## Sources
//!
//! - **Synthetic**: a generated pattern with scrolling content.
//! - **File**: an image on disk, re-read on every capture.

pub mod capture;
pub mod config;
pub mod service;
