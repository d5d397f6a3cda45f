//! Domain-specific error types for rfbcast.
//!
//! All fallible operations return `Result<T, RfbError>`.
//! Protocol desync and busy requests are *not* errors: they are
//! recovered in place by the session and only logged.

use thiserror::Error;

/// The canonical error type for the rfbcast core.
#[derive(Debug, Error)]
pub enum RfbError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// A message or state transition violated protocol rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// A single update would carry more rectangles than the u16 count field allows.
    #[error("too many rectangles for one update: {0} (max 65535)")]
    TooManyRects(usize),

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// The WebSocket layer reported an error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Encoding Errors ──────────────────────────────────────────
    /// Compressing a rectangle failed.
    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),

    /// Serialising a rectangle failed for a reason other than the image codec.
    #[error("encoding error: {0}")]
    Encoding(String),

    // ── Capture Errors ───────────────────────────────────────────
    /// The capture source failed for this frame.
    #[error("capture error: {0}")]
    Capture(String),

    /// The capture source has stopped for good (stream ended, paused, resized).
    #[error("capture source ended")]
    CaptureEnded,

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for RfbError {
    fn from(s: String) -> Self {
        RfbError::Other(s)
    }
}

impl From<&str> for RfbError {
    fn from(s: &str) -> Self {
        RfbError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for RfbError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        RfbError::ChannelClosed
    }
}

impl From<tokio::task::JoinError> for RfbError {
    fn from(e: tokio::task::JoinError) -> Self {
        RfbError::Other(format!("task failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = RfbError::TooManyRects(70_000);
        assert!(e.to_string().contains("70000"));
        assert!(e.to_string().contains("65535"));

        let e = RfbError::ProtocolViolation("bad phase");
        assert!(e.to_string().contains("bad phase"));
    }

    #[test]
    fn from_string() {
        let e: RfbError = "something broke".into();
        assert!(matches!(e, RfbError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: RfbError = io_err.into();
        assert!(matches!(e, RfbError::Io(_)));
    }

    #[tokio::test]
    async fn from_closed_channel() {
        let (tx, rx) = tokio::sync::mpsc::channel::<u8>(1);
        drop(rx);
        let e: RfbError = tx.send(1).await.unwrap_err().into();
        assert!(matches!(e, RfbError::ChannelClosed));
    }
}
