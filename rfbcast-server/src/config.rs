//! Configuration for the rfbcast server.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use rfbcast_core::rfb::decompose::DecomposeConfig;
use rfbcast_core::rfb::scroll::ScrollConfig;
use rfbcast_core::rfb::service::SessionConfig;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// How the viewer is reached.
    pub transport: TransportConfig,
    /// Where frames come from.
    pub capture: CaptureConfig,
    /// Decomposition and encoding tuning.
    pub encoding: EncodingConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Transport mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Dial out to a WebSocket relay and serve the viewer behind it.
    Websocket,
    /// Accept viewers on a local TCP port, one session at a time.
    Listen,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub mode: TransportMode,
    /// Relay host (with optional `:port`) for WebSocket mode.
    pub host: String,
    /// Request path on the relay, starting with `/`.
    pub path: String,
    /// Use `wss://` instead of `ws://`.
    pub secure: bool,
    /// Session label, attached to log output.
    pub channel: String,
    /// TCP port for listen mode.
    pub listen_port: u16,
}

/// Frame source kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Generated test pattern.
    Synthetic,
    /// An image file re-read on every capture.
    File,
}

/// Capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,
    /// Image path for the `file` source.
    pub path: String,
    /// Synthetic source width in pixels.
    pub width: u16,
    /// Synthetic source height in pixels.
    pub height: u16,
    /// Synthetic frames advanced per second.
    pub fps_hint: u32,
}

/// Encoding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// JPEG quality, 1..=100.
    pub jpeg_quality: u8,
    /// Mixed rectangles at or below this many raw bytes are sent raw.
    pub raw_threshold_bytes: usize,
    /// Columns of unchanged pixels that split a rectangle.
    pub min_gap_x: usize,
    /// Rows of unchanged pixels that split a rectangle.
    pub min_gap_y: usize,
    /// Detect scrolled content and send it as copy-rects.
    pub scroll_detection: bool,
    /// Pause before re-capturing when nothing changed, in milliseconds.
    pub retry_delay_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Optional log file path. If empty, logs to stderr.
    pub file: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Listen,
            host: "localhost:8080".into(),
            path: "/".into(),
            secure: false,
            channel: "default".into(),
            listen_port: 5900,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Synthetic,
            path: String::new(),
            width: 1024,
            height: 768,
            fps_hint: 10,
        }
    }
}

impl Default for EncodingConfig {
    fn default() -> Self {
        let decompose = DecomposeConfig::default();
        Self {
            jpeg_quality: 75,
            raw_threshold_bytes: decompose.raw_threshold_bytes,
            min_gap_x: decompose.min_gap_x,
            min_gap_y: decompose.min_gap_y,
            scroll_detection: false,
            retry_delay_ms: 100,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ServerConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// WebSocket URL of the relay: `ws[s]://{host}{path}`.
    pub fn websocket_url(&self) -> String {
        let t = &self.transport;
        let scheme = if t.secure { "wss" } else { "ws" };
        let path = if t.path.starts_with('/') {
            t.path.clone()
        } else {
            format!("/{}", t.path)
        };
        format!("{scheme}://{}{path}", t.host)
    }

    /// Convert encoding settings into a per-session `SessionConfig`.
    pub fn to_session_config(&self) -> SessionConfig {
        let e = &self.encoding;
        SessionConfig {
            decompose: DecomposeConfig {
                min_gap_x: e.min_gap_x.max(1),
                min_gap_y: e.min_gap_y.max(1),
                raw_threshold_bytes: e.raw_threshold_bytes,
            },
            scroll: e.scroll_detection.then(ScrollConfig::default),
            jpeg_quality: e.jpeg_quality.clamp(1, 100),
            retry_delay: Duration::from_millis(e.retry_delay_ms.clamp(1, 10_000)),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
