//! Update cycle orchestration.
//!
//! One [`UpdateEngine::update`] call turns a `FramebufferUpdateRequest`
//! into a serialised `FramebufferUpdate`:
//!
//! 1. capture the current frame from the [`FrameSource`],
//! 2. for full updates, paint the estimated background as one solid rect,
//! 3. run scroll detection (incremental updates, when enabled),
//! 4. decompose the residual difference,
//! 5. if nothing changed, wait `retry_delay`, re-capture and go to 3,
//! 6. serialise the rectangles on a blocking thread.
//!
//! [`UpdateGate`] holds the per-session pending-update counter: `0` idle,
//! `1` busy, `>= ABORTED` aborted. It is checked between steps so an abort
//! lands at the next boundary.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::Notify;

use crate::error::RfbError;
use crate::rfb::background::estimate_background;
use crate::rfb::capture::FrameSource;
use crate::rfb::decompose::{DecomposeConfig, Decomposer};
use crate::rfb::encoder::RectEncoder;
use crate::rfb::pixel_format::PixelFormat;
use crate::rfb::scroll::{ScrollConfig, ScrollDetector};
use crate::rfb::types::{Framebuffer, Rect, Region};

/// Counter offset marking an aborted session.
pub const ABORTED: u32 = 42;

// ── SessionConfig ────────────────────────────────────────────────

/// Per-session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub decompose: DecomposeConfig,
    /// `None` disables scroll detection.
    pub scroll: Option<ScrollConfig>,
    /// JPEG quality for large mixed rectangles (1..=100).
    pub jpeg_quality: u8,
    /// Pause before re-capturing when a cycle found no change.
    pub retry_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            decompose: DecomposeConfig::default(),
            scroll: None,
            jpeg_quality: 75,
            retry_delay: Duration::from_millis(100),
        }
    }
}

// ── UpdateGate ───────────────────────────────────────────────────

/// Outcome of [`UpdateGate::try_begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Started,
    Busy,
    Aborted,
}

#[derive(Debug, Default)]
struct GateInner {
    counter: AtomicU32,
    aborted: Notify,
}

/// Shared pending-update counter with cooperative abort.
///
/// Cloning yields another handle to the same counter.
#[derive(Debug, Clone, Default)]
pub struct UpdateGate {
    inner: Arc<GateInner>,
}

impl UpdateGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the gate for one update cycle.
    pub fn try_begin(&self) -> Admission {
        match self
            .inner
            .counter
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => Admission::Started,
            Err(v) if v >= ABORTED => Admission::Aborted,
            Err(_) => Admission::Busy,
        }
    }

    /// Release the gate after a cycle.
    pub fn finish(&self) {
        let _ = self
            .inner
            .counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
    }

    /// Abort the session. In-flight cycles stop at their next check and
    /// every later request is dropped.
    pub fn abort(&self) {
        if self.inner.counter.fetch_add(ABORTED, Ordering::SeqCst) < ABORTED {
            self.inner.aborted.notify_one();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.value() >= ABORTED
    }

    pub fn is_idle(&self) -> bool {
        self.value() == 0
    }

    pub fn value(&self) -> u32 {
        self.inner.counter.load(Ordering::SeqCst)
    }

    /// Resolves once [`abort`](Self::abort) has been called.
    pub async fn aborted(&self) {
        if self.is_aborted() {
            return;
        }
        self.inner.aborted.notified().await;
    }
}

// ── UpdateEngine ─────────────────────────────────────────────────

/// Everything one update cycle needs, owned so the cycle can run on its
/// own task: both framebuffers, the capture source and the encoders.
pub struct UpdateEngine {
    source: Box<dyn FrameSource>,
    reference: Framebuffer,
    current: Framebuffer,
    decomposer: Decomposer,
    scroll: Option<ScrollDetector>,
    encoder: RectEncoder,
    rng: StdRng,
    retry_delay: Duration,
    gate: UpdateGate,
}

impl std::fmt::Debug for UpdateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateEngine")
            .field("width", &self.reference.width())
            .field("height", &self.reference.height())
            .field("scroll", &self.scroll.is_some())
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

impl UpdateEngine {
    pub fn new(source: Box<dyn FrameSource>, config: SessionConfig, gate: UpdateGate) -> Self {
        Self::with_rng(source, config, gate, StdRng::from_os_rng())
    }

    /// Like [`new`](Self::new) with an explicit RNG, for reproducible sampling.
    pub fn with_rng(
        source: Box<dyn FrameSource>,
        config: SessionConfig,
        gate: UpdateGate,
        rng: StdRng,
    ) -> Self {
        let (width, height) = source.dimensions();
        Self {
            source,
            reference: Framebuffer::new(width, height),
            current: Framebuffer::new(width, height),
            decomposer: Decomposer::new(config.decompose),
            scroll: config.scroll.map(ScrollDetector::new),
            encoder: RectEncoder::new(PixelFormat::default(), config.jpeg_quality),
            rng,
            retry_delay: config.retry_delay,
            gate,
        }
    }

    pub fn dimensions(&self) -> (u16, u16) {
        (self.reference.width(), self.reference.height())
    }

    pub fn gate(&self) -> &UpdateGate {
        &self.gate
    }

    pub fn set_pixel_format(&mut self, pixel_format: PixelFormat) {
        self.encoder.set_pixel_format(pixel_format);
    }

    /// What the viewer is believed to show.
    pub fn reference(&self) -> &Framebuffer {
        &self.reference
    }

    /// Run one cycle over `region`.
    ///
    /// Returns `Ok(None)` when the session was aborted before the update
    /// could be produced (including when the source ended).
    pub async fn update(
        &mut self,
        incremental: bool,
        region: Region,
    ) -> Result<Option<Bytes>, RfbError> {
        let (w, h) = self.dimensions();
        let region = region.clamp_to(w, h);
        if region.is_empty() {
            return Ok(None);
        }
        if !self.capture(region).await? {
            return Ok(None);
        }

        let mut rects: Vec<Rect> = Vec::new();
        if !incremental {
            if let Some(color) = estimate_background(&self.current, region, &mut self.rng) {
                tracing::trace!(?region, color, "background");
                rects.push(Rect::solid(region, color));
                self.reference.fill(region, color);
            }
        }

        loop {
            if !self.reference.regions_equal(&self.current, region) {
                if incremental {
                    if let Some(detector) = &self.scroll {
                        detector.run(
                            &mut self.reference,
                            &self.current,
                            region,
                            &mut self.rng,
                            &mut rects,
                        );
                    }
                }
                self.decomposer
                    .decompose(&mut self.reference, &self.current, region, &mut rects);
            }
            if !rects.is_empty() {
                break;
            }

            tracing::trace!(?region, "no change, retrying");
            tokio::time::sleep(self.retry_delay).await;
            if self.gate.is_aborted() {
                return Ok(None);
            }
            if !self.capture(region).await? {
                return Ok(None);
            }
        }

        let mut encoder = self.encoder.clone();
        let count = rects.len();
        let (encoder, bytes) = tokio::task::spawn_blocking(move || {
            let bytes = encoder.encode_update(&rects);
            (encoder, bytes)
        })
        .await?;
        self.encoder = encoder;
        let bytes = bytes?;

        if self.gate.is_aborted() {
            return Ok(None);
        }
        tracing::debug!(rects = count, bytes = bytes.len(), incremental, "update ready");
        Ok(Some(bytes))
    }

    /// Capture into `current`. Returns `false` when the source has ended,
    /// after aborting the gate.
    async fn capture(&mut self, region: Region) -> Result<bool, RfbError> {
        match self.source.capture(&mut self.current, region).await {
            Ok(()) => Ok(true),
            Err(RfbError::CaptureEnded) => {
                tracing::info!("capture source ended, aborting session");
                self.gate.abort();
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
