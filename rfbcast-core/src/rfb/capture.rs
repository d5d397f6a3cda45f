//! Frame acquisition seam.
//!
//! The update engine pulls pixels through [`FrameSource`]; where they
//! come from (a screen grabber, an image on disk, a generated test
//! pattern) is up to the implementor. Returning
//! [`RfbError::CaptureEnded`] tells the session that the source is gone
//! for good, which aborts it.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::RfbError;
use crate::rfb::types::{Framebuffer, Region};

#[async_trait]
pub trait FrameSource: Send {
    /// Screen size. Must not change for the lifetime of a session.
    fn dimensions(&self) -> (u16, u16);

    /// Blit the current frame into `frame` over at least `region`.
    async fn capture(&mut self, frame: &mut Framebuffer, region: Region) -> Result<(), RfbError>;
}

// ── SharedFrame ──────────────────────────────────────────────────

#[derive(Debug)]
struct SharedState {
    frame: Framebuffer,
    ended: bool,
    captures: u64,
}

/// A frame held in memory and updated from outside the session.
///
/// Clones share the same frame, so one handle can be given to the
/// session while another keeps drawing into it.
#[derive(Debug, Clone)]
pub struct SharedFrame {
    inner: Arc<Mutex<SharedState>>,
}

impl SharedFrame {
    pub fn new(frame: Framebuffer) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SharedState {
                frame,
                ended: false,
                captures: 0,
            })),
        }
    }

    /// Mutate the frame in place.
    ///
    /// The session geometry is fixed: a size change ends the source.
    pub fn update<F: FnOnce(&mut Framebuffer)>(&self, f: F) -> Result<(), RfbError> {
        let mut state = self.lock()?;
        let (w, h) = (state.frame.width(), state.frame.height());
        f(&mut state.frame);
        if (state.frame.width(), state.frame.height()) != (w, h) {
            state.ended = true;
            return Err(RfbError::Capture("frame size changed".into()));
        }
        Ok(())
    }

    /// Mark the source as ended; the next capture fails with
    /// [`RfbError::CaptureEnded`].
    pub fn end(&self) -> Result<(), RfbError> {
        self.lock()?.ended = true;
        Ok(())
    }

    /// Number of successful captures so far.
    pub fn capture_count(&self) -> u64 {
        self.lock().map(|s| s.captures).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SharedState>, RfbError> {
        self.inner
            .lock()
            .map_err(|_| RfbError::Capture("shared frame lock poisoned".into()))
    }
}

#[async_trait]
impl FrameSource for SharedFrame {
    fn dimensions(&self) -> (u16, u16) {
        self.lock()
            .map(|s| (s.frame.width(), s.frame.height()))
            .unwrap_or((0, 0))
    }

    async fn capture(&mut self, frame: &mut Framebuffer, region: Region) -> Result<(), RfbError> {
        let mut state = self.lock()?;
        if state.ended {
            return Err(RfbError::CaptureEnded);
        }
        frame.copy_region_from(&state.frame, region);
        state.captures += 1;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
