//! Statistical modal-colour estimation.
//!
//! Instead of scanning every pixel of a large region, a fixed budget of
//! random samples is drawn, sorted, and the longest run of equal values
//! wins. The same sorted-run scan is reused by the scroll detector to
//! reject near-flat candidate areas.

use rand::Rng;

use crate::rfb::types::{Framebuffer, Region};

/// Upper bound on samples drawn per estimate.
pub const MAX_SAMPLES: usize = 256;

/// One sample is drawn per this many pixels, up to [`MAX_SAMPLES`].
pub const PIXELS_PER_SAMPLE: usize = 16;

/// Number of samples drawn for a region of `pixels` pixels.
///
/// Regions smaller than [`PIXELS_PER_SAMPLE`] still get one sample.
pub fn sample_count(pixels: usize) -> usize {
    if pixels == 0 {
        return 0;
    }
    (pixels / PIXELS_PER_SAMPLE).clamp(1, MAX_SAMPLES)
}

/// Longest run of equal values in an already sorted slice.
///
/// Returns the value and its run length. Ties keep the earliest run.
pub fn modal_run(sorted: &[u32]) -> Option<(u32, usize)> {
    let first = *sorted.first()?;
    let mut best = (first, 1);
    let mut run_start = 0;
    for i in 1..=sorted.len() {
        if i == sorted.len() || sorted[i] != sorted[run_start] {
            let len = i - run_start;
            if len > best.1 {
                best = (sorted[run_start], len);
            }
            run_start = i;
        }
    }
    Some(best)
}

/// Sort `values` in place and return its modal value with its count.
pub fn modal_color(values: &mut [u32]) -> Option<(u32, usize)> {
    values.sort_unstable();
    modal_run(values)
}

/// Estimate the dominant colour of `region` in `frame`.
///
/// Returns `None` only for an empty region. The returned value is always
/// one of the sampled pixels.
pub fn estimate_background<R: Rng + ?Sized>(
    frame: &Framebuffer,
    region: Region,
    rng: &mut R,
) -> Option<u32> {
    let pixels = region.area();
    let points = sample_count(pixels);
    let w = region.width as usize;
    let mut samples: Vec<u32> = (0..points)
        .map(|_| {
            let p = rng.random_range(0..pixels);
            frame.pixel(region.x as usize + p % w, region.y as usize + p / w)
        })
        .collect();
    modal_color(&mut samples).map(|(color, _)| color)
}

// ── Tests ────────────────────────────────────────────────────────
