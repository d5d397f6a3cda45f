//! Scroll / translation detection.
//!
//! A sampling pass that looks for areas whose new content is the old
//! content moved by a constant `(dx, dy)`. Accepted areas are sent as
//! [`Encoding::CopyRect`](crate::rfb::types::Encoding::CopyRect) and the
//! same move is applied to `reference`, leaving a much smaller residual
//! for the decomposition engine.
//!
//! Pipeline per pass:
//!
//! 1. sample random points and record old/new colours,
//! 2. find vertical stripes where changed points are denser than average,
//!    then horizontal stripes inside each one,
//! 3. drop candidates overlapping an accepted box or made of near-flat content,
//! 4. search displacements (always trying `(0, 0)` first),
//! 5. grow accepted boxes outward while border lines still match.

use rand::Rng;

use crate::rfb::background::modal_color;
use crate::rfb::types::{Framebuffer, Rect, Region};

// ── Config ───────────────────────────────────────────────────────

/// Tuning knobs for [`ScrollDetector`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollConfig {
    /// Horizontal search window is `-max_dx..=max_dx`.
    pub max_dx: i32,
    /// Vertical search window is `-max_dy..=max_dy`.
    pub max_dy: i32,
    /// Diagonal displacements must lie strictly inside this radius.
    pub radius: i32,
    /// Regions narrower than this are not scanned.
    pub min_width: usize,
    /// Regions shorter than this are not scanned.
    pub min_height: usize,
    pub min_stripe_width: usize,
    pub min_stripe_height: usize,
    /// One sample per this many pixels.
    pub point_divisor: usize,
    /// Density window is `extent / length_divisor`.
    pub length_divisor: usize,
    /// Candidates whose samples share one colour at this rate are skipped.
    pub same_color_threshold: f64,
    /// Fraction of samples (and of border pixels when growing) that must match.
    pub hit_threshold: f64,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            max_dx: 64,
            max_dy: 64,
            radius: 16,
            min_width: 256,
            min_height: 256,
            min_stripe_width: 16,
            min_stripe_height: 16,
            point_divisor: 1024,
            length_divisor: 8,
            same_color_threshold: 0.995,
            hit_threshold: 0.995,
        }
    }
}

/// An area found to have moved by `(dx, dy)` since the reference frame.
///
/// `region` is in absolute screen coordinates and covers both the source
/// and the destination of the move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollCandidate {
    pub region: Region,
    pub dx: i32,
    pub dy: i32,
}

impl ScrollCandidate {
    pub fn is_moving(&self) -> bool {
        self.dx != 0 || self.dy != 0
    }

    /// The copy rectangle that performs this move, if any pixel moves.
    pub fn copy_rect(&self) -> Option<Rect> {
        let adx = self.dx.unsigned_abs() as u16;
        let ady = self.dy.unsigned_abs() as u16;
        if !self.is_moving() || self.region.width <= adx || self.region.height <= ady {
            return None;
        }
        let dest = Region::new(
            self.region.x + self.dx.max(0) as u16,
            self.region.y + self.dy.max(0) as u16,
            self.region.width - adx,
            self.region.height - ady,
        );
        let src_x = (dest.x as i32 - self.dx) as u16;
        let src_y = (dest.y as i32 - self.dy) as u16;
        Some(Rect::copy(dest, src_x, src_y))
    }
}

// ── Internals ────────────────────────────────────────────────────

/// A sampled point, region-relative.
#[derive(Debug, Clone, Copy)]
struct Sample {
    x: usize,
    y: usize,
    old: u32,
    new: u32,
}

impl Sample {
    fn changed(&self) -> bool {
        self.old != self.new
    }
}

/// Region-relative box used while searching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Area {
    x: usize,
    y: usize,
    w: usize,
    h: usize,
}

impl Area {
    fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x && x < self.x + self.w && y >= self.y && y < self.y + self.h
    }

    fn overlaps(&self, other: &Area) -> bool {
        !(self.x + self.w <= other.x
            || self.x >= other.x + other.w
            || self.y + self.h <= other.y
            || self.y >= other.y + other.h)
    }
}

#[derive(Debug, Clone, Copy)]
struct Accepted {
    area: Area,
    dx: i32,
    dy: i32,
}

/// `density[i]` = number of `hits` strictly below `i`.
fn cumulative(len: usize, hits: impl Iterator<Item = usize>) -> Vec<usize> {
    let mut counts = vec![0usize; len + 1];
    for c in hits {
        counts[c + 1] += 1;
    }
    for i in 1..counts.len() {
        counts[i] += counts[i - 1];
    }
    counts.truncate(len);
    counts
}

/// Spans `(start, end)` whose sliding-window density stays at or above
/// the average, at least `min_len` long.
fn dense_spans(density: &[usize], divisor: usize, min_len: usize) -> Vec<(usize, usize)> {
    let n = density.len();
    let mut spans = Vec::new();
    if n == 0 {
        return spans;
    }
    let window = n / divisor;
    let average = density[n - 1] / divisor;
    let dense = |i: usize| density[i + window] - density[i] >= average;

    let mut x0 = 0;
    while x0 + window < n {
        while x0 + window < n && !dense(x0) {
            x0 += 1;
        }
        let mut x1 = x0;
        while x1 + window < n && dense(x1) {
            x1 += 1;
        }
        if x1 - x0 >= min_len {
            spans.push((x0, x1));
        }
        x0 = x1;
    }
    spans
}

// ── Detector ─────────────────────────────────────────────────────

/// Sampling scroll detector.
#[derive(Debug, Clone, Default)]
pub struct ScrollDetector {
    config: ScrollConfig,
}

impl ScrollDetector {
    pub fn new(config: ScrollConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScrollConfig {
        &self.config
    }

    /// Whether `(dx, dy)` is inside the search pattern: anything on an
    /// axis, diagonals only within the radius.
    pub fn displacement_allowed(&self, dx: i32, dy: i32) -> bool {
        dx == 0 || dy == 0 || dx * dx + dy * dy < self.config.radius * self.config.radius
    }

    /// Detect moved areas, apply them to `reference` and append the
    /// matching copy rectangles to `out`.
    ///
    /// Returns the number of copy rectangles emitted.
    pub fn run<R: Rng + ?Sized>(
        &self,
        reference: &mut Framebuffer,
        current: &Framebuffer,
        region: Region,
        rng: &mut R,
        out: &mut Vec<Rect>,
    ) -> usize {
        let candidates = self.detect(reference, current, region, rng);
        Self::apply(&candidates, reference, out)
    }

    /// Apply every moving candidate in order.
    pub fn apply(
        candidates: &[ScrollCandidate],
        reference: &mut Framebuffer,
        out: &mut Vec<Rect>,
    ) -> usize {
        let mut emitted = 0;
        for cand in candidates {
            if let Some(rect) = cand.copy_rect() {
                tracing::debug!(region = ?cand.region, dx = cand.dx, dy = cand.dy, "scroll rect");
                out.push(rect);
                reference.shift_within(cand.region, cand.dx, cand.dy);
                emitted += 1;
            }
        }
        emitted
    }

    /// Find candidate moves inside `region` without touching either buffer.
    ///
    /// Candidates neutralised by a later overlapping one are returned with
    /// a zero displacement.
    pub fn detect<R: Rng + ?Sized>(
        &self,
        reference: &Framebuffer,
        current: &Framebuffer,
        region: Region,
        rng: &mut R,
    ) -> Vec<ScrollCandidate> {
        let c = &self.config;
        let w = region.width as usize;
        let h = region.height as usize;
        if w < c.min_width || h < c.min_height {
            return Vec::new();
        }

        let pixels = region.area();
        let points = pixels / c.point_divisor.max(1);
        let samples: Vec<Sample> = (0..points)
            .map(|_| {
                let p = rng.random_range(0..pixels);
                let (x, y) = (p % w, p / w);
                let (ax, ay) = (region.x as usize + x, region.y as usize + y);
                Sample {
                    x,
                    y,
                    old: reference.pixel(ax, ay),
                    new: current.pixel(ax, ay),
                }
            })
            .collect();
        if !samples.iter().any(Sample::changed) {
            return Vec::new();
        }

        let divisor = c.length_divisor.max(1);
        let half_x = (w / divisor) / 2;
        let half_y = (h / divisor) / 2;
        let x_density = cumulative(w, samples.iter().filter(|s| s.changed()).map(|s| s.x));

        let mut accepted: Vec<Accepted> = Vec::new();
        for (x0, x1) in dense_spans(&x_density, divisor, c.min_stripe_width) {
            let y_density = cumulative(
                h,
                samples
                    .iter()
                    .filter(|s| s.changed() && s.x >= x0 && s.x < x1)
                    .map(|s| s.y),
            );
            for (y0, y1) in dense_spans(&y_density, divisor, c.min_stripe_height) {
                let area = Area {
                    x: x0 + half_x,
                    y: y0 + half_y,
                    w: x1 - x0,
                    h: y1 - y0,
                };
                if accepted.iter().any(|a| a.area.overlaps(&area)) {
                    tracing::trace!(?area, "scroll candidate overlaps an accepted box");
                    continue;
                }
                if let Some(found) = self.evaluate(reference, current, region, &samples, area) {
                    for prev in accepted.iter_mut().filter(|a| a.area.overlaps(&found.area)) {
                        prev.dx = 0;
                        prev.dy = 0;
                    }
                    accepted.push(found);
                }
            }
        }

        tracing::trace!(count = accepted.len(), "scroll detection finished");
        accepted
            .into_iter()
            .map(|a| ScrollCandidate {
                region: Region::new(
                    region.x + a.area.x as u16,
                    region.y + a.area.y as u16,
                    a.area.w as u16,
                    a.area.h as u16,
                ),
                dx: a.dx,
                dy: a.dy,
            })
            .collect()
    }

    fn evaluate(
        &self,
        reference: &Framebuffer,
        current: &Framebuffer,
        region: Region,
        samples: &[Sample],
        area: Area,
    ) -> Option<Accepted> {
        let inside: Vec<Sample> = samples
            .iter()
            .copied()
            .filter(|s| area.contains(s.x, s.y))
            .collect();
        let mut colors: Vec<u32> = inside.iter().map(|s| s.new).collect();
        let (_, abundance) = modal_color(&mut colors)?;
        let n = inside.len() as f64;
        if abundance as f64 >= n * self.config.same_color_threshold {
            tracing::trace!(?area, abundance, "scroll candidate is flat");
            return None;
        }

        let (dx, dy, misses) = self.best_displacement(reference, region, &inside);
        if misses as f64 >= n * (1.0 - self.config.hit_threshold) {
            tracing::trace!(?area, dx, dy, misses, "scroll candidate rejected");
            return None;
        }
        let area = self.grow(reference, current, region, area, dx, dy);
        tracing::trace!(?area, dx, dy, "scroll candidate accepted");
        Some(Accepted { area, dx, dy })
    }

    /// Displacement with the fewest mismatching samples.
    ///
    /// `(0, 0)` is scored first and only a strictly better score replaces
    /// it, so unmoved content is never reported as moved.
    fn best_displacement(
        &self,
        reference: &Framebuffer,
        region: Region,
        inside: &[Sample],
    ) -> (i32, i32, usize) {
        let mut best = (0, 0, self.misses(reference, region, inside, 0, 0, usize::MAX));
        for dy in (-self.config.max_dy..=self.config.max_dy).rev() {
            for dx in (-self.config.max_dx..=self.config.max_dx).rev() {
                if best.2 == 0 {
                    return best;
                }
                if (dx, dy) == (0, 0) || !self.displacement_allowed(dx, dy) {
                    continue;
                }
                let m = self.misses(reference, region, inside, dx, dy, best.2);
                if m < best.2 {
                    best = (dx, dy, m);
                }
            }
        }
        best
    }

    /// Samples whose new colour differs from the old colour at the shifted
    /// source. Sources off screen count as misses. Stops at `limit`.
    fn misses(
        &self,
        reference: &Framebuffer,
        region: Region,
        inside: &[Sample],
        dx: i32,
        dy: i32,
        limit: usize,
    ) -> usize {
        let mut n = 0;
        for s in inside {
            if n >= limit {
                break;
            }
            let sx = region.x as isize + s.x as isize - dx as isize;
            let sy = region.y as isize + s.y as isize - dy as isize;
            if reference.checked_pixel(sx, sy) != Some(s.new) {
                n += 1;
            }
        }
        n
    }

    /// Extend `area` one line at a time on each side while the new border
    /// line still matches the move. Stays inside the region.
    fn grow(
        &self,
        reference: &Framebuffer,
        current: &Framebuffer,
        region: Region,
        mut a: Area,
        dx: i32,
        dy: i32,
    ) -> Area {
        let w = region.width as usize;
        let h = region.height as usize;
        let line_ok = |cells: &mut dyn Iterator<Item = (usize, usize)>, len: usize| {
            let hits = cells
                .filter(|&(x, y)| {
                    let ax = region.x as usize + x;
                    let ay = region.y as usize + y;
                    let src = reference
                        .checked_pixel(ax as isize - dx as isize, ay as isize - dy as isize);
                    src == Some(current.pixel(ax, ay))
                })
                .count();
            hits as f64 >= len as f64 * self.config.hit_threshold
        };

        while a.x > 0 && line_ok(&mut (a.y..a.y + a.h).map(|y| (a.x - 1, y)), a.h) {
            a.x -= 1;
            a.w += 1;
        }
        while a.x + a.w < w && line_ok(&mut (a.y..a.y + a.h).map(|y| (a.x + a.w, y)), a.h) {
            a.w += 1;
        }
        while a.y > 0 && line_ok(&mut (a.x..a.x + a.w).map(|x| (x, a.y - 1)), a.w) {
            a.y -= 1;
            a.h += 1;
        }
        while a.y + a.h < h && line_ok(&mut (a.x..a.x + a.w).map(|x| (x, a.y + a.h)), a.w) {
            a.h += 1;
        }
        a
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rfb::decompose::Decomposer;
    use crate::rfb::types::Encoding;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn noise(rng: &mut StdRng, w: u16, h: u16) -> Framebuffer {
        let pixels = (0..w as usize * h as usize)
            .map(|_| rng.random_range(0..0x0100_0000))
            .collect();
        Framebuffer::from_pixels(w, h, pixels)
    }

    /// `reference` scrolled up by `lines`, with fresh content at the bottom.
    fn scrolled_up(rng: &mut StdRng, reference: &Framebuffer, lines: usize) -> Framebuffer {
        let (w, h) = (reference.width() as usize, reference.height() as usize);
        let mut current = noise(rng, reference.width(), reference.height());
        for y in 0..h - lines {
            for x in 0..w {
                current.set_pixel(x, y, reference.pixel(x, y + lines));
            }
        }
        current
    }

    #[test]
    fn radius_filter_keeps_axes_and_small_diagonals() {
        let d = ScrollDetector::default();
        assert!(d.displacement_allowed(64, 0));
        assert!(d.displacement_allowed(0, -64));
        assert!(d.displacement_allowed(10, 10));
        assert!(!d.displacement_allowed(12, 12));
        assert!(!d.displacement_allowed(-15, 6));
    }

    #[test]
    fn density_spans() {
        assert_eq!(cumulative(4, [0, 0, 2].into_iter()), vec![0, 2, 2, 3]);

        let mut density = vec![0usize; 64];
        // All hits between 20 and 40.
        for (i, d) in density.iter_mut().enumerate() {
            *d = i.clamp(20, 40) - 20;
        }
        let spans = dense_spans(&density, 8, 4);
        assert_eq!(spans.len(), 1);
        let (s, e) = spans[0];
        assert!(s >= 12 && e <= 40, "span {s}..{e}");
    }

    #[test]
    fn zero_displacement_wins_ties() {
        let mut reference = Framebuffer::new(300, 300);
        reference.fill(reference.bounds(), 0x0044_4444);
        let samples: Vec<Sample> = (0..50)
            .map(|i| Sample {
                x: 100 + i,
                y: 100,
                old: 0x0044_4444,
                new: 0x0044_4444,
            })
            .collect();
        let d = ScrollDetector::default();
        assert_eq!(d.best_displacement(&reference, reference.bounds(), &samples), (0, 0, 0));
    }

    #[test]
    fn small_regions_are_skipped() {
        let mut rng = StdRng::seed_from_u64(1);
        let reference = noise(&mut rng, 200, 300);
        let current = scrolled_up(&mut rng, &reference, 8);
        let d = ScrollDetector::default();
        assert!(d.detect(&reference, &current, reference.bounds(), &mut rng).is_empty());
    }

    #[test]
    fn unchanged_content_reports_nothing() {
        let mut rng = StdRng::seed_from_u64(2);
        let reference = noise(&mut rng, 320, 320);
        let current = reference.clone();
        let d = ScrollDetector::default();
        assert!(d.detect(&reference, &current, reference.bounds(), &mut rng).is_empty());
    }

    #[test]
    fn replaced_content_is_not_a_scroll() {
        let mut rng = StdRng::seed_from_u64(3);
        let reference = noise(&mut rng, 320, 320);
        let current = noise(&mut rng, 320, 320);
        let d = ScrollDetector::default();
        let found = d.detect(&reference, &current, reference.bounds(), &mut rng);
        assert!(found.iter().all(|c| !c.is_moving()));
    }

    #[test]
    fn vertical_scroll_is_found_and_reconstructs() {
        let detector = ScrollDetector::default();
        let mut detected = 0;
        for seed in 0..8 {
            let mut rng = StdRng::seed_from_u64(seed);
            let original = noise(&mut rng, 320, 320);
            let current = scrolled_up(&mut rng, &original, 10);

            let mut reference = original.clone();
            let mut out = Vec::new();
            let bounds = current.bounds();
            detected += detector.run(&mut reference, &current, bounds, &mut rng, &mut out);
            for rect in &out {
                match rect.encoding {
                    Encoding::CopyRect { src_x, src_y } => {
                        assert_eq!(src_x, rect.region.x);
                        assert_eq!(src_y, rect.region.y + 10);
                    }
                    ref other => panic!("unexpected {other:?}"),
                }
            }

            Decomposer::default().decompose(&mut reference, &current, current.bounds(), &mut out);
            let mut replayed = original.clone();
            for rect in &out {
                replayed.apply(rect);
            }
            assert_eq!(replayed, current, "seed {seed}");
            assert_eq!(reference, current, "seed {seed}");
        }
        assert!(detected > 0, "no scroll detected on any seed");
    }

    #[test]
    fn copy_rect_geometry() {
        let c = ScrollCandidate {
            region: Region::new(10, 20, 100, 50),
            dx: -4,
            dy: 6,
        };
        let rect = c.copy_rect().unwrap();
        assert_eq!(rect.region, Region::new(10, 26, 96, 44));
        assert_eq!(rect.encoding, Encoding::CopyRect { src_x: 14, src_y: 20 });

        let still = ScrollCandidate { dx: 0, dy: 0, ..c };
        assert!(still.copy_rect().is_none());
    }
}
