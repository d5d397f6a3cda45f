//! Frame differencing and rectangle decomposition.
//!
//! Turns the difference between `reference` and `current` over a region
//! into an ordered list of [`Rect`]s. The region is scanned line by line
//! along one axis; each line is classified as
//!
//! - **unchanged**: every pixel equals `reference`,
//! - **uniform**: every pixel equals the line's first pixel,
//! - **mixed**: neither.
//!
//! Short interior runs of unchanged/uniform lines are folded into the
//! surrounding mixed lines so the result does not shatter into slivers.
//! Uniform runs become [`Encoding::Solid`](crate::rfb::types::Encoding::Solid)
//! rectangles, mixed runs are split again along the other axis, and a
//! mixed run whose parent pass found nothing to split off is sent whole.
//!
//! `reference` is updated in place for every rectangle emitted, so after
//! [`Decomposer::decompose`] it equals `current` over the region.

use crate::rfb::types::{Framebuffer, Rect, Region};

// ── Config ───────────────────────────────────────────────────────

/// Tuning knobs for [`Decomposer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecomposeConfig {
    /// Interior runs of splittable columns narrower than this are merged.
    pub min_gap_x: usize,
    /// Interior runs of splittable rows shorter than this are merged.
    pub min_gap_y: usize,
    /// Mixed rectangles above this many bytes (`w * h * 4`) are sent as JPEG.
    pub raw_threshold_bytes: usize,
}

impl Default for DecomposeConfig {
    fn default() -> Self {
        Self {
            min_gap_x: 24,
            min_gap_y: 4,
            raw_threshold_bytes: 1024,
        }
    }
}

// ── Axis ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    /// Lines are rows; runs stack vertically.
    Rows,
    /// Lines are columns; runs sit side by side.
    Columns,
}

impl Axis {
    fn other(self) -> Self {
        match self {
            Axis::Rows => Axis::Columns,
            Axis::Columns => Axis::Rows,
        }
    }

    /// `(line count, line length)` for `region`.
    fn extent(self, region: Region) -> (usize, usize) {
        match self {
            Axis::Rows => (region.height as usize, region.width as usize),
            Axis::Columns => (region.width as usize, region.height as usize),
        }
    }

    /// Absolute coordinates of pixel `j` on line `i`.
    #[inline]
    fn point(self, region: Region, i: usize, j: usize) -> (usize, usize) {
        match self {
            Axis::Rows => (region.x as usize + j, region.y as usize + i),
            Axis::Columns => (region.x as usize + i, region.y as usize + j),
        }
    }

    /// The sub-region covering lines `start..start + len`.
    fn span(self, region: Region, start: usize, len: usize) -> Region {
        match self {
            Axis::Rows => Region::new(
                region.x,
                region.y + start as u16,
                region.width,
                len as u16,
            ),
            Axis::Columns => Region::new(
                region.x + start as u16,
                region.y,
                len as u16,
                region.height,
            ),
        }
    }
}

// ── Line classification ──────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Line {
    unchanged: bool,
    uniform: bool,
    /// First pixel of the line in `current`.
    color: u32,
}

impl Line {
    fn splittable(&self) -> bool {
        self.unchanged || self.uniform
    }

    fn mark_mixed(&mut self) {
        self.unchanged = false;
        self.uniform = false;
    }
}

fn classify(
    axis: Axis,
    reference: &Framebuffer,
    current: &Framebuffer,
    region: Region,
) -> Vec<Line> {
    let (count, len) = axis.extent(region);
    (0..count)
        .map(|i| {
            let (x0, y0) = axis.point(region, i, 0);
            let color = current.pixel(x0, y0);
            let mut line = Line {
                unchanged: true,
                uniform: true,
                color,
            };
            for j in 0..len {
                let (x, y) = axis.point(region, i, j);
                let p = current.pixel(x, y);
                if p != reference.pixel(x, y) {
                    line.unchanged = false;
                }
                if p != color {
                    line.uniform = false;
                }
                if !line.splittable() {
                    break;
                }
            }
            line
        })
        .collect()
}

/// Fold interior splittable runs shorter than `min_gap` into mixed.
///
/// Leading and trailing runs are always kept. Returns `true` when no
/// splittable line survives.
fn coalesce(lines: &mut [Line], min_gap: usize) -> bool {
    let n = lines.len();
    let mut i = 0;
    while i < n && lines[i].splittable() {
        i += 1;
    }
    while i < n {
        while i < n && !lines[i].splittable() {
            i += 1;
        }
        let start = i;
        while i < n && lines[i].splittable() {
            i += 1;
        }
        if i < n && i - start < min_gap {
            lines[start..i].iter_mut().for_each(Line::mark_mixed);
        }
    }
    !lines.iter().any(Line::splittable)
}

// ── Decomposer ───────────────────────────────────────────────────

/// Recursive, axis-alternating region splitter.
#[derive(Debug, Clone, Default)]
pub struct Decomposer {
    config: DecomposeConfig,
}

impl Decomposer {
    pub fn new(config: DecomposeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecomposeConfig {
        &self.config
    }

    /// Append the rectangles that turn `reference` into `current` over
    /// `region`, updating `reference` as they are produced.
    ///
    /// Emits nothing when the region is already identical.
    pub fn decompose(
        &self,
        reference: &mut Framebuffer,
        current: &Framebuffer,
        region: Region,
        out: &mut Vec<Rect>,
    ) {
        if region.is_empty() {
            return;
        }
        self.pass(Axis::Rows, reference, current, region, false, out);
    }

    fn min_gap(&self, axis: Axis) -> usize {
        match axis {
            Axis::Rows => self.config.min_gap_y,
            Axis::Columns => self.config.min_gap_x,
        }
    }

    fn pass(
        &self,
        axis: Axis,
        reference: &mut Framebuffer,
        current: &Framebuffer,
        region: Region,
        last: bool,
        out: &mut Vec<Rect>,
    ) {
        let mut lines = classify(axis, reference, current, region);
        let nothing_split = coalesce(&mut lines, self.min_gap(axis));
        let n = lines.len();

        let mut i0 = 0;
        while i0 < n {
            let mut i1 = i0;
            if lines[i0].unchanged {
                while i1 < n && lines[i1].unchanged {
                    i1 += 1;
                }
            } else if lines[i0].uniform {
                let color = lines[i0].color;
                while i1 < n && lines[i1].uniform && lines[i1].color == color {
                    i1 += 1;
                }
                // Leave trailing unchanged lines to the next run.
                while i1 - 1 > i0 && lines[i1 - 1].unchanged {
                    i1 -= 1;
                }
                let span = axis.span(region, i0, i1 - i0);
                tracing::trace!(?span, color, "solid rect");
                out.push(Rect::solid(span, color));
                reference.fill(span, color);
            } else {
                while i1 < n && !lines[i1].splittable() {
                    i1 += 1;
                }
                let span = axis.span(region, i0, i1 - i0);
                if last {
                    self.emit_full(reference, current, span, out);
                } else {
                    self.pass(axis.other(), reference, current, span, nothing_split, out);
                }
            }
            i0 = i1;
        }
    }

    fn emit_full(
        &self,
        reference: &mut Framebuffer,
        current: &Framebuffer,
        region: Region,
        out: &mut Vec<Rect>,
    ) {
        let pixels = current.region_pixels(region);
        let rect = if region.area() * 4 > self.config.raw_threshold_bytes {
            Rect::jpeg(region, pixels)
        } else {
            Rect::raw(region, pixels)
        };
        tracing::trace!(?region, tag = rect.encoding.type_tag(), "full rect");
        out.push(rect);
        reference.copy_region_from(current, region);
    }
}

// ── Tests ────────────────────────────────────────────────────────
