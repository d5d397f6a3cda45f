//! Shared pixel-buffer and rectangle types for the update pipeline.
//!
//! Pixels are stored as `u32` values laid out `0x00RRGGBB`. This is the
//! internal representation only; the wire representation is chosen by
//! [`PixelFormat`](crate::rfb::pixel_format::PixelFormat) at
//! serialisation time.

// ── Region ───────────────────────────────────────────────────────

/// An axis-aligned rectangle in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Region {
    /// Left edge in pixels.
    pub x: u16,
    /// Top edge in pixels.
    pub y: u16,
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
}

impl Region {
    pub const fn new(x: u16, y: u16, width: u16, height: u16) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Number of pixels covered.
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Exclusive right edge.
    pub fn right(&self) -> usize {
        self.x as usize + self.width as usize
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> usize {
        self.y as usize + self.height as usize
    }

    /// Whether the two regions share at least one pixel.
    pub fn intersects(&self, other: &Region) -> bool {
        !(self.right() <= other.x as usize
            || self.x as usize >= other.right()
            || self.bottom() <= other.y as usize
            || self.y as usize >= other.bottom())
    }

    /// Whether `(x, y)` lies inside the region.
    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x as usize && x < self.right() && y >= self.y as usize && y < self.bottom()
    }

    /// Clip the region to a `width × height` screen.
    pub fn clamp_to(&self, width: u16, height: u16) -> Region {
        let x = self.x.min(width);
        let y = self.y.min(height);
        let right = self.right().min(width as usize);
        let bottom = self.bottom().min(height as usize);
        Region {
            x,
            y,
            width: (right - x as usize) as u16,
            height: (bottom - y as usize) as u16,
        }
    }
}

// ── Rect ─────────────────────────────────────────────────────────

/// Payload of one update rectangle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoding {
    /// Uncompressed pixels, row-major.
    Raw(Vec<u32>),
    /// Copy the same-sized area whose top-left corner is `(src_x, src_y)`.
    CopyRect { src_x: u16, src_y: u16 },
    /// Fill the whole rectangle with one colour.
    Solid(u32),
    /// Row-major pixels to be sent as a lossy compressed image.
    Jpeg(Vec<u32>),
}

impl Encoding {
    /// RFB encoding-type tag written in the rectangle header.
    pub fn type_tag(&self) -> i32 {
        match self {
            Encoding::Raw(_) => ENCODING_RAW,
            Encoding::CopyRect { .. } => ENCODING_COPYRECT,
            Encoding::Solid(_) => ENCODING_RRE,
            Encoding::Jpeg(_) => ENCODING_TIGHT,
        }
    }
}

pub const ENCODING_RAW: i32 = 0;
pub const ENCODING_COPYRECT: i32 = 1;
pub const ENCODING_RRE: i32 = 2;
pub const ENCODING_TIGHT: i32 = 7;

/// One rectangle of a framebuffer update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rect {
    pub region: Region,
    pub encoding: Encoding,
}

impl Rect {
    pub fn solid(region: Region, color: u32) -> Self {
        Self {
            region,
            encoding: Encoding::Solid(color),
        }
    }

    pub fn copy(region: Region, src_x: u16, src_y: u16) -> Self {
        Self {
            region,
            encoding: Encoding::CopyRect { src_x, src_y },
        }
    }

    pub fn raw(region: Region, pixels: Vec<u32>) -> Self {
        Self {
            region,
            encoding: Encoding::Raw(pixels),
        }
    }

    pub fn jpeg(region: Region, pixels: Vec<u32>) -> Self {
        Self {
            region,
            encoding: Encoding::Jpeg(pixels),
        }
    }
}

// ── Framebuffer ──────────────────────────────────────────────────

/// A full-screen grid of `0x00RRGGBB` pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framebuffer {
    width: u16,
    height: u16,
    pixels: Vec<u32>,
}

impl Framebuffer {
    /// A black framebuffer.
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    /// Wrap an existing pixel vector.
    ///
    /// # Panics
    ///
    /// Panics if `pixels.len() != width * height`.
    pub fn from_pixels(width: u16, height: u16, pixels: Vec<u32>) -> Self {
        assert_eq!(
            pixels.len(),
            width as usize * height as usize,
            "pixel count must match dimensions"
        );
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    /// The whole screen as a region.
    pub fn bounds(&self) -> Region {
        Region::new(0, 0, self.width, self.height)
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    #[inline]
    fn index(&self, x: usize, y: usize) -> usize {
        y * self.width as usize + x
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> u32 {
        self.pixels[self.index(x, y)]
    }

    #[inline]
    pub fn set_pixel(&mut self, x: usize, y: usize, color: u32) {
        let i = self.index(x, y);
        self.pixels[i] = color;
    }

    /// `len` pixels of row `y`, starting at column `x`.
    pub fn row(&self, x: usize, y: usize, len: usize) -> &[u32] {
        let start = self.index(x, y);
        &self.pixels[start..start + len]
    }

    /// Pixel at `(x, y)` or `None` when outside the screen.
    pub fn checked_pixel(&self, x: isize, y: isize) -> Option<u32> {
        if x < 0 || y < 0 || x >= self.width as isize || y >= self.height as isize {
            return None;
        }
        Some(self.pixel(x as usize, y as usize))
    }

    /// Paint `region` with a single colour.
    pub fn fill(&mut self, region: Region, color: u32) {
        let w = region.width as usize;
        for y in region.y as usize..region.bottom() {
            let start = self.index(region.x as usize, y);
            self.pixels[start..start + w].fill(color);
        }
    }

    /// Overwrite `region` with the same area of `other`.
    pub fn copy_region_from(&mut self, other: &Framebuffer, region: Region) {
        let w = region.width as usize;
        for y in region.y as usize..region.bottom() {
            let start = self.index(region.x as usize, y);
            self.pixels[start..start + w].copy_from_slice(&other.pixels[start..start + w]);
        }
    }

    /// Row-major copy of the pixels inside `region`.
    pub fn region_pixels(&self, region: Region) -> Vec<u32> {
        let w = region.width as usize;
        let mut out = Vec::with_capacity(region.area());
        for y in region.y as usize..region.bottom() {
            out.extend_from_slice(self.row(region.x as usize, y, w));
        }
        out
    }

    /// Write row-major `pixels` into `region`.
    pub fn put_region_pixels(&mut self, region: Region, pixels: &[u32]) {
        let w = region.width as usize;
        if w == 0 {
            return;
        }
        for (row, src) in pixels.chunks_exact(w).enumerate() {
            let start = self.index(region.x as usize, region.y as usize + row);
            self.pixels[start..start + w].copy_from_slice(src);
        }
    }

    /// Whether `self` and `other` hold identical pixels inside `region`.
    pub fn regions_equal(&self, other: &Framebuffer, region: Region) -> bool {
        let w = region.width as usize;
        (region.y as usize..region.bottom()).all(|y| {
            self.row(region.x as usize, y, w) == other.row(region.x as usize, y, w)
        })
    }

    /// Translate the content of `region` by `(dx, dy)` in place.
    ///
    /// Only the part of `region` that stays inside `region` after the
    /// shift is written; its source is the same area moved back by
    /// `(dx, dy)`. Rows are visited bottom-up when `dy > 0` and top-down
    /// otherwise, and each row is moved with an overlap-safe copy, so no
    /// source pixel is overwritten before it has been read.
    pub fn shift_within(&mut self, region: Region, dx: i32, dy: i32) {
        let adx = dx.unsigned_abs() as usize;
        let ady = dy.unsigned_abs() as usize;
        let w = region.width as usize;
        let h = region.height as usize;
        if w <= adx || h <= ady {
            return;
        }
        let ww = w - adx;
        let hh = h - ady;
        let (src_x, dst_x) = if dx > 0 {
            (region.x as usize, region.x as usize + adx)
        } else {
            (region.x as usize + adx, region.x as usize)
        };
        let (src_y, dst_y) = if dy > 0 {
            (region.y as usize, region.y as usize + ady)
        } else {
            (region.y as usize + ady, region.y as usize)
        };

        for step in 0..hh {
            let i = if dy > 0 { hh - 1 - step } else { step };
            let src = self.index(src_x, src_y + i);
            let dst = self.index(dst_x, dst_y + i);
            self.pixels.copy_within(src..src + ww, dst);
        }
    }

    /// Replay one update rectangle the way a viewer would.
    ///
    /// `Jpeg` rectangles are replayed from the pixels they carry, so the
    /// result is the exact image before lossy compression.
    pub fn apply(&mut self, rect: &Rect) {
        let region = rect.region;
        match &rect.encoding {
            Encoding::Raw(pixels) | Encoding::Jpeg(pixels) => {
                self.put_region_pixels(region, pixels);
            }
            Encoding::Solid(color) => self.fill(region, *color),
            Encoding::CopyRect { src_x, src_y } => {
                let src = Region::new(*src_x, *src_y, region.width, region.height);
                let pixels = self.region_pixels(src);
                self.put_region_pixels(region, &pixels);
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
