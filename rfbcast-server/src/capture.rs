//! Frame sources provided by the server binary.
//!
//! - [`ImageFileSource`]: an image on disk, re-read on every capture so
//!   an external program can keep rewriting it.
//! - [`SyntheticSource`]: a generated pattern with scrolling stripes and
//!   a moving box, for demos and for exercising scroll detection.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use image::RgbImage;

use rfbcast_core::{FrameSource, Framebuffer, Region, RfbError};

// ── ImageFileSource ──────────────────────────────────────────────

#[derive(Debug)]
pub struct ImageFileSource {
    path: PathBuf,
    width: u16,
    height: u16,
    /// Last successfully decoded frame, served when a re-read fails.
    last: Framebuffer,
}

impl ImageFileSource {
    /// Load the image once to fix the session geometry.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RfbError> {
        let path = path.as_ref().to_path_buf();
        let image = read_image(&path).await?;
        let (width, height) = checked_dimensions(&image)?;
        tracing::info!(path = %path.display(), width, height, "image source opened");
        Ok(Self {
            path,
            width,
            height,
            last: to_framebuffer(&image, width, height),
        })
    }
}

#[async_trait]
impl FrameSource for ImageFileSource {
    fn dimensions(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    async fn capture(&mut self, frame: &mut Framebuffer, region: Region) -> Result<(), RfbError> {
        match read_image(&self.path).await {
            Ok(image) => {
                if image.dimensions() != (self.width as u32, self.height as u32) {
                    tracing::info!(
                        path = %self.path.display(),
                        width = image.width(),
                        height = image.height(),
                        "image size changed"
                    );
                    return Err(RfbError::CaptureEnded);
                }
                self.last = to_framebuffer(&image, self.width, self.height);
            }
            Err(e) => {
                // Writers replace the file non-atomically; keep the last frame.
                tracing::debug!(path = %self.path.display(), error = %e, "re-read failed");
            }
        }
        frame.copy_region_from(&self.last, region);
        Ok(())
    }
}

async fn read_image(path: &Path) -> Result<RgbImage, RfbError> {
    let data = tokio::fs::read(path).await?;
    let image = tokio::task::spawn_blocking(move || image::load_from_memory(&data)).await??;
    Ok(image.to_rgb8())
}

fn checked_dimensions(image: &RgbImage) -> Result<(u16, u16), RfbError> {
    let (w, h) = image.dimensions();
    match (u16::try_from(w), u16::try_from(h)) {
        (Ok(w), Ok(h)) if w > 0 && h > 0 => Ok((w, h)),
        _ => Err(RfbError::Capture(format!("unsupported image size {w}x{h}"))),
    }
}

fn to_framebuffer(image: &RgbImage, width: u16, height: u16) -> Framebuffer {
    let pixels = image
        .pixels()
        .map(|p| (p[0] as u32) << 16 | (p[1] as u32) << 8 | p[2] as u32)
        .collect();
    Framebuffer::from_pixels(width, height, pixels)
}

// ── SyntheticSource ──────────────────────────────────────────────

const STRIPE_HEIGHT: usize = 16;
const SCROLL_STEP: usize = 4;
const BOX_SIZE: usize = 32;
const BACKGROUND: u32 = 0x0020_2020;
const BOX_COLOR: u32 = 0x00ff_c000;
const PALETTE: [u32; 4] = [0x00e0_e0e0, 0x0030_60c0, 0x00c0_3030, 0x0030_a050];

/// Generated test pattern.
///
/// The upper half holds stripes scrolling up by a few pixels per tick;
/// the lower half a box moving right. Each tick is a pure function of
/// its number, so two sources at the same tick render the same frame.
#[derive(Debug)]
pub struct SyntheticSource {
    width: u16,
    height: u16,
    fps: u32,
    started: Instant,
    fixed_tick: Option<u64>,
}

impl SyntheticSource {
    pub fn new(width: u16, height: u16, fps: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            fps: fps.max(1),
            started: Instant::now(),
            fixed_tick: None,
        }
    }

    /// Freeze the animation at `tick`.
    pub fn set_tick(&mut self, tick: u64) {
        self.fixed_tick = Some(tick);
    }

    pub fn tick(&self) -> u64 {
        self.fixed_tick.unwrap_or_else(|| {
            let elapsed = self.started.elapsed();
            (elapsed.as_millis() as u64 * self.fps as u64) / 1000
        })
    }

    /// Colour of one pixel at `tick`.
    pub fn pixel_at(&self, x: usize, y: usize, tick: u64) -> u32 {
        let (w, h) = (self.width as usize, self.height as usize);
        let tick = tick as usize;
        if y < h / 2 {
            let yy = y + tick * SCROLL_STEP;
            let band = yy / STRIPE_HEIGHT;
            // Checker the stripes so rows are distinguishable.
            if (x / 8 + band) % 3 == 0 {
                PALETTE[(band + 1) % PALETTE.len()]
            } else {
                PALETTE[band % PALETTE.len()]
            }
        } else {
            let box_x = (tick * 2) % w.max(1);
            let box_y = h / 2 + (h / 2).saturating_sub(BOX_SIZE) / 2;
            let inside_x = x >= box_x && x < box_x + BOX_SIZE;
            let inside_y = y >= box_y && y < box_y + BOX_SIZE;
            if inside_x && inside_y {
                BOX_COLOR
            } else {
                BACKGROUND
            }
        }
    }
}

#[async_trait]
impl FrameSource for SyntheticSource {
    fn dimensions(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    async fn capture(&mut self, frame: &mut Framebuffer, region: Region) -> Result<(), RfbError> {
        let tick = self.tick();
        let region = region.clamp_to(self.width, self.height);
        for y in region.y as usize..region.bottom() {
            for x in region.x as usize..region.right() {
                frame.set_pixel(x, y, self.pixel_at(x, y, tick));
            }
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn temp_png(name: &str, width: u32, height: u32, color: [u8; 3]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("rfbcast-{name}-{}.png", std::process::id()));
        RgbImage::from_pixel(width, height, Rgb(color)).save(&path).unwrap();
        path
    }

    #[tokio::test]
    async fn image_source_reads_pixels() {
        let path = temp_png("read", 6, 4, [0x12, 0x34, 0x56]);
        let mut source = ImageFileSource::open(&path).await.unwrap();
        assert_eq!(source.dimensions(), (6, 4));

        let mut frame = Framebuffer::new(6, 4);
        source.capture(&mut frame, Region::new(0, 0, 6, 4)).await.unwrap();
        assert_eq!(frame.pixel(5, 3), 0x0012_3456);
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn image_source_ends_on_resize() {
        let path = temp_png("resize", 6, 4, [0, 0, 0]);
        let mut source = ImageFileSource::open(&path).await.unwrap();
        RgbImage::new(8, 8).save(&path).unwrap();

        let mut frame = Framebuffer::new(6, 4);
        assert!(matches!(
            source.capture(&mut frame, Region::new(0, 0, 6, 4)).await,
            Err(RfbError::CaptureEnded)
        ));
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn image_source_keeps_last_frame_when_missing() {
        let path = temp_png("missing", 4, 4, [0xff, 0, 0]);
        let mut source = ImageFileSource::open(&path).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        let mut frame = Framebuffer::new(4, 4);
        source.capture(&mut frame, Region::new(0, 0, 4, 4)).await.unwrap();
        assert_eq!(frame.pixel(0, 0), 0x00ff_0000);
    }

    #[tokio::test]
    async fn missing_image_fails_to_open() {
        let path = std::env::temp_dir().join("rfbcast-definitely-missing.png");
        assert!(ImageFileSource::open(&path).await.is_err());
    }

    #[tokio::test]
    async fn synthetic_stripes_scroll_between_ticks() {
        let mut source = SyntheticSource::new(64, 64, 10);
        let mut before = Framebuffer::new(64, 64);
        let mut after = Framebuffer::new(64, 64);
        source.set_tick(3);
        source.capture(&mut before, Region::new(0, 0, 64, 64)).await.unwrap();
        source.set_tick(4);
        source.capture(&mut after, Region::new(0, 0, 64, 64)).await.unwrap();

        // Upper half moved up by one step.
        for y in 0..32 - SCROLL_STEP {
            for x in 0..64 {
                assert_eq!(after.pixel(x, y), before.pixel(x, y + SCROLL_STEP));
            }
        }
        assert_ne!(before, after);
    }

    #[test]
    fn synthetic_box_moves() {
        let source = SyntheticSource::new(128, 96, 10);
        let y = 48 + (48 - BOX_SIZE) / 2;
        assert_eq!(source.pixel_at(0, y, 0), BOX_COLOR);
        assert_eq!(source.pixel_at(0, y, 1), BACKGROUND);
        assert_eq!(source.pixel_at(2, y, 1), BOX_COLOR);
    }
}
