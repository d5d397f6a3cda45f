//! Rectangle wire encoder.
//!
//! Serialises [`Rect`]s into `FramebufferUpdate` messages:
//!
//! - **Raw**: every pixel in the negotiated [`PixelFormat`].
//! - **CopyRect**: source `x`, `y` as `u16`.
//! - **Solid**: an RRE rectangle with zero sub-rectangles, i.e. a `u32`
//!   count of 0 followed by the background pixel.
//! - **Jpeg**: Tight encoding, JPEG sub-type (`0x90`), compact length and
//!   the JPEG stream. Compression is CPU-bound; run
//!   [`encode_update`](RectEncoder::encode_update) on a blocking thread.

use bytes::{BufMut, Bytes, BytesMut};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::error::RfbError;
use crate::rfb::pixel_format::PixelFormat;
use crate::rfb::types::{Encoding, Rect, Region, ENCODING_RAW};

/// Server-to-client message type of `FramebufferUpdate`.
pub const MSG_FRAMEBUFFER_UPDATE: u8 = 0;

/// Tight compression-control byte selecting JPEG.
pub const TIGHT_JPEG: u8 = 0x90;

/// Largest length a 3-byte compact length can carry.
pub const MAX_COMPACT_LEN: usize = (1 << 22) - 1;

/// Bytes before each rectangle payload.
pub const RECT_HEADER_LEN: usize = 12;

/// Append a Tight compact length: 7 bits per byte, low bits first, high
/// bit set when another byte follows. At most 3 bytes.
pub fn put_compact_len(len: usize, out: &mut BytesMut) -> Result<(), RfbError> {
    if len > MAX_COMPACT_LEN {
        return Err(RfbError::Encoding(format!(
            "compact length {len} exceeds {MAX_COMPACT_LEN}"
        )));
    }
    if len <= 0x7f {
        out.put_u8(len as u8);
    } else if len <= 0x3fff {
        out.put_u8((len & 0x7f) as u8 | 0x80);
        out.put_u8((len >> 7) as u8);
    } else {
        out.put_u8((len & 0x7f) as u8 | 0x80);
        out.put_u8(((len >> 7) & 0x7f) as u8 | 0x80);
        out.put_u8((len >> 14) as u8);
    }
    Ok(())
}

// ── RectEncoder ──────────────────────────────────────────────────

/// Serialises rectangles for one client.
#[derive(Debug, Clone)]
pub struct RectEncoder {
    pixel_format: PixelFormat,
    /// JPEG quality, 1..=100.
    jpeg_quality: u8,
    /// Number of updates serialised so far.
    update_count: u64,
}

impl RectEncoder {
    pub fn new(pixel_format: PixelFormat, jpeg_quality: u8) -> Self {
        Self {
            pixel_format,
            jpeg_quality: jpeg_quality.clamp(1, 100),
            update_count: 0,
        }
    }

    pub fn pixel_format(&self) -> &PixelFormat {
        &self.pixel_format
    }

    pub fn set_pixel_format(&mut self, pixel_format: PixelFormat) {
        self.pixel_format = pixel_format;
    }

    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    /// Serialise a complete `FramebufferUpdate` carrying `rects` in order.
    pub fn encode_update(&mut self, rects: &[Rect]) -> Result<Bytes, RfbError> {
        let count = u16::try_from(rects.len()).map_err(|_| RfbError::TooManyRects(rects.len()))?;
        let mut out = BytesMut::with_capacity(4 + rects.len() * (RECT_HEADER_LEN + 8));
        out.put_u8(MSG_FRAMEBUFFER_UPDATE);
        out.put_u8(0);
        out.put_u16(count);
        for rect in rects {
            self.encode_rect(rect, &mut out)?;
        }
        self.update_count += 1;
        tracing::debug!(rects = count, bytes = out.len(), "framebuffer update encoded");
        Ok(out.freeze())
    }

    /// Append one rectangle (header and payload).
    pub fn encode_rect(&self, rect: &Rect, out: &mut BytesMut) -> Result<(), RfbError> {
        let region = rect.region;
        match &rect.encoding {
            Encoding::Raw(pixels) => self.put_raw(region, pixels, out),
            Encoding::CopyRect { src_x, src_y } => {
                put_header(region, rect.encoding.type_tag(), out);
                out.put_u16(*src_x);
                out.put_u16(*src_y);
            }
            Encoding::Solid(color) => {
                put_header(region, rect.encoding.type_tag(), out);
                out.put_u32(0);
                self.pixel_format.put_pixel(*color, out);
            }
            Encoding::Jpeg(pixels) => {
                let jpeg = self.compress(region, pixels)?;
                if jpeg.len() > MAX_COMPACT_LEN {
                    tracing::debug!(?region, size = jpeg.len(), "jpeg too large, sending raw");
                    self.put_raw(region, pixels, out);
                } else {
                    put_header(region, rect.encoding.type_tag(), out);
                    out.put_u8(TIGHT_JPEG);
                    put_compact_len(jpeg.len(), out)?;
                    out.put_slice(&jpeg);
                }
            }
        }
        Ok(())
    }

    fn put_raw(&self, region: Region, pixels: &[u32], out: &mut BytesMut) {
        put_header(region, ENCODING_RAW, out);
        out.reserve(pixels.len() * self.pixel_format.bytes_per_pixel());
        for &p in pixels {
            self.pixel_format.put_pixel(p, out);
        }
    }

    fn compress(&self, region: Region, pixels: &[u32]) -> Result<Vec<u8>, RfbError> {
        let rgb: Vec<u8> = pixels
            .iter()
            .flat_map(|&p| [(p >> 16) as u8, (p >> 8) as u8, p as u8])
            .collect();
        let image = RgbImage::from_raw(region.width as u32, region.height as u32, rgb)
            .ok_or_else(|| RfbError::Encoding(format!("pixel count does not match {region:?}")))?;
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.jpeg_quality).encode_image(&image)?;
        Ok(jpeg)
    }
}

fn put_header(region: Region, tag: i32, out: &mut BytesMut) {
    out.put_u16(region.x);
    out.put_u16(region.y);
    out.put_u16(region.width);
    out.put_u16(region.height);
    out.put_i32(tag);
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Buf;

    /// What a viewer would read back for one rectangle.
    #[derive(Debug, PartialEq)]
    enum Decoded {
        Raw(Vec<u8>),
        Copy(u16, u16),
        Solid(Vec<u8>),
        Jpeg(Vec<u8>),
    }

    fn get_compact_len(buf: &mut &[u8]) -> usize {
        let mut len = 0usize;
        for shift in [0, 7, 14] {
            let b = buf.get_u8();
            if shift == 14 {
                len |= (b as usize) << shift;
                break;
            }
            len |= ((b & 0x7f) as usize) << shift;
            if b & 0x80 == 0 {
                break;
            }
        }
        len
    }

    fn decode_update(bytes: &[u8]) -> Vec<(Region, Decoded)> {
        let mut buf = bytes;
        assert_eq!(buf.get_u8(), MSG_FRAMEBUFFER_UPDATE);
        buf.get_u8();
        let count = buf.get_u16();
        let mut rects = Vec::new();
        for _ in 0..count {
            let region = Region::new(buf.get_u16(), buf.get_u16(), buf.get_u16(), buf.get_u16());
            let decoded = match buf.get_i32() {
                0 => {
                    let n = region.area() * 4;
                    let d = Decoded::Raw(buf[..n].to_vec());
                    buf.advance(n);
                    d
                }
                1 => Decoded::Copy(buf.get_u16(), buf.get_u16()),
                2 => {
                    assert_eq!(buf.get_u32(), 0);
                    let d = Decoded::Solid(buf[..4].to_vec());
                    buf.advance(4);
                    d
                }
                7 => {
                    assert_eq!(buf.get_u8(), TIGHT_JPEG);
                    let n = get_compact_len(&mut buf);
                    let d = Decoded::Jpeg(buf[..n].to_vec());
                    buf.advance(n);
                    d
                }
                other => panic!("unknown encoding {other}"),
            };
            rects.push((region, decoded));
        }
        assert!(buf.is_empty(), "trailing bytes");
        rects
    }

    fn compact(len: usize) -> Vec<u8> {
        let mut out = BytesMut::new();
        put_compact_len(len, &mut out).unwrap();
        out.to_vec()
    }

    #[test]
    fn compact_length_boundaries() {
        assert_eq!(compact(0), vec![0x00]);
        assert_eq!(compact(127), vec![0x7f]);
        assert_eq!(compact(128), vec![0x80, 0x01]);
        assert_eq!(compact(16383), vec![0xff, 0x7f]);
        assert_eq!(compact(16384), vec![0x80, 0x80, 0x01]);
        assert_eq!(compact(MAX_COMPACT_LEN), vec![0xff, 0xff, 0xff]);
        assert!(put_compact_len(MAX_COMPACT_LEN + 1, &mut BytesMut::new()).is_err());

        for len in [5, 300, 20_000, MAX_COMPACT_LEN] {
            let bytes = compact(len);
            assert_eq!(get_compact_len(&mut &bytes[..]), len);
        }
    }

    #[test]
    fn solid_rect_bytes() {
        let mut enc = RectEncoder::new(PixelFormat::default(), 75);
        let bytes = enc
            .encode_update(&[Rect::solid(Region::new(1, 2, 3, 4), 0x00aa_bbcc)])
            .unwrap();
        assert_eq!(
            &bytes[..],
            &[
                0, 0, 0, 1, // header, one rect
                0, 1, 0, 2, 0, 3, 0, 4, // geometry
                0, 0, 0, 2, // RRE
                0, 0, 0, 0, // no sub-rectangles
                0xcc, 0xbb, 0xaa, 0x00, // background B, G, R, pad
            ]
        );
    }

    #[test]
    fn every_variant_reads_back() {
        let mut enc = RectEncoder::new(PixelFormat::default(), 75);
        let raw_region = Region::new(0, 0, 2, 1);
        let copy_region = Region::new(10, 20, 30, 40);
        let solid_region = Region::new(5, 5, 5, 5);
        let jpeg_region = Region::new(16, 16, 32, 16);
        let jpeg_pixels: Vec<u32> = (0..32 * 16).map(|i| (i * 0x0101) as u32).collect();

        let bytes = enc
            .encode_update(&[
                Rect::raw(raw_region, vec![0x0011_2233, 0x0044_5566]),
                Rect::copy(copy_region, 0, 7),
                Rect::solid(solid_region, 0x00ff_0000),
                Rect::jpeg(jpeg_region, jpeg_pixels),
            ])
            .unwrap();
        let rects = decode_update(&bytes);

        assert_eq!(rects.len(), 4);
        assert_eq!(
            rects[0],
            (raw_region, Decoded::Raw(vec![0x33, 0x22, 0x11, 0, 0x66, 0x55, 0x44, 0]))
        );
        assert_eq!(rects[1], (copy_region, Decoded::Copy(0, 7)));
        assert_eq!(rects[2], (solid_region, Decoded::Solid(vec![0, 0, 0xff, 0])));

        let (region, Decoded::Jpeg(jpeg)) = &rects[3] else {
            panic!("expected jpeg, got {:?}", rects[3]);
        };
        assert_eq!(*region, jpeg_region);
        let image = image::load_from_memory(jpeg).unwrap();
        assert_eq!((image.width(), image.height()), (32, 16));
        assert_eq!(enc.update_count(), 1);
    }

    #[test]
    fn raw_follows_pixel_format() {
        let pf = PixelFormat {
            bits_per_pixel: 16,
            depth: 16,
            big_endian: true,
            true_color: true,
            red_max: 31,
            green_max: 63,
            blue_max: 31,
            red_shift: 11,
            green_shift: 5,
            blue_shift: 0,
        };
        let enc = RectEncoder::new(pf, 75);
        let mut out = BytesMut::new();
        enc.encode_rect(&Rect::raw(Region::new(0, 0, 1, 1), vec![0x0000_ff00]), &mut out)
            .unwrap();
        assert_eq!(out.len(), RECT_HEADER_LEN + 2);
        assert_eq!(&out[RECT_HEADER_LEN..], &[0x07, 0xe0]);
    }

    #[test]
    fn too_many_rects_is_an_error() {
        let mut enc = RectEncoder::new(PixelFormat::default(), 75);
        let rects = vec![Rect::copy(Region::new(0, 0, 1, 1), 0, 0); 65_536];
        assert!(matches!(
            enc.encode_update(&rects),
            Err(RfbError::TooManyRects(65_536))
        ));
    }
}
