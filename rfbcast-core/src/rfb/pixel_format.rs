//! RFB pixel format negotiation and per-pixel serialisation.

use bytes::{BufMut, BytesMut};

/// Client pixel format as carried in `ServerInit` and `SetPixelFormat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: bool,
    pub true_color: bool,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

/// 32 bpp little-endian true colour: pixels travel as B, G, R, pad.
impl Default for PixelFormat {
    fn default() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: false,
            true_color: true,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        }
    }
}

impl PixelFormat {
    /// Encoded size on the wire (including 3 padding bytes).
    pub const SIZE: usize = 16;

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            bits_per_pixel: bytes[0],
            depth: bytes[1],
            big_endian: bytes[2] != 0,
            true_color: bytes[3] != 0,
            red_max: u16::from_be_bytes([bytes[4], bytes[5]]),
            green_max: u16::from_be_bytes([bytes[6], bytes[7]]),
            blue_max: u16::from_be_bytes([bytes[8], bytes[9]]),
            red_shift: bytes[10],
            green_shift: bytes[11],
            blue_shift: bytes[12],
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0] = self.bits_per_pixel;
        bytes[1] = self.depth;
        bytes[2] = self.big_endian as u8;
        bytes[3] = self.true_color as u8;
        bytes[4..6].copy_from_slice(&self.red_max.to_be_bytes());
        bytes[6..8].copy_from_slice(&self.green_max.to_be_bytes());
        bytes[8..10].copy_from_slice(&self.blue_max.to_be_bytes());
        bytes[10] = self.red_shift;
        bytes[11] = self.green_shift;
        bytes[12] = self.blue_shift;
        bytes
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bits_per_pixel as usize / 8
    }

    /// Whether pixels can be serialised in this format.
    ///
    /// Colour-map formats, bit depths other than 8/16/32 and channels
    /// that do not fit inside the pixel are not.
    pub fn is_supported(&self) -> bool {
        if !self.true_color || !matches!(self.bits_per_pixel, 8 | 16 | 32) {
            return false;
        }
        let bits = self.bits_per_pixel as u32;
        let fits = |max: u16, shift: u8| {
            (shift as u32) < bits && ((max as u64) << shift) < (1u64 << bits)
        };
        fits(self.red_max, self.red_shift)
            && fits(self.green_max, self.green_shift)
            && fits(self.blue_max, self.blue_shift)
    }

    /// Append a `0x00RRGGBB` pixel in this format.
    pub fn put_pixel(&self, pixel: u32, out: &mut BytesMut) {
        let value = self.pack(pixel);
        match (self.bits_per_pixel, self.big_endian) {
            (8, _) => out.put_u8(value as u8),
            (16, true) => out.put_u16(value as u16),
            (16, false) => out.put_u16_le(value as u16),
            (_, true) => out.put_u32(value),
            (_, false) => out.put_u32_le(value),
        }
    }

    fn pack(&self, pixel: u32) -> u32 {
        let scale = |c: u32, max: u16| (c * max as u32 + 127) / 255;
        let r = scale((pixel >> 16) & 0xff, self.red_max);
        let g = scale((pixel >> 8) & 0xff, self.green_max);
        let b = scale(pixel & 0xff, self.blue_max);
        let shift = |c: u32, by: u8| c.checked_shl(by as u32).unwrap_or(0);
        shift(r, self.red_shift) | shift(g, self.green_shift) | shift(b, self.blue_shift)
    }
}

// ── Tests ────────────────────────────────────────────────────────
