//! Palette index to host pixel conversion

use serde::{Deserialize, Serialize};

/// Host framebuffer pixel layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 16-bit 5:6:5, stored in the low half of each `u32`
    #[default]
    Rgb565,
    /// 32-bit 0RGB
    Xrgb8888,
}

impl PixelFormat {
    /// Bytes per pixel the host expects
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb565 => 2,
            PixelFormat::Xrgb8888 => 4,
        }
    }
}

/// Maps a palette index to red, green and blue in 0.0..=1.0
pub type IndexToRgb = fn(u8) -> (f32, f32, f32);

/// Enterprise Nick palette
///
/// The colour byte interleaves the channel bits: red from bits 0/3/6,
/// green from bits 1/4/7, blue from bits 2/5 (most significant first).
pub fn nick_palette(index: u8) -> (f32, f32, f32) {
    let bit = |n: u8| (index >> n) & 1;
    let r = (bit(0) << 2) | (bit(3) << 1) | bit(6);
    let g = (bit(1) << 2) | (bit(4) << 1) | bit(7);
    let b = (bit(2) << 1) | bit(5);
    (r as f32 / 7.0, g as f32 / 7.0, b as f32 / 3.0)
}

/// Linear grey ramp, index / 255
pub fn grayscale(index: u8) -> (f32, f32, f32) {
    let v = index as f32 / 255.0;
    (v, v, v)
}

#[inline]
fn channel(x: f32) -> u32 {
    if x > 0.0 {
        if x < 1.0 {
            (x * 255.0 + 0.5) as u32
        } else {
            255
        }
    } else {
        0
    }
}

/// Pack a colour as RGB565
pub fn pack_rgb565(r: f32, g: f32, b: f32) -> u16 {
    let (r, g, b) = (channel(r), channel(g), channel(b));
    (((r & 0xF8) << 8) | ((g & 0xFC) << 3) | (b >> 3)) as u16
}

/// Pack a colour as XRGB8888
pub fn pack_xrgb8888(r: f32, g: f32, b: f32) -> u32 {
    (channel(r) << 16) | (channel(g) << 8) | channel(b)
}

/// 256-entry lookup from palette index to host pixel
#[derive(Clone)]
pub struct Colormap {
    format: PixelFormat,
    table: [u32; 256],
}

impl Colormap {
    /// Build the table for `format` from `index_to_rgb`
    pub fn new(format: PixelFormat, index_to_rgb: IndexToRgb) -> Self {
        let mut table = [0u32; 256];
        for (i, px) in table.iter_mut().enumerate() {
            let (r, g, b) = index_to_rgb(i as u8);
            *px = match format {
                PixelFormat::Rgb565 => pack_rgb565(r, g, b) as u32,
                PixelFormat::Xrgb8888 => pack_xrgb8888(r, g, b),
            };
        }
        Self { format, table }
    }

    /// Pixel format of the table
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Host pixel for palette index `index`
    #[inline]
    pub fn lookup(&self, index: u8) -> u32 {
        self.table[index as usize]
    }
}

impl std::fmt::Debug for Colormap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Colormap")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}
