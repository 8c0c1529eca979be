//! Synthetic camera frames for the device simulator.
//!
//! Renders a gradient with a moving crosshair and a border so letterboxing
//! and tap positions are easy to eyeball, then JPEG-compresses it the same
//! way the phone does.

use anyhow::Result;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, RgbImage};
use std::io::Cursor;

use super::JPEG_QUALITY;

/// RGB test pattern, `width × height × 3` bytes. `seq` moves the crosshair.
pub fn test_pattern(width: u32, height: u32, seq: u64) -> Vec<u8> {
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    let cross_x = (seq * 4 % width.max(1) as u64) as u32;
    let cross_y = (seq * 3 % height.max(1) as u64) as u32;

    for y in 0..height {
        for x in 0..width {
            let border = x < 2 || y < 2 || x + 2 >= width || y + 2 >= height;
            let cross = x == cross_x || y == cross_y;
            if border {
                rgb.extend_from_slice(&[255, 255, 0]);
            } else if cross {
                rgb.extend_from_slice(&[255, 255, 255]);
            } else {
                let r = (x * 255 / width.max(1)) as u8;
                let g = (y * 255 / height.max(1)) as u8;
                rgb.extend_from_slice(&[r, g, 96]);
            }
        }
    }

    rgb
}

/// JPEG encode an RGB buffer
pub fn jpeg_encode(rgb: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);

    let img: RgbImage = ImageBuffer::from_raw(width, height, rgb.to_vec())
        .ok_or_else(|| anyhow::anyhow!("Invalid image dimensions"))?;

    img.write_with_encoder(encoder)
        .map_err(|e| anyhow::anyhow!("JPEG encode failed: {}", e))?;

    Ok(buf.into_inner())
}
