// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic frame content for the virtual camera

use crate::backends::camera::types::{BackendError, RawBuffer, Resolution};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use std::sync::Arc;

/// JPEG quality for synthetic frames
const SYNTHETIC_JPEG_QUALITY: u8 = 85;

/// Maximum 10-bit sample value
const RAW_WHITE_LEVEL: f32 = 1023.0;

/// Scale factor for an exposure offset in EV
fn exposure_gain(ev: f32) -> f32 {
    2f32.powf(ev)
}

/// Encode a gradient test pattern as JPEG
///
/// Brightness follows the exposure offset so bracketed frames differ
/// visibly; the frame index shifts the pattern horizontally.
pub fn synthetic_jpeg(size: Resolution, frame_index: u32, ev: f32) -> Result<Arc<[u8]>, BackendError> {
    let gain = exposure_gain(ev);
    let shift = frame_index.wrapping_mul(7) % size.width.max(1);
    let image = RgbImage::from_fn(size.width, size.height, |x, y| {
        let width = size.width.max(1);
        let base_r = ((x + shift) % width * 255 / width) as f32;
        let base_g = (y * 255 / size.height.max(1)) as f32;
        let scale = |v: f32| (v * gain).clamp(0.0, 255.0) as u8;
        Rgb([scale(base_r), scale(base_g), scale(128.0)])
    });

    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, SYNTHETIC_JPEG_QUALITY)
        .encode_image(&image)
        .map_err(|e| BackendError::Other(format!("JPEG encoding failed: {}", e)))?;
    Ok(Arc::from(bytes))
}

/// Build an RGGB mosaic of 10-bit samples
pub fn synthetic_raw(size: Resolution, ev: f32) -> RawBuffer {
    let gain = exposure_gain(ev);
    let mut data = Vec::with_capacity((size.width * size.height) as usize);
    for y in 0..size.height {
        for x in 0..size.width {
            // R/G on even rows, G/B on odd rows
            let level = match (y % 2, x % 2) {
                (0, 0) => 0.55,
                (1, 1) => 0.35,
                _ => 0.45,
            };
            data.push((level * RAW_WHITE_LEVEL * gain).min(RAW_WHITE_LEVEL) as u16);
        }
    }
    RawBuffer {
        width: size.width,
        height: size.height,
        bits_per_sample: 10,
        data: Arc::from(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jpeg_has_soi_marker() {
        let bytes = synthetic_jpeg(Resolution::new(16, 8), 0, 0.0).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_raw_saturates_at_white_level() {
        let raw = synthetic_raw(Resolution::new(4, 4), 3.0);
        assert_eq!(raw.data.len(), 16);
        assert!(raw.data.iter().all(|&v| v <= 1023));
        assert_eq!(raw.data[0], 1023);
    }
}
