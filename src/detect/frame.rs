//! Camera frames handed to detectors

use crate::error::{Error, Result};
use bytes::Bytes;
use image::{DynamicImage, GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Pixel layout of a [`Frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    /// 8-bit grayscale, one byte per pixel
    Luma8,
    /// 8-bit RGB, three bytes per pixel
    Rgb8,
}

impl FrameFormat {
    /// Bytes per pixel
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            FrameFormat::Luma8 => 1,
            FrameFormat::Rgb8 => 3,
        }
    }
}

/// One frame from the camera.
///
/// Pixel data is reference-counted so a frame can be offered to every
/// enabled detector without copying.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic frame counter assigned by the producer
    pub sequence: u64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Clockwise rotation already applied to the pixels, in degrees
    pub rotation: u32,
    /// Pixel layout
    pub format: FrameFormat,
    /// Tightly packed pixel rows
    pub data: Bytes,
    /// When the frame was captured
    pub captured_at: Instant,
}

impl Frame {
    /// Wrap raw pixels, checking the buffer length against the dimensions
    pub fn new(
        sequence: u64,
        width: u32,
        height: u32,
        format: FrameFormat,
        data: impl Into<Bytes>,
    ) -> Result<Self> {
        let data = data.into();
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(Error::FrameCapture(format!(
                "{width}x{height} {format:?} frame needs {expected} bytes, got {}",
                data.len()
            )));
        }

        Ok(Self {
            sequence,
            width,
            height,
            rotation: 0,
            format,
            data,
            captured_at: Instant::now(),
        })
    }

    /// Build a frame from a decoded image, keeping grayscale images as luma
    pub fn from_image(sequence: u64, img: &DynamicImage) -> Self {
        let (format, width, height, data) = match img {
            DynamicImage::ImageLuma8(gray) => {
                (FrameFormat::Luma8, gray.width(), gray.height(), gray.as_raw().clone())
            }
            other => {
                let rgb = other.to_rgb8();
                (FrameFormat::Rgb8, rgb.width(), rgb.height(), rgb.into_raw())
            }
        };

        Self {
            sequence,
            width,
            height,
            rotation: 0,
            format,
            data: Bytes::from(data),
            captured_at: Instant::now(),
        }
    }

    /// Record the rotation that was applied to the pixels
    pub fn with_rotation(mut self, degrees: u32) -> Self {
        self.rotation = degrees % 360;
        self
    }

    /// Grayscale view for detectors that only need luminance
    pub fn to_gray_image(&self) -> Result<GrayImage> {
        match self.format {
            FrameFormat::Luma8 => GrayImage::from_raw(self.width, self.height, self.data.to_vec())
                .ok_or_else(|| Error::Image("Failed to create grayscale image".to_string())),
            FrameFormat::Rgb8 => {
                let rgb = RgbImage::from_raw(self.width, self.height, self.data.to_vec())
                    .ok_or_else(|| Error::Image("Failed to create RGB image".to_string()))?;
                Ok(DynamicImage::ImageRgb8(rgb).to_luma8())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_buffers() {
        let err = Frame::new(0, 4, 4, FrameFormat::Rgb8, vec![0u8; 10]).unwrap_err();
        assert!(matches!(err, Error::FrameCapture(_)));
    }

    #[test]
    fn rgb_frames_convert_to_gray() {
        let frame = Frame::new(3, 2, 1, FrameFormat::Rgb8, vec![255, 255, 255, 0, 0, 0]).unwrap();
        let gray = frame.to_gray_image().unwrap();
        assert_eq!(gray.dimensions(), (2, 1));
        assert_eq!(gray.get_pixel(0, 0).0[0], 255);
        assert_eq!(gray.get_pixel(1, 0).0[0], 0);
    }

    #[test]
    fn luma_images_stay_luma() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(8, 6));
        let frame = Frame::from_image(1, &img).with_rotation(450);
        assert_eq!(frame.format, FrameFormat::Luma8);
        assert_eq!(frame.data.len(), 48);
        assert_eq!(frame.rotation, 90);
    }
}
