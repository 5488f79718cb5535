//! V4L2 camera backend for Linux
//!
//! Implements [`CameraControl`] over the Video4Linux2 API. Preview sizes are
//! the discrete frame sizes the driver lists for the configured pixel format.
//! A stepwise or continuous range contributes only its maximum and minimum
//! sizes; intermediate steps are not enumerated. A driver that cannot list
//! sizes at all leaves selection with the current format's size.
//! V4L2 has no display orientation, so the requested rotation is applied in
//! software when frames are converted.

use super::{CameraConfig, CameraControl, FocusMode, PixelFormat};
use crate::detect::Frame;
use crate::error::{Error, Result};
use crate::geometry::Resolution;
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use std::mem;
use std::panic::{AssertUnwindSafe, catch_unwind};
use v4l::buffer::Type;
use v4l::control::{Control, Value};
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

const V4L2_CID_FOCUS_ABSOLUTE: u32 = 0x009a_090a;
const V4L2_CID_FOCUS_AUTO: u32 = 0x009a_090c;

/// Information about a camera device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraDevice {
    /// Device index (e.g., 0 for /dev/video0)
    pub index: usize,
    /// Device path (e.g., "/dev/video0")
    pub path: String,
    /// Device name
    pub name: String,
    /// Driver name
    pub driver: String,
    /// Bus information
    pub bus_info: String,
}

/// List available V4L2 capture devices
pub fn list_devices() -> Result<Vec<CameraDevice>> {
    let devices: Vec<CameraDevice> = (0..10)
        .filter_map(|index| {
            let dev = v4l::Device::new(index).ok()?;
            let caps = dev.query_caps().ok()?;
            caps.capabilities
                .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                .then(|| CameraDevice {
                    index,
                    path: format!("/dev/video{index}"),
                    name: caps.card,
                    driver: caps.driver,
                    bus_info: caps.bus,
                })
        })
        .collect();

    if devices.is_empty() {
        return Err(Error::CameraNotFound(
            "No V4L2 capture devices found".to_string(),
        ));
    }

    Ok(devices)
}

/// Find a camera device by name (case-insensitive substring match)
pub fn find_device_by_name(name: &str) -> Result<CameraDevice> {
    let name_lower = name.to_lowercase();

    list_devices()?
        .into_iter()
        .find(|d| d.name.to_lowercase().contains(&name_lower))
        .ok_or_else(|| Error::CameraNotFound(format!("No device matching '{}'", name)))
}

/// Whether the device node can be opened for capture by this process
pub fn device_accessible(path: impl AsRef<std::path::Path>) -> bool {
    std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .is_ok()
}

fn v4l_error(context: &str, err: std::io::Error) -> Error {
    Error::Camera(format!("{context}: {err}"))
}

/// Open V4L2 capture device
pub struct V4l2Camera {
    // Declared before `device` so the stream is dropped first.
    stream: Option<MmapStream<'static>>,
    device: Box<Device>,
    info: CameraDevice,
    config: CameraConfig,
    rotation: u32,
    sequence: u64,
}

impl V4l2Camera {
    /// Open the device selected by the configuration
    pub fn open(config: CameraConfig) -> Result<Self> {
        let info = resolve_device(&config)?;
        tracing::info!("Opening camera: {} at {}", info.name, info.path);

        let device = Device::new(info.index).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                Error::PermissionDenied(format!("Cannot open {}: {e}", info.path))
            }
            _ => v4l_error("Failed to open device", e),
        })?;

        let mut fmt = device
            .format()
            .map_err(|e| v4l_error("Failed to get format", e))?;
        if fmt.fourcc != config.format.to_fourcc() {
            fmt.fourcc = config.format.to_fourcc();
            device
                .set_format(&fmt)
                .map_err(|e| v4l_error("Failed to set pixel format", e))?;
        }

        Ok(Self {
            stream: None,
            device: Box::new(device),
            info,
            config,
            rotation: 0,
            sequence: 0,
        })
    }

    /// Get camera device information
    pub fn info(&self) -> &CameraDevice {
        &self.info
    }

    /// Get camera configuration
    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Whether frames are streaming
    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    /// Capture the next frame, converted and rotated for the detectors
    pub fn capture_frame(&mut self) -> Result<Frame> {
        let fmt = self
            .device
            .format()
            .map_err(|e| v4l_error("Failed to get format", e))?;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::FrameCapture("Camera is not started".to_string()))?;

        let (buf, _meta) = stream
            .next()
            .map_err(|e| Error::FrameCapture(format!("Failed to capture: {}", e)))?;

        let img = decode_frame(self.config.format, buf, fmt.width, fmt.height)?;
        let img = rotate(img, self.rotation);

        self.sequence += 1;
        Ok(Frame::from_image(self.sequence, &img).with_rotation(self.rotation))
    }

    fn controls(&self) -> Vec<u32> {
        // Some drivers report control types the v4l crate panics on.
        match catch_unwind(AssertUnwindSafe(|| self.device.query_controls())) {
            Ok(Ok(descriptions)) => descriptions.into_iter().map(|d| d.id).collect(),
            Ok(Err(_)) | Err(_) => Vec::new(),
        }
    }
}

impl CameraControl for V4l2Camera {
    fn supported_preview_sizes(&self) -> Result<Vec<Resolution>> {
        let sizes = self
            .device
            .enum_framesizes(self.config.format.to_fourcc())
            .map_err(|e| Error::ParametersUnavailable(format!("Failed to list frame sizes: {e}")))?;

        let mut resolutions = Vec::new();
        for size in sizes {
            match size.size {
                FrameSizeEnum::Discrete(d) => resolutions.push(Resolution::new(d.width, d.height)),
                FrameSizeEnum::Stepwise(s) => {
                    // Range endpoints only.
                    resolutions.push(Resolution::new(s.max_width, s.max_height));
                    resolutions.push(Resolution::new(s.min_width, s.min_height));
                }
            }
        }
        resolutions.retain(|r| r.width > 0 && r.height > 0);
        Ok(resolutions)
    }

    fn current_preview_size(&self) -> Result<Option<Resolution>> {
        let fmt = self
            .device
            .format()
            .map_err(|e| Error::ParametersUnavailable(format!("Failed to get format: {e}")))?;
        Ok((fmt.width > 0 && fmt.height > 0).then(|| Resolution::new(fmt.width, fmt.height)))
    }

    fn set_preview_size(&mut self, size: Resolution) -> Result<()> {
        if self.stream.is_some() {
            return Err(Error::Camera(
                "Cannot change preview size while streaming".to_string(),
            ));
        }

        let mut fmt = self
            .device
            .format()
            .map_err(|e| v4l_error("Failed to get format", e))?;
        fmt.width = size.width;
        fmt.height = size.height;
        fmt.fourcc = self.config.format.to_fourcc();

        // The driver may adjust the size; callers read it back.
        self.device
            .set_format(&fmt)
            .map_err(|e| v4l_error("Failed to set format", e))?;
        Ok(())
    }

    fn set_display_rotation(&mut self, degrees: u32) -> Result<()> {
        if degrees % 90 != 0 {
            return Err(Error::Camera(format!(
                "Unsupported display rotation {degrees}, expected a multiple of 90"
            )));
        }
        self.rotation = degrees % 360;
        Ok(())
    }

    fn supported_focus_modes(&self) -> Result<Vec<FocusMode>> {
        let controls = self.controls();
        let mut modes = Vec::new();
        if controls.contains(&V4L2_CID_FOCUS_AUTO) {
            modes.push(FocusMode::Auto);
        }
        if controls.contains(&V4L2_CID_FOCUS_ABSOLUTE) || modes.is_empty() {
            modes.push(FocusMode::Fixed);
        }
        Ok(modes)
    }

    fn set_focus_mode(&mut self, mode: FocusMode) -> Result<()> {
        let auto = match mode {
            FocusMode::Auto | FocusMode::ContinuousVideo => true,
            FocusMode::Fixed | FocusMode::Infinity => false,
            other => {
                return Err(Error::Camera(format!(
                    "Focus mode {other} is not available on V4L2 devices"
                )));
            }
        };

        if !self.controls().contains(&V4L2_CID_FOCUS_AUTO) {
            return if auto {
                Err(Error::Camera("Device has no auto-focus control".to_string()))
            } else {
                Ok(())
            };
        }

        self.device
            .set_control(Control {
                id: V4L2_CID_FOCUS_AUTO,
                value: Value::Boolean(auto),
            })
            .map_err(|e| v4l_error("Failed to set focus mode", e))
    }

    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        // SAFETY: the boxed device is never moved out of `self` and outlives the
        // stream: `stop` and field drop order release the stream first.
        let static_device: &'static Device =
            unsafe { mem::transmute::<&Device, &'static Device>(self.device.as_ref()) };

        let buffer_count = self.config.buffer_count.max(2);
        let stream = MmapStream::with_buffers(static_device, Type::VideoCapture, buffer_count)
            .map_err(|e| Error::FrameCapture(format!("Failed to create stream: {}", e)))?;
        self.stream = Some(stream);

        tracing::info!(device = %self.info.path, buffers = buffer_count, "Camera streaming");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.stream.take().is_some() {
            tracing::info!(device = %self.info.path, "Camera stopped");
        }
        Ok(())
    }
}

fn resolve_device(config: &CameraConfig) -> Result<CameraDevice> {
    if let Some(ref name) = config.device_name {
        return find_device_by_name(name);
    }

    let mut devices = list_devices()?.into_iter();
    match config.device_index {
        Some(index) => devices.find(|d| d.index == index).ok_or_else(|| {
            Error::CameraNotFound(format!("Device /dev/video{} not found", index))
        }),
        None => devices
            .next()
            .ok_or_else(|| Error::CameraNotFound("No cameras available".to_string())),
    }
}

fn decode_frame(format: PixelFormat, buf: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    match format {
        PixelFormat::Mjpeg => image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
            .map_err(|e| Error::Image(format!("MJPEG decode failed: {}", e))),
        PixelFormat::Yuyv => yuyv_luma(buf, width, height).map(DynamicImage::ImageLuma8),
        PixelFormat::Rgb24 => {
            let expected = width as usize * height as usize * 3;
            let data = buf
                .get(..expected)
                .ok_or_else(|| Error::Image("Short RGB24 buffer".to_string()))?;
            image::RgbImage::from_raw(width, height, data.to_vec())
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| Error::Image("Failed to create RGB image".to_string()))
        }
    }
}

/// Extract the luma plane of a packed YUYV buffer.
///
/// Detectors only need luminance, so chroma is discarded.
fn yuyv_luma(yuyv: &[u8], width: u32, height: u32) -> Result<GrayImage> {
    let pixels = width as usize * height as usize;
    if yuyv.len() < pixels * 2 {
        return Err(Error::Image(format!(
            "YUYV buffer holds {} bytes, {}x{} needs {}",
            yuyv.len(),
            width,
            height,
            pixels * 2
        )));
    }

    let luma: Vec<u8> = yuyv[..pixels * 2].iter().step_by(2).copied().collect();
    GrayImage::from_raw(width, height, luma)
        .ok_or_else(|| Error::Image("Failed to create grayscale image from YUYV".to_string()))
}

fn rotate(img: DynamicImage, degrees: u32) -> DynamicImage {
    match degrees % 360 {
        90 => img.rotate90(),
        180 => img.rotate180(),
        270 => img.rotate270(),
        _ => img,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_keeps_every_other_byte() {
        let buf = [10u8, 128, 20, 128, 30, 128, 40, 128];
        let gray = yuyv_luma(&buf, 2, 2).unwrap();
        assert_eq!(gray.into_raw(), vec![10, 20, 30, 40]);
    }

    #[test]
    fn short_yuyv_is_rejected() {
        assert!(yuyv_luma(&[0u8; 6], 2, 2).is_err());
    }

    #[test]
    fn rotation_swaps_dimensions() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(4, 2));
        let rotated = rotate(img, 90);
        assert_eq!((rotated.width(), rotated.height()), (2, 4));
    }

    #[test]
    fn missing_node_is_not_accessible() {
        assert!(!device_accessible("/dev/video-does-not-exist"));
    }

    #[test]
    fn test_list_devices() {
        // Only meaningful when V4L2 devices are present
        match list_devices() {
            Ok(devices) => {
                for dev in devices {
                    println!("  - {} at {}", dev.name, dev.path);
                }
            }
            Err(e) => println!("No cameras found (expected on CI): {}", e),
        }
    }
}
