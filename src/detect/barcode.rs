//! Barcode detectors built on rqrr

use super::{BoundingBox, Detection, Detector, DetectorError, Frame, GenericBarcodeMode, GenericBarcodeOptions};
use image::GrayImage;

/// Symbology name reported for QR codes
pub const QR_FORMAT: &str = "qr";

fn gray_frame(frame: &Frame) -> Result<GrayImage, DetectorError> {
    frame
        .to_gray_image()
        .map_err(|e| DetectorError::InvalidFrame(e.to_string()))
}

fn grid_bounds<G>(grid: &rqrr::Grid<G>) -> Option<BoundingBox> {
    BoundingBox::enclosing(grid.bounds.iter().map(|p| (p.x as f32, p.y as f32)))
}

fn normalize_formats(formats: &[String]) -> Vec<String> {
    formats
        .iter()
        .map(|f| f.trim().to_ascii_lowercase())
        .filter(|f| !f.is_empty())
        .collect()
}

/// Barcode decoder with a code-type allow-list.
///
/// Only QR codes can be decoded; other symbologies may appear in the
/// allow-list but never produce results. Payloads already reported since the
/// last [`Detector::reset`] are not reported again, so a code printed twice
/// in one frame yields one detection.
pub struct BarcodeDecoder {
    allowed: Vec<String>,
    seen: Vec<String>,
}

impl BarcodeDecoder {
    /// Create a decoder accepting the given code types (e.g. `["qr"]`)
    pub fn new(allowed_types: &[String]) -> Self {
        Self {
            allowed: normalize_formats(allowed_types),
            seen: Vec::new(),
        }
    }

    /// Whether results of this code type are emitted
    pub fn is_allowed(&self, format: &str) -> bool {
        self.allowed.iter().any(|a| a.eq_ignore_ascii_case(format))
    }

    /// Payload of the most recent decode since the last reset
    pub fn last_payload(&self) -> Option<&str> {
        self.seen.last().map(String::as_str)
    }

    /// Decode every QR code in a grayscale image
    pub fn decode_gray(&mut self, img: GrayImage) -> Vec<Detection> {
        if !self.is_allowed(QR_FORMAT) {
            return Vec::new();
        }

        let mut prepared = rqrr::PreparedImage::prepare(img);
        let grids = prepared.detect_grids();

        let mut detections = Vec::with_capacity(grids.len());
        for grid in grids {
            match grid.decode() {
                Ok((meta, content)) => {
                    if self.seen.contains(&content) {
                        tracing::trace!("Repeated QR payload ({} bytes)", content.len());
                        continue;
                    }
                    tracing::debug!(
                        "Decoded QR: version={:?}, ecc_level={:?}, length={}",
                        meta.version,
                        meta.ecc_level,
                        content.len()
                    );
                    self.seen.push(content.clone());
                    detections.push(Detection::Barcode {
                        format: QR_FORMAT.to_string(),
                        data: Some(content),
                        bounds: grid_bounds(&grid),
                    });
                }
                Err(e) => {
                    tracing::warn!("Failed to decode one QR code: {:?}", e);
                }
            }
        }

        detections
    }
}

impl Default for BarcodeDecoder {
    fn default() -> Self {
        Self::new(&[QR_FORMAT.to_string()])
    }
}

impl Detector for BarcodeDecoder {
    fn process(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let gray = gray_frame(frame)?;
        Ok(self.decode_gray(gray))
    }

    fn reset(&mut self) {
        self.seen.clear();
    }

    fn release(&mut self) {
        self.seen.clear();
    }
}

/// Locates QR symbols without decoding them.
///
/// In [`GenericBarcodeMode::Alternate`] every second scan runs on the
/// inverted image, starting with the frame as captured.
pub struct QrLocator {
    options: GenericBarcodeOptions,
    scans: u64,
}

impl QrLocator {
    /// Create a locator with the given options
    pub fn new(options: GenericBarcodeOptions) -> Self {
        let formats = normalize_formats(&options.formats);
        Self {
            options: GenericBarcodeOptions { formats, ..options },
            scans: 0,
        }
    }

    /// Locator options
    pub fn options(&self) -> &GenericBarcodeOptions {
        &self.options
    }

    /// Whether the next scan runs on the inverted image
    pub fn inverts_next(&self) -> bool {
        match self.options.mode {
            GenericBarcodeMode::Normal => false,
            GenericBarcodeMode::Inverted => true,
            GenericBarcodeMode::Alternate => self.scans % 2 == 1,
        }
    }

    /// Bounding boxes of every QR grid in a grayscale image
    pub fn locate_gray(&mut self, img: GrayImage) -> Vec<Detection> {
        let formats = &self.options.formats;
        if !formats.is_empty() && !formats.iter().any(|f| f == QR_FORMAT) {
            return Vec::new();
        }

        let img = if self.inverts_next() { invert(img) } else { img };
        self.scans = self.scans.wrapping_add(1);

        let mut prepared = rqrr::PreparedImage::prepare(img);
        prepared
            .detect_grids()
            .iter()
            .map(|grid| Detection::Barcode {
                format: QR_FORMAT.to_string(),
                data: None,
                bounds: grid_bounds(grid),
            })
            .collect()
    }
}

impl Default for QrLocator {
    fn default() -> Self {
        Self::new(GenericBarcodeOptions::default())
    }
}

impl Detector for QrLocator {
    fn process(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let gray = gray_frame(frame)?;
        Ok(self.locate_gray(gray))
    }
}

fn invert(mut img: GrayImage) -> GrayImage {
    image::imageops::invert(&mut img);
    img
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Luma};
    use qrcode::QrCode;

    fn qr_frame(data: &str) -> Frame {
        let code = QrCode::new(data.as_bytes()).unwrap();
        let img = code.render::<Luma<u8>>().min_dimensions(400, 400).build();
        Frame::from_image(1, &DynamicImage::ImageLuma8(img))
    }

    #[test]
    fn decodes_allowed_qr() {
        let mut decoder = BarcodeDecoder::default();
        let detections = decoder.process(&qr_frame("hello scanner")).unwrap();

        assert_eq!(detections.len(), 1);
        match &detections[0] {
            Detection::Barcode { format, data, bounds } => {
                assert_eq!(format, "qr");
                assert_eq!(data.as_deref(), Some("hello scanner"));
                assert!(bounds.is_some());
            }
            other => panic!("unexpected detection {other:?}"),
        }
        assert_eq!(decoder.last_payload(), Some("hello scanner"));
    }

    #[test]
    fn reset_clears_hint_state() {
        let mut decoder = BarcodeDecoder::default();
        decoder.process(&qr_frame("first")).unwrap();
        decoder.reset();
        assert!(decoder.last_payload().is_none());
    }

    #[test]
    fn repeated_payloads_wait_for_reset() {
        let mut decoder = BarcodeDecoder::default();
        let frame = qr_frame("same code");
        assert_eq!(decoder.process(&frame).unwrap().len(), 1);
        assert!(decoder.process(&frame).unwrap().is_empty());

        decoder.reset();
        assert_eq!(decoder.process(&frame).unwrap().len(), 1);
    }

    #[test]
    fn disallowed_types_are_dropped() {
        let mut decoder = BarcodeDecoder::new(&["ean13".to_string()]);
        let detections = decoder.process(&qr_frame("hidden")).unwrap();
        assert!(detections.is_empty());
        assert!(decoder.is_allowed("EAN13"));
    }

    #[test]
    fn blank_frame_yields_nothing() {
        let mut decoder = BarcodeDecoder::default();
        let frame = Frame::from_image(1, &DynamicImage::ImageLuma8(GrayImage::new(64, 64)));
        assert!(decoder.process(&frame).unwrap().is_empty());
    }

    #[test]
    fn locator_reports_bounds_without_data() {
        let mut locator = QrLocator::default();
        let detections = locator.process(&qr_frame("located")).unwrap();

        assert_eq!(detections.len(), 1);
        match &detections[0] {
            Detection::Barcode { data, bounds, .. } => {
                assert!(data.is_none());
                let bounds = bounds.unwrap();
                assert!(bounds.width > 0.0 && bounds.height > 0.0);
            }
            other => panic!("unexpected detection {other:?}"),
        }
    }

    #[test]
    fn alternate_mode_inverts_every_second_scan() {
        let mut locator = QrLocator::new(GenericBarcodeOptions {
            mode: GenericBarcodeMode::Alternate,
            ..Default::default()
        });
        let frame = qr_frame("alternating");
        let inverted = {
            let code = QrCode::new(b"alternating").unwrap();
            let img = code.render::<Luma<u8>>().min_dimensions(400, 400).build();
            Frame::from_image(2, &DynamicImage::ImageLuma8(invert(img)))
        };

        assert!(!locator.inverts_next());
        assert_eq!(locator.process(&frame).unwrap().len(), 1);
        assert!(locator.inverts_next());
        assert_eq!(locator.process(&inverted).unwrap().len(), 1);
        assert!(!locator.inverts_next());
    }

    #[test]
    fn inverted_mode_always_inverts() {
        let locator = QrLocator::new(GenericBarcodeOptions {
            mode: GenericBarcodeMode::Inverted,
            ..Default::default()
        });
        assert!(locator.inverts_next());
    }

    #[test]
    fn locator_honours_format_mask() {
        let mut locator = QrLocator::new(GenericBarcodeOptions {
            formats: vec!["Code128".to_string()],
            ..Default::default()
        });
        assert!(locator.process(&qr_frame("masked")).unwrap().is_empty());
    }
}
