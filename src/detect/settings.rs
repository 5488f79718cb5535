//! Per-kind detector options

use super::DetectorKind;
use serde::{Deserialize, Serialize};

/// Which kinds are enabled, plus the options handed to their adapters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Decode barcodes restricted to `barcode_types`
    pub scan_barcodes: bool,
    /// Detect barcodes of any type
    pub detect_generic_barcodes: bool,
    /// Detect faces
    pub detect_faces: bool,
    /// Recognize text
    pub recognize_text: bool,
    /// Code types reported by the barcode decoder (e.g. `qr`, `ean13`)
    pub barcode_types: Vec<String>,
    /// Face detector configuration
    pub face: FaceDetectorOptions,
    /// Generic barcode detector configuration
    pub generic_barcode: GenericBarcodeOptions,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            scan_barcodes: false,
            detect_generic_barcodes: false,
            detect_faces: false,
            recognize_text: false,
            barcode_types: vec!["qr".to_string()],
            face: FaceDetectorOptions::default(),
            generic_barcode: GenericBarcodeOptions::default(),
        }
    }
}

impl DetectorSettings {
    /// Whether the given kind is switched on
    pub fn is_enabled(&self, kind: DetectorKind) -> bool {
        match kind {
            DetectorKind::BarcodeDecode => self.scan_barcodes,
            DetectorKind::GenericBarcode => self.detect_generic_barcodes,
            DetectorKind::Face => self.detect_faces,
            DetectorKind::Text => self.recognize_text,
        }
    }

    /// Switch a kind on or off
    pub fn set_enabled(&mut self, kind: DetectorKind, enabled: bool) {
        match kind {
            DetectorKind::BarcodeDecode => self.scan_barcodes = enabled,
            DetectorKind::GenericBarcode => self.detect_generic_barcodes = enabled,
            DetectorKind::Face => self.detect_faces = enabled,
            DetectorKind::Text => self.recognize_text = enabled,
        }
    }

    /// Kinds currently switched on
    pub fn enabled_kinds(&self) -> Vec<DetectorKind> {
        DetectorKind::ALL
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }
}

/// Speed/accuracy trade-off for face detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceDetectorMode {
    /// Favour latency
    #[default]
    Fast,
    /// Favour accuracy
    Accurate,
}

/// Landmark extraction for face detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceLandmarks {
    /// No landmarks
    #[default]
    None,
    /// Eyes, ears, nose, mouth, cheeks
    All,
}

/// Classification (smiling, eyes open) for face detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceClassifications {
    /// No classification
    #[default]
    None,
    /// All classifications
    All,
}

/// Face detector configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceDetectorOptions {
    /// Detection mode
    pub mode: FaceDetectorMode,
    /// Landmark extraction
    pub landmarks: FaceLandmarks,
    /// Classification
    pub classifications: FaceClassifications,
    /// Keep stable ids for faces across frames
    pub tracking: bool,
}

impl Default for FaceDetectorOptions {
    fn default() -> Self {
        Self {
            mode: FaceDetectorMode::Fast,
            landmarks: FaceLandmarks::None,
            classifications: FaceClassifications::None,
            tracking: true,
        }
    }
}

/// How the generic barcode detector treats the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenericBarcodeMode {
    /// Scan the frame as captured
    #[default]
    Normal,
    /// Alternate between normal and inverted frames
    Alternate,
    /// Scan the inverted frame (light codes on dark backgrounds)
    Inverted,
}

/// Generic barcode detector configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenericBarcodeOptions {
    /// Symbologies to look for; empty means all
    pub formats: Vec<String>,
    /// Frame handling mode
    pub mode: GenericBarcodeMode,
}

impl Default for GenericBarcodeOptions {
    fn default() -> Self {
        Self {
            formats: Vec::new(),
            mode: GenericBarcodeMode::Normal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_nothing() {
        let settings = DetectorSettings::default();
        assert!(settings.enabled_kinds().is_empty());
        assert_eq!(settings.barcode_types, vec!["qr".to_string()]);
        assert!(settings.face.tracking);
    }

    #[test]
    fn toggling_one_kind_leaves_others() {
        let mut settings = DetectorSettings::default();
        settings.set_enabled(DetectorKind::Face, true);
        settings.set_enabled(DetectorKind::Text, true);
        settings.set_enabled(DetectorKind::Face, false);
        assert_eq!(settings.enabled_kinds(), vec![DetectorKind::Text]);
    }

    #[test]
    fn parses_from_toml() {
        let settings: DetectorSettings = toml::from_str(
            r#"
            scan_barcodes = true
            barcode_types = ["qr", "ean13"]

            [face]
            mode = "accurate"
            tracking = false

            [generic_barcode]
            mode = "inverted"
            "#,
        )
        .unwrap();
        assert!(settings.scan_barcodes);
        assert_eq!(settings.barcode_types.len(), 2);
        assert_eq!(settings.face.mode, FaceDetectorMode::Accurate);
        assert!(!settings.face.tracking);
        assert_eq!(settings.generic_barcode.mode, GenericBarcodeMode::Inverted);
    }
}
