//! Frame analysis pipelines
//!
//! Each [`DetectorKind`] is an independent pipeline with its own gate: at most
//! one frame per kind is being analysed at any time, and frames that arrive
//! while a kind is busy are dropped for that kind only.

mod barcode;
mod factory;
mod frame;
mod gate;
mod scheduler;
mod settings;

pub use barcode::{BarcodeDecoder, QrLocator};
pub use factory::DetectorFactories;
pub use frame::{Frame, FrameFormat};
pub use gate::{DetectorGate, GateGuard};
pub use scheduler::{Completion, DetectionScheduler, SubmitOutcome, SubmitReport};
pub use settings::{
    DetectorSettings, FaceClassifications, FaceDetectorMode, FaceDetectorOptions, FaceLandmarks,
    GenericBarcodeMode, GenericBarcodeOptions,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// An independently enabled detection pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorKind {
    /// Barcode decoding with a code-type allow-list
    BarcodeDecode,
    /// Barcode detection without symbology filtering
    GenericBarcode,
    /// Face detection
    Face,
    /// Text recognition
    Text,
}

impl DetectorKind {
    /// Every kind, in gate-table order
    pub const ALL: [DetectorKind; 4] = [
        DetectorKind::BarcodeDecode,
        DetectorKind::GenericBarcode,
        DetectorKind::Face,
        DetectorKind::Text,
    ];

    /// Stable identifier used in configuration and events
    pub fn as_str(self) -> &'static str {
        match self {
            DetectorKind::BarcodeDecode => "barcode-decode",
            DetectorKind::GenericBarcode => "generic-barcode",
            DetectorKind::Face => "face",
            DetectorKind::Text => "text",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            DetectorKind::BarcodeDecode => 0,
            DetectorKind::GenericBarcode => 1,
            DetectorKind::Face => 2,
            DetectorKind::Text => 3,
        }
    }

    /// Whether the adapter's accumulated state is cleared after every task
    pub fn resets_on_completion(self) -> bool {
        matches!(self, DetectorKind::BarcodeDecode)
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectorKind {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "barcode-decode" | "barcode" | "barcodes" => Ok(DetectorKind::BarcodeDecode),
            "generic-barcode" | "barcode-detect" => Ok(DetectorKind::GenericBarcode),
            "face" | "faces" => Ok(DetectorKind::Face),
            "text" => Ok(DetectorKind::Text),
            other => Err(format!(
                "Unknown detector kind '{other}', expected barcode-decode, generic-barcode, face or text"
            )),
        }
    }
}

/// Axis-aligned box in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge
    pub x: f32,
    /// Top edge
    pub y: f32,
    /// Box width
    pub width: f32,
    /// Box height
    pub height: f32,
}

impl BoundingBox {
    /// Smallest box containing every point
    pub fn enclosing(points: impl IntoIterator<Item = (f32, f32)>) -> Option<Self> {
        let mut iter = points.into_iter();
        let (x0, y0) = iter.next()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (x0, y0, x0, y0);
        for (x, y) in iter {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        Some(Self {
            x: min_x,
            y: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        })
    }
}

/// A single result produced by a detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Detection {
    /// A barcode, decoded or merely located
    Barcode {
        /// Symbology name, e.g. `qr`
        format: String,
        /// Decoded contents, absent when the code was only located
        data: Option<String>,
        /// Where the code sits in the frame
        bounds: Option<BoundingBox>,
    },
    /// A detected face
    Face {
        /// Face bounds
        bounds: BoundingBox,
        /// Tracking id when tracking is enabled
        face_id: Option<u32>,
        /// Head rotation around the axis pointing out of the image
        roll_angle: Option<f32>,
        /// Head rotation around the vertical axis
        yaw_angle: Option<f32>,
        /// Probability the face is smiling, when classifications are enabled
        smiling_probability: Option<f32>,
    },
    /// A block of recognized text
    Text {
        /// Recognized text
        value: String,
        /// Block bounds
        bounds: Option<BoundingBox>,
    },
}

/// Failure reported by a detector adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectorError {
    /// The detector is not ready (models missing, not initialised)
    #[error("detector not operational: {0}")]
    NotOperational(String),

    /// The frame could not be interpreted
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Analysis ran and failed
    #[error("{0}")]
    Failed(String),
}

/// A frame analysis adapter for one detector kind.
///
/// The scheduler never runs two tasks of the same kind at once, so
/// implementations do not need to be reentrant. `process` must always
/// return; a detector that hangs starves its kind.
pub trait Detector: Send {
    /// Analyse one frame
    fn process(&mut self, frame: &Frame) -> std::result::Result<Vec<Detection>, DetectorError>;

    /// Clear accumulated hint state before the next frame
    fn reset(&mut self) {}

    /// Free resources; called when the session is torn down
    fn release(&mut self) {}
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn process(&mut self, frame: &Frame) -> std::result::Result<Vec<Detection>, DetectorError> {
        (**self).process(frame)
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_strings() {
        for kind in DetectorKind::ALL {
            assert_eq!(kind.as_str().parse::<DetectorKind>(), Ok(kind));
        }
        assert_eq!("Faces".parse::<DetectorKind>(), Ok(DetectorKind::Face));
        assert!("lidar".parse::<DetectorKind>().is_err());
    }

    #[test]
    fn indices_are_distinct() {
        let mut seen = [false; 4];
        for kind in DetectorKind::ALL {
            assert!(!seen[kind.index()]);
            seen[kind.index()] = true;
        }
    }

    #[test]
    fn only_barcode_decode_resets() {
        assert!(DetectorKind::BarcodeDecode.resets_on_completion());
        assert!(!DetectorKind::Face.resets_on_completion());
    }

    #[test]
    fn enclosing_box() {
        let bounds = BoundingBox::enclosing([(10.0, 20.0), (30.0, 5.0), (15.0, 40.0)]).unwrap();
        assert_eq!(bounds.x, 10.0);
        assert_eq!(bounds.y, 5.0);
        assert_eq!(bounds.width, 20.0);
        assert_eq!(bounds.height, 35.0);
        assert!(BoundingBox::enclosing(std::iter::empty()).is_none());
    }

    #[test]
    fn detection_serializes_with_type_tag() {
        let detection = Detection::Text {
            value: "hello".to_string(),
            bounds: None,
        };
        let value = serde_json::to_value(&detection).unwrap();
        assert_eq!(value["type"], "text");
        assert_eq!(value["value"], "hello");
    }
}
