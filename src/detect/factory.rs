//! Building detector adapters from settings

use super::{BarcodeDecoder, Detector, DetectorKind, DetectorSettings, FaceDetectorOptions, QrLocator};
use std::fmt;

type FaceFactory = Box<dyn Fn(&FaceDetectorOptions) -> Box<dyn Detector> + Send + Sync>;
type TextFactory = Box<dyn Fn() -> Box<dyn Detector> + Send + Sync>;

/// Constructors for every detector kind.
///
/// Barcode adapters are built in. Face and text recognition have no built-in
/// backend; hosts that provide one install a constructor, which receives the
/// configured options each time the adapter is built.
#[derive(Default)]
pub struct DetectorFactories {
    face: Option<FaceFactory>,
    text: Option<TextFactory>,
}

impl DetectorFactories {
    /// Factories for the built-in barcode adapters only
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the face adapter constructor
    pub fn with_face<F, D>(mut self, factory: F) -> Self
    where
        F: Fn(&FaceDetectorOptions) -> D + Send + Sync + 'static,
        D: Detector + 'static,
    {
        self.face = Some(Box::new(move |options: &FaceDetectorOptions| -> Box<dyn Detector> {
            Box::new(factory(options))
        }));
        self
    }

    /// Install the text recognizer constructor
    pub fn with_text<F, D>(mut self, factory: F) -> Self
    where
        F: Fn() -> D + Send + Sync + 'static,
        D: Detector + 'static,
    {
        self.text = Some(Box::new(move || -> Box<dyn Detector> { Box::new(factory()) }));
        self
    }

    /// Whether an adapter can be built for the kind
    pub fn supports(&self, kind: DetectorKind) -> bool {
        match kind {
            DetectorKind::BarcodeDecode | DetectorKind::GenericBarcode => true,
            DetectorKind::Face => self.face.is_some(),
            DetectorKind::Text => self.text.is_some(),
        }
    }

    /// Build the adapter for `kind` from the current settings
    pub fn build(&self, kind: DetectorKind, settings: &DetectorSettings) -> Option<Box<dyn Detector>> {
        match kind {
            DetectorKind::BarcodeDecode => Some(Box::new(BarcodeDecoder::new(&settings.barcode_types))),
            DetectorKind::GenericBarcode => {
                Some(Box::new(QrLocator::new(settings.generic_barcode.clone())))
            }
            DetectorKind::Face => self.face.as_ref().map(|factory| factory(&settings.face)),
            DetectorKind::Text => self.text.as_ref().map(|factory| factory()),
        }
    }
}

impl fmt::Debug for DetectorFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectorFactories")
            .field("face", &self.face.is_some())
            .field("text", &self.text.is_some())
            .finish()
    }
}
