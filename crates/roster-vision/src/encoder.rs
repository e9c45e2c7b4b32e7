use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use image::GrayImage;
use roster_core::{EncodedFace, EncoderError, FaceEncoder};
use std::path::Path;

/// SCRFD detection model file name inside the model directory.
pub const DETECTOR_MODEL: &str = "det_10g.onnx";
/// ArcFace recognition model file name inside the model directory.
pub const RECOGNIZER_MODEL: &str = "w600k_r50.onnx";

impl From<DetectorError> for EncoderError {
    fn from(err: DetectorError) -> Self {
        EncoderError::Backend(format!("detector: {err}"))
    }
}

impl From<RecognizerError> for EncoderError {
    fn from(err: RecognizerError) -> Self {
        EncoderError::Backend(format!("recognizer: {err}"))
    }
}

/// SCRFD + ArcFace pipeline behind the core `FaceEncoder` seam.
pub struct OnnxEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxEncoder {
    /// Load both models from `model_dir`. Fails fast if either is missing.
    pub fn load(model_dir: &Path) -> Result<Self, EncoderError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL))?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceEncoder for OnnxEncoder {
    fn encode(&mut self, image: &GrayImage) -> Result<Vec<EncodedFace>, EncoderError> {
        let boxes = self.detector.detect(image)?;
        let mut faces = Vec::with_capacity(boxes.len());

        for bbox in boxes {
            match self.recognizer.embed(image, &bbox) {
                Ok(embedding) => faces.push(EncodedFace { bbox, embedding }),
                Err(RecognizerError::EmptyCrop) => {
                    tracing::debug!(?bbox, "face box outside frame; skipped");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(faces)
    }
}
